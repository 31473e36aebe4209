//! Session state machine
//!
//! Pure transitions over a session snapshot: the runtime feeds events in,
//! swaps in the new session, and executes the returned effects.

mod effect;
pub mod event;
mod policy;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, Notice};
pub use event::Event;
pub use policy::AdvancementPolicy;
pub use state::{Progress, Role, Session, SessionContext, SessionPhase, SessionStatus, Turn};
pub use transition::{transition, TransitionError};
