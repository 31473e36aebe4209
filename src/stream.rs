//! Streaming exchange plumbing
//!
//! Turns an incrementally delivered provider response into discrete
//! events and rebuilds the assistant message from them.

mod accumulator;
mod frame;

#[cfg(test)]
mod proptests;

pub use accumulator::{accumulate, AccumulatorOutcome, MessageAccumulator};
pub use frame::{decode_stream, encode_frame, FrameBuffer, FrameDecoder, FrameError, StreamEvent};
