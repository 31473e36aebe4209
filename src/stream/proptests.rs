//! Property-based tests for frame decoding and message accumulation

use super::*;
use proptest::prelude::*;

fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 .,!?']{1,24}",
        "\\PC{1,12}",
        Just("line one\nline two".to_string()),
        Just("quote \" and \\ slash".to_string()),
    ]
}

/// Encoded frames for the fragments followed by a completion marker
fn encode_exchange(fragments: &[String]) -> Vec<u8> {
    let mut out = String::new();
    for fragment in fragments {
        out.push_str(&encode_frame(&StreamEvent::content(fragment.as_str())));
    }
    out.push_str(&encode_frame(&StreamEvent::Done));
    out.into_bytes()
}

fn split_at_points(bytes: &[u8], mut points: Vec<usize>) -> Vec<Vec<u8>> {
    points.retain(|p| *p > 0 && *p < bytes.len());
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for point in points {
        chunks.push(bytes[start..point].to_vec());
        start = point;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_events(
        fragments in proptest::collection::vec(arb_fragment(), 0..8),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let bytes = encode_exchange(&fragments);
        let whole = FrameDecoder::new().push(&bytes);

        let points = cuts.iter().map(|c| c.index(bytes.len() + 1)).collect();
        let mut decoder = FrameDecoder::new();
        let mut chunked = Vec::new();
        for chunk in split_at_points(&bytes, points) {
            chunked.extend(decoder.push(&chunk));
        }

        prop_assert_eq!(whole, chunked);
    }

    #[test]
    fn prop_single_byte_delivery_matches_whole(
        fragments in proptest::collection::vec(arb_fragment(), 1..5),
    ) {
        let bytes = encode_exchange(&fragments);
        let whole = FrameDecoder::new().push(&bytes);

        let mut decoder = FrameDecoder::new();
        let mut chunked = Vec::new();
        for byte in &bytes {
            chunked.extend(decoder.push(std::slice::from_ref(byte)));
        }

        prop_assert_eq!(whole, chunked);
    }

    #[test]
    fn prop_decoded_fragments_round_trip_through_accumulator(
        fragments in proptest::collection::vec(arb_fragment(), 0..8),
    ) {
        let events = FrameDecoder::new().push(&encode_exchange(&fragments));
        prop_assert_eq!(events.last(), Some(&StreamEvent::Done));

        let mut acc = MessageAccumulator::new();
        let mut outcome = None;
        for event in events {
            outcome = acc.apply(event);
        }

        prop_assert_eq!(outcome, Some(AccumulatorOutcome::Completed(fragments.concat())));
    }

    #[test]
    fn prop_nothing_follows_a_terminal_event(
        before in proptest::collection::vec(arb_fragment(), 0..4),
        after in proptest::collection::vec(arb_fragment(), 1..4),
        message in "[a-z ]{1,20}",
    ) {
        let mut input = String::new();
        for fragment in &before {
            input.push_str(&encode_frame(&StreamEvent::content(fragment.as_str())));
        }
        input.push_str(&encode_frame(&StreamEvent::error(message.as_str())));
        for fragment in &after {
            input.push_str(&encode_frame(&StreamEvent::content(fragment.as_str())));
        }

        let events = FrameDecoder::new().push(input.as_bytes());
        prop_assert_eq!(events.len(), before.len() + 1);
        prop_assert_eq!(events.last(), Some(&StreamEvent::error(message)));
    }
}
