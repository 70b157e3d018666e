//! Property-based framing and reply-interpretation tests (proptest).

use proptest::prelude::*;
use serde_json::{json, Value as Json};

use ovsdb_client::protocol::JsonFramer;
use ovsdb_client::{ResultSlot, TransactResults};

/// A JSON-RPC shaped message with nested params.
fn message() -> impl Strategy<Value = Json> {
    let atom = prop_oneof![
        any::<i64>().prop_map(Json::from),
        "[a-zA-Z0-9 {}\\[\\]\"\\\\]{0,16}".prop_map(Json::from),
        any::<bool>().prop_map(Json::from),
    ];
    let params = prop::collection::vec(atom, 0..6);
    (any::<u32>(), "[a-z_]{1,12}", params).prop_map(|(id, method, params)| {
        json!({"id": id, "method": method, "params": [params, {"nested": {"deep": [1, [2, [3]]]}}]})
    })
}

/// Feed `bytes` to a framer in chunks cut at `cuts` and collect every message.
fn frame(bytes: &[u8], cuts: &[usize]) -> Vec<Json> {
    let mut framer = JsonFramer::new(1 << 20);
    let mut out = Vec::new();
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    points.push(0);
    points.push(bytes.len());
    points.sort_unstable();
    points.dedup();
    for window in points.windows(2) {
        framer.push(&bytes[window[0]..window[1]]);
        while let Some(message) = framer.next_message().unwrap() {
            out.push(message);
        }
    }
    out
}

proptest! {
    #[test]
    fn prop_framer_recovers_messages_at_any_split(
        messages in prop::collection::vec(message(), 1..8),
        cuts in prop::collection::vec(any::<usize>(), 0..24),
        pretty in any::<bool>(),
    ) {
        let mut bytes = Vec::new();
        for m in &messages {
            let text = if pretty {
                serde_json::to_string_pretty(m).unwrap()
            } else {
                serde_json::to_string(m).unwrap()
            };
            bytes.extend_from_slice(text.as_bytes());
            if pretty {
                bytes.push(b'\n');
            }
        }
        prop_assert_eq!(frame(&bytes, &cuts), messages);
    }

    #[test]
    fn prop_incomplete_message_yields_nothing(message in message(), keep in 1usize..64) {
        let text = serde_json::to_string(&message).unwrap();
        let keep = keep.min(text.len() - 1);
        let mut framer = JsonFramer::new(1 << 20);
        framer.push(&text.as_bytes()[..keep]);
        prop_assert_eq!(framer.next_message().unwrap(), None);
        framer.push(&text.as_bytes()[keep..]);
        prop_assert_eq!(framer.next_message().unwrap(), Some(message));
    }

    #[test]
    fn prop_results_truncate_at_first_error(operations in 1usize..12, failure in any::<prop::sample::Index>()) {
        let failed_at = failure.index(operations);
        let reply: Vec<Json> = (0..operations)
            .map(|i| match i.cmp(&failed_at) {
                std::cmp::Ordering::Less => json!({"count": i}),
                std::cmp::Ordering::Equal => json!({"error": "constraint violation", "details": "x"}),
                std::cmp::Ordering::Greater => Json::Null,
            })
            .collect();

        let results = TransactResults::from_reply(&Json::Array(reply), operations).unwrap();
        prop_assert_eq!(results.len(), failed_at + 1);
        prop_assert_eq!(results.is_truncated(), failed_at + 1 < operations);
        prop_assert_eq!(results.first_error().map(|(i, _)| i), Some(failed_at));
        for i in 0..operations {
            let executed = matches!(results.slot(i), ResultSlot::Executed(_));
            prop_assert_eq!(executed, i <= failed_at);
        }
    }
}
