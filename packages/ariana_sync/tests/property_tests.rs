use proptest::prelude::*;
use serde_json::{Value, json};
use std::time::Duration;

use ariana_sync::backoff::Backoff;
use ariana_sync::models::ChatEvent;
use ariana_sync::protocol::{Channel, DeltaOp, Params, subscription_key};
use ariana_sync::reconcile::EventLog;

fn arb_channel() -> impl Strategy<Value = Channel> {
    prop_oneof![
        Just(Channel::AgentEvents),
        Just(Channel::AgentSummaries),
        Just(Channel::AgentsList),
        Just(Channel::AgentAccesses),
        Just(Channel::ProjectCollaborators),
        Just(Channel::ProjectIssues),
        Just(Channel::GithubTokenHealth),
        Just(Channel::ProjectsList),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9-]{0,12}".prop_map(Value::from),
        prop::collection::vec(any::<u8>(), 0..4).prop_map(|v| json!(v)),
    ]
}

fn arb_pairs() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-zA-Z]{1,8}", arb_value(), 0..6)
        .prop_map(|m| m.into_iter().collect())
}

fn params_from(pairs: &[(String, Value)]) -> Params {
    let mut p = Params::new();
    for (k, v) in pairs {
        p.insert(k.clone(), v.clone());
    }
    p
}

// --- Subscription identity ---

proptest! {
    #[test]
    fn key_ignores_insertion_order(
        channel in arb_channel(),
        (pairs, shuffled) in arb_pairs().prop_flat_map(|pairs| {
            let shuffled = Just(pairs.clone()).prop_shuffle();
            (Just(pairs), shuffled)
        }),
    ) {
        let a = subscription_key(channel, &params_from(&pairs));
        let b = subscription_key(channel, &params_from(&shuffled));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn key_separates_channels(
        a in arb_channel(),
        b in arb_channel(),
        pairs in arb_pairs(),
    ) {
        let p = params_from(&pairs);
        prop_assert_eq!(subscription_key(a, &p) == subscription_key(b, &p), a == b);
    }
}

// --- Backoff bounds ---

proptest! {
    #[test]
    fn jitter_stays_in_window(attempt in 1u32..40, factor in 0.75f64..1.25) {
        let b = Backoff::default();
        let base = b.base_delay(attempt).as_millis() as f64;
        let ms = b.jittered(attempt, factor).as_millis() as f64;
        prop_assert!(ms <= 60_000.0);
        prop_assert!(ms >= (base * 0.75).floor().min(60_000.0));
        prop_assert!(ms <= base * 1.25);
    }

    #[test]
    fn delays_never_exceed_cap(
        base_ms in 1u64..5_000,
        max_ms in 1u64..120_000,
        failures in 1usize..64,
    ) {
        let mut b = Backoff::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms));
        let cap = Duration::from_millis(max_ms.max(base_ms));
        for _ in 0..failures {
            prop_assert!(b.next_delay() <= cap);
        }
        prop_assert_eq!(b.attempt() as usize, failures);
    }
}

// --- Event log ordering ---

fn event(id: usize, ts: i64) -> Value {
    json!({ "id": format!("e{id}"), "timestamp": ts, "type": "response" })
}

proptest! {
    #[test]
    fn log_is_sorted_and_unique_after_any_adds(
        snapshot in prop::collection::vec(0i64..1000, 0..20),
        batches in prop::collection::vec(prop::collection::vec((0usize..40, 0i64..1000), 0..8), 0..6),
    ) {
        let mut log = EventLog::new();
        let snapshot: Vec<Value> = snapshot
            .iter()
            .enumerate()
            .map(|(i, ts)| event(i + 100, *ts))
            .collect();
        log.apply_snapshot(&json!({ "events": snapshot }));

        for batch in batches {
            let items = batch.iter().map(|(id, ts)| event(*id, *ts)).collect();
            log.apply_delta(&DeltaOp::AddBatch { items });
        }

        let events: &[ChatEvent] = log.events();
        prop_assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let mut ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        prop_assert_eq!(ids.len(), before);
    }
}
