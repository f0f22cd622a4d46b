//! Echo-suppression ledger
//!
//! Every message forwarded from the platform to the secondary broker comes
//! back to the bridge through its own secondary subscription. The ledger
//! counts forwards that are still waiting for that echo so the secondary
//! flow can drop them instead of sending them back to the platform.

use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::Mutex;

/// Outcome of checking an inbound secondary message against the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerCheck {
    /// The message is the echo of a forward; one pending count was consumed
    Echo,
    /// No forward of this (topic, payload) is pending
    Fresh,
}

/// Multiset of in-flight forwards keyed by (topic, payload)
///
/// Identical concurrent forwards are counted, not distinguished. If a third
/// party publishes the same (topic, payload) on the secondary broker while a
/// forward of that pair is in flight, the third-party message is suppressed
/// in place of the echo, and the echo then arrives as fresh. This is accepted:
/// telling the two apart would need message identity that MQTT 3.1.1 QoS 0
/// does not carry.
#[derive(Debug, Default)]
pub struct EchoLedger {
    entries: Mutex<AHashMap<(String, Bytes), usize>>,
}

impl EchoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one forward of `(topic, payload)` about to be published
    pub fn record_forward(&self, topic: &str, payload: &Bytes) {
        let mut entries = self.entries.lock();
        *entries
            .entry((topic.to_string(), payload.clone()))
            .or_insert(0) += 1;
    }

    /// Consume one pending count if `(topic, payload)` is an expected echo
    pub fn check_and_consume(&self, topic: &str, payload: &Bytes) -> LedgerCheck {
        if self.take_one(topic, payload) {
            LedgerCheck::Echo
        } else {
            LedgerCheck::Fresh
        }
    }

    /// Undo one `record_forward` whose publish never left the bridge
    pub fn release(&self, topic: &str, payload: &Bytes) {
        self.take_one(topic, payload);
    }

    /// Pending count for `(topic, payload)`
    pub fn pending(&self, topic: &str, payload: &Bytes) -> usize {
        self.entries
            .lock()
            .get(&(topic.to_string(), payload.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct pairs with a pending forward
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every pending entry, returning how many pairs were discarded
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let discarded = entries.len();
        entries.clear();
        discarded
    }

    fn take_one(&self, topic: &str, payload: &Bytes) -> bool {
        let key = (topic.to_string(), payload.clone());
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                entries.remove(&key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn payload(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_forward_then_echo() {
        let ledger = EchoLedger::new();
        ledger.record_forward("sensors/temp", &payload("21.5"));
        assert_eq!(ledger.pending("sensors/temp", &payload("21.5")), 1);

        assert_eq!(
            ledger.check_and_consume("sensors/temp", &payload("21.5")),
            LedgerCheck::Echo
        );
        assert!(ledger.is_empty());
        assert_eq!(
            ledger.check_and_consume("sensors/temp", &payload("21.5")),
            LedgerCheck::Fresh
        );
    }

    #[test]
    fn test_counts_identical_forwards() {
        let ledger = EchoLedger::new();
        ledger.record_forward("a", &payload("x"));
        ledger.record_forward("a", &payload("x"));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.pending("a", &payload("x")), 2);

        assert_eq!(ledger.check_and_consume("a", &payload("x")), LedgerCheck::Echo);
        assert_eq!(ledger.pending("a", &payload("x")), 1);
        assert_eq!(ledger.check_and_consume("a", &payload("x")), LedgerCheck::Echo);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_key_includes_payload() {
        let ledger = EchoLedger::new();
        ledger.record_forward("a", &payload("x"));
        assert_eq!(ledger.check_and_consume("a", &payload("y")), LedgerCheck::Fresh);
        assert_eq!(ledger.check_and_consume("b", &payload("x")), LedgerCheck::Fresh);
        assert_eq!(ledger.pending("a", &payload("x")), 1);
    }

    #[test]
    fn test_empty_payload_is_a_valid_key() {
        let ledger = EchoLedger::new();
        ledger.record_forward("a", &Bytes::new());
        assert_eq!(ledger.check_and_consume("a", &Bytes::new()), LedgerCheck::Echo);
    }

    #[test]
    fn test_release_undoes_forward() {
        let ledger = EchoLedger::new();
        ledger.record_forward("a", &payload("x"));
        ledger.release("a", &payload("x"));
        assert!(ledger.is_empty());

        // Releasing an absent entry is a no-op
        ledger.release("a", &payload("x"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_clear_discards_everything() {
        let ledger = EchoLedger::new();
        ledger.record_forward("a", &payload("x"));
        ledger.record_forward("a", &payload("x"));
        ledger.record_forward("b", &payload("y"));
        assert_eq!(ledger.clear(), 2);
        assert!(ledger.is_empty());
        assert_eq!(ledger.check_and_consume("a", &payload("x")), LedgerCheck::Fresh);
    }

    proptest! {
        #[test]
        fn prop_forwards_and_echoes_cancel_out(
            pairs in prop::collection::vec(("[a-c]{1,2}(/[a-c]{1,2})?", "[xyz]{0,2}"), 1..32),
            rotate in 0usize..32,
        ) {
            let ledger = EchoLedger::new();
            for (topic, body) in &pairs {
                ledger.record_forward(topic, &payload(body));
            }

            // Echoes may come back in any order
            let mut echoes = pairs.clone();
            let len = echoes.len();
            echoes.rotate_left(rotate % len);
            for (topic, body) in &echoes {
                prop_assert_eq!(ledger.check_and_consume(topic, &payload(body)), LedgerCheck::Echo);
            }

            prop_assert!(ledger.is_empty());
        }
    }
}
