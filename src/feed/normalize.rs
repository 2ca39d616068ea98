//! Raw event to canonical record mapping

use crate::chain::{EventKind, RawEvent, ZERO_ADDRESS};

use super::NormalizedEvent;

/// Convert a raw event into its canonical form.
///
/// Transfers from the zero address are mints, not movements of existing
/// balance, and are excluded from the feed. Approvals are never
/// filtered. Amounts stay integral in the smallest unit; human scaling
/// is a presentation concern.
pub fn normalize(raw: RawEvent) -> Option<NormalizedEvent> {
    if raw.kind == EventKind::Transfer && raw.source.eq_ignore_ascii_case(ZERO_ADDRESS) {
        return None;
    }

    Some(NormalizedEvent {
        kind: raw.kind,
        from: raw.source,
        to: raw.target,
        amount: raw.amount,
        block_number: raw.block_number,
    })
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;

    use super::*;

    fn raw(kind: EventKind, source: &str) -> RawEvent {
        RawEvent {
            kind,
            source: source.to_string(),
            target: "0xe7804c37c13166ff0b37f5ae0bb07a3aebb6e245".to_string(),
            amount: BigUint::from(1000u32),
            block_number: 7,
            log_index: 0,
        }
    }

    #[test]
    fn test_mint_transfer_is_filtered() {
        assert!(normalize(raw(EventKind::Transfer, ZERO_ADDRESS)).is_none());
    }

    #[test]
    fn test_ordinary_transfer_passes() {
        let event = normalize(raw(
            EventKind::Transfer,
            "0xf977814e90da44bfa03b6295a0616a897441acec",
        ))
        .unwrap();
        assert_eq!(event.kind, EventKind::Transfer);
        assert_eq!(event.amount, BigUint::from(1000u32));
        assert_eq!(event.block_number, 7);
    }

    #[test]
    fn test_zero_owner_approval_is_never_filtered() {
        // Only Transfer has mint semantics; an approval from the zero
        // address is odd but not ours to drop.
        assert!(normalize(raw(EventKind::Approval, ZERO_ADDRESS)).is_some());
    }
}
