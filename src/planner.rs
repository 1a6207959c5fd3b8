use crate::ledger::{Ledger, Operation, StatusCode};
use std::num::NonZeroUsize;

/// Per-workflow recipient caps. Each is sized so the worst-case transaction
/// (every recipient needing account creation) stays under the 1232-byte
/// packet limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub transfer_and_freeze: NonZeroUsize,
    pub thaw: NonZeroUsize,
}

pub const DEFAULT_TRANSFER_AND_FREEZE_LIMIT: usize = 9;
pub const DEFAULT_THAW_LIMIT: usize = 25;

impl BatchLimits {
    pub fn for_operation(&self, operation: Operation) -> NonZeroUsize {
        match operation {
            Operation::TransferAndFreeze => self.transfer_and_freeze,
            Operation::Thaw => self.thaw,
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            transfer_and_freeze: NonZeroUsize::new(DEFAULT_TRANSFER_AND_FREEZE_LIMIT)
                .unwrap_or(NonZeroUsize::MIN),
            thaw: NonZeroUsize::new(DEFAULT_THAW_LIMIT).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Recipients the workflow still owes work to, in ledger (address) order.
pub fn eligible_recipients(ledger: &Ledger, operation: Operation) -> Vec<String> {
    ledger
        .iter()
        .filter(|(_, record)| match operation {
            Operation::TransferAndFreeze => record.transfer_status == StatusCode::NotExecuted,
            Operation::Thaw => {
                record.transfer_status == StatusCode::Confirmed
                    && record.thaw_status == StatusCode::NotExecuted
            }
        })
        .map(|(address, _)| address.clone())
        .collect()
}

pub fn plan_batches(
    ledger: &Ledger,
    operation: Operation,
    limits: &BatchLimits,
) -> Vec<Vec<String>> {
    let max = limits.for_operation(operation).get();
    eligible_recipients(ledger, operation)
        .chunks(max)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(count: usize) -> Ledger {
        let mut ledger = Ledger::new("unused.json");
        for i in 0..count {
            ledger.insert_new(format!("wallet_{:04}", i));
        }
        ledger
    }

    fn limits(transfer: usize, thaw: usize) -> BatchLimits {
        BatchLimits {
            transfer_and_freeze: NonZeroUsize::new(transfer).unwrap(),
            thaw: NonZeroUsize::new(thaw).unwrap(),
        }
    }

    #[test]
    fn test_twenty_recipients_split_nine_nine_two() {
        let ledger = ledger_with(20);
        let batches = plan_batches(&ledger, Operation::TransferAndFreeze, &limits(9, 25));
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![9, 9, 2]);
    }

    #[test]
    fn test_batch_count_is_ceiling_for_any_size() {
        for n in 0..60 {
            for max in 1..12 {
                let ledger = ledger_with(n);
                let batches = plan_batches(&ledger, Operation::TransferAndFreeze, &limits(max, 1));
                assert_eq!(batches.len(), n.div_ceil(max), "n={} max={}", n, max);
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= max));
                assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), n);
            }
        }
    }

    #[test]
    fn test_order_is_stable() {
        let ledger = ledger_with(30);
        let first = plan_batches(&ledger, Operation::TransferAndFreeze, &limits(7, 7));
        let second = plan_batches(&ledger, Operation::TransferAndFreeze, &limits(7, 7));
        assert_eq!(first, second);
        assert_eq!(first[0][0], "wallet_0000");
    }

    #[test]
    fn test_transfer_eligibility_skips_confirmed_and_ambiguous() {
        let mut ledger = ledger_with(3);
        ledger
            .record_outcome("wallet_0000", Operation::TransferAndFreeze, StatusCode::Confirmed, "s1")
            .unwrap();
        ledger
            .record_outcome("wallet_0001", Operation::TransferAndFreeze, StatusCode::Ambiguous, "s2")
            .unwrap();

        assert_eq!(
            eligible_recipients(&ledger, Operation::TransferAndFreeze),
            vec!["wallet_0002"]
        );
    }

    #[test]
    fn test_thaw_requires_confirmed_transfer() {
        let mut ledger = ledger_with(4);
        ledger
            .record_outcome("wallet_0000", Operation::TransferAndFreeze, StatusCode::Confirmed, "s1")
            .unwrap();
        ledger
            .record_outcome("wallet_0001", Operation::TransferAndFreeze, StatusCode::Ambiguous, "s2")
            .unwrap();
        ledger
            .record_outcome("wallet_0002", Operation::TransferAndFreeze, StatusCode::Confirmed, "s1")
            .unwrap();
        ledger
            .record_outcome("wallet_0002", Operation::Thaw, StatusCode::Confirmed, "s3")
            .unwrap();

        assert_eq!(eligible_recipients(&ledger, Operation::Thaw), vec!["wallet_0000"]);
        let batches = plan_batches(&ledger, Operation::Thaw, &limits(9, 25));
        assert_eq!(batches, vec![vec!["wallet_0000".to_string()]]);
    }
}
