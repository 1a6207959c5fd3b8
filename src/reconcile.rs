use crate::{
    ledger::{Ledger, Operation, StatusCode},
    network::{LedgerNetwork, TransactionLookup},
};
use anyhow::Result;
use solana_sdk::signature::Signature;
use std::{collections::HashMap, str::FromStr};
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub reverted: usize,
    pub unresolved: usize,
    /// Distinct transaction references queried on the network.
    pub queries: usize,
}

/// Resolves every `Ambiguous` status left by an earlier run, querying each
/// distinct reference once, then persists the ledger.
pub async fn reconcile(ledger: &mut Ledger, network: &dyn LedgerNetwork) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let pending = ledger.ambiguous_count();
    if pending > 0 {
        info!(records = pending, "checking unconfirmed transactions from last run");
    }

    // None = lookup failed; the record stays Ambiguous for a later run.
    let mut resolved: HashMap<String, Option<StatusCode>> = HashMap::new();

    for (address, record) in ledger.iter_mut() {
        for operation in [Operation::TransferAndFreeze, Operation::Thaw] {
            if record.status(operation) != StatusCode::Ambiguous {
                continue;
            }
            let Some(tx_ref) = record.tx_ref(operation).map(str::to_string) else {
                warn!(%address, %operation, "ambiguous record has no transaction reference");
                record.set_status(operation, StatusCode::NotExecuted);
                report.reverted += 1;
                continue;
            };

            let outcome = match resolved.get(&tx_ref) {
                Some(cached) => *cached,
                None => {
                    let outcome = match Signature::from_str(&tx_ref) {
                        Ok(signature) => {
                            report.queries += 1;
                            lookup_status(network, &signature).await
                        }
                        Err(_) => {
                            warn!(%tx_ref, "stored reference is not a transaction signature");
                            Some(StatusCode::NotExecuted)
                        }
                    };
                    resolved.insert(tx_ref.clone(), outcome);
                    outcome
                }
            };

            match outcome {
                Some(status) => {
                    record.set_status(operation, status);
                    if status == StatusCode::Confirmed {
                        report.confirmed += 1;
                    } else {
                        report.reverted += 1;
                    }
                }
                None => report.unresolved += 1,
            }
        }
    }

    ledger.save()?;
    if pending > 0 {
        info!(
            confirmed = report.confirmed,
            reverted = report.reverted,
            unresolved = report.unresolved,
            "unconfirmed transactions have been checked"
        );
    }
    Ok(report)
}

async fn lookup_status(network: &dyn LedgerNetwork, signature: &Signature) -> Option<StatusCode> {
    match network.lookup_transaction(signature).await {
        Ok(TransactionLookup::Found) => Some(StatusCode::Confirmed),
        Ok(TransactionLookup::Absent) => Some(StatusCode::NotExecuted),
        Err(e) => {
            warn!(%signature, error = %e, "could not check transaction; leaving it unresolved");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNetwork;
    use tempfile::TempDir;

    fn ledger_in(dir: &TempDir, wallets: &[&str]) -> Ledger {
        let mut ledger = Ledger::new(dir.path().join("ledger.json"));
        for w in wallets {
            ledger.insert_new(w.to_string());
        }
        ledger
    }

    #[tokio::test]
    async fn test_found_reference_confirms_all_sharing_records() {
        let temp_dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&temp_dir, &["a", "b", "c"]);
        let sig = Signature::new_unique();
        for w in ["a", "b", "c"] {
            ledger
                .record_outcome(w, Operation::TransferAndFreeze, StatusCode::Ambiguous, &sig.to_string())
                .unwrap();
        }
        let network = MockNetwork::new();
        network.set_lookup(sig, TransactionLookup::Found);

        let report = reconcile(&mut ledger, &network).await.unwrap();

        assert_eq!(report.confirmed, 3);
        assert_eq!(network.lookups(), vec![sig]);
        for w in ["a", "b", "c"] {
            assert_eq!(ledger.get(w).unwrap().transfer_status, StatusCode::Confirmed);
        }
        assert_eq!(Ledger::load(ledger.path()).unwrap(), ledger);
    }

    #[tokio::test]
    async fn test_absent_reference_reverts_and_keeps_reference() {
        let temp_dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&temp_dir, &["a", "b"]);
        let sig = Signature::new_unique().to_string();
        for w in ["a", "b"] {
            ledger
                .record_outcome(w, Operation::TransferAndFreeze, StatusCode::Ambiguous, &sig)
                .unwrap();
        }
        let network = MockNetwork::new();

        let report = reconcile(&mut ledger, &network).await.unwrap();

        assert_eq!(report.reverted, 2);
        assert_eq!(report.queries, 1);
        for w in ["a", "b"] {
            let record = ledger.get(w).unwrap();
            assert_eq!(record.transfer_status, StatusCode::NotExecuted);
            assert_eq!(record.transfer_tx_ref.as_deref(), Some(sig.as_str()));
        }
    }

    #[tokio::test]
    async fn test_unparsable_reference_reverts_without_query() {
        let temp_dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&temp_dir, &["a"]);
        ledger
            .record_outcome("a", Operation::TransferAndFreeze, StatusCode::Ambiguous, "abc123")
            .unwrap();
        let network = MockNetwork::new();

        reconcile(&mut ledger, &network).await.unwrap();

        assert_eq!(ledger.get("a").unwrap().transfer_status, StatusCode::NotExecuted);
        assert!(network.lookups().is_empty());
    }

    #[tokio::test]
    async fn test_thaw_references_are_reconciled_too() {
        let temp_dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&temp_dir, &["a"]);
        let transfer_sig = Signature::new_unique();
        let thaw_sig = Signature::new_unique();
        ledger
            .record_outcome("a", Operation::TransferAndFreeze, StatusCode::Confirmed, &transfer_sig.to_string())
            .unwrap();
        ledger
            .record_outcome("a", Operation::Thaw, StatusCode::Ambiguous, &thaw_sig.to_string())
            .unwrap();
        let network = MockNetwork::new();
        network.set_lookup(thaw_sig, TransactionLookup::Found);

        reconcile(&mut ledger, &network).await.unwrap();

        let record = ledger.get("a").unwrap();
        assert_eq!(record.thaw_status, StatusCode::Confirmed);
        assert_eq!(network.lookups(), vec![thaw_sig]);
    }

    #[tokio::test]
    async fn test_lookup_error_leaves_record_ambiguous() {
        let temp_dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&temp_dir, &["a", "b"]);
        let sig = Signature::new_unique().to_string();
        for w in ["a", "b"] {
            ledger
                .record_outcome(w, Operation::TransferAndFreeze, StatusCode::Ambiguous, &sig)
                .unwrap();
        }
        let network = MockNetwork::new();
        network.fail_lookups();

        let report = reconcile(&mut ledger, &network).await.unwrap();

        assert_eq!(report.unresolved, 2);
        assert_eq!(network.lookups().len(), 1);
        assert_eq!(ledger.get("a").unwrap().transfer_status, StatusCode::Ambiguous);
    }

    #[tokio::test]
    async fn test_nothing_ambiguous_skips_network_but_still_persists() {
        let temp_dir = TempDir::new().unwrap();
        let mut ledger = ledger_in(&temp_dir, &["a"]);
        let network = MockNetwork::new();

        let report = reconcile(&mut ledger, &network).await.unwrap();

        assert_eq!(report, ReconcileReport::default());
        assert!(network.lookups().is_empty());
        assert_eq!(Ledger::load(ledger.path()).unwrap(), ledger);
    }
}
