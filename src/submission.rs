use crate::{
    builder::Batch,
    ledger::{Ledger, StatusCode},
    network::{LedgerNetwork, SubmissionOutcome},
};
use solana_sdk::{
    packet::PACKET_DATA_SIZE,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use tracing::{info, warn};

/// Serializes with the wire format the cluster uses and checks the result
/// fits in one packet.
pub fn transaction_fits(tx: &Transaction) -> (bool, usize) {
    match bincode::serialized_size(tx) {
        Ok(size) => {
            let size = size as usize;
            (size <= PACKET_DATA_SIZE, size)
        }
        Err(_) => (false, 0),
    }
}

/// Stamps the batch with a fresh blockhash and the authority as fee payer and
/// signer, then sends it. Errors before the send are definite failures.
pub async fn submit_batch(
    network: &dyn LedgerNetwork,
    authority: &Keypair,
    batch: &Batch,
) -> SubmissionOutcome {
    let blockhash = match network.latest_blockhash().await {
        Ok(hash) => hash,
        Err(e) => return SubmissionOutcome::Failed(format!("Failed to get blockhash: {:#}", e)),
    };
    let tx = Transaction::new_signed_with_payer(
        &batch.instructions,
        Some(&authority.pubkey()),
        &[authority],
        blockhash,
    );

    let (fits, size) = transaction_fits(&tx);
    if !fits {
        return SubmissionOutcome::Failed(format!(
            "Transaction would be {} bytes (limit {}); lower the batch size",
            size, PACKET_DATA_SIZE
        ));
    }
    info!(
        operation = %batch.operation,
        recipients = batch.recipients.len(),
        instructions = batch.instructions.len(),
        size,
        "sending batch"
    );
    network.submit(&tx).await
}

/// Writes the batch outcome into the ledger. Returns `true` when the run
/// should be flagged as having had an unsuccessful batch.
pub fn apply_outcome(ledger: &mut Ledger, batch: &Batch, outcome: &SubmissionOutcome) -> bool {
    let (status, signature) = match outcome {
        SubmissionOutcome::Confirmed(sig) => (StatusCode::Confirmed, sig),
        SubmissionOutcome::Ambiguous(sig) => (StatusCode::Ambiguous, sig),
        SubmissionOutcome::Failed(cause) => {
            warn!(
                operation = %batch.operation,
                recipients = batch.recipients.len(),
                %cause,
                "batch failed; recipients left for the next run"
            );
            return true;
        }
    };

    let tx_ref = signature.to_string();
    for recipient in &batch.recipients {
        if let Err(e) = ledger.record_outcome(recipient, batch.operation, status, &tx_ref) {
            warn!(%recipient, error = %e, "outcome not recorded");
        }
    }
    false
}
