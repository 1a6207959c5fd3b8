use crate::{
    builder::{Batch, OperationBuilder, RecipientPlan, TransferSource},
    ledger::{Ledger, Operation},
    network::{LedgerNetwork, SubmissionOutcome},
    planner::{plan_batches, BatchLimits},
    reconcile::{reconcile, ReconcileReport},
    submission::{apply_outcome, submit_batch},
};
use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};
use std::{collections::HashMap, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub reconciliation: ReconcileReport,
    pub batches: usize,
    pub submitted: usize,
    pub confirmed: usize,
    pub ambiguous: usize,
    pub failed_batches: usize,
    /// Recipients left out of their batch because inspecting them failed.
    pub failed_recipients: usize,
    /// Batches whose recipients needed no action; never sent.
    pub empty_batches: usize,
}

impl RunSummary {
    pub fn has_unsuccessful(&self) -> bool {
        self.failed_batches > 0 || self.failed_recipients > 0
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreviewReport {
    pub batches: usize,
    pub sendable_batches: usize,
    pub plans: HashMap<RecipientPlan, usize>,
    /// Recipients that could not be inspected.
    pub failed: usize,
}

/// Drives one workflow: reconcile, then plan, build, submit and persist each
/// batch in turn. Batches are strictly sequential.
pub struct Distributor<'a> {
    network: &'a dyn LedgerNetwork,
    authority: &'a Keypair,
    mint: Pubkey,
    source: Option<TransferSource>,
    limits: BatchLimits,
    pacing: Duration,
}

impl<'a> Distributor<'a> {
    pub fn new(
        network: &'a dyn LedgerNetwork,
        authority: &'a Keypair,
        mint: Pubkey,
        source: Option<TransferSource>,
        limits: BatchLimits,
        pacing: Duration,
    ) -> Self {
        Self {
            network,
            authority,
            mint,
            source,
            limits,
            pacing,
        }
    }

    fn builder(&self, operation: Operation) -> Result<OperationBuilder<'a>> {
        let authority = self.authority.pubkey();
        Ok(match operation {
            Operation::TransferAndFreeze => {
                let Some(source) = self.source else {
                    bail!("transferAndFreeze requires a source token account");
                };
                OperationBuilder::for_transfer(self.network, self.mint, authority, source)
            }
            Operation::Thaw => OperationBuilder::for_thaw(self.network, self.mint, authority),
        })
    }

    pub async fn run(&self, ledger: &mut Ledger, operation: Operation) -> Result<RunSummary> {
        let builder = self.builder(operation)?;
        let mut summary = RunSummary {
            reconciliation: reconcile(ledger, self.network).await?,
            ..RunSummary::default()
        };

        let batches = plan_batches(ledger, operation, &self.limits);
        let total: usize = batches.iter().map(Vec::len).sum();
        summary.batches = batches.len();
        info!(%operation, recipients = total, batches = batches.len(), "starting workflow");

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?,
        );
        pb.set_message(operation.to_string());

        for recipients in batches {
            let mut batch = Batch::new(operation);
            for recipient in &recipients {
                // A recipient that cannot be inspected sits out; the rest of the batch still goes.
                if let Err(e) = builder.append(&mut batch, recipient).await {
                    pb.println(format!("❌ Skipping {}: {:#}", recipient, e));
                    warn!(%recipient, error = %e, "recipient not built; left for the next run");
                    summary.failed_recipients += 1;
                }
            }

            if !batch.has_actions() {
                // Nothing to send; these recipients keep their current status.
                if !batch.recipients.is_empty() {
                    info!(recipients = batch.recipients.len(), "batch needs no actions; not submitted");
                    summary.empty_batches += 1;
                }
            } else {
                let outcome = submit_batch(self.network, self.authority, &batch).await;
                summary.submitted += 1;
                match &outcome {
                    SubmissionOutcome::Confirmed(sig) => {
                        pb.println(format!("✅ TX has been sent: {} ({} recipients)", sig, batch.recipients.len()));
                        summary.confirmed += batch.recipients.len();
                    }
                    SubmissionOutcome::Ambiguous(sig) => {
                        pb.println(format!("⏳ TX {} not confirmed yet; will be checked on the next run", sig));
                        summary.ambiguous += batch.recipients.len();
                    }
                    SubmissionOutcome::Failed(cause) => {
                        pb.println(format!("❌ An error has occurred: {}", cause));
                    }
                }
                if apply_outcome(ledger, &batch, &outcome) {
                    summary.failed_batches += 1;
                }
            }

            ledger.save()?;
            pb.inc(recipients.len() as u64);
            sleep(self.pacing).await;
        }

        pb.finish_with_message(format!("{} complete", operation));
        Ok(summary)
    }

    /// Plans and builds every batch without submitting or saving anything.
    pub async fn preview(&self, ledger: &Ledger, operation: Operation) -> Result<PreviewReport> {
        let builder = self.builder(operation)?;
        let batches = plan_batches(ledger, operation, &self.limits);
        let mut report = PreviewReport {
            batches: batches.len(),
            ..PreviewReport::default()
        };
        for recipients in batches {
            let mut batch = Batch::new(operation);
            for recipient in &recipients {
                match builder.append(&mut batch, recipient).await {
                    Ok(plan) => *report.plans.entry(plan).or_default() += 1,
                    Err(e) => {
                        warn!(%recipient, error = %e, "recipient could not be inspected");
                        report.failed += 1;
                    }
                }
            }
            if batch.has_actions() {
                report.sendable_batches += 1;
            }
        }
        Ok(report)
    }
}
