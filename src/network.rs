//! Remote ledger collaborator: the account lookups, submission and
//! transaction queries the distributor needs from a Solana RPC node.

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_request::TokenAccountsFilter,
};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{self, Transaction},
};
use solana_transaction_status::{TransactionConfirmationStatus, TransactionStatus};
use spl_token::state::{Account as TokenAccount, Mint};
use std::{num::NonZeroU32, str::FromStr, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// State of a recipient's token account that the operation builder cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldingAccount {
    pub address: Pubkey,
    pub is_frozen: bool,
    pub amount: u64,
}

/// Three-way result of sending one batch transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Landed and confirmed.
    Confirmed(Signature),
    /// Confirmation was not observed in time; the transaction may still land.
    Ambiguous(Signature),
    /// Definitely not applied.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionLookup {
    Found,
    Absent,
}

#[async_trait]
pub trait LedgerNetwork: Send + Sync {
    /// First token account of `owner` for `mint`, if any.
    async fn find_holding_account(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Option<Pubkey>>;

    async fn fetch_holding_account(&self, account: &Pubkey) -> Result<HoldingAccount>;

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8>;

    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Sends a fully signed transaction and waits for a definite or ambiguous result.
    async fn submit(&self, transaction: &Transaction) -> SubmissionOutcome;

    async fn lookup_transaction(&self, signature: &Signature) -> Result<TransactionLookup>;
}

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct RpcNetwork {
    client: RpcClient,
    rate_limiter: DefaultDirectRateLimiter,
    confirm_timeout: Duration,
}

impl RpcNetwork {
    pub fn new(url: String, rate_limit: NonZeroU32, confirm_timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_commitment(url, CommitmentConfig::confirmed()),
            rate_limiter: RateLimiter::direct(Quota::per_second(rate_limit)),
            confirm_timeout,
        }
    }

    async fn wait_for_confirmation(&self, signature: Signature) -> SubmissionOutcome {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            sleep(STATUS_POLL_INTERVAL).await;
            self.rate_limiter.until_ready().await;
            let status = match self.client.get_signature_statuses(&[signature]).await {
                Ok(response) => response.value.into_iter().next().flatten(),
                Err(e) => {
                    debug!(%signature, error = %e, "signature status poll failed");
                    None
                }
            };
            if let Some(outcome) = classify(signature, status.as_ref(), Instant::now() >= deadline) {
                if matches!(outcome, SubmissionOutcome::Ambiguous(_)) {
                    warn!(%signature, "confirmation not observed before timeout");
                }
                return outcome;
            }
        }
    }
}

/// Decision for one status poll. `None` means keep polling.
pub(crate) fn classify(
    signature: Signature,
    status: Option<&TransactionStatus>,
    past_deadline: bool,
) -> Option<SubmissionOutcome> {
    if let Some(status) = status {
        if let Some(err) = &status.err {
            return Some(SubmissionOutcome::Failed(format!(
                "transaction {} failed: {}",
                signature, err
            )));
        }
        if matches!(
            status.confirmation_status,
            Some(TransactionConfirmationStatus::Confirmed)
                | Some(TransactionConfirmationStatus::Finalized)
        ) {
            return Some(SubmissionOutcome::Confirmed(signature));
        }
    }
    past_deadline.then_some(SubmissionOutcome::Ambiguous(signature))
}

/// Any transaction the node knows about counts as found, whatever its
/// execution result.
pub(crate) fn lookup_from_status(status: Option<transaction::Result<()>>) -> TransactionLookup {
    match status {
        Some(_) => TransactionLookup::Found,
        None => TransactionLookup::Absent,
    }
}

/// Transport-level failures leave the transaction's fate unknown; anything the
/// node answered with is a definite rejection.
pub(crate) fn is_ambiguous_send_error(error: &ClientError) -> bool {
    matches!(error.kind(), ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_))
}

#[async_trait]
impl LedgerNetwork for RpcNetwork {
    async fn find_holding_account(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Option<Pubkey>> {
        self.rate_limiter.until_ready().await;
        let accounts = self
            .client
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(*mint))
            .await
            .with_context(|| format!("Failed to look up token accounts of {}", owner))?;
        match accounts.first() {
            Some(keyed) => Ok(Some(Pubkey::from_str(&keyed.pubkey)?)),
            None => Ok(None),
        }
    }

    async fn fetch_holding_account(&self, account: &Pubkey) -> Result<HoldingAccount> {
        self.rate_limiter.until_ready().await;
        let raw = self
            .client
            .get_account(account)
            .await
            .with_context(|| format!("Failed to fetch token account {}", account))?;
        let data = TokenAccount::unpack(&raw.data)?;
        Ok(HoldingAccount {
            address: *account,
            is_frozen: data.is_frozen(),
            amount: data.amount,
        })
    }

    async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8> {
        self.rate_limiter.until_ready().await;
        let raw = self
            .client
            .get_account(mint)
            .await
            .with_context(|| format!("Failed to fetch mint {}", mint))?;
        Ok(Mint::unpack(&raw.data)?.decimals)
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        self.rate_limiter.until_ready().await;
        Ok(self.client.get_latest_blockhash().await?)
    }

    async fn submit(&self, transaction: &Transaction) -> SubmissionOutcome {
        // Known before sending, so a lost response still leaves a reference to check.
        let signature = transaction.signatures.first().copied().unwrap_or_default();
        self.rate_limiter.until_ready().await;
        match self.client.send_transaction(transaction).await {
            Ok(sent) => self.wait_for_confirmation(sent).await,
            Err(e) if is_ambiguous_send_error(&e) => {
                warn!(%signature, error = %e, "send failed at transport level");
                SubmissionOutcome::Ambiguous(signature)
            }
            Err(e) => SubmissionOutcome::Failed(e.to_string()),
        }
    }

    async fn lookup_transaction(&self, signature: &Signature) -> Result<TransactionLookup> {
        self.rate_limiter.until_ready().await;
        let status = self
            .client
            .get_signature_status_with_commitment_and_history(
                signature,
                CommitmentConfig::confirmed(),
                true,
            )
            .await?;
        Ok(lookup_from_status(status))
    }
}
