use crate::{
    ledger::Operation,
    planner::{BatchLimits, DEFAULT_THAW_LIMIT, DEFAULT_TRANSFER_AND_FREEZE_LIMIT},
};
use anyhow::{anyhow, Context, Result};
use clap::Args;
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::{
    fs,
    num::{NonZeroU32, NonZeroUsize},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Operation to be executed: transferAndFreeze or thaw
    #[arg(long, short = 'o', value_enum)]
    pub operation: Operation,

    /// RPC URL
    #[arg(long, env = "DISTRIBUTOR_RPC_URL", default_value = "https://api.devnet.solana.com")]
    pub url: String,

    /// Authority keypair path (mint freeze authority, token owner and fee payer)
    #[arg(long, env = "DISTRIBUTOR_AUTHORITY", default_value = "./keypairs/creator.json")]
    pub authority: PathBuf,

    /// SPL token mint address
    #[arg(long, env = "DISTRIBUTOR_MINT")]
    pub mint: String,

    /// Amount per recipient (in base units)
    #[arg(long, env = "DISTRIBUTOR_AMOUNT", default_value_t = 5)]
    pub amount: u64,

    /// Source token account (defaults to the authority's token account for the mint)
    #[arg(long)]
    pub from: Option<String>,

    /// Newline-delimited list of recipient wallets
    #[arg(long, default_value = "wallets.txt")]
    pub wallets: PathBuf,

    /// Ledger file tracking per-recipient progress
    #[arg(long, default_value = "transaction_results.json")]
    pub ledger: PathBuf,

    /// Maximum recipients per transferAndFreeze transaction
    #[arg(long, default_value_t = DEFAULT_TRANSFER_AND_FREEZE_LIMIT)]
    pub transfer_batch_size: usize,

    /// Maximum recipients per thaw transaction
    #[arg(long, default_value_t = DEFAULT_THAW_LIMIT)]
    pub thaw_batch_size: usize,

    /// Delay between batches in milliseconds
    #[arg(long, default_value_t = 333)]
    pub pacing_ms: u64,

    /// Seconds to wait for confirmation before recording a batch as unconfirmed
    #[arg(long, default_value_t = 60)]
    pub confirm_timeout_secs: u64,

    /// Rate limit (RPC requests per second)
    #[arg(long, default_value_t = 10)]
    pub rate_limit: u32,

    /// Plan and inspect without sending anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    pub operation: Operation,
    pub url: String,
    pub authority_path: PathBuf,
    pub mint: Pubkey,
    pub amount: u64,
    pub source: Option<Pubkey>,
    pub wallets_path: PathBuf,
    pub ledger_path: PathBuf,
    pub limits: BatchLimits,
    pub pacing: Duration,
    pub confirm_timeout: Duration,
    pub rate_limit: NonZeroU32,
    pub dry_run: bool,
    pub yes: bool,
}

impl TryFrom<RunArgs> for DistributorConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> Result<Self> {
        let mint = Pubkey::from_str(&args.mint)
            .with_context(|| format!("Invalid mint address {}", args.mint))?;
        let source = args
            .from
            .as_deref()
            .map(Pubkey::from_str)
            .transpose()
            .context("Invalid source token account")?;
        let limits = BatchLimits {
            transfer_and_freeze: NonZeroUsize::new(args.transfer_batch_size)
                .ok_or_else(|| anyhow!("--transfer-batch-size must be non-zero"))?,
            thaw: NonZeroUsize::new(args.thaw_batch_size)
                .ok_or_else(|| anyhow!("--thaw-batch-size must be non-zero"))?,
        };
        let rate_limit = NonZeroU32::new(args.rate_limit)
            .ok_or_else(|| anyhow!("--rate-limit must be non-zero"))?;

        Ok(Self {
            operation: args.operation,
            url: args.url,
            authority_path: args.authority,
            mint,
            amount: args.amount,
            source,
            wallets_path: args.wallets,
            ledger_path: args.ledger,
            limits,
            pacing: Duration::from_millis(args.pacing_ms),
            confirm_timeout: Duration::from_secs(args.confirm_timeout_secs),
            rate_limit,
            dry_run: args.dry_run,
            yes: args.yes,
        })
    }
}

pub fn load_keypair(path: &Path) -> Result<Keypair> {
    let keypair_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read keypair from {}", path.display()))?;

    let keypair_bytes: Vec<u8> = serde_json::from_str(&keypair_str)
        .with_context(|| format!("Failed to parse keypair JSON from {}", path.display()))?;

    Keypair::from_bytes(&keypair_bytes)
        .map_err(|e| anyhow!("Invalid keypair format in {}: {}", path.display(), e))
}
