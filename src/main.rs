mod builder;
mod config;
mod intake;
mod ledger;
mod network;
mod orchestrator;
mod planner;
mod reconcile;
mod submission;
mod telemetry;
#[cfg(test)]
mod testing;

use anyhow::{anyhow, bail, Context, Result};
use builder::{RecipientPlan, TransferSource};
use clap::{Args, Parser, Subcommand};
use config::{load_keypair, DistributorConfig, RunArgs};
use ledger::{Ledger, Operation, StatusCode};
use network::{LedgerNetwork, RpcNetwork};
use orchestrator::{Distributor, RunSummary};
use solana_sdk::signer::Signer;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run transferAndFreeze or thaw against every pending recipient
    Run(RunArgs),
    /// Show per-workflow progress recorded in the ledger
    Status(StatusArgs),
    /// Generate test recipient wallets
    GenerateWallets(GenerateArgs),
}

#[derive(Args)]
struct StatusArgs {
    /// Ledger file tracking per-recipient progress
    #[arg(long, default_value = "transaction_results.json")]
    ledger: PathBuf,
}

#[derive(Args)]
struct GenerateArgs {
    /// Number of wallets
    #[arg(long, default_value_t = 100)]
    count: usize,

    /// Output file, one address per line
    #[arg(long, default_value = "wallets.txt")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(DistributorConfig::try_from(args)?).await,
        Commands::Status(args) => status(args),
        Commands::GenerateWallets(args) => generate_wallets(args),
    }
}

fn generate_wallets(args: GenerateArgs) -> Result<()> {
    intake::generate_wallets(&args.output, args.count)?;
    println!("Generated {} wallets in {}", args.count, args.output.display());
    Ok(())
}

fn status(args: StatusArgs) -> Result<()> {
    if !args.ledger.exists() {
        bail!("No ledger at {}; run a workflow first", args.ledger.display());
    }
    let ledger = Ledger::load(&args.ledger)?;
    println!("📁 Ledger: {} ({} recipients)", args.ledger.display(), ledger.len());
    for operation in [Operation::TransferAndFreeze, Operation::Thaw] {
        println!(
            "   {:<18} confirmed: {:>6} | not executed: {:>6} | unconfirmed: {:>6}",
            operation.to_string(),
            ledger.count(operation, StatusCode::Confirmed),
            ledger.count(operation, StatusCode::NotExecuted),
            ledger.count(operation, StatusCode::Ambiguous),
        );
    }
    Ok(())
}

async fn run(config: DistributorConfig) -> Result<()> {
    println!("\n🚀 Starting {}...", config.operation);

    // Everything that can fail on configuration happens before the ledger is touched.
    let authority = load_keypair(&config.authority_path)?;
    let mut ledger =
        intake::prepare_ledger(&config.ledger_path, &config.wallets_path, intake::is_address_valid)?;
    println!("📁 Using ledger: {} ({} recipients)", ledger.path().display(), ledger.len());

    let network = RpcNetwork::new(config.url.clone(), config.rate_limit, config.confirm_timeout);
    let source = match config.operation {
        Operation::TransferAndFreeze => {
            Some(resolve_source(&network, &config, &authority.pubkey(), &ledger).await?)
        }
        Operation::Thaw => None,
    };

    let distributor = Distributor::new(
        &network,
        &authority,
        config.mint,
        source,
        config.limits,
        config.pacing,
    );

    if config.dry_run {
        let ambiguous = ledger.ambiguous_count();
        if ambiguous > 0 {
            println!("⚠️  {} recipients have unconfirmed transactions from a previous run", ambiguous);
        }
        let report = distributor.preview(&ledger, config.operation).await?;
        println!("\n=== DRY RUN SUMMARY ===");
        println!("Batches: {} ({} would be sent)", report.batches, report.sendable_batches);
        if report.failed > 0 {
            println!("⚠️  {} recipients could not be inspected and would be skipped", report.failed);
        }
        for plan in [
            RecipientPlan::CreateTransferFreeze,
            RecipientPlan::TransferFreeze,
            RecipientPlan::AlreadyFrozen,
            RecipientPlan::Thaw,
            RecipientPlan::AlreadyThawed,
            RecipientPlan::NoHoldingAccount,
        ] {
            if let Some(count) = report.plans.get(&plan) {
                println!("  {:?}: {}", plan, count);
            }
        }
        return Ok(());
    }

    if !config.yes {
        println!("\nReady to {}? [y/N] ", config.operation);
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    } else {
        println!("\nProceeding with {} (--yes flag set)", config.operation);
    }

    let summary = distributor.run(&mut ledger, config.operation).await?;
    print_summary(&summary, &ledger, config.operation);

    if summary.has_unsuccessful() {
        return Err(anyhow!(
            "Unsuccessful transaction(s) detected. Please re-run program with same configuration!"
        ));
    }
    Ok(())
}

async fn resolve_source(
    network: &dyn LedgerNetwork,
    config: &DistributorConfig,
    authority: &solana_sdk::pubkey::Pubkey,
    ledger: &Ledger,
) -> Result<TransferSource> {
    let account = match config.source {
        Some(account) => account,
        None => network
            .find_holding_account(authority, &config.mint)
            .await?
            .with_context(|| {
                format!("Authority {} has no token account for mint {}", authority, config.mint)
            })?,
    };
    let decimals = network.mint_decimals(&config.mint).await?;
    let holding = network.fetch_holding_account(&account).await?;
    println!("Token mint: {} (decimals: {})", config.mint, decimals);
    println!("Source balance: {} base units", holding.amount);

    let pending = planner::eligible_recipients(ledger, Operation::TransferAndFreeze).len() as u64;
    let needed = pending.saturating_mul(config.amount);
    if holding.amount < needed {
        // Upper bound: recipients already frozen on-chain receive nothing.
        println!(
            "⚠️  Source holds {} but up to {} may be needed for {} pending recipients",
            holding.amount, needed, pending
        );
    }

    Ok(TransferSource {
        account,
        amount: config.amount,
        decimals,
    })
}

fn print_summary(summary: &RunSummary, ledger: &Ledger, operation: Operation) {
    let reconciled = &summary.reconciliation;
    if reconciled.confirmed + reconciled.reverted + reconciled.unresolved > 0 {
        println!(
            "\n📋 Previous run: {} confirmed, {} to retry, {} still unresolved",
            reconciled.confirmed, reconciled.reverted, reconciled.unresolved
        );
    }
    println!("\n✅ {} finished", operation);
    println!(
        "This run: {} batches, {} sent, {} skipped (nothing to do)",
        summary.batches, summary.submitted, summary.empty_batches
    );
    println!(
        "Recipients confirmed: {} | unconfirmed: {} | skipped: {} | failed batches: {}",
        summary.confirmed, summary.ambiguous, summary.failed_recipients, summary.failed_batches
    );
    println!(
        "Total progress: {}/{} recipients confirmed",
        ledger.count(operation, StatusCode::Confirmed),
        ledger.len()
    );
    if summary.ambiguous > 0 {
        println!("⏳ Unconfirmed transactions will be checked automatically on the next run");
    }
}
