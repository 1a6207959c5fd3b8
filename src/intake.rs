use crate::ledger::Ledger;
use anyhow::{bail, Context, Result};
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};
use std::{fs, path::Path, str::FromStr};
use tracing::{debug, info, warn};

/// Base58 decode plus on-curve check. Off-curve addresses (PDAs) cannot own
/// an associated token account created for a wallet, so they are excluded.
pub fn is_address_valid(address: &str) -> bool {
    match Pubkey::from_str(address) {
        Ok(pubkey) => pubkey.is_on_curve(),
        Err(_) => false,
    }
}

/// Reads one candidate address per line, stripping line terminators.
pub fn read_address_source(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        bail!("{} is not found!", path.display());
    }
    let buffer = fs::read_to_string(path)
        .with_context(|| format!("Failed to read address source {}", path.display()))?;
    Ok(buffer
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect())
}

/// Loads the ledger if it exists; otherwise seeds it from the address source
/// and persists it. An existing ledger is never re-seeded.
pub fn prepare_ledger(
    ledger_path: &Path,
    source_path: &Path,
    validator: impl Fn(&str) -> bool,
) -> Result<Ledger> {
    if ledger_path.exists() {
        let ledger = Ledger::load(ledger_path)?;
        info!(records = ledger.len(), path = %ledger_path.display(), "loaded existing ledger");
        return Ok(ledger);
    }

    let candidates = read_address_source(source_path)?;
    let mut ledger = Ledger::new(ledger_path);
    let mut rejected = 0usize;
    for candidate in candidates {
        if validator(&candidate) {
            ledger.insert_new(candidate);
        } else {
            debug!(address = %candidate, "skipping invalid address");
            rejected += 1;
        }
    }
    if ledger.is_empty() {
        warn!(path = %source_path.display(), "address source has no valid addresses");
    }
    ledger.save()?;
    info!(
        records = ledger.len(),
        rejected,
        path = %ledger_path.display(),
        "seeded new ledger from address source"
    );
    Ok(ledger)
}

/// Writes `count` freshly generated wallet addresses, one per line.
pub fn generate_wallets(path: &Path, count: usize) -> Result<()> {
    let mut buffer = String::with_capacity(count * 45);
    for _ in 0..count {
        buffer.push_str(&Keypair::new().pubkey().to_string());
        buffer.push('\n');
    }
    fs::write(path, buffer)
        .with_context(|| format!("Failed to write wallets to {}", path.display()))?;
    Ok(())
}
