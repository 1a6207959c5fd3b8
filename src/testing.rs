//! In-memory `LedgerNetwork` used by the unit tests.

use crate::network::{HoldingAccount, LedgerNetwork, SubmissionOutcome, TransactionLookup};
use anyhow::{bail, Result};
use async_trait::async_trait;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

/// Scripted reply for the next submission.
#[derive(Debug, Clone)]
pub enum ScriptedSubmit {
    Confirm,
    Ambiguous,
    Fail(String),
}

#[derive(Default)]
struct MockState {
    holdings: HashMap<Pubkey, HoldingAccount>,
    script: VecDeque<ScriptedSubmit>,
    submitted: Vec<Transaction>,
    landed: HashMap<Signature, TransactionLookup>,
    lookups: Vec<Signature>,
    fail_lookups: bool,
}

#[derive(Default)]
pub struct MockNetwork {
    state: Mutex<MockState>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty token account for `owner` and returns its address.
    pub fn add_holding_account(&self, owner: Pubkey, is_frozen: bool) -> Pubkey {
        let address = Pubkey::new_unique();
        self.state.lock().unwrap().holdings.insert(
            owner,
            HoldingAccount {
                address,
                is_frozen,
                amount: 0,
            },
        );
        address
    }

    pub fn script(&self, replies: impl IntoIterator<Item = ScriptedSubmit>) {
        self.state.lock().unwrap().script.extend(replies);
    }

    pub fn set_lookup(&self, signature: Signature, lookup: TransactionLookup) {
        self.state.lock().unwrap().landed.insert(signature, lookup);
    }

    pub fn fail_lookups(&self) {
        self.state.lock().unwrap().fail_lookups = true;
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn lookups(&self) -> Vec<Signature> {
        self.state.lock().unwrap().lookups.clone()
    }
}

#[async_trait]
impl LedgerNetwork for MockNetwork {
    async fn find_holding_account(&self, owner: &Pubkey, _mint: &Pubkey) -> Result<Option<Pubkey>> {
        let state = self.state.lock().unwrap();
        if state.fail_lookups {
            bail!("mock lookup failure");
        }
        Ok(state.holdings.get(owner).map(|h| h.address))
    }

    async fn fetch_holding_account(&self, account: &Pubkey) -> Result<HoldingAccount> {
        let state = self.state.lock().unwrap();
        match state.holdings.values().find(|h| h.address == *account) {
            Some(holding) => Ok(*holding),
            None => bail!("account {} not found", account),
        }
    }

    async fn mint_decimals(&self, _mint: &Pubkey) -> Result<u8> {
        Ok(0)
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }

    async fn submit(&self, transaction: &Transaction) -> SubmissionOutcome {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(transaction.clone());
        let signature = transaction.signatures[0];
        match state.script.pop_front().unwrap_or(ScriptedSubmit::Confirm) {
            ScriptedSubmit::Confirm => SubmissionOutcome::Confirmed(signature),
            ScriptedSubmit::Ambiguous => SubmissionOutcome::Ambiguous(signature),
            ScriptedSubmit::Fail(cause) => SubmissionOutcome::Failed(cause),
        }
    }

    async fn lookup_transaction(&self, signature: &Signature) -> Result<TransactionLookup> {
        let mut state = self.state.lock().unwrap();
        state.lookups.push(*signature);
        if state.fail_lookups {
            bail!("mock lookup failure");
        }
        Ok(state
            .landed
            .get(signature)
            .copied()
            .unwrap_or(TransactionLookup::Absent))
    }
}
