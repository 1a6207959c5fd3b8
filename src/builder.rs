use crate::{
    ledger::Operation,
    network::LedgerNetwork,
};
use anyhow::{anyhow, Context, Result};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account,
};
use spl_token::instruction::{freeze_account, thaw_account, transfer_checked};
use std::str::FromStr;

/// One network transaction under construction.
#[derive(Debug, Clone)]
pub struct Batch {
    pub operation: Operation,
    /// Recipients whose status follows the batch outcome.
    pub recipients: Vec<String>,
    pub instructions: Vec<Instruction>,
}

impl Batch {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            recipients: Vec::new(),
            instructions: Vec::new(),
        }
    }

    pub fn has_actions(&self) -> bool {
        !self.instructions.is_empty()
    }
}

/// What the builder decided for a single recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientPlan {
    CreateTransferFreeze,
    TransferFreeze,
    AlreadyFrozen,
    Thaw,
    AlreadyThawed,
    NoHoldingAccount,
}

impl RecipientPlan {
    /// Recipients without a token account sit out a thaw batch and stay NotExecuted.
    pub fn participates(&self) -> bool {
        !matches!(self, RecipientPlan::NoHoldingAccount)
    }
}

/// Funding parameters, only needed by the transferAndFreeze workflow.
#[derive(Debug, Clone, Copy)]
pub struct TransferSource {
    pub account: Pubkey,
    pub amount: u64,
    pub decimals: u8,
}

pub struct OperationBuilder<'a> {
    network: &'a dyn LedgerNetwork,
    mint: Pubkey,
    authority: Pubkey,
    transfer: Option<TransferSource>,
}

impl<'a> OperationBuilder<'a> {
    pub fn for_transfer(
        network: &'a dyn LedgerNetwork,
        mint: Pubkey,
        authority: Pubkey,
        source: TransferSource,
    ) -> Self {
        Self {
            network,
            mint,
            authority,
            transfer: Some(source),
        }
    }

    pub fn for_thaw(network: &'a dyn LedgerNetwork, mint: Pubkey, authority: Pubkey) -> Self {
        Self {
            network,
            mint,
            authority,
            transfer: None,
        }
    }

    /// Inspects the recipient's token account and appends whatever actions
    /// bring it to the batch's target state. Participating recipients are
    /// added to `batch.recipients` even when no action was needed. On error
    /// the batch is left exactly as it was.
    pub async fn append(&self, batch: &mut Batch, recipient: &str) -> Result<RecipientPlan> {
        let owner = Pubkey::from_str(recipient)
            .with_context(|| format!("Ledger address {} is not a valid public key", recipient))?;
        let mut instructions = Vec::new();
        let plan = match batch.operation {
            Operation::TransferAndFreeze => {
                self.append_transfer_and_freeze(&mut instructions, &owner)
                    .await?
            }
            Operation::Thaw => self.append_thaw(&mut instructions, &owner).await?,
        };
        batch.instructions.extend(instructions);
        if plan.participates() {
            batch.recipients.push(recipient.to_string());
        }
        Ok(plan)
    }

    async fn append_transfer_and_freeze(
        &self,
        instructions: &mut Vec<Instruction>,
        owner: &Pubkey,
    ) -> Result<RecipientPlan> {
        let source = self
            .transfer
            .ok_or_else(|| anyhow!("transferAndFreeze requires a funding source"))?;
        let token_program = spl_token::id();

        let (account, plan) = match self.network.find_holding_account(owner, &self.mint).await? {
            None => {
                let account = get_associated_token_address(owner, &self.mint);
                instructions.push(create_associated_token_account(
                    &self.authority,
                    owner,
                    &self.mint,
                    &token_program,
                ));
                (account, RecipientPlan::CreateTransferFreeze)
            }
            Some(account) => {
                let holding = self.network.fetch_holding_account(&account).await?;
                if holding.is_frozen {
                    tracing::info!(%owner, %account, "token account already frozen");
                    return Ok(RecipientPlan::AlreadyFrozen);
                }
                (account, RecipientPlan::TransferFreeze)
            }
        };

        instructions.push(transfer_checked(
            &token_program,
            &source.account,
            &self.mint,
            &account,
            &self.authority,
            &[],
            source.amount,
            source.decimals,
        )?);
        instructions.push(freeze_account(
            &token_program,
            &account,
            &self.mint,
            &self.authority,
            &[],
        )?);
        Ok(plan)
    }

    async fn append_thaw(
        &self,
        instructions: &mut Vec<Instruction>,
        owner: &Pubkey,
    ) -> Result<RecipientPlan> {
        let Some(account) = self.network.find_holding_account(owner, &self.mint).await? else {
            return Ok(RecipientPlan::NoHoldingAccount);
        };
        let holding = self.network.fetch_holding_account(&account).await?;
        if !holding.is_frozen {
            tracing::info!(%owner, %account, "token account already thawed");
            return Ok(RecipientPlan::AlreadyThawed);
        }
        instructions.push(thaw_account(
            &spl_token::id(),
            &account,
            &self.mint,
            &self.authority,
            &[],
        )?);
        Ok(RecipientPlan::Thaw)
    }
}
