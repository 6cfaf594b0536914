//! Instruction planning and ordering validation
//!
//! Every transfer compiles to the same shape:
//! 1. Compute budget instructions (CU limit, priority fee), if configured
//! 2. Per leg: idempotent destination account creation funded by the
//!    sponsor (when requested), then `transfer_checked` from the sender
//! 3. `transfer_checked` of the service fee to the treasury, if non-zero

use crate::fees::FeeQuote;
use crate::intent::TransferIntent;
use crate::tx_builder::errors::BuildError;
use solana_sdk::{compute_budget, compute_budget::ComputeBudgetInstruction, instruction::Instruction, pubkey::Pubkey};
use spl_associated_token_account::{
    get_associated_token_address_with_program_id, instruction::create_associated_token_account_idempotent,
};

/// Accounts and settings shared by every plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanContext {
    /// Fee payer and funder of created accounts
    pub sponsor: Pubkey,
    /// Owner of the fee-collecting token account
    pub treasury: Pubkey,
    pub mint: Pubkey,
    pub decimals: u8,
    pub token_program: Pubkey,
    /// 0 = skip this instruction
    pub compute_unit_limit: u32,
    /// Micro-lamports per CU; 0 = skip this instruction
    pub compute_unit_price: u64,
}

impl PlanContext {
    pub fn token_account(&self, owner: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(owner, &self.mint, &self.token_program)
    }
}

/// Plan the ordered instruction list for `intent`
pub fn plan_transfer_instructions(
    ctx: &PlanContext,
    intent: &TransferIntent,
    quote: &FeeQuote,
) -> Result<Vec<Instruction>, BuildError> {
    // compute budget (2) + per leg (2) + fee (1)
    let mut instructions = Vec::with_capacity(3 + intent.legs().len() * 2);

    if ctx.compute_unit_limit > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(
            ctx.compute_unit_limit,
        ));
    }
    if ctx.compute_unit_price > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            ctx.compute_unit_price,
        ));
    }

    let sender = intent.sender();
    let source = ctx.token_account(sender);

    for leg in intent.legs() {
        let destination = ctx.token_account(&leg.recipient);
        if intent.requires_destination_account() {
            instructions.push(create_associated_token_account_idempotent(
                &ctx.sponsor,
                &leg.recipient,
                &ctx.mint,
                &ctx.token_program,
            ));
        }
        instructions.push(token_transfer(ctx, &source, &destination, sender, leg.amount)?);
    }

    if quote.service_fee > 0 {
        let treasury_account = ctx.token_account(&ctx.treasury);
        instructions.push(token_transfer(
            ctx,
            &source,
            &treasury_account,
            sender,
            quote.service_fee,
        )?);
    }

    Ok(instructions)
}

fn token_transfer(
    ctx: &PlanContext,
    source: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
) -> Result<Instruction, BuildError> {
    spl_token::instruction::transfer_checked(
        &ctx.token_program,
        source,
        &ctx.mint,
        destination,
        authority,
        &[],
        amount,
        ctx.decimals,
    )
    .map_err(|e| BuildError::instruction_failed("spl_token", e.to_string()))
}

/// Validate instruction ordering (debug/test only)
///
/// Compute budget instructions must form a prefix, and the list must
/// contain at least one token program instruction.
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(
    instructions: &[Instruction],
    token_program: &Pubkey,
) -> Result<(), BuildError> {
    if instructions.is_empty() {
        return Err(BuildError::invalid_order("Instruction list is empty"));
    }

    let is_compute_budget = |ix: &Instruction| ix.program_id == compute_budget::id();
    let prefix = instructions
        .iter()
        .take_while(|ix| is_compute_budget(ix))
        .count();

    if let Some(idx) = instructions
        .iter()
        .skip(prefix)
        .position(|ix| is_compute_budget(ix))
    {
        return Err(BuildError::invalid_order(format!(
            "Compute budget instruction after program instructions (at position {})",
            prefix + idx
        )));
    }

    if !instructions.iter().any(|ix| ix.program_id == *token_program) {
        return Err(BuildError::invalid_order("No token transfer instruction"));
    }

    Ok(())
}

/// No-op version of sanity_check_ix_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(
    _instructions: &[Instruction],
    _token_program: &Pubkey,
) -> Result<(), BuildError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::FeeCalculator;
    use crate::intent::{TransferKind, TransferLeg};

    fn context() -> PlanContext {
        PlanContext {
            sponsor: Pubkey::new_unique(),
            treasury: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            decimals: 6,
            token_program: spl_token::id(),
            compute_unit_limit: 80_000,
            compute_unit_price: 5_000,
        }
    }

    fn plan(ctx: &PlanContext, intent: &TransferIntent) -> Vec<Instruction> {
        let quote = FeeCalculator::default().quote_intent(intent).unwrap();
        plan_transfer_instructions(ctx, intent, &quote).unwrap()
    }

    #[test]
    fn test_plan_with_account_creation() {
        let ctx = context();
        let intent = TransferIntent::single(
            TransferKind::External,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            1_000_000,
            true,
        )
        .unwrap();

        let ixs = plan(&ctx, &intent);
        assert_eq!(ixs.len(), 5);
        assert_eq!(ixs[0].program_id, compute_budget::id());
        assert_eq!(ixs[1].program_id, compute_budget::id());
        assert_eq!(ixs[2].program_id, spl_associated_token_account::id());
        // Sponsor funds the new account
        assert_eq!(ixs[2].accounts[0].pubkey, ctx.sponsor);
        assert!(ixs[2].accounts[0].is_signer);
        assert_eq!(ixs[3].program_id, spl_token::id());
        assert_eq!(ixs[4].program_id, spl_token::id());
        assert_eq!(ixs[4].accounts[2].pubkey, ctx.token_account(&ctx.treasury));
        assert!(sanity_check_ix_order(&ixs, &ctx.token_program).is_ok());
    }

    #[test]
    fn test_zero_fee_skips_treasury_transfer() {
        let ctx = PlanContext {
            compute_unit_limit: 0,
            compute_unit_price: 0,
            ..context()
        };
        let intent = TransferIntent::single(
            TransferKind::PoolWithdraw,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            500,
            false,
        )
        .unwrap();

        let ixs = plan(&ctx, &intent);
        assert_eq!(ixs.len(), 1);
        assert_eq!(ixs[0].program_id, spl_token::id());
    }

    #[test]
    fn test_distribution_plans_one_transfer_per_leg() {
        let ctx = context();
        let legs = (0..3)
            .map(|i| TransferLeg {
                recipient: Pubkey::new_unique(),
                amount: 100 + i,
            })
            .collect();
        let intent = TransferIntent::distribution(Pubkey::new_unique(), legs, true).unwrap();

        let ixs = plan(&ctx, &intent);
        let creations = ixs
            .iter()
            .filter(|ix| ix.program_id == spl_associated_token_account::id())
            .count();
        let transfers = ixs
            .iter()
            .filter(|ix| ix.program_id == spl_token::id())
            .count();
        assert_eq!(creations, 3);
        assert_eq!(transfers, 3);
    }

    #[test]
    fn test_sanity_check_rejects_late_compute_budget() {
        let ctx = context();
        let intent = TransferIntent::single(
            TransferKind::Internal,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            10,
            false,
        )
        .unwrap();
        let mut ixs = plan(&ctx, &intent);
        let cu = ixs.remove(0);
        ixs.push(cu);

        assert!(matches!(
            sanity_check_ix_order(&ixs, &ctx.token_program),
            Err(BuildError::InvalidInstructionOrder(_))
        ));
        assert!(sanity_check_ix_order(&[], &ctx.token_program).is_err());
    }
}
