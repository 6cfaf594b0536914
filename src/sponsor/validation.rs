//! Local checks the sponsor runs on every envelope before signing
//!
//! All of these are pure functions over the decoded transaction. The
//! network-bound blockhash check lives in the coordinator.

use super::wire::CosignError;
use solana_sdk::compute_budget;
use solana_sdk::message::VersionedMessage;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::system_program;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;

/// `ComputeBudgetInstruction::SetComputeUnitLimit` discriminant
const SET_COMPUTE_UNIT_LIMIT: u8 = 2;
/// `ComputeBudgetInstruction::SetComputeUnitPrice` discriminant
const SET_COMPUTE_UNIT_PRICE: u8 = 3;
/// `TokenInstruction::TransferChecked` discriminant
const TRANSFER_CHECKED: u8 = 12;
/// Tag, u64 amount, u8 decimals
const TRANSFER_CHECKED_LEN: usize = 10;
/// Funder, account, wallet, mint, system program, token program
const ATA_CREATE_ACCOUNTS: usize = 6;

/// What the sponsor is willing to pay for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SponsorPolicy {
    pub sponsor: Pubkey,
    pub token_program: Pubkey,
    /// Micro-lamports per compute unit
    pub max_compute_unit_price: u64,
}

/// The claimed fee payer and signer slot 0 must both be the sponsor
pub fn check_fee_payer(
    transaction: &VersionedTransaction,
    claimed_fee_payer: &str,
    sponsor: &Pubkey,
) -> Result<(), CosignError> {
    let claimed = Pubkey::from_str(claimed_fee_payer.trim()).map_err(|_| {
        CosignError::wrong_fee_payer(format!(
            "fee payer '{claimed_fee_payer}' is not the sponsor"
        ))
    })?;
    if claimed != *sponsor {
        return Err(CosignError::wrong_fee_payer(format!(
            "fee payer {claimed} is not the sponsor"
        )));
    }

    let header = transaction.message.header();
    let slot_zero = transaction.message.static_account_keys().first();
    if header.num_required_signatures == 0 || slot_zero != Some(sponsor) {
        return Err(CosignError::wrong_fee_payer(format!(
            "transaction fee payer {} is not the sponsor",
            slot_zero.map(|k| k.to_string()).unwrap_or_default()
        )));
    }

    Ok(())
}

/// The first required signer after the fee payer
pub fn sender_of(transaction: &VersionedTransaction) -> Result<Pubkey, CosignError> {
    let required = usize::from(transaction.message.header().num_required_signatures);
    if required < 2 {
        return Err(CosignError::missing_sender_signature(
            "transaction has no signer besides the fee payer",
        ));
    }
    transaction
        .message
        .static_account_keys()
        .get(1)
        .copied()
        .ok_or_else(|| CosignError::malformed("missing sender account key"))
}

/// Structural policy over the compiled instructions
pub fn check_structure(transaction: &VersionedTransaction, policy: &SponsorPolicy) -> Result<(), CosignError> {
    let message = &transaction.message;
    if let VersionedMessage::V0(v0) = message {
        if !v0.address_table_lookups.is_empty() {
            return Err(CosignError::policy("address lookup tables are not accepted"));
        }
    }

    let keys = message.static_account_keys();
    let instructions = message.instructions();
    if instructions.is_empty() {
        return Err(CosignError::policy("transaction has no instructions"));
    }

    let mut token_instructions = 0usize;
    for (position, ix) in instructions.iter().enumerate() {
        let program = keys
            .get(usize::from(ix.program_id_index))
            .ok_or_else(|| CosignError::malformed(format!("instruction {position}: bad program index")))?;

        // Index 0 is always the sponsor (checked before this runs)
        let sponsor_positions: Vec<usize> = ix
            .accounts
            .iter()
            .enumerate()
            .filter(|(_, idx)| **idx == 0)
            .map(|(pos, _)| pos)
            .collect();

        if *program == policy.token_program {
            token_instructions += 1;
            // Anything else (close, set authority, burn, ...) could redirect
            // sponsor-funded rent or accounts
            if ix.data.len() != TRANSFER_CHECKED_LEN || ix.data[0] != TRANSFER_CHECKED {
                return Err(CosignError::policy(format!(
                    "instruction {position}: only transfer_checked is allowed on the token program"
                )));
            }
            if !sponsor_positions.is_empty() {
                return Err(CosignError::policy(format!(
                    "instruction {position}: token instruction references the sponsor"
                )));
            }
        } else if *program == spl_associated_token_account::id() {
            // Create (empty or 0) and CreateIdempotent (1) only
            if !matches!(ix.data.as_slice(), [] | [0] | [1]) {
                return Err(CosignError::policy(format!(
                    "instruction {position}: unsupported associated account instruction"
                )));
            }
            if sponsor_positions.iter().any(|pos| *pos != 0) {
                return Err(CosignError::policy(format!(
                    "instruction {position}: sponsor may only fund account creation"
                )));
            }
            check_ata_programs(position, &ix.accounts, keys, policy)?;
        } else if *program == compute_budget::id() {
            check_compute_budget(position, &ix.data, policy)?;
        } else {
            return Err(CosignError::policy(format!(
                "instruction {position}: program {program} is not allowed"
            )));
        }
    }

    if token_instructions == 0 {
        return Err(CosignError::policy("transaction moves no tokens"));
    }
    Ok(())
}

/// Account creation must go through the system program and the
/// configured token program
fn check_ata_programs(
    position: usize,
    accounts: &[u8],
    keys: &[Pubkey],
    policy: &SponsorPolicy,
) -> Result<(), CosignError> {
    if accounts.len() != ATA_CREATE_ACCOUNTS {
        return Err(CosignError::policy(format!(
            "instruction {position}: account creation expects {ATA_CREATE_ACCOUNTS} accounts, got {}",
            accounts.len()
        )));
    }
    let key_at = |slot: usize| keys.get(usize::from(accounts[slot]));
    if key_at(4) != Some(&system_program::id()) {
        return Err(CosignError::policy(format!(
            "instruction {position}: account creation must use the system program"
        )));
    }
    if key_at(5) != Some(&policy.token_program) {
        return Err(CosignError::policy(format!(
            "instruction {position}: account creation must use token program {}",
            policy.token_program
        )));
    }
    Ok(())
}

fn check_compute_budget(position: usize, data: &[u8], policy: &SponsorPolicy) -> Result<(), CosignError> {
    match data {
        [SET_COMPUTE_UNIT_LIMIT, rest @ ..] if rest.len() == 4 => Ok(()),
        [SET_COMPUTE_UNIT_PRICE, rest @ ..] if rest.len() == 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(rest);
            let price = u64::from_le_bytes(raw);
            if price > policy.max_compute_unit_price {
                Err(CosignError::policy(format!(
                    "compute unit price {price} exceeds cap {}",
                    policy.max_compute_unit_price
                )))
            } else {
                Ok(())
            }
        }
        _ => Err(CosignError::policy(format!(
            "instruction {position}: unsupported compute budget instruction"
        ))),
    }
}

/// Every required signer other than the fee payer must carry a signature
/// that verifies against the message bytes
pub fn check_sender_signatures(transaction: &VersionedTransaction) -> Result<(), CosignError> {
    let required = usize::from(transaction.message.header().num_required_signatures);
    if required < 2 {
        return Err(CosignError::missing_sender_signature(
            "transaction has no signer besides the fee payer",
        ));
    }
    if transaction.signatures.len() != required {
        return Err(CosignError::malformed(format!(
            "expected {required} signatures, got {}",
            transaction.signatures.len()
        )));
    }

    let message = transaction.message.serialize();
    let keys = transaction.message.static_account_keys();
    for slot in 1..required {
        let signature = &transaction.signatures[slot];
        let key = keys
            .get(slot)
            .ok_or_else(|| CosignError::malformed("signer key missing"))?;
        if *signature == Signature::default() {
            return Err(CosignError::missing_sender_signature(format!(
                "signer {key} has not signed"
            )));
        }
        if !signature.verify(key.as_ref(), &message) {
            return Err(CosignError::missing_sender_signature(format!(
                "signature for {key} does not verify"
            )));
        }
    }
    Ok(())
}
