//! Sponsor service fee calculation
//!
//! Pure functions only: the fee is `ceil(amount * bps / 10_000)` where the
//! basis points come from the [`FeeSchedule`] tier of the transfer kind. The
//! rent for any destination token account the sponsor creates is reported
//! separately because the sponsor absorbs it, not the sender.

use crate::intent::{TransferIntent, TransferKind};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Basis-point denominator
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Rent-exempt minimum for an SPL token account (165 bytes)
pub const ASSOCIATED_ACCOUNT_RENT_LAMPORTS: u64 = 2_039_280;

/// Fee calculation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("amount must not be negative: {0}")]
    NegativeAmount(String),

    #[error("invalid amount '{input}': {reason}")]
    InvalidAmount { input: String, reason: String },

    #[error("unknown transfer kind: {0}")]
    UnknownKind(String),

    #[error("basis points for {kind} out of range: {bps}")]
    InvalidBps { kind: TransferKind, bps: u16 },

    #[error("fee arithmetic overflow")]
    Overflow,
}

/// Basis points charged per transfer kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    #[serde(default = "default_internal_bps")]
    pub internal_bps: u16,
    #[serde(default = "default_external_bps")]
    pub external_bps: u16,
    #[serde(default = "default_pool_fund_bps")]
    pub pool_fund_bps: u16,
    #[serde(default)]
    pub pool_withdraw_bps: u16,
    #[serde(default)]
    pub pool_distribute_bps: u16,
}

fn default_internal_bps() -> u16 { 1 }
fn default_external_bps() -> u16 { 10 }
fn default_pool_fund_bps() -> u16 { 150 }

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            internal_bps: default_internal_bps(),
            external_bps: default_external_bps(),
            pool_fund_bps: default_pool_fund_bps(),
            pool_withdraw_bps: 0,
            pool_distribute_bps: 0,
        }
    }
}

impl FeeSchedule {
    pub fn bps_for(&self, kind: TransferKind) -> u16 {
        match kind {
            TransferKind::Internal => self.internal_bps,
            TransferKind::External => self.external_bps,
            TransferKind::PoolFund => self.pool_fund_bps,
            TransferKind::PoolWithdraw => self.pool_withdraw_bps,
            TransferKind::PoolDistribute => self.pool_distribute_bps,
        }
    }

    pub fn validate(&self) -> Result<(), FeeError> {
        for kind in [
            TransferKind::Internal,
            TransferKind::External,
            TransferKind::PoolFund,
            TransferKind::PoolWithdraw,
            TransferKind::PoolDistribute,
        ] {
            let bps = self.bps_for(kind);
            if u64::from(bps) > BPS_DENOMINATOR {
                return Err(FeeError::InvalidBps { kind, bps });
            }
        }
        Ok(())
    }
}

/// Result of a fee calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub kind: TransferKind,
    /// Transferred amount in minor units (sum of all legs)
    pub amount: u64,
    /// Sponsor service fee in minor units, paid by the sender
    pub service_fee: u64,
    /// Minimum token balance the sender needs: amount + fee
    pub sender_total: u64,
    /// Destination token accounts created by the sponsor
    pub accounts_to_create: u32,
    /// Rent the sponsor pays for those accounts
    pub sponsor_absorbed_lamports: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeeCalculator {
    schedule: FeeSchedule,
}

impl FeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Service fee for `amount` minor units of a `kind` transfer
    pub fn service_fee(&self, kind: TransferKind, amount: u64) -> Result<u64, FeeError> {
        if amount == 0 {
            return Err(FeeError::ZeroAmount);
        }
        let bps = u128::from(self.schedule.bps_for(kind));
        let denominator = u128::from(BPS_DENOMINATOR);
        let scaled = u128::from(amount)
            .checked_mul(bps)
            .ok_or(FeeError::Overflow)?;
        let fee = scaled.div_ceil(denominator);
        u64::try_from(fee).map_err(|_| FeeError::Overflow)
    }

    pub fn quote(
        &self,
        kind: TransferKind,
        amount: u64,
        accounts_to_create: u32,
    ) -> Result<FeeQuote, FeeError> {
        let service_fee = self.service_fee(kind, amount)?;
        let sender_total = amount.checked_add(service_fee).ok_or(FeeError::Overflow)?;
        let sponsor_absorbed_lamports = u64::from(accounts_to_create)
            .checked_mul(ASSOCIATED_ACCOUNT_RENT_LAMPORTS)
            .ok_or(FeeError::Overflow)?;

        Ok(FeeQuote {
            kind,
            amount,
            service_fee,
            sender_total,
            accounts_to_create,
            sponsor_absorbed_lamports,
        })
    }

    pub fn quote_intent(&self, intent: &TransferIntent) -> Result<FeeQuote, FeeError> {
        self.quote(
            intent.kind(),
            intent.total_amount(),
            intent.accounts_to_create(),
        )
    }

    /// Quote from untyped application input: a kind name and a decimal amount
    pub fn quote_ui(
        &self,
        kind: &str,
        ui_amount: &str,
        decimals: u8,
        create_destination_account: bool,
    ) -> Result<FeeQuote, FeeError> {
        let kind = TransferKind::from_str(kind)?;
        let amount = parse_ui_amount(ui_amount, decimals)?;
        self.quote(kind, amount, u32::from(create_destination_account))
    }
}

/// Convert a decimal UI amount ("12.5") into token minor units
pub fn parse_ui_amount(input: &str, decimals: u8) -> Result<u64, FeeError> {
    let trimmed = input.trim();
    let invalid = |reason: &str| FeeError::InvalidAmount {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.starts_with('-') {
        return Err(FeeError::NegativeAmount(input.to_string()));
    }
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("empty"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if frac.len() > usize::from(decimals) {
        return Err(invalid("more fractional digits than the token supports"));
    }

    let scale = 10u64
        .checked_pow(u32::from(decimals))
        .ok_or(FeeError::Overflow)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| FeeError::Overflow)?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = usize::from(decimals));
        padded.parse::<u64>().map_err(|_| invalid("bad fraction"))?
    };

    let amount = whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or(FeeError::Overflow)?;
    if amount == 0 {
        return Err(FeeError::ZeroAmount);
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDC_DECIMALS: u8 = 6;

    fn units(n: u64) -> u64 {
        n * 10u64.pow(u32::from(USDC_DECIMALS))
    }

    #[test]
    fn test_internal_and_pool_fund_tiers() {
        let calc = FeeCalculator::default();

        // 100 units internal -> 0.01 units
        assert_eq!(calc.service_fee(TransferKind::Internal, units(100)).unwrap(), 10_000);
        // 100 units pool-fund -> 1.5 units
        assert_eq!(
            calc.service_fee(TransferKind::PoolFund, units(100)).unwrap(),
            1_500_000
        );
        assert_eq!(calc.service_fee(TransferKind::External, units(100)).unwrap(), 100_000);
        assert_eq!(calc.service_fee(TransferKind::PoolWithdraw, units(100)).unwrap(), 0);
    }

    #[test]
    fn test_fee_rounds_up() {
        let calc = FeeCalculator::default();
        // 1 bps of 1 minor unit is 0.0001, charged as 1
        assert_eq!(calc.service_fee(TransferKind::Internal, 1).unwrap(), 1);
    }

    #[test]
    fn test_quote_includes_sponsor_absorbed_rent() {
        let calc = FeeCalculator::default();
        let quote = calc.quote(TransferKind::External, units(10), 1).unwrap();

        assert_eq!(quote.service_fee, 10_000);
        assert_eq!(quote.sender_total, units(10) + 10_000);
        assert_eq!(quote.sponsor_absorbed_lamports, ASSOCIATED_ACCOUNT_RENT_LAMPORTS);
    }

    #[test]
    fn test_rejects_zero_negative_and_unknown() {
        let calc = FeeCalculator::default();

        assert_eq!(
            calc.service_fee(TransferKind::Internal, 0),
            Err(FeeError::ZeroAmount)
        );
        assert!(matches!(
            calc.quote_ui("internal", "-5", USDC_DECIMALS, false),
            Err(FeeError::NegativeAmount(_))
        ));
        assert!(matches!(
            calc.quote_ui("lottery", "5", USDC_DECIMALS, false),
            Err(FeeError::UnknownKind(_))
        ));
        assert_eq!(
            calc.quote_ui("internal", "0.000", USDC_DECIMALS, false),
            Err(FeeError::ZeroAmount)
        );
    }

    #[test]
    fn test_parse_ui_amount() {
        assert_eq!(parse_ui_amount("100", USDC_DECIMALS).unwrap(), units(100));
        assert_eq!(parse_ui_amount("12.5", USDC_DECIMALS).unwrap(), 12_500_000);
        assert_eq!(parse_ui_amount(".25", USDC_DECIMALS).unwrap(), 250_000);
        assert!(parse_ui_amount("1.1234567", USDC_DECIMALS).is_err());
        assert!(parse_ui_amount("12a", USDC_DECIMALS).is_err());
        assert!(parse_ui_amount("", USDC_DECIMALS).is_err());
    }

    #[test]
    fn test_schedule_validation() {
        assert!(FeeSchedule::default().validate().is_ok());
        let bad = FeeSchedule {
            external_bps: 20_000,
            ..FeeSchedule::default()
        };
        assert!(matches!(bad.validate(), Err(FeeError::InvalidBps { .. })));
    }

    #[test]
    fn test_overflow_is_reported() {
        let calc = FeeCalculator::new(FeeSchedule {
            internal_bps: 10_000,
            ..FeeSchedule::default()
        });
        assert_eq!(
            calc.quote(TransferKind::Internal, u64::MAX, 0),
            Err(FeeError::Overflow)
        );
    }
}
