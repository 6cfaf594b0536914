//! Semantic transfer intents handed over by the application layer

use crate::fees::FeeError;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Category of value transfer, which drives the sponsor fee tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferKind {
    /// User to user inside the application
    Internal,
    /// User to an address outside the application
    External,
    /// User contribution into a shared pool
    PoolFund,
    /// Pool payout back to a single member
    PoolWithdraw,
    /// Pool payout split across several members
    PoolDistribute,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Internal => "internal",
            TransferKind::External => "external",
            TransferKind::PoolFund => "pool-fund",
            TransferKind::PoolWithdraw => "pool-withdraw",
            TransferKind::PoolDistribute => "pool-distribute",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "internal" => Ok(TransferKind::Internal),
            "external" => Ok(TransferKind::External),
            "pool-fund" => Ok(TransferKind::PoolFund),
            "pool-withdraw" => Ok(TransferKind::PoolWithdraw),
            "pool-distribute" => Ok(TransferKind::PoolDistribute),
            _ => Err(FeeError::UnknownKind(s.to_string())),
        }
    }
}

/// Intent construction errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("transfer amount must be greater than zero")]
    ZeroAmount,

    #[error("{kind} transfers take exactly one recipient, got {count}")]
    RecipientCount { kind: TransferKind, count: usize },

    #[error("distribution has no recipients")]
    EmptyDistribution,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("sender cannot also be a recipient")]
    SelfTransfer,

    #[error("total amount overflows")]
    Overflow,
}

/// One recipient/amount pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub recipient: Pubkey,
    /// Amount in token minor units
    pub amount: u64,
}

/// Immutable description of a value transfer
///
/// Produced once by the application layer and consumed by
/// [`TransactionBuilder`](crate::tx_builder::TransactionBuilder). Fields are
/// private so a constructed intent cannot be edited between build attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    kind: TransferKind,
    sender: Pubkey,
    legs: Vec<TransferLeg>,
    requires_destination_account: bool,
}

impl TransferIntent {
    /// Single-recipient transfer (a one-leg distribution for `PoolDistribute`)
    pub fn single(
        kind: TransferKind,
        sender: Pubkey,
        recipient: Pubkey,
        amount: u64,
        requires_destination_account: bool,
    ) -> Result<Self, IntentError> {
        if kind == TransferKind::PoolDistribute {
            return Self::distribution(
                sender,
                vec![TransferLeg { recipient, amount }],
                requires_destination_account,
            );
        }
        Self::validated(
            kind,
            sender,
            vec![TransferLeg { recipient, amount }],
            requires_destination_account,
        )
    }

    /// Pool payout split across several recipients
    pub fn distribution(
        sender: Pubkey,
        legs: Vec<TransferLeg>,
        requires_destination_account: bool,
    ) -> Result<Self, IntentError> {
        if legs.is_empty() {
            return Err(IntentError::EmptyDistribution);
        }
        Self::validated(
            TransferKind::PoolDistribute,
            sender,
            legs,
            requires_destination_account,
        )
    }

    /// Parse base58 addresses coming from the application layer
    pub fn parse_single(
        kind: &str,
        sender: &str,
        recipient: &str,
        amount: u64,
        requires_destination_account: bool,
    ) -> Result<Self, crate::tx_builder::BuildError> {
        let kind = TransferKind::from_str(kind)?;
        let sender = parse_address(sender)?;
        let recipient = parse_address(recipient)?;
        Ok(Self::single(
            kind,
            sender,
            recipient,
            amount,
            requires_destination_account,
        )?)
    }

    fn validated(
        kind: TransferKind,
        sender: Pubkey,
        legs: Vec<TransferLeg>,
        requires_destination_account: bool,
    ) -> Result<Self, IntentError> {
        if kind != TransferKind::PoolDistribute && legs.len() != 1 {
            return Err(IntentError::RecipientCount {
                kind,
                count: legs.len(),
            });
        }
        if sender == Pubkey::default() {
            return Err(IntentError::InvalidAddress(sender.to_string()));
        }
        for leg in &legs {
            if leg.amount == 0 {
                return Err(IntentError::ZeroAmount);
            }
            if leg.recipient == Pubkey::default() {
                return Err(IntentError::InvalidAddress(leg.recipient.to_string()));
            }
            if leg.recipient == sender {
                return Err(IntentError::SelfTransfer);
            }
        }

        let intent = Self {
            kind,
            sender,
            legs,
            requires_destination_account,
        };
        intent.checked_total().ok_or(IntentError::Overflow)?;
        Ok(intent)
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn sender(&self) -> &Pubkey {
        &self.sender
    }

    pub fn legs(&self) -> &[TransferLeg] {
        &self.legs
    }

    pub fn requires_destination_account(&self) -> bool {
        self.requires_destination_account
    }

    /// Sum of all leg amounts in minor units
    pub fn total_amount(&self) -> u64 {
        // Overflow is rejected at construction
        self.checked_total().unwrap_or(u64::MAX)
    }

    /// Number of destination token accounts the sponsor funds
    pub fn accounts_to_create(&self) -> u32 {
        if self.requires_destination_account {
            self.legs.len() as u32
        } else {
            0
        }
    }

    fn checked_total(&self) -> Option<u64> {
        self.legs
            .iter()
            .try_fold(0u64, |acc, leg| acc.checked_add(leg.amount))
    }
}

fn parse_address(s: &str) -> Result<Pubkey, IntentError> {
    Pubkey::from_str(s.trim()).map_err(|_| IntentError::InvalidAddress(s.to_string()))
}
