//! Core transaction building logic

use crate::config::{NetworkProfile, PipelineConfig};
use crate::fees::{FeeCalculator, FeeQuote};
use crate::intent::TransferIntent;
use crate::ledger::EndpointPool;
use crate::retry::BackoffPolicy;
use crate::tx_builder::errors::BuildError;
use crate::tx_builder::freshness::RecentBlockReference;
use crate::tx_builder::instructions::{plan_transfer_instructions, sanity_check_ix_order, PlanContext};
use solana_sdk::instruction::Instruction;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Compiled message awaiting signatures
///
/// A rebuild produces a new value; nothing here is mutated after
/// construction, so a signature can never refer to a different reference
/// than the one stored alongside it.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    message: VersionedMessage,
    intent: TransferIntent,
    reference: RecentBlockReference,
    quote: FeeQuote,
}

impl UnsignedTransaction {
    pub fn message(&self) -> &VersionedMessage {
        &self.message
    }

    pub fn intent(&self) -> &TransferIntent {
        &self.intent
    }

    pub fn reference(&self) -> &RecentBlockReference {
        &self.reference
    }

    pub fn quote(&self) -> &FeeQuote {
        &self.quote
    }

    /// Signer slot 0
    pub fn fee_payer(&self) -> &Pubkey {
        // `assemble` guarantees at least the fee payer key
        &self.message.static_account_keys()[0]
    }

    /// Keys whose signatures the ledger requires, in slot order
    pub fn required_signers(&self) -> &[Pubkey] {
        let count = usize::from(self.message.header().num_required_signatures);
        &self.message.static_account_keys()[..count]
    }

    /// The bytes every party signs
    pub fn message_bytes(&self) -> Vec<u8> {
        self.message.serialize()
    }
}

/// Builds unsigned transfer transactions with the sponsor as fee payer
pub struct TransactionBuilder {
    pool: Arc<EndpointPool>,
    fees: FeeCalculator,
    plan: PlanContext,
    backoff: BackoffPolicy,
}

impl TransactionBuilder {
    pub fn new(
        pool: Arc<EndpointPool>,
        fees: FeeCalculator,
        plan: PlanContext,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            pool,
            fees,
            plan,
            backoff,
        }
    }

    pub fn from_config(pool: Arc<EndpointPool>, config: &PipelineConfig, profile: &NetworkProfile) -> Self {
        let plan = PlanContext {
            sponsor: config.sponsor.public_key,
            treasury: config.sponsor.treasury,
            mint: config.token.mint,
            decimals: config.token.decimals,
            token_program: config.token.token_program,
            compute_unit_limit: profile.compute_unit_limit,
            compute_unit_price: profile.compute_unit_price_micro_lamports,
        };
        Self::new(pool, FeeCalculator::new(config.fees), plan, profile.backoff)
    }

    pub fn sponsor(&self) -> &Pubkey {
        &self.plan.sponsor
    }

    pub fn plan_context(&self) -> &PlanContext {
        &self.plan
    }

    pub fn fees(&self) -> &FeeCalculator {
        &self.fees
    }

    /// Build an unsigned transaction for `intent`.
    ///
    /// The recent blockhash is fetched last so the reference is as young as
    /// possible when the transaction is handed back.
    #[instrument(skip(self, intent), fields(kind = %intent.kind(), sender = %intent.sender()))]
    pub async fn build(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, BuildError> {
        let quote = self.fees.quote_intent(intent)?;
        let instructions = plan_transfer_instructions(&self.plan, intent, &quote)?;
        sanity_check_ix_order(&instructions, &self.plan.token_program)?;

        let reference = self.fetch_reference().await?;
        self.assemble(intent, quote, &instructions, reference)
    }

    pub async fn fetch_reference(&self) -> Result<RecentBlockReference, BuildError> {
        let reference = self
            .pool
            .with_failover("fetch_recent_reference", &self.backoff, |endpoint| async move {
                endpoint.fetch_recent_reference().await
            })
            .await?;
        Ok(RecentBlockReference::stamp(reference))
    }

    /// Compile `instructions` against `reference`. Pure: identical inputs
    /// produce an identical message.
    pub fn assemble(
        &self,
        intent: &TransferIntent,
        quote: FeeQuote,
        instructions: &[Instruction],
        reference: RecentBlockReference,
    ) -> Result<UnsignedTransaction, BuildError> {
        let message = v0::Message::try_compile(
            &self.plan.sponsor,
            instructions,
            &[],
            *reference.blockhash(),
        )
        .map_err(|e| BuildError::Compile(e.to_string()))?;
        let message = VersionedMessage::V0(message);

        if message.static_account_keys().first() != Some(&self.plan.sponsor) {
            return Err(BuildError::Compile("fee payer is not the sponsor".to_string()));
        }

        // Size with every signature slot filled
        let signature_count = usize::from(message.header().num_required_signatures);
        let placeholder = VersionedTransaction {
            signatures: vec![Signature::default(); signature_count],
            message: message.clone(),
        };
        let size = bincode::serialized_size(&placeholder)
            .map_err(|e| BuildError::Serialization(e.to_string()))? as usize;
        if size > PACKET_DATA_SIZE {
            return Err(BuildError::TooLarge {
                size,
                max: PACKET_DATA_SIZE,
            });
        }

        debug!(
            blockhash = %reference.blockhash(),
            last_valid_block_height = reference.last_valid_block_height(),
            signers = signature_count,
            size,
            "Assembled transaction"
        );

        Ok(UnsignedTransaction {
            message,
            intent: intent.clone(),
            reference,
            quote,
        })
    }
}

impl std::fmt::Debug for TransactionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBuilder")
            .field("plan", &self.plan)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{TransferKind, TransferLeg};
    use crate::ledger::{LedgerEndpoint, LedgerError, LedgerReference, ScriptedLedger};
    use solana_sdk::hash::Hash;

    fn builder() -> (TransactionBuilder, Arc<ScriptedLedger>) {
        let ledger = Arc::new(ScriptedLedger::new("mock://ledger"));
        let pool = EndpointPool::new(vec![ledger.clone() as Arc<dyn LedgerEndpoint>], 1).unwrap();
        let plan = PlanContext {
            sponsor: Pubkey::new_unique(),
            treasury: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            decimals: 6,
            token_program: spl_token::id(),
            compute_unit_limit: 80_000,
            compute_unit_price: 0,
        };
        (
            TransactionBuilder::new(Arc::new(pool), FeeCalculator::default(), plan, BackoffPolicy::default()),
            ledger,
        )
    }

    fn intent() -> TransferIntent {
        TransferIntent::single(
            TransferKind::External,
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            2_500_000,
            true,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_designates_sponsor_as_fee_payer() {
        let (builder, ledger) = builder();
        let intent = intent();
        let unsigned = builder.build(&intent).await.unwrap();

        assert_eq!(unsigned.fee_payer(), builder.sponsor());
        assert_eq!(
            unsigned.required_signers(),
            &[*builder.sponsor(), *intent.sender()]
        );
        assert_eq!(unsigned.quote().service_fee, 2_500);
        assert_eq!(ledger.reference_fetches(), 1);
        assert_eq!(
            unsigned.message().recent_blockhash(),
            unsigned.reference().blockhash()
        );
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let (builder, _ledger) = builder();
        let intent = intent();
        let quote = builder.fees().quote_intent(&intent).unwrap();
        let ixs = plan_transfer_instructions(builder.plan_context(), &intent, &quote).unwrap();
        let reference = RecentBlockReference::stamp(LedgerReference {
            blockhash: Hash::new_unique(),
            last_valid_block_height: 500,
        });

        let a = builder.assemble(&intent, quote, &ixs, reference).unwrap();
        let b = builder.assemble(&intent, quote, &ixs, reference).unwrap();
        assert_eq!(a.message_bytes(), b.message_bytes());
    }

    #[tokio::test]
    async fn test_oversized_distribution_rejected() {
        let (builder, _ledger) = builder();
        let legs = (0..40)
            .map(|_| TransferLeg {
                recipient: Pubkey::new_unique(),
                amount: 1,
            })
            .collect();
        let intent = TransferIntent::distribution(Pubkey::new_unique(), legs, true).unwrap();

        assert!(matches!(
            builder.build(&intent).await,
            Err(BuildError::TooLarge { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_failure_surfaces_after_retries() {
        let (builder, ledger) = builder();
        for _ in 0..BackoffPolicy::default().max_attempts {
            ledger.script_reference_error(ledger.rate_limited());
        }

        assert!(matches!(
            builder.build(&intent()).await,
            Err(BuildError::Reference(LedgerError::RateLimited { .. }))
        ));
    }
}
