use super::{LedgerEndpoint, LedgerError, LedgerReference, LedgerStatus};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::{TransactionConfirmationStatus, TransactionStatus, UiTransactionEncoding};
use std::time::Duration;
use tracing::{debug, instrument};

/// [`LedgerEndpoint`] over a Solana JSON-RPC node
pub struct RpcLedgerEndpoint {
    url: String,
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcLedgerEndpoint {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let url = url.into();
        let commitment = CommitmentConfig::confirmed();
        let client = RpcClient::new_with_timeout_and_commitment(url.clone(), timeout, commitment);
        Self {
            url,
            client,
            commitment,
        }
    }

    fn map_status(status: Option<TransactionStatus>) -> LedgerStatus {
        let Some(status) = status else {
            return LedgerStatus::NotFound;
        };
        if let Some(err) = status.err {
            return LedgerStatus::Failed(err.to_string());
        }
        match status.confirmation_status {
            Some(TransactionConfirmationStatus::Processed) => LedgerStatus::Processed,
            Some(TransactionConfirmationStatus::Confirmed) => LedgerStatus::Confirmed,
            Some(TransactionConfirmationStatus::Finalized) => LedgerStatus::Finalized,
            // Older nodes only report the confirmation count; `None` means rooted
            None => match status.confirmations {
                None => LedgerStatus::Finalized,
                Some(_) => LedgerStatus::Confirmed,
            },
        }
    }
}

impl std::fmt::Debug for RpcLedgerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedgerEndpoint")
            .field("url", &self.url)
            .field("commitment", &self.commitment.commitment)
            .finish()
    }
}

#[async_trait]
impl LedgerEndpoint for RpcLedgerEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(endpoint = %self.url))]
    async fn fetch_recent_reference(&self) -> Result<LedgerReference, LedgerError> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| LedgerError::from_client_error(e, &self.url))?;

        debug!(%blockhash, last_valid_block_height, "Fetched recent blockhash");
        Ok(LedgerReference {
            blockhash,
            last_valid_block_height,
        })
    }

    #[instrument(skip(self), fields(endpoint = %self.url))]
    async fn is_reference_valid(&self, blockhash: &Hash) -> Result<bool, LedgerError> {
        self.client
            .is_blockhash_valid(blockhash, self.commitment)
            .await
            .map_err(|e| LedgerError::from_client_error(e, &self.url))
    }

    #[instrument(skip(self, transaction), fields(endpoint = %self.url))]
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature, LedgerError> {
        // Preflight simulation rejects transactions that land fine under load;
        // the confirmation step is authoritative.
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            encoding: Some(UiTransactionEncoding::Base64),
            ..RpcSendTransactionConfig::default()
        };

        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| LedgerError::from_client_error(e, &self.url))
    }

    #[instrument(skip(self), fields(endpoint = %self.url))]
    async fn status(&self, signature: &Signature) -> Result<LedgerStatus, LedgerError> {
        let response = self
            .client
            .get_signature_statuses_with_history(&[*signature])
            .await
            .map_err(|e| LedgerError::from_client_error(e, &self.url))?;

        Ok(Self::map_status(response.value.into_iter().next().flatten()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::transaction::TransactionError;

    fn status(
        err: Option<TransactionError>,
        confirmation_status: Option<TransactionConfirmationStatus>,
        confirmations: Option<usize>,
    ) -> TransactionStatus {
        TransactionStatus {
            slot: 1,
            confirmations,
            status: match &err {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            },
            err,
            confirmation_status,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RpcLedgerEndpoint::map_status(None), LedgerStatus::NotFound);
        assert_eq!(
            RpcLedgerEndpoint::map_status(Some(status(
                None,
                Some(TransactionConfirmationStatus::Processed),
                Some(0)
            ))),
            LedgerStatus::Processed
        );
        assert_eq!(
            RpcLedgerEndpoint::map_status(Some(status(
                None,
                Some(TransactionConfirmationStatus::Confirmed),
                Some(5)
            ))),
            LedgerStatus::Confirmed
        );
        assert_eq!(
            RpcLedgerEndpoint::map_status(Some(status(None, None, None))),
            LedgerStatus::Finalized
        );
    }

    #[test]
    fn test_explicit_error_wins_over_commitment() {
        let mapped = RpcLedgerEndpoint::map_status(Some(status(
            Some(TransactionError::InsufficientFundsForFee),
            Some(TransactionConfirmationStatus::Finalized),
            None,
        )));
        assert!(matches!(mapped, LedgerStatus::Failed(_)));
    }
}
