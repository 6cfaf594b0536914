//! Wire types for the client/sponsor signing boundary
//!
//! Transactions cross the boundary as bincode-serialized
//! `VersionedTransaction`s, base64 encoded. Field names are camelCase JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bincode::Options;
use serde::{Deserialize, Serialize};
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::fmt;
use thiserror::Error;

/// Rejection codes returned by the sponsor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CosignErrorCode {
    /// The recent blockhash is expired or too close to expiry; rebuild
    StaleReference,
    WrongFeePayer,
    MissingSenderSignature,
    RateLimited,
    Malformed,
    /// The sponsor could not reach the ledger to check the blockhash
    LedgerUnavailable,
    /// Instructions outside what the sponsor is willing to pay for
    PolicyViolation,
    /// The sponsor's own signing capability failed
    SponsorUnavailable,
}

impl CosignErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CosignErrorCode::StaleReference => "STALE_REFERENCE",
            CosignErrorCode::WrongFeePayer => "WRONG_FEE_PAYER",
            CosignErrorCode::MissingSenderSignature => "MISSING_SENDER_SIGNATURE",
            CosignErrorCode::RateLimited => "RATE_LIMITED",
            CosignErrorCode::Malformed => "MALFORMED",
            CosignErrorCode::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            CosignErrorCode::PolicyViolation => "POLICY_VIOLATION",
            CosignErrorCode::SponsorUnavailable => "SPONSOR_UNAVAILABLE",
        }
    }

    /// Same request may succeed after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CosignErrorCode::RateLimited
                | CosignErrorCode::LedgerUnavailable
                | CosignErrorCode::SponsorUnavailable
        )
    }

    /// Caller must rebuild and re-sign before asking again
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, CosignErrorCode::StaleReference)
    }
}

impl fmt::Display for CosignErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed sponsor rejection
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct CosignError {
    pub code: CosignErrorCode,
    pub message: String,
}

impl CosignError {
    pub fn new(code: CosignErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(CosignErrorCode::StaleReference, message)
    }

    pub fn wrong_fee_payer(message: impl Into<String>) -> Self {
        Self::new(CosignErrorCode::WrongFeePayer, message)
    }

    pub fn missing_sender_signature(message: impl Into<String>) -> Self {
        Self::new(CosignErrorCode::MissingSenderSignature, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(CosignErrorCode::RateLimited, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CosignErrorCode::Malformed, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(CosignErrorCode::PolicyViolation, message)
    }
}

/// Client -> sponsor request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    /// base64 bincode `VersionedTransaction`
    pub transaction_bytes: String,
    /// The fee payer the client believes it designated
    pub fee_payer_public_key: String,
    /// Expiry ceiling of the embedded blockhash, as reported to the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_valid_block_height: Option<u64>,
}

impl SigningRequest {
    pub fn new(envelope: &SigningEnvelope, fee_payer: &Pubkey, last_valid_block_height: Option<u64>) -> Self {
        Self {
            transaction_bytes: envelope.to_base64(),
            fee_payer_public_key: fee_payer.to_string(),
            last_valid_block_height,
        }
    }
}

/// Successful sponsor response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    pub signed_transaction_bytes: String,
    /// Present only when the sponsor also submitted the transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub error_code: CosignErrorCode,
    pub message: String,
}

/// Sponsor -> client response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SigningResponse {
    Signed(SignedPayload),
    Rejected(Rejection),
}

impl SigningResponse {
    pub fn into_result(self) -> Result<SignedPayload, CosignError> {
        match self {
            SigningResponse::Signed(payload) => Ok(payload),
            SigningResponse::Rejected(rejection) => {
                Err(CosignError::new(rejection.error_code, rejection.message))
            }
        }
    }
}

impl From<Result<SignedPayload, CosignError>> for SigningResponse {
    fn from(result: Result<SignedPayload, CosignError>) -> Self {
        match result {
            Ok(payload) => SigningResponse::Signed(payload),
            Err(err) => SigningResponse::Rejected(Rejection {
                error_code: err.code,
                message: err.message,
            }),
        }
    }
}

/// Serialized transaction plus which parties have signed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningEnvelope {
    transaction_bytes: Vec<u8>,
    sender_signed: bool,
    sponsor_signed: bool,
}

impl SigningEnvelope {
    pub fn from_transaction(transaction: &VersionedTransaction) -> Result<Self, CosignError> {
        let transaction_bytes = encode_transaction(transaction)?;
        let (sponsor_signed, sender_signed) = signature_flags(transaction);
        Ok(Self {
            transaction_bytes,
            sender_signed,
            sponsor_signed,
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CosignError> {
        let transaction = decode_transaction_base64(encoded)?;
        Self::from_transaction(&transaction)
    }

    pub fn transaction_bytes(&self) -> &[u8] {
        &self.transaction_bytes
    }

    /// Every required signer except the fee payer has a valid signature
    pub fn sender_signed(&self) -> bool {
        self.sender_signed
    }

    /// The fee payer slot carries a valid signature
    pub fn sponsor_signed(&self) -> bool {
        self.sponsor_signed
    }

    pub fn decode(&self) -> Result<VersionedTransaction, CosignError> {
        decode_transaction(&self.transaction_bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.transaction_bytes)
    }
}

fn wire_options() -> impl Options {
    bincode::options()
        .with_limit(PACKET_DATA_SIZE as u64)
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

pub fn encode_transaction(transaction: &VersionedTransaction) -> Result<Vec<u8>, CosignError> {
    let bytes = bincode::serialize(transaction)
        .map_err(|e| CosignError::malformed(format!("serialization failed: {e}")))?;
    if bytes.len() > PACKET_DATA_SIZE {
        return Err(CosignError::malformed(format!(
            "transaction is {} bytes, max {}",
            bytes.len(),
            PACKET_DATA_SIZE
        )));
    }
    Ok(bytes)
}

/// Decode untrusted transaction bytes
pub fn decode_transaction(bytes: &[u8]) -> Result<VersionedTransaction, CosignError> {
    if bytes.is_empty() || bytes.len() > PACKET_DATA_SIZE {
        return Err(CosignError::malformed(format!(
            "transaction must be 1..={} bytes, got {}",
            PACKET_DATA_SIZE,
            bytes.len()
        )));
    }
    let transaction: VersionedTransaction = wire_options()
        .deserialize(bytes)
        .map_err(|e| CosignError::malformed(format!("undecodable transaction: {e}")))?;
    transaction
        .sanitize()
        .map_err(|e| CosignError::malformed(format!("invalid transaction: {e}")))?;
    Ok(transaction)
}

pub fn decode_transaction_base64(encoded: &str) -> Result<VersionedTransaction, CosignError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| CosignError::malformed(format!("invalid base64: {e}")))?;
    decode_transaction(&bytes)
}

/// (fee payer signed, every other required signer signed), verified against
/// the message bytes
pub fn signature_flags(transaction: &VersionedTransaction) -> (bool, bool) {
    let message = transaction.message.serialize();
    let keys = transaction.message.static_account_keys();
    let required = usize::from(transaction.message.header().num_required_signatures);

    let signed = |slot: usize| -> bool {
        match (transaction.signatures.get(slot), keys.get(slot)) {
            (Some(sig), Some(key)) => *sig != Signature::default() && sig.verify(key.as_ref(), &message),
            _ => false,
        }
    };

    let fee_payer = required > 0 && signed(0);
    let others = required > 1 && (1..required).all(signed);
    (fee_payer, others)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&CosignErrorCode::MissingSenderSignature).unwrap();
        assert_eq!(json, "\"MISSING_SENDER_SIGNATURE\"");
        assert_eq!(
            serde_json::from_str::<CosignErrorCode>("\"STALE_REFERENCE\"").unwrap(),
            CosignErrorCode::StaleReference
        );
    }

    #[test]
    fn test_response_shapes() {
        let rejected: SigningResponse = Err(CosignError::wrong_fee_payer("not ours")).into();
        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(json["errorCode"], "WRONG_FEE_PAYER");
        assert_eq!(json["message"], "not ours");

        let signed = SigningResponse::Signed(SignedPayload {
            signed_transaction_bytes: "AAAA".to_string(),
            submission_identifier: None,
        });
        let json = serde_json::to_value(&signed).unwrap();
        assert_eq!(json["signedTransactionBytes"], "AAAA");
        assert!(json.get("submissionIdentifier").is_none());

        let parsed: SigningResponse =
            serde_json::from_str(r#"{"errorCode":"RATE_LIMITED","message":"slow down"}"#).unwrap();
        assert_eq!(
            parsed.into_result().unwrap_err().code,
            CosignErrorCode::RateLimited
        );
    }

    #[test]
    fn test_request_field_names() {
        let request: SigningRequest = serde_json::from_str(
            r#"{"transactionBytes":"AQID","feePayerPublicKey":"walletB"}"#,
        )
        .unwrap();
        assert_eq!(request.fee_payer_public_key, "walletB");
        assert_eq!(request.last_valid_block_height, None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            decode_transaction(&[]).unwrap_err().code,
            CosignErrorCode::Malformed
        );
        assert_eq!(
            decode_transaction(&[0xff; 64]).unwrap_err().code,
            CosignErrorCode::Malformed
        );
        assert_eq!(
            decode_transaction(&vec![1u8; PACKET_DATA_SIZE + 1]).unwrap_err().code,
            CosignErrorCode::Malformed
        );
        assert_eq!(
            decode_transaction_base64("%%%").unwrap_err().code,
            CosignErrorCode::Malformed
        );
    }
}
