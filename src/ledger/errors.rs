use crate::retry::Transient;
use solana_client::client_error::ClientError;
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

/// Ledger-access error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// HTTP 429 / provider quota responses
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimited { endpoint: String },

    /// The ledger already holds this transaction
    #[error("Transaction already processed (endpoint: {endpoint})")]
    AlreadyProcessed { endpoint: String },

    #[error("Recent blockhash not found or expired (endpoint: {endpoint})")]
    ReferenceNotFound { endpoint: String },

    /// The ledger explicitly rejected the transaction's logic
    #[error("Transaction rejected: {reason} (endpoint: {endpoint})")]
    Rejected { endpoint: String, reason: String },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    #[error("Transaction is not fully signed: {0}")]
    Unsigned(String),

    #[error("No ledger endpoints configured")]
    NoEndpoints,
}

impl LedgerError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LedgerError::RateLimited { .. })
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            LedgerError::Transport { endpoint, .. }
            | LedgerError::Timeout { endpoint, .. }
            | LedgerError::RateLimited { endpoint }
            | LedgerError::AlreadyProcessed { endpoint }
            | LedgerError::ReferenceNotFound { endpoint }
            | LedgerError::Rejected { endpoint, .. }
            | LedgerError::RpcResponse { endpoint, .. } => Some(endpoint),
            LedgerError::Unsigned(_) | LedgerError::NoEndpoints => None,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            LedgerError::Transport { .. } => "transport",
            LedgerError::Timeout { .. } => "timeout",
            LedgerError::RateLimited { .. } => "rate_limited",
            LedgerError::AlreadyProcessed { .. } => "already_processed",
            LedgerError::ReferenceNotFound { .. } => "reference",
            LedgerError::Rejected { .. } => "rejected",
            LedgerError::RpcResponse { .. } => "rpc",
            LedgerError::Unsigned(_) => "unsigned",
            LedgerError::NoEndpoints => "config",
        }
    }

    /// Classify a transaction error reported by the ledger
    pub fn from_transaction_error(err: &TransactionError, endpoint: &str) -> Self {
        match err {
            TransactionError::AlreadyProcessed => LedgerError::AlreadyProcessed {
                endpoint: endpoint.to_string(),
            },
            TransactionError::BlockhashNotFound => LedgerError::ReferenceNotFound {
                endpoint: endpoint.to_string(),
            },
            other => LedgerError::Rejected {
                endpoint: endpoint.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        if let Some(tx_err) = err.get_transaction_error() {
            return Self::from_transaction_error(&tx_err, endpoint);
        }

        let err_str = err.to_string().to_lowercase();

        // Classify based on error message
        if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            LedgerError::RateLimited {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("already been processed") || err_str.contains("alreadyprocessed")
        {
            LedgerError::AlreadyProcessed {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("blockhash not found") {
            LedgerError::ReferenceNotFound {
                endpoint: endpoint.to_string(),
            }
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            LedgerError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms: 0,
            }
        } else if err_str.contains("error sending request")
            || err_str.contains("connection")
            || err_str.contains("dns")
        {
            LedgerError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            // Extract error code if available
            let code = err_str
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<i64>().ok());

            LedgerError::RpcResponse {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
                code,
            }
        }
    }
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::Timeout { .. } => true,
            LedgerError::RateLimited { .. } => true,

            LedgerError::AlreadyProcessed { .. } => false,
            LedgerError::ReferenceNotFound { .. } => false,
            LedgerError::Rejected { .. } => false,
            LedgerError::Unsigned(_) => false,
            LedgerError::NoEndpoints => false,

            // Retry on server errors (5xx) and "node is behind" (-32005)
            LedgerError::RpcResponse { code, .. } => match code {
                Some(c) => (500..600).contains(c) || *c == -32005,
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_transient() {
        assert!(LedgerError::Transport {
            endpoint: "test".to_string(),
            message: "connection failed".to_string(),
        }
        .is_transient());
        assert!(LedgerError::RateLimited {
            endpoint: "test".to_string()
        }
        .is_transient());
        assert!(LedgerError::RpcResponse {
            endpoint: "test".to_string(),
            message: "node is behind".to_string(),
            code: Some(-32005),
        }
        .is_transient());

        assert!(!LedgerError::Rejected {
            endpoint: "test".to_string(),
            reason: "insufficient funds".to_string(),
        }
        .is_transient());
        assert!(!LedgerError::NoEndpoints.is_transient());
    }

    #[test]
    fn test_transaction_error_classification() {
        assert!(matches!(
            LedgerError::from_transaction_error(&TransactionError::AlreadyProcessed, "e"),
            LedgerError::AlreadyProcessed { .. }
        ));
        assert!(matches!(
            LedgerError::from_transaction_error(&TransactionError::BlockhashNotFound, "e"),
            LedgerError::ReferenceNotFound { .. }
        ));
        assert!(matches!(
            LedgerError::from_transaction_error(&TransactionError::AccountNotFound, "e"),
            LedgerError::Rejected { .. }
        ));
    }

    #[test]
    fn test_error_endpoint() {
        let err = LedgerError::Timeout {
            endpoint: "https://test.com".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.endpoint(), Some("https://test.com"));
        assert_eq!(LedgerError::NoEndpoints.endpoint(), None);
    }
}
