use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request handed to a credential tester after local format checks passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityRequest {
    /// Provider identifier (e.g., `openai`, `anthropic`).
    pub provider: String,
    /// Plaintext API key. Never log this.
    pub api_key: String,
    /// Optional endpoint override for self-hosted or proxied providers.
    pub base_url: Option<String>,
}

/// Outcome of a connectivity check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectivityOutcome {
    pub success: bool,
    /// Models the provider advertised, when the tester lists them.
    pub models: Option<Vec<String>>,
    pub error: Option<String>,
}

/// Contract for the outbound collaborator that actually contacts a provider.
/// Network access lives outside this workspace; the settings manager only feeds it.
#[async_trait]
pub trait CredentialTester: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    async fn test_connection(&self, request: ConnectivityRequest) -> Result<ConnectivityOutcome>;
}

/// Tester that accepts every key without contacting anything. Useful offline and in tests.
pub struct OfflineTester;

#[async_trait]
impl CredentialTester for OfflineTester {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn test_connection(&self, _request: ConnectivityRequest) -> Result<ConnectivityOutcome> {
        Ok(ConnectivityOutcome {
            success: true,
            models: None,
            error: None,
        })
    }
}
