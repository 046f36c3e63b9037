//! Shared ARM connection context
//!
//! Provides `ArmContext`, which holds the HTTP client, endpoint and bearer
//! tokens so several clients can be created from one configuration.

use super::error::ArmError;
use crate::wait::WaitConfig;
use std::sync::Arc;
use std::time::Duration;

/// Shared ARM configuration for creating clients.
///
/// Tokens are supplied by the caller; this crate never acquires credentials.
///
/// # Example
/// ```ignore
/// let ctx = ArmContext::new("https://management.azure.com", token)?
///     .with_storage_token(storage_token);
/// let client = ArmClient::from_context(&ctx);
/// ```
#[derive(Clone)]
pub struct ArmContext {
    http: reqwest::Client,
    endpoint: String,
    management_token: Arc<str>,
    storage_token: Option<Arc<str>>,
    lro_wait: WaitConfig,
}

impl ArmContext {
    /// Build a context for `endpoint` authenticated with `management_token`.
    pub fn new(endpoint: &str, management_token: &str) -> Result<Self, ArmError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("azbake/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            management_token: Arc::from(management_token),
            storage_token: None,
            lro_wait: WaitConfig {
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                timeout: Duration::from_secs(1800),
                jitter: true,
            },
        })
    }

    /// Token for the storage data plane (blob lease and delete)
    pub fn with_storage_token(mut self, token: &str) -> Self {
        self.storage_token = Some(Arc::from(token));
        self
    }

    /// Polling behaviour for long-running operations
    pub fn with_lro_wait(mut self, wait: WaitConfig) -> Self {
        self.lro_wait = wait;
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn management_token(&self) -> &str {
        &self.management_token
    }

    /// Storage token, falling back to the management token
    pub fn storage_token(&self) -> &str {
        self.storage_token.as_deref().unwrap_or(&self.management_token)
    }

    pub fn lro_wait(&self) -> &WaitConfig {
        &self.lro_wait
    }
}

impl std::fmt::Debug for ArmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmContext")
            .field("endpoint", &self.endpoint)
            .field("storage_token", &self.storage_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let ctx = ArmContext::new("https://management.azure.com/", "t").unwrap();
        assert_eq!(ctx.endpoint(), "https://management.azure.com");
    }

    #[test]
    fn storage_token_falls_back() {
        let ctx = ArmContext::new("https://management.azure.com", "mgmt").unwrap();
        assert_eq!(ctx.storage_token(), "mgmt");
        let ctx = ctx.with_storage_token("blob");
        assert_eq!(ctx.storage_token(), "blob");
    }

    #[test]
    fn debug_redacts_tokens() {
        let ctx = ArmContext::new("https://management.azure.com", "secret-token")
            .unwrap()
            .with_storage_token("secret-storage");
        let shown = format!("{ctx:?}");
        assert!(!shown.contains("secret"));
    }
}
