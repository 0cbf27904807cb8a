use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::limiter::{LimiterClosed, RateLimiter};
use super::signer::{SignError, Signer};
use crate::storage::{CredentialStore, StorageError};

const DEFAULT_MAX_RETRY: u32 = 5;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Error Types
// ============================================================================

/// Errors from one logical fetch.
///
/// Two families matter to callers: infrastructure failures (network,
/// timeout, bad status, garbled body) are retried internally up to the
/// attempt cap; semantic failures reported by the platform API
/// (`NeedLogin`, `BadResponse`, `InvalidSignature`) are terminal and
/// surface immediately — retrying a request the platform has already
/// understood and rejected cannot succeed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// One attempt exceeded the per-attempt timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body was not a decodable API envelope
    #[error("Malformed API response: {0}")]
    MalformedBody(String),
    /// All attempts failed on infrastructure-level errors
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
    /// Platform reported the credential is missing or no longer valid.
    /// The stored credential has been purged; re-login is out-of-band.
    #[error("Platform requires a fresh login")]
    NeedLogin,
    /// Platform rejected the request signature
    #[error("Platform rejected the request signature")]
    InvalidSignature,
    /// Platform rejected the request semantically
    #[error("Platform rejected the request: code {code} ({message})")]
    BadResponse { code: i64, message: String },
    /// The owning rate limiter was shut down
    #[error(transparent)]
    Limiter(#[from] LimiterClosed),
    /// Credential store failure
    #[error("Credential store error: {0}")]
    Credential(#[from] StorageError),
    /// Request could not be signed
    #[error(transparent)]
    Sign(#[from] SignError),
}

impl FetchError {
    /// True for infrastructure-level failures worth another attempt.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Timeout
                | FetchError::HttpStatus(_)
                | FetchError::MalformedBody(_)
        )
    }
}

// ============================================================================
// API envelope
// ============================================================================

/// Semantic status codes carried inside the platform's response envelope.
///
/// The numbers vary per platform and are configurable; the defaults follow
/// the common HTTP-shaped convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCodes {
    pub success: i64,
    pub need_login: i64,
    pub bad_request: i64,
    pub invalid_sign: i64,
}

impl Default for ApiCodes {
    fn default() -> Self {
        Self {
            success: 0,
            need_login: 401,
            bad_request: 400,
            invalid_sign: 403,
        }
    }
}

/// Wire shape of a platform API response: `{code, message?, data?}`.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

// ============================================================================
// FetchClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts per logical fetch (not extra retries on top).
    pub max_retry: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Rate-limited, signed, retried HTTP client for one platform API.
///
/// All collaborators are injected; nothing here is process-global. The one
/// piece of shared state this client mutates is the credential store, and
/// only to purge a credential the platform has rejected.
pub struct FetchClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    credentials: Arc<dyn CredentialStore>,
    signer: Arc<dyn Signer>,
    credential_kind: String,
    codes: ApiCodes,
    config: FetchConfig,
}

impl FetchClient {
    pub fn new(
        http: reqwest::Client,
        limiter: Arc<RateLimiter>,
        credentials: Arc<dyn CredentialStore>,
        signer: Arc<dyn Signer>,
        credential_kind: impl Into<String>,
        codes: ApiCodes,
        config: FetchConfig,
    ) -> Self {
        Self {
            http,
            limiter,
            credentials,
            signer,
            credential_kind: credential_kind.into(),
            codes,
            config,
        }
    }

    /// Perform one logical authenticated fetch.
    ///
    /// Infrastructure failures are retried up to `max_retry` attempts, each
    /// attempt gated by the rate limiter. Semantic API failures return
    /// immediately; a needs-login response additionally deletes the stored
    /// credential so the next call is forced to re-acquire one.
    pub async fn fetch_once(&self, url: &Url) -> Result<serde_json::Value, FetchError> {
        let mut last: Option<FetchError> = None;

        for attempt in 1..=self.config.max_retry.max(1) {
            match self.attempt(url).await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        max_retry = self.config.max_retry,
                        error = %e,
                        "Fetch attempt failed, will retry"
                    );
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let attempts = self.config.max_retry.max(1);
        Err(FetchError::RetriesExhausted {
            attempts,
            // last is always set: the loop only falls through after at
            // least one retryable failure.
            last: Box::new(last.unwrap_or(FetchError::Timeout)),
        })
    }

    async fn attempt(&self, url: &Url) -> Result<serde_json::Value, FetchError> {
        self.limiter.acquire().await?;

        let credential = self
            .credentials
            .get(&self.credential_kind)
            .await?
            .ok_or(FetchError::NeedLogin)?;
        let signed = self.signer.sign(url, &credential)?;

        let response = tokio::time::timeout(self.config.timeout, self.http.get(signed).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedBody(e.to_string()))?;

        self.classify(envelope).await
    }

    /// Map the envelope's semantic code onto the success/terminal taxonomy.
    async fn classify(&self, envelope: ApiEnvelope) -> Result<serde_json::Value, FetchError> {
        let code = envelope.code;
        if code == self.codes.success {
            return Ok(envelope.data.unwrap_or(serde_json::Value::Null));
        }

        if code == self.codes.need_login {
            // Purge exactly once so the next call re-acquires a credential
            // instead of replaying a rejected one. Deletion is idempotent.
            if let Err(e) = self.credentials.delete(&self.credential_kind).await {
                tracing::warn!(
                    kind = %self.credential_kind,
                    error = %e,
                    "Failed to purge rejected credential"
                );
            } else {
                tracing::info!(kind = %self.credential_kind, "Purged rejected credential");
            }
            return Err(FetchError::NeedLogin);
        }

        if code == self.codes.invalid_sign {
            return Err(FetchError::InvalidSignature);
        }

        // bad_request and every unrecognized code land here: the platform
        // understood the request and rejected it, so a retry cannot help.
        Err(FetchError::BadResponse {
            code,
            message: envelope.message.unwrap_or_default(),
        })
    }
}
