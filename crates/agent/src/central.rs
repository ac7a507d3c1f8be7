//! Mutually-authenticated client to the central control plane, plus the
//! jittered exponential backoff policy shared by the reconnect loops.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use mfasrv_ca::tls::identity_pem;
use mfasrv_domain::config::AgentConfig;
use mfasrv_domain::{Error, Result};
use mfasrv_protocol::{
    encode_message, CheckChallengeStatusRequest, CheckChallengeStatusResponse,
    EnrollCertificateRequest, EnrollCertificateResponse, EvaluateRequest, EvaluateResponse,
    HeartbeatRequest, HeartbeatResponse, RegisterAgentRequest, RegisterAgentResponse,
    SyncPoliciesRequest, VerifyChallengeRequest, VerifyChallengeResponse, RPC_CONTENT_TYPE,
};

/// Default deadline for unary calls. Stream connects use their own.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect backoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exponential backoff with ~25% deterministic jitter: 5s initial, 2min
/// cap, reset after a clean connection.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectBackoff {
    /// Delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(16) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        // Spread reconnect storms without pulling in an RNG.
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CentralClient {
    http: reqwest::Client,
    base_url: String,
}

impl CentralClient {
    /// Build the client from the agent's TLS material. Before certificate
    /// enrollment the identity files may not exist yet; the client then
    /// connects with server verification only, which the plane accepts for
    /// the registration and enrollment calls.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        if config.center_url.is_empty() {
            return Err(Error::Config("agent.center_url is not set".into()));
        }
        Ok(Self {
            http: mtls_http_client(config)?,
            base_url: config.center_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn call<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        req: &Req,
    ) -> Result<Resp> {
        let body = encode_message(req)?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, RPC_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if response.status() != StatusCode::OK {
            return Err(Error::Http(format!(
                "center answered {} on {path}",
                response.status()
            )));
        }
        let bytes = response.bytes().await.map_err(from_reqwest)?;
        mfasrv_protocol::decode_message(&bytes)
    }

    pub async fn evaluate(&self, req: &EvaluateRequest) -> Result<EvaluateResponse> {
        self.call("/rpc/v1/evaluate", req).await
    }

    pub async fn verify_challenge(
        &self,
        req: &VerifyChallengeRequest,
    ) -> Result<VerifyChallengeResponse> {
        self.call("/rpc/v1/verify_challenge", req).await
    }

    pub async fn check_challenge_status(
        &self,
        req: &CheckChallengeStatusRequest,
    ) -> Result<CheckChallengeStatusResponse> {
        self.call("/rpc/v1/check_challenge_status", req).await
    }

    pub async fn register(&self, req: &RegisterAgentRequest) -> Result<RegisterAgentResponse> {
        self.call("/rpc/v1/register_agent", req).await
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        self.call("/rpc/v1/heartbeat", req).await
    }

    pub async fn enroll_certificate(
        &self,
        req: &EnrollCertificateRequest,
    ) -> Result<EnrollCertificateResponse> {
        self.call("/rpc/v1/enroll_certificate", req).await
    }

    /// Open the policy stream. The returned response body is a frame
    /// stream the subscriber loop consumes incrementally.
    pub async fn open_policy_stream(&self, req: &SyncPoliciesRequest) -> Result<reqwest::Response> {
        let body = encode_message(req)?;
        let response = self
            .http
            .post(format!("{}/rpc/v1/sync_policies", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, RPC_CONTENT_TYPE)
            .body(body)
            // Long-lived response: the per-call timeout must not apply.
            .timeout(Duration::from_secs(24 * 3600))
            .send()
            .await
            .map_err(from_reqwest)?;
        if response.status() != StatusCode::OK {
            return Err(Error::Http(format!(
                "center answered {} on sync_policies",
                response.status()
            )));
        }
        Ok(response)
    }
}

/// HTTP client pinned to the CA root and presenting the agent identity
/// when it exists. Shared by the central client and the gossip sender.
pub fn mtls_http_client(config: &AgentConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(CALL_TIMEOUT);

    if config.tls.ca_path.is_file() {
        let ca = std::fs::read(&config.tls.ca_path)?;
        let cert = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| Error::Config(format!("CA certificate: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }
    if config.tls.cert_path.is_file() && config.tls.key_path.is_file() {
        let identity = reqwest::Identity::from_pem(&identity_pem(&config.tls)?)
            .map_err(|e| Error::Config(format!("client identity: {e}")))?;
        builder = builder.identity(identity);
    } else {
        tracing::warn!("no client certificate yet; only enrollment calls will be accepted");
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("HTTP client: {e}")))
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectBackoff::default();
        let d0 = policy.delay_for_attempt(0);
        let d1 = policy.delay_for_attempt(1);
        let d2 = policy.delay_for_attempt(2);
        assert!(d0 >= Duration::from_secs(5));
        assert!(d1 > d0);
        assert!(d2 > d1);
        // Cap plus 25% jitter.
        assert!(policy.delay_for_attempt(30) <= Duration::from_millis(150_000));
    }

    #[test]
    fn client_requires_center_url() {
        let config = AgentConfig::default();
        assert!(matches!(CentralClient::new(&config), Err(Error::Config(_))));
    }
}
