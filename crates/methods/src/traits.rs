use async_trait::async_trait;

use mfasrv_domain::model::AsyncStatus;
use mfasrv_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Contract types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static capabilities a method advertises at registration.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    /// Normalized identifier, e.g. `"totp"`. Lowercase by construction.
    pub method_id: &'static str,
    pub display_name: &'static str,
    /// The user answers inline (code entry).
    pub supports_sync: bool,
    /// The user approves out-of-band; callers poll `check_async_status`.
    pub supports_async: bool,
    /// Verification needs the workstation endpoint agent (e.g. FIDO2).
    pub requires_endpoint_agent: bool,
}

/// The user a method operation concerns. Carries only what methods need —
/// never the whole directory record.
#[derive(Debug, Clone)]
pub struct EnrollmentSubject {
    pub user_id: String,
    pub user_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Output of `begin_enrollment`: the plaintext secret (the caller seals it
/// before it touches disk) and what to show the user.
#[derive(Debug, Clone)]
pub struct BeginEnrollment {
    pub secret: Vec<u8>,
    /// e.g. an `otpauth://` provisioning URI to render as a QR code.
    pub provisioning_uri: Option<String>,
    pub instructions: String,
}

/// Output of `issue`: what to prompt, plus opaque per-challenge state the
/// orchestrator stores and hands back on verify/poll.
#[derive(Debug, Clone)]
pub struct MethodIssue {
    pub user_prompt: String,
    pub method_state: Option<String>,
}

/// Context handed to `issue`.
#[derive(Debug, Clone)]
pub struct IssueContext {
    pub challenge_id: String,
    pub subject: EnrollmentSubject,
    pub source_ip: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The five-operation contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait MfaMethod: Send + Sync {
    fn descriptor(&self) -> &MethodDescriptor;

    /// Generate enrollment material for `subject`.
    fn begin_enrollment(&self, subject: &EnrollmentSubject) -> Result<BeginEnrollment>;

    /// Check the activation proof (e.g. the first TOTP code). `Ok(())`
    /// activates the enrollment.
    fn complete_enrollment(&self, secret: &[u8], proof: &str) -> Result<()>;

    /// Start one challenge. May deliver out-of-band (e-mail, push).
    async fn issue(&self, ctx: &IssueContext, secret: &[u8]) -> Result<MethodIssue>;

    /// Check a synchronous response against the secret and the per-challenge
    /// state. Returns whether the response is correct; transport or state
    /// problems are errors.
    fn verify(&self, secret: &[u8], method_state: Option<&str>, response: &str) -> Result<bool>;

    /// Poll an asynchronous challenge. Sync-only methods are never asked —
    /// the orchestrator consults `supports_async` first.
    async fn check_async_status(&self, method_state: Option<&str>) -> Result<AsyncStatus>;
}
