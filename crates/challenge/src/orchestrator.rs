//! The challenge state machine.
//!
//! `issued` is the only live state; `approved`, `denied`, `expired`, and
//! `failed` are terminal and immutable. Expiry is applied lazily on read.
//! Verification is atomic per challenge: an attempt is first *claimed* with
//! a conditional update keyed on the attempt count the caller observed, and
//! a claim conflict re-reads and retries.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use mfasrv_crypto::SecretBox;
use mfasrv_domain::model::{
    AsyncStatus, AsyncVerificationStatus, Challenge, ChallengeResult, ChallengeStatus,
    VerificationResult,
};
use mfasrv_domain::{context::normalize_method_id, Error, Result};
use mfasrv_methods::{EnrollmentSubject, IssueContext, MethodRegistry};
use mfasrv_store::Store;

/// Bounded optimistic-retry budget for claim conflicts.
const CLAIM_RETRIES: usize = 3;

/// Extra request context carried into `issue`.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub source_ip: Option<String>,
    pub target: Option<String>,
}

pub struct ChallengeOrchestrator {
    store: Arc<Store>,
    registry: Arc<MethodRegistry>,
    secrets: SecretBox,
    validity: Duration,
    max_attempts: i64,
}

impl ChallengeOrchestrator {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<MethodRegistry>,
        secrets: SecretBox,
        validity: Duration,
        max_attempts: i64,
    ) -> Self {
        Self {
            store,
            registry,
            secrets,
            validity,
            max_attempts,
        }
    }

    /// Issue a challenge for `(user, method)`. Requires an active
    /// enrollment; the failure is reported in-band so logon surfaces can
    /// present it without branching on error kinds.
    pub async fn issue(
        &self,
        user_id: &str,
        method_id: &str,
        req: IssueRequest,
    ) -> Result<ChallengeResult> {
        let method_id = normalize_method_id(method_id);
        let Some(enrollment) = self.store.active_enrollment(user_id, &method_id)? else {
            return Ok(ChallengeResult {
                success: false,
                challenge_id: None,
                user_prompt: None,
                expires_at: None,
                status: ChallengeStatus::Failed,
                error: Some(format!("no active {method_id} enrollment")),
            });
        };
        let method = self.registry.get(&method_id)?;
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;

        let secret = self
            .secrets
            .open(&enrollment.encrypted_secret, &enrollment.secret_nonce)?;

        let now = Utc::now();
        let challenge_id = Uuid::new_v4().to_string();
        let issue_ctx = IssueContext {
            challenge_id: challenge_id.clone(),
            subject: EnrollmentSubject {
                user_id: user.id.clone(),
                user_name: user.sam.clone(),
                email: user.email.clone(),
                phone: user.phone.clone(),
            },
            source_ip: req.source_ip.clone(),
        };
        let issued = method.issue(&issue_ctx, &secret).await?;

        let challenge = Challenge {
            id: challenge_id.clone(),
            user_id: user_id.to_owned(),
            enrollment_id: enrollment.id.clone(),
            method: method_id.clone(),
            status: ChallengeStatus::Issued,
            source_ip: req.source_ip,
            target: req.target,
            attempts: 0,
            max_attempts: self.max_attempts,
            method_state: issued.method_state,
            created: now,
            expires: now + self.validity,
            responded: None,
        };
        self.store.insert_challenge(&challenge)?;
        tracing::info!(challenge_id = %challenge.id, method = %method_id, user_id, "challenge issued");

        Ok(ChallengeResult {
            success: true,
            challenge_id: Some(challenge.id),
            user_prompt: Some(issued.user_prompt),
            expires_at: Some(challenge.expires),
            status: ChallengeStatus::Issued,
            error: None,
        })
    }

    /// Verify a response. One attempt is consumed per call that reaches the
    /// method; exhausting the budget fails the challenge and signals
    /// lockout.
    pub fn verify(&self, challenge_id: &str, response: &str) -> Result<VerificationResult> {
        for _ in 0..CLAIM_RETRIES {
            let challenge = self
                .store
                .get_challenge(challenge_id)?
                .ok_or_else(|| Error::NotFound(format!("challenge {challenge_id}")))?;
            let now = Utc::now();

            if challenge.is_terminal() {
                return Ok(terminal_rejection(&challenge));
            }
            if now >= challenge.expires {
                self.store.expire_challenge_if_due(challenge_id, now)?;
                return Ok(VerificationResult {
                    success: false,
                    error: Some("challenge expired".into()),
                    should_lockout: false,
                });
            }

            // Claim the attempt the caller observed; a conflict means a
            // concurrent verify got there first — re-read and retry.
            if !self
                .store
                .claim_challenge_attempt(challenge_id, challenge.attempts, now)?
            {
                continue;
            }
            let attempts_now = challenge.attempts + 1;

            let method = self.registry.get(&challenge.method)?;
            let enrollment = self
                .store
                .get_enrollment(&challenge.enrollment_id)?
                .ok_or_else(|| Error::NotFound(format!("enrollment {}", challenge.enrollment_id)))?;
            let secret = self
                .secrets
                .open(&enrollment.encrypted_secret, &enrollment.secret_nonce)?;

            let correct = method
                .verify(&secret, challenge.method_state.as_deref(), response)
                .unwrap_or_else(|e| {
                    tracing::warn!(challenge_id, error = %e, "method verify errored; counting as miss");
                    false
                });

            if correct {
                if !self
                    .store
                    .finish_challenge(challenge_id, ChallengeStatus::Approved, now)?
                {
                    // Lost the terminal race; report the state that won.
                    let final_row = self
                        .store
                        .get_challenge(challenge_id)?
                        .ok_or_else(|| Error::NotFound(format!("challenge {challenge_id}")))?;
                    return Ok(terminal_rejection(&final_row));
                }
                self.store.touch_enrollment_used(&enrollment.id, now)?;
                tracing::info!(challenge_id, "challenge approved");
                return Ok(VerificationResult {
                    success: true,
                    error: None,
                    should_lockout: false,
                });
            }

            let exhausted = attempts_now >= challenge.max_attempts;
            if exhausted {
                self.store
                    .finish_challenge(challenge_id, ChallengeStatus::Failed, now)?;
                tracing::warn!(challenge_id, attempts = attempts_now, "challenge failed, attempts exhausted");
            }
            return Ok(VerificationResult {
                success: false,
                error: Some("verification failed".into()),
                should_lockout: exhausted,
            });
        }
        Err(Error::Store(format!(
            "challenge {challenge_id}: claim contention persisted"
        )))
    }

    /// Current status. Async-capable methods are polled and their terminal
    /// outcome is lifted onto the row; sync methods report the row as-is.
    pub async fn status(&self, challenge_id: &str) -> Result<AsyncVerificationStatus> {
        let challenge = self
            .store
            .get_challenge(challenge_id)?
            .ok_or_else(|| Error::NotFound(format!("challenge {challenge_id}")))?;
        let now = Utc::now();

        if challenge.status == ChallengeStatus::Issued && now >= challenge.expires {
            self.store.expire_challenge_if_due(challenge_id, now)?;
            return Ok(AsyncVerificationStatus {
                status: AsyncStatus::Expired,
                error: None,
            });
        }
        if challenge.is_terminal() {
            return Ok(AsyncVerificationStatus {
                status: challenge.status.into(),
                error: None,
            });
        }

        let method = self.registry.get(&challenge.method)?;
        if !method.descriptor().supports_async {
            return Ok(AsyncVerificationStatus {
                status: challenge.status.into(),
                error: None,
            });
        }

        let polled = method
            .check_async_status(challenge.method_state.as_deref())
            .await?;
        let lifted = match polled {
            AsyncStatus::Approved => Some(ChallengeStatus::Approved),
            AsyncStatus::Denied => Some(ChallengeStatus::Denied),
            AsyncStatus::Failed => Some(ChallengeStatus::Failed),
            AsyncStatus::Expired => Some(ChallengeStatus::Expired),
            AsyncStatus::Pending | AsyncStatus::Issued => None,
        };
        if let Some(terminal) = lifted {
            if self.store.finish_challenge(challenge_id, terminal, now)? {
                if terminal == ChallengeStatus::Approved {
                    self.store
                        .touch_enrollment_used(&challenge.enrollment_id, now)?;
                }
                return Ok(AsyncVerificationStatus {
                    status: terminal.into(),
                    error: None,
                });
            }
            // Someone else finished it; report the winning state.
            let final_row = self
                .store
                .get_challenge(challenge_id)?
                .ok_or_else(|| Error::NotFound(format!("challenge {challenge_id}")))?;
            return Ok(AsyncVerificationStatus {
                status: final_row.status.into(),
                error: None,
            });
        }
        Ok(AsyncVerificationStatus {
            status: AsyncStatus::Pending,
            error: None,
        })
    }

    /// Sweep hook used by the background expiry job.
    pub fn expire_due(&self) -> Result<usize> {
        self.store.expire_due_challenges(Utc::now())
    }
}

/// Map a terminal row to its stable rejection.
fn terminal_rejection(challenge: &Challenge) -> VerificationResult {
    let (error, should_lockout) = match challenge.status {
        ChallengeStatus::Approved => ("challenge already completed", false),
        ChallengeStatus::Denied => ("challenge was denied", false),
        ChallengeStatus::Expired => ("challenge expired", false),
        ChallengeStatus::Failed => ("attempts exhausted", true),
        ChallengeStatus::Issued => unreachable!("terminal_rejection called on a live challenge"),
    };
    VerificationResult {
        success: false,
        error: Some(error.into()),
        should_lockout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mfasrv_domain::model::{EnrollmentStatus as ES, User};
    use mfasrv_methods::{
        BeginEnrollment, MethodDescriptor, MethodIssue, MfaMethod,
    };

    /// A deterministic method: the correct answer is the enrollment secret,
    /// hex-free, as UTF-8.
    struct EchoMethod {
        descriptor: MethodDescriptor,
        async_answer: Option<AsyncStatus>,
    }

    impl EchoMethod {
        fn sync() -> Self {
            Self {
                descriptor: MethodDescriptor {
                    method_id: "echo",
                    display_name: "Echo",
                    supports_sync: true,
                    supports_async: false,
                    requires_endpoint_agent: false,
                },
                async_answer: None,
            }
        }

        fn push(answer: AsyncStatus) -> Self {
            Self {
                descriptor: MethodDescriptor {
                    method_id: "push",
                    display_name: "Push",
                    supports_sync: false,
                    supports_async: true,
                    requires_endpoint_agent: false,
                },
                async_answer: Some(answer),
            }
        }
    }

    #[async_trait]
    impl MfaMethod for EchoMethod {
        fn descriptor(&self) -> &MethodDescriptor {
            &self.descriptor
        }

        fn begin_enrollment(&self, _subject: &EnrollmentSubject) -> Result<BeginEnrollment> {
            Ok(BeginEnrollment {
                secret: b"opensesame".to_vec(),
                provisioning_uri: None,
                instructions: String::new(),
            })
        }

        fn complete_enrollment(&self, _secret: &[u8], _proof: &str) -> Result<()> {
            Ok(())
        }

        async fn issue(&self, _ctx: &IssueContext, _secret: &[u8]) -> Result<MethodIssue> {
            Ok(MethodIssue {
                user_prompt: "say the word".into(),
                method_state: None,
            })
        }

        fn verify(&self, secret: &[u8], _state: Option<&str>, response: &str) -> Result<bool> {
            Ok(secret == response.as_bytes())
        }

        async fn check_async_status(&self, _state: Option<&str>) -> Result<AsyncStatus> {
            Ok(self.async_answer.unwrap_or(AsyncStatus::Pending))
        }
    }

    fn fixture(method: EchoMethod) -> (ChallengeOrchestrator, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sbox = SecretBox::new([3u8; 32]);

        store
            .upsert_user(&User {
                id: "u1".into(),
                directory_object_id: "obj".into(),
                sam: "alice".into(),
                upn: "alice@corp.example".into(),
                display: "Alice".into(),
                email: Some("alice@corp.example".into()),
                phone: None,
                dn: "CN=alice".into(),
                enabled: true,
                mfa_enabled: true,
                last_sync: Utc::now(),
                last_auth: None,
            })
            .unwrap();

        let method_id = method.descriptor.method_id;
        let (ct, nonce) = sbox.seal(b"opensesame").unwrap();
        store
            .insert_enrollment(&mfasrv_domain::model::Enrollment {
                id: "e1".into(),
                user_id: "u1".into(),
                method: method_id.into(),
                status: ES::Active,
                encrypted_secret: ct,
                secret_nonce: nonce,
                device_identifier: None,
                friendly_name: None,
                created: Utc::now(),
                activated: Some(Utc::now()),
                last_used: None,
            })
            .unwrap();

        let mut registry = MethodRegistry::new();
        registry.register(Arc::new(method));
        let orchestrator = ChallengeOrchestrator::new(
            store.clone(),
            Arc::new(registry),
            sbox,
            Duration::minutes(5),
            3,
        );
        (orchestrator, store)
    }

    #[tokio::test]
    async fn issue_then_verify_happy_path() {
        let (orch, store) = fixture(EchoMethod::sync());
        let issued = orch.issue("u1", "ECHO", IssueRequest::default()).await.unwrap();
        assert!(issued.success);
        let id = issued.challenge_id.unwrap();

        let result = orch.verify(&id, "opensesame").unwrap();
        assert!(result.success);
        assert_eq!(
            store.get_challenge(&id).unwrap().unwrap().status,
            ChallengeStatus::Approved
        );
        // Enrollment use is recorded.
        assert!(store
            .get_enrollment("e1")
            .unwrap()
            .unwrap()
            .last_used
            .is_some());

        // Terminal states reject further verifies.
        let again = orch.verify(&id, "opensesame").unwrap();
        assert!(!again.success);
        assert_eq!(again.error.as_deref(), Some("challenge already completed"));
    }

    #[tokio::test]
    async fn three_misses_lock_out() {
        let (orch, store) = fixture(EchoMethod::sync());
        let id = orch
            .issue("u1", "echo", IssueRequest::default())
            .await
            .unwrap()
            .challenge_id
            .unwrap();

        for attempt in 1..=3 {
            let result = orch.verify(&id, "wrong").unwrap();
            assert!(!result.success);
            assert_eq!(result.should_lockout, attempt == 3, "attempt {attempt}");
        }
        assert_eq!(
            store.get_challenge(&id).unwrap().unwrap().status,
            ChallengeStatus::Failed
        );

        // The fourth attempt is rejected outright, still signalling lockout.
        let fourth = orch.verify(&id, "opensesame").unwrap();
        assert!(!fourth.success);
        assert!(fourth.should_lockout);
        assert_eq!(fourth.error.as_deref(), Some("attempts exhausted"));
        assert_eq!(store.get_challenge(&id).unwrap().unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn issue_without_enrollment_fails_in_band() {
        let (orch, _) = fixture(EchoMethod::sync());
        let result = orch.issue("u1", "totp", IssueRequest::default()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no active totp enrollment"));
    }

    #[tokio::test]
    async fn async_status_lifts_terminal_outcome() {
        let (orch, store) = fixture(EchoMethod::push(AsyncStatus::Approved));
        let id = orch
            .issue("u1", "push", IssueRequest::default())
            .await
            .unwrap()
            .challenge_id
            .unwrap();

        let status = orch.status(&id).await.unwrap();
        assert_eq!(status.status, AsyncStatus::Approved);
        assert_eq!(
            store.get_challenge(&id).unwrap().unwrap().status,
            ChallengeStatus::Approved
        );
        // The lifted state sticks.
        let again = orch.status(&id).await.unwrap();
        assert_eq!(again.status, AsyncStatus::Approved);
    }

    #[tokio::test]
    async fn async_pending_leaves_row_issued() {
        let (orch, store) = fixture(EchoMethod::push(AsyncStatus::Pending));
        let id = orch
            .issue("u1", "push", IssueRequest::default())
            .await
            .unwrap()
            .challenge_id
            .unwrap();
        let status = orch.status(&id).await.unwrap();
        assert_eq!(status.status, AsyncStatus::Pending);
        assert_eq!(
            store.get_challenge(&id).unwrap().unwrap().status,
            ChallengeStatus::Issued
        );
    }

    #[tokio::test]
    async fn sync_method_status_reports_row() {
        let (orch, _) = fixture(EchoMethod::sync());
        let id = orch
            .issue("u1", "echo", IssueRequest::default())
            .await
            .unwrap()
            .challenge_id
            .unwrap();
        let status = orch.status(&id).await.unwrap();
        assert_eq!(status.status, AsyncStatus::Issued);
    }
}
