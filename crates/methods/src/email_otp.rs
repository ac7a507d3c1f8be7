//! One-time codes delivered over e-mail.
//!
//! The transport itself is external — this method only speaks to an
//! [`OtpSender`]. The per-challenge state is the SHA-256 of the expected
//! code, so the code itself never rests in the challenge row; the attempt
//! budget bounds guessing.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use mfasrv_crypto::sha256_hex;
use mfasrv_domain::model::AsyncStatus;
use mfasrv_domain::{Error, Result};

use crate::traits::{
    BeginEnrollment, EnrollmentSubject, IssueContext, MethodDescriptor, MethodIssue, MfaMethod,
};

const DESCRIPTOR: MethodDescriptor = MethodDescriptor {
    method_id: "email_otp",
    display_name: "E-mail one-time code",
    supports_sync: true,
    supports_async: false,
    requires_endpoint_agent: false,
};

/// Delivery seam. Production wires an SMTP transport; tests capture.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn deliver(&self, destination: &str, code: &str) -> Result<()>;
}

/// Development sender: logs that a delivery would happen. Never logs the
/// code itself.
pub struct TracingOtpSender;

#[async_trait]
impl OtpSender for TracingOtpSender {
    async fn deliver(&self, destination: &str, _code: &str) -> Result<()> {
        tracing::info!(destination = %mask_email(destination), "OTP delivery (no transport configured)");
        Ok(())
    }
}

/// What this method keeps inside `encrypted_secret`: the verified
/// destination and the activation code issued at enrollment.
#[derive(Serialize, Deserialize)]
struct EmailSecret {
    email: String,
    activation: String,
}

pub struct EmailOtpMethod {
    sender: std::sync::Arc<dyn OtpSender>,
}

impl EmailOtpMethod {
    pub fn new(sender: std::sync::Arc<dyn OtpSender>) -> Self {
        Self { sender }
    }
}

fn random_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// `alice@corp.example` → `a***@corp.example`.
fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            format!("{}***@{domain}", &local[..1])
        }
        _ => "***".into(),
    }
}

fn parse_secret(secret: &[u8]) -> Result<EmailSecret> {
    serde_json::from_slice(secret).map_err(|_| Error::Method {
        method: DESCRIPTOR.method_id.into(),
        message: "enrollment secret is malformed".into(),
    })
}

#[async_trait]
impl MfaMethod for EmailOtpMethod {
    fn descriptor(&self) -> &MethodDescriptor {
        &DESCRIPTOR
    }

    fn begin_enrollment(&self, subject: &EnrollmentSubject) -> Result<BeginEnrollment> {
        let email = subject.email.clone().ok_or_else(|| Error::Validation(
            "user has no e-mail address on record".into(),
        ))?;
        let activation = random_code();
        let secret = serde_json::to_vec(&EmailSecret {
            email: email.clone(),
            activation,
        })?;
        Ok(BeginEnrollment {
            secret,
            provisioning_uri: None,
            instructions: format!(
                "An activation code will be sent to {}. Enter it to confirm the enrollment.",
                mask_email(&email)
            ),
        })
    }

    fn complete_enrollment(&self, secret: &[u8], proof: &str) -> Result<()> {
        let parsed = parse_secret(secret)?;
        if parsed
            .activation
            .as_bytes()
            .ct_eq(proof.trim().as_bytes())
            .unwrap_u8()
            == 1
        {
            Ok(())
        } else {
            Err(Error::Method {
                method: DESCRIPTOR.method_id.into(),
                message: "activation code did not match".into(),
            })
        }
    }

    async fn issue(&self, _ctx: &IssueContext, secret: &[u8]) -> Result<MethodIssue> {
        let parsed = parse_secret(secret)?;
        let code = random_code();
        self.sender.deliver(&parsed.email, &code).await?;
        Ok(MethodIssue {
            user_prompt: format!("Enter the code sent to {}.", mask_email(&parsed.email)),
            method_state: Some(sha256_hex(code.as_bytes())),
        })
    }

    fn verify(&self, _secret: &[u8], method_state: Option<&str>, response: &str) -> Result<bool> {
        let Some(expected) = method_state else {
            return Err(Error::Method {
                method: DESCRIPTOR.method_id.into(),
                message: "challenge has no issued code".into(),
            });
        };
        let provided = sha256_hex(response.trim().as_bytes());
        Ok(expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() == 1)
    }

    async fn check_async_status(&self, _method_state: Option<&str>) -> Result<AsyncStatus> {
        Err(Error::Method {
            method: DESCRIPTOR.method_id.into(),
            message: "e-mail OTP is synchronous".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Captures deliveries for assertions.
    struct CapturingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl OtpSender for CapturingSender {
        async fn deliver(&self, destination: &str, code: &str) -> Result<()> {
            self.sent.lock().push((destination.into(), code.into()));
            Ok(())
        }
    }

    fn subject() -> EnrollmentSubject {
        EnrollmentSubject {
            user_id: "u1".into(),
            user_name: "alice".into(),
            email: Some("alice@corp.example".into()),
            phone: None,
        }
    }

    #[tokio::test]
    async fn issue_delivers_and_verify_accepts_the_code() {
        let sender = Arc::new(CapturingSender {
            sent: Mutex::new(Vec::new()),
        });
        let method = EmailOtpMethod::new(sender.clone());
        let enrollment = method.begin_enrollment(&subject()).unwrap();

        let ctx = IssueContext {
            challenge_id: "c1".into(),
            subject: subject(),
            source_ip: None,
        };
        let issued = method.issue(&ctx, &enrollment.secret).await.unwrap();
        let (dest, code) = sender.sent.lock()[0].clone();
        assert_eq!(dest, "alice@corp.example");
        assert_eq!(code.len(), 6);
        // The stored state is a digest, not the code.
        assert_ne!(issued.method_state.as_deref(), Some(code.as_str()));

        assert!(method
            .verify(&enrollment.secret, issued.method_state.as_deref(), &code)
            .unwrap());
        assert!(!method
            .verify(&enrollment.secret, issued.method_state.as_deref(), "000000")
            .unwrap());
    }

    #[test]
    fn activation_requires_the_issued_code() {
        let method = EmailOtpMethod::new(Arc::new(TracingOtpSender));
        let enrollment = method.begin_enrollment(&subject()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&enrollment.secret).unwrap();
        let activation = parsed["activation"].as_str().unwrap();

        assert!(method
            .complete_enrollment(&enrollment.secret, activation)
            .is_ok());
        assert!(method
            .complete_enrollment(&enrollment.secret, "999999")
            .is_err());
    }

    #[test]
    fn enrollment_needs_an_email() {
        let method = EmailOtpMethod::new(Arc::new(TracingOtpSender));
        let mut no_mail = subject();
        no_mail.email = None;
        assert!(matches!(
            method.begin_enrollment(&no_mail),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn masking() {
        assert_eq!(mask_email("alice@corp.example"), "a***@corp.example");
        assert_eq!(mask_email("not-an-address"), "***");
    }
}
