//! RFC 6238 time-based one-time passwords: SHA-1, 6 digits, 30-second
//! period, verification window of one step either side.

use async_trait::async_trait;
use base32::Alphabet;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

use mfasrv_domain::model::AsyncStatus;
use mfasrv_domain::{Error, Result};

use crate::traits::{
    BeginEnrollment, EnrollmentSubject, IssueContext, MethodDescriptor, MethodIssue, MfaMethod,
};

type HmacSha1 = Hmac<Sha1>;

const SECRET_LEN: usize = 20;
const PERIOD_SECS: i64 = 30;
const DIGITS: u32 = 6;
/// Accepted clock skew, in steps, either side of now.
const WINDOW: i64 = 1;

const DESCRIPTOR: MethodDescriptor = MethodDescriptor {
    method_id: "totp",
    display_name: "Authenticator app (TOTP)",
    supports_sync: true,
    supports_async: false,
    requires_endpoint_agent: false,
};

pub struct TotpMethod {
    issuer: String,
}

impl TotpMethod {
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    fn provisioning_uri(&self, user_name: &str, secret: &[u8]) -> String {
        let encoded = base32::encode(Alphabet::RFC4648 { padding: false }, secret);
        format!(
            "otpauth://totp/{issuer}:{user}?secret={encoded}&issuer={issuer}\
             &period={PERIOD_SECS}&digits={DIGITS}&algorithm=SHA1",
            issuer = self.issuer,
            user = user_name,
        )
    }

    /// Constant-time check of `response` against the window around
    /// `unix_time`. Every candidate is computed and compared — no early
    /// exit on a hit.
    fn verify_at(secret: &[u8], response: &str, unix_time: i64) -> bool {
        let response = response.trim();
        if response.len() != DIGITS as usize || !response.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let step = unix_time.div_euclid(PERIOD_SECS);
        let mut matched = 0u8;
        for delta in -WINDOW..=WINDOW {
            let counter = (step + delta).max(0) as u64;
            let expected = format!("{:06}", hotp(secret, counter));
            matched |= expected.as_bytes().ct_eq(response.as_bytes()).unwrap_u8();
        }
        matched == 1
    }
}

/// RFC 4226 dynamic truncation over HMAC-SHA1.
fn hotp(secret: &[u8], counter: u64) -> u32 {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let code = ((digest[offset] & 0x7f) as u32) << 24
        | (digest[offset + 1] as u32) << 16
        | (digest[offset + 2] as u32) << 8
        | digest[offset + 3] as u32;
    code % 10u32.pow(DIGITS)
}

#[async_trait]
impl MfaMethod for TotpMethod {
    fn descriptor(&self) -> &MethodDescriptor {
        &DESCRIPTOR
    }

    fn begin_enrollment(&self, subject: &EnrollmentSubject) -> Result<BeginEnrollment> {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut secret);
        let provisioning_uri = self.provisioning_uri(&subject.user_name, &secret);
        Ok(BeginEnrollment {
            secret,
            provisioning_uri: Some(provisioning_uri),
            instructions: "Scan the QR code with your authenticator app, then confirm with the \
                           current 6-digit code."
                .into(),
        })
    }

    fn complete_enrollment(&self, secret: &[u8], proof: &str) -> Result<()> {
        if Self::verify_at(secret, proof, Utc::now().timestamp()) {
            Ok(())
        } else {
            Err(Error::Method {
                method: DESCRIPTOR.method_id.into(),
                message: "activation code did not match".into(),
            })
        }
    }

    async fn issue(&self, _ctx: &IssueContext, _secret: &[u8]) -> Result<MethodIssue> {
        Ok(MethodIssue {
            user_prompt: "Enter the 6-digit code from your authenticator app.".into(),
            method_state: None,
        })
    }

    fn verify(&self, secret: &[u8], _method_state: Option<&str>, response: &str) -> Result<bool> {
        Ok(Self::verify_at(secret, response, Utc::now().timestamp()))
    }

    async fn check_async_status(&self, _method_state: Option<&str>) -> Result<AsyncStatus> {
        Err(Error::Method {
            method: DESCRIPTOR.method_id.into(),
            message: "TOTP is synchronous".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 4226 appendix D test secret.
    const RFC_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn hotp_known_answers() {
        // RFC 4226 appendix D, truncated to 6 digits.
        let expected = [755224, 287082, 359152, 969429, 338314, 254676];
        for (counter, want) in expected.into_iter().enumerate() {
            assert_eq!(hotp(RFC_SECRET, counter as u64), want);
        }
    }

    #[test]
    fn totp_at_rfc_times() {
        // RFC 6238 appendix B: T = 59 → step 1 → HOTP(1) = 287082.
        assert!(TotpMethod::verify_at(RFC_SECRET, "287082", 59));
        assert!(!TotpMethod::verify_at(RFC_SECRET, "755224", 59 + 3 * PERIOD_SECS));
    }

    #[test]
    fn window_accepts_one_step_of_skew() {
        let t = 10_000 * PERIOD_SECS + 3;
        let step = (t / PERIOD_SECS) as u64;
        for counter in [step - 1, step, step + 1] {
            let code = format!("{:06}", hotp(RFC_SECRET, counter));
            assert!(TotpMethod::verify_at(RFC_SECRET, &code, t), "counter {counter}");
        }
        let too_old = format!("{:06}", hotp(RFC_SECRET, step - 2));
        assert!(!TotpMethod::verify_at(RFC_SECRET, &too_old, t));
    }

    #[test]
    fn malformed_codes_are_rejected() {
        assert!(!TotpMethod::verify_at(RFC_SECRET, "12345", 59));
        assert!(!TotpMethod::verify_at(RFC_SECRET, "1234567", 59));
        assert!(!TotpMethod::verify_at(RFC_SECRET, "28708a", 59));
        assert!(!TotpMethod::verify_at(RFC_SECRET, "", 59));
    }

    #[test]
    fn base32_round_trip_and_case_insensitive_decode() {
        let bytes = [0x48, 0x65, 0x6C, 0x6C, 0x6F, 0x21, 0xDE, 0xAD, 0xBE, 0xEF];
        let encoded = base32::encode(Alphabet::RFC4648 { padding: false }, &bytes);
        assert_eq!(encoded, "JBSWY3DPEHPK3PXP");
        assert_eq!(
            base32::decode(Alphabet::RFC4648 { padding: false }, &encoded).unwrap(),
            bytes
        );
        assert_eq!(
            base32::decode(Alphabet::RFC4648 { padding: false }, "jbswy3dpehpk3pxp").unwrap(),
            bytes
        );
    }

    #[test]
    fn provisioning_uri_shape() {
        let method = TotpMethod::new("mfasrv".into());
        let uri = method.provisioning_uri("alice", b"Hello!\xde\xad\xbe\xef");
        assert!(uri.starts_with("otpauth://totp/mfasrv:alice?secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("period=30"));
        assert!(uri.contains("digits=6"));
        assert!(uri.contains("algorithm=SHA1"));
    }

    #[test]
    fn enrollment_secret_is_20_random_bytes() {
        let method = TotpMethod::new("mfasrv".into());
        let subject = EnrollmentSubject {
            user_id: "u1".into(),
            user_name: "alice".into(),
            email: None,
            phone: None,
        };
        let a = method.begin_enrollment(&subject).unwrap();
        let b = method.begin_enrollment(&subject).unwrap();
        assert_eq!(a.secret.len(), SECRET_LEN);
        assert_ne!(a.secret, b.secret);
        assert!(a.provisioning_uri.unwrap().contains("alice"));
    }
}
