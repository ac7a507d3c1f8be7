use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A user's registration of one MFA method.
///
/// `encrypted_secret`/`secret_nonce` are the only at-rest form of the method
/// secret; the plaintext exists in memory only for the duration of a single
/// enrollment or verification operation. At most one `active` enrollment may
/// exist per `(user_id, method)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    /// Normalized (lowercase) method id, e.g. `"totp"`.
    pub method: String,
    pub status: EnrollmentStatus,
    #[serde(with = "base64_bytes")]
    pub encrypted_secret: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub secret_nonce: Vec<u8>,
    #[serde(default)]
    pub device_identifier: Option<String>,
    #[serde(default)]
    pub friendly_name: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub activated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Disabled,
    Revoked,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Disabled => "disabled",
            EnrollmentStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EnrollmentStatus::Pending),
            "active" => Ok(EnrollmentStatus::Active),
            "disabled" => Ok(EnrollmentStatus::Disabled),
            "revoked" => Ok(EnrollmentStatus::Revoked),
            other => Err(Error::Validation(format!(
                "unknown enrollment status: {other}"
            ))),
        }
    }
}

/// Serialize binary columns as standard base64 strings in JSON surfaces.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_secret_serializes_as_base64() {
        let e = Enrollment {
            id: "e1".into(),
            user_id: "u1".into(),
            method: "totp".into(),
            status: EnrollmentStatus::Pending,
            encrypted_secret: vec![0xDE, 0xAD, 0xBE, 0xEF],
            secret_nonce: vec![0u8; 12],
            device_identifier: None,
            friendly_name: Some("phone".into()),
            created: Utc::now(),
            activated: None,
            last_used: None,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["encrypted_secret"], "3q2+7w==");
        let back: Enrollment = serde_json::from_value(json).unwrap();
        assert_eq!(back.encrypted_secret, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
