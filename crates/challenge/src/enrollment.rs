//! Enrollment lifecycle: begin (pending row + provisioning material),
//! activate (method proof), disable/revoke. Keeps `users.mfa_enabled` in
//! step with the presence of active enrollments.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use mfasrv_crypto::SecretBox;
use mfasrv_domain::context::normalize_method_id;
use mfasrv_domain::model::{Enrollment, EnrollmentStatus};
use mfasrv_domain::{Error, Result};
use mfasrv_methods::{EnrollmentSubject, MethodRegistry};
use mfasrv_store::Store;

/// What `begin` hands back to the admin surface: the pending enrollment and
/// the material the user needs to finish it. The plaintext secret is not
/// part of it — it is already sealed in the row.
pub struct StartedEnrollment {
    pub enrollment: Enrollment,
    pub provisioning_uri: Option<String>,
    pub instructions: String,
}

pub struct EnrollmentManager {
    store: Arc<Store>,
    registry: Arc<MethodRegistry>,
    secrets: SecretBox,
}

impl EnrollmentManager {
    pub fn new(store: Arc<Store>, registry: Arc<MethodRegistry>, secrets: SecretBox) -> Self {
        Self {
            store,
            registry,
            secrets,
        }
    }

    /// Create a pending enrollment. Not-yet-activated enrollments never
    /// satisfy a challenge; activation requires one successful proof.
    pub fn begin(
        &self,
        user_id: &str,
        method_id: &str,
        friendly_name: Option<String>,
        device_identifier: Option<String>,
    ) -> Result<StartedEnrollment> {
        let method_id = normalize_method_id(method_id);
        let method = self.registry.get(&method_id)?;
        let user = self
            .store
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
        if self.store.active_enrollment(user_id, &method_id)?.is_some() {
            return Err(Error::Validation(format!(
                "user already has an active {method_id} enrollment"
            )));
        }

        let begun = method.begin_enrollment(&EnrollmentSubject {
            user_id: user.id.clone(),
            user_name: user.sam.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
        })?;
        let (encrypted_secret, secret_nonce) = self.secrets.seal(&begun.secret)?;

        let enrollment = Enrollment {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            method: method_id,
            status: EnrollmentStatus::Pending,
            encrypted_secret,
            secret_nonce,
            device_identifier,
            friendly_name,
            created: Utc::now(),
            activated: None,
            last_used: None,
        };
        self.store.insert_enrollment(&enrollment)?;
        tracing::info!(enrollment_id = %enrollment.id, method = %enrollment.method, user_id, "enrollment started");

        Ok(StartedEnrollment {
            enrollment,
            provisioning_uri: begun.provisioning_uri,
            instructions: begun.instructions,
        })
    }

    /// Activate a pending enrollment with the method's proof (e.g. the
    /// first TOTP code).
    pub fn activate(&self, enrollment_id: &str, proof: &str) -> Result<Enrollment> {
        let enrollment = self
            .store
            .get_enrollment(enrollment_id)?
            .ok_or_else(|| Error::NotFound(format!("enrollment {enrollment_id}")))?;
        if enrollment.status != EnrollmentStatus::Pending {
            return Err(Error::Terminal(format!(
                "enrollment is {}, not pending",
                enrollment.status.as_str()
            )));
        }
        let method = self.registry.get(&enrollment.method)?;
        let secret = self
            .secrets
            .open(&enrollment.encrypted_secret, &enrollment.secret_nonce)?;
        method.complete_enrollment(&secret, proof)?;

        let now = Utc::now();
        self.store
            .set_enrollment_status(enrollment_id, EnrollmentStatus::Active, now)?;
        self.store.set_mfa_enabled(&enrollment.user_id, true)?;
        tracing::info!(enrollment_id, user_id = %enrollment.user_id, "enrollment activated");
        self.store
            .get_enrollment(enrollment_id)?
            .ok_or_else(|| Error::NotFound(format!("enrollment {enrollment_id}")))
    }

    /// Disable or revoke; `mfa_enabled` follows the remaining active set.
    pub fn deactivate(&self, enrollment_id: &str, status: EnrollmentStatus) -> Result<()> {
        if !matches!(
            status,
            EnrollmentStatus::Disabled | EnrollmentStatus::Revoked
        ) {
            return Err(Error::Validation(
                "deactivation must target disabled or revoked".into(),
            ));
        }
        let enrollment = self
            .store
            .get_enrollment(enrollment_id)?
            .ok_or_else(|| Error::NotFound(format!("enrollment {enrollment_id}")))?;
        self.store.set_enrollment_status(enrollment_id, status, Utc::now())?;
        let still_active = self.store.has_active_enrollments(&enrollment.user_id)?;
        self.store.set_mfa_enabled(&enrollment.user_id, still_active)?;
        tracing::info!(enrollment_id, status = status.as_str(), "enrollment deactivated");
        Ok(())
    }

    pub fn delete(&self, enrollment_id: &str) -> Result<bool> {
        let Some(enrollment) = self.store.get_enrollment(enrollment_id)? else {
            return Ok(false);
        };
        let deleted = self.store.delete_enrollment(enrollment_id)?;
        if deleted {
            let still_active = self.store.has_active_enrollments(&enrollment.user_id)?;
            self.store.set_mfa_enabled(&enrollment.user_id, still_active)?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfasrv_domain::model::User;
    use mfasrv_methods::{EmailOtpMethod, TracingOtpSender};

    fn fixture() -> (EnrollmentManager, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
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
                mfa_enabled: false,
                last_sync: Utc::now(),
                last_auth: None,
            })
            .unwrap();
        let mut registry = MethodRegistry::new();
        registry.register(Arc::new(EmailOtpMethod::new(Arc::new(TracingOtpSender))));
        let mgr = EnrollmentManager::new(
            store.clone(),
            Arc::new(registry),
            SecretBox::new([5u8; 32]),
        );
        (mgr, store)
    }

    #[test]
    fn begin_activate_flow_sets_mfa_enabled() {
        let (mgr, store) = fixture();
        let started = mgr
            .begin("u1", "EMAIL_OTP", Some("work mail".into()), None)
            .unwrap();
        assert_eq!(started.enrollment.status, EnrollmentStatus::Pending);
        assert!(!store.get_user("u1").unwrap().unwrap().mfa_enabled);

        // Wrong proof keeps it pending.
        assert!(mgr.activate(&started.enrollment.id, "badproof").is_err());

        // Recover the activation code by unsealing the stored secret.
        let row = store.get_enrollment(&started.enrollment.id).unwrap().unwrap();
        let secret = SecretBox::new([5u8; 32])
            .open(&row.encrypted_secret, &row.secret_nonce)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&secret).unwrap();
        let code = parsed["activation"].as_str().unwrap();

        let active = mgr.activate(&started.enrollment.id, code).unwrap();
        assert_eq!(active.status, EnrollmentStatus::Active);
        assert!(store.get_user("u1").unwrap().unwrap().mfa_enabled);

        // Activating twice is a terminal-state error.
        assert!(matches!(
            mgr.activate(&started.enrollment.id, code),
            Err(Error::Terminal(_))
        ));
    }

    #[test]
    fn deactivation_clears_mfa_enabled_with_last_active() {
        let (mgr, store) = fixture();
        let started = mgr.begin("u1", "email_otp", None, None).unwrap();
        let row = store.get_enrollment(&started.enrollment.id).unwrap().unwrap();
        let secret = SecretBox::new([5u8; 32])
            .open(&row.encrypted_secret, &row.secret_nonce)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&secret).unwrap();
        mgr.activate(&started.enrollment.id, parsed["activation"].as_str().unwrap())
            .unwrap();

        mgr.deactivate(&started.enrollment.id, EnrollmentStatus::Revoked)
            .unwrap();
        assert!(!store.get_user("u1").unwrap().unwrap().mfa_enabled);
        assert!(mgr
            .deactivate(&started.enrollment.id, EnrollmentStatus::Active)
            .is_err());
    }

    #[test]
    fn second_active_enrollment_is_refused_at_begin() {
        let (mgr, store) = fixture();
        let started = mgr.begin("u1", "email_otp", None, None).unwrap();
        let row = store.get_enrollment(&started.enrollment.id).unwrap().unwrap();
        let secret = SecretBox::new([5u8; 32])
            .open(&row.encrypted_secret, &row.secret_nonce)
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&secret).unwrap();
        mgr.activate(&started.enrollment.id, parsed["activation"].as_str().unwrap())
            .unwrap();

        assert!(matches!(
            mgr.begin("u1", "email_otp", None, None),
            Err(Error::Validation(_))
        ));
    }
}
