//! String-keyed lookup of registered MFA methods.

use std::collections::HashMap;
use std::sync::Arc;

use mfasrv_domain::context::normalize_method_id;
use mfasrv_domain::{Error, Result};

use crate::traits::{MethodDescriptor, MfaMethod};

/// Holds every registered method, keyed by normalized `method_id`.
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn MfaMethod>>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a method. A later registration under the same id replaces
    /// the earlier one.
    pub fn register(&mut self, method: Arc<dyn MfaMethod>) {
        let id = normalize_method_id(method.descriptor().method_id);
        if self.methods.insert(id.clone(), method).is_some() {
            tracing::warn!(method_id = %id, "method re-registered, replacing");
        } else {
            tracing::info!(method_id = %id, "MFA method registered");
        }
    }

    /// Look up by raw id; normalization happens here so every boundary can
    /// pass whatever casing it received.
    pub fn get(&self, method_id: &str) -> Result<Arc<dyn MfaMethod>> {
        let id = normalize_method_id(method_id);
        self.methods
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("unknown MFA method: {id}")))
    }

    pub fn contains(&self, method_id: &str) -> bool {
        self.methods.contains_key(&normalize_method_id(method_id))
    }

    pub fn descriptors(&self) -> Vec<MethodDescriptor> {
        let mut list: Vec<_> = self
            .methods
            .values()
            .map(|m| m.descriptor().clone())
            .collect();
        list.sort_by(|a, b| a.method_id.cmp(b.method_id));
        list
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TotpMethod, TracingOtpSender};

    #[test]
    fn lookup_normalizes_case() {
        let mut registry = MethodRegistry::new();
        registry.register(Arc::new(TotpMethod::new("mfasrv".into())));
        registry.register(Arc::new(crate::EmailOtpMethod::new(Arc::new(
            TracingOtpSender,
        ))));

        assert!(registry.get("TOTP").is_ok());
        assert!(registry.get(" Totp ").is_ok());
        assert!(registry.get("EMAIL_OTP").is_ok());
        assert!(registry.get("push").is_err());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn descriptors_are_sorted() {
        let mut registry = MethodRegistry::new();
        registry.register(Arc::new(TotpMethod::new("mfasrv".into())));
        registry.register(Arc::new(crate::EmailOtpMethod::new(Arc::new(
            TracingOtpSender,
        ))));
        let ids: Vec<_> = registry
            .descriptors()
            .into_iter()
            .map(|d| d.method_id)
            .collect();
        assert_eq!(ids, vec!["email_otp", "totp"]);
    }
}
