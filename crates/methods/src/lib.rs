//! Pluggable MFA methods behind one uniform contract.
//!
//! Every method declares a [`MethodDescriptor`] and implements the five
//! operations of [`MfaMethod`]. The challenge orchestrator consumes only
//! this contract — wire semantics (TOTP windows, OTP delivery, push
//! approval) stay inside the method. Methods are selected by normalized
//! `method_id` from the [`MethodRegistry`].

mod email_otp;
mod registry;
mod totp;
mod traits;

pub use email_otp::{EmailOtpMethod, OtpSender, TracingOtpSender};
pub use registry::MethodRegistry;
pub use totp::TotpMethod;
pub use traits::*;
