//! Domain model: endpoints, tariffs, grants, payments and the ports the
//! engine talks through.

pub mod alert;
pub mod endpoint;
pub mod grant;
pub mod payment;
pub mod ports;
pub mod tariff;

/// Messaging-side identity of the owner of grants and payments.
pub type PrincipalId = i64;
pub type GrantId = u64;
pub type PaymentId = u64;
