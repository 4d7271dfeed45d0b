// ============================
// crates/sync-lib/src/auth/mod.rs
// ============================
//! Authentication module.

pub mod credentials;
mod service;
mod service_impl;

pub use credentials::CredentialStore;
pub use service::AuthService;
pub use service_impl::DefaultAuth;
