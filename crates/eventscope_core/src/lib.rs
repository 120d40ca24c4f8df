pub mod config;
pub mod credential_store;
pub mod entities;
pub mod error;
pub mod interceptor;
pub mod ports;
pub mod use_cases;

#[cfg(test)]
pub(crate) mod testing;

pub use credential_store::CredentialStore;
pub use error::Error;
