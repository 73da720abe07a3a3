//! Durable session credential storage
//!
//! The dispatcher never keeps a long-lived copy of the session tokens; it
//! re-reads them through `CredentialVault` before every request. The vault sits
//! on top of any `KeyValueStore` backend:
//!
//! - `MemoryStore` for tests and ephemeral sessions
//! - `FileStore` for a JSON file that survives process restarts
//!
//! Other backends (OS keychain, secure enclave) only need the four
//! `KeyValueStore` operations.

pub mod error;
pub mod file;
pub mod store;
pub mod vault;

pub use error::{Error, Result};
pub use file::FileStore;
pub use store::{KeyValueStore, MemoryStore, StoreFuture};
pub use vault::{
    ACCESS_TOKEN_KEY, CredentialPair, CredentialVault, PROFILE_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS,
    USER_ID_KEY,
};
