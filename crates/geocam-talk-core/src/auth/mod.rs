//! Authentication module for managing the server session and credentials.
//!
//! This module provides:
//! - `SessionState`: cached credentials plus the server-issued session cookie
//! - `CredentialStore`: where the user's username/password live (OS keychain
//!   via keyring, or in memory)
//! - `PushRegistrar`: the hook fired after a successful login
//!
//! Session state is never persisted; only the credentials outlive the process.

pub mod credentials;
pub mod push;
pub mod session;

pub use credentials::{CredentialStore, KeyringStore, MemoryStore, PASSWORD_KEY, USERNAME_KEY};
pub use push::{NoopRegistrar, PushRegistrar};
pub use session::{Credentials, SessionCookie, SessionState, SESSION_COOKIE_MARKER};
