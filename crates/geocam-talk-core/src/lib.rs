//! geocam-talk core - session client, credential storage and transport for
//! talking to a GeoCam Talk server.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{Params, ServerResponse, SessionAuthenticator, SessionClient, SessionError};
pub use auth::{CredentialStore, KeyringStore, MemoryStore, NoopRegistrar, PushRegistrar};
pub use config::Config;

pub type Result<T> = std::result::Result<T, SessionError>;
