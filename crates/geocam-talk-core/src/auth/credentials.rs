use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use keyring::Entry;

use super::session::Credentials;

const SERVICE_NAME: &str = "geocam-talk";

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

/// Key-value store holding the user's credentials outside the client.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials::new(self.get(USERNAME_KEY)?, self.get(PASSWORD_KEY)?))
    }

    fn store_credentials(&self, username: &str, password: &str) -> Result<()> {
        self.set(USERNAME_KEY, username)?;
        self.set(PASSWORD_KEY, password)
    }

    /// Both keys are attempted; the first failure is returned.
    fn clear_credentials(&self) -> Result<()> {
        let username = self.remove(USERNAME_KEY);
        let password = self.remove(PASSWORD_KEY);
        username.and(password)
    }
}

/// Credentials kept in the OS keychain, one entry per key.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(username: &str, password: &str) -> Self {
        let store = Self::new();
        {
            let mut values = store.values.lock().unwrap_or_else(|e| e.into_inner());
            values.insert(USERNAME_KEY.to_string(), username.to_string());
            values.insert(PASSWORD_KEY.to_string(), password.to_string());
        }
        store
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);

        store.store_credentials("alice", "secret").unwrap();
        let creds = store.credentials().unwrap();
        assert_eq!(creds.username.as_deref(), Some("alice"));
        assert_eq!(creds.password.as_deref(), Some("secret"));
        assert!(creds.is_complete());
    }

    #[test]
    fn test_memory_store_clear() {
        let store = MemoryStore::with_credentials("alice", "secret");
        store.clear_credentials().unwrap();
        assert_eq!(store.credentials().unwrap(), Credentials::default());
        // Clearing twice is fine
        store.clear_credentials().unwrap();
    }

    /// Refuses to delete the username entry.
    struct StuckUsername(MemoryStore);

    impl CredentialStore for StuckUsername {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            if key == USERNAME_KEY {
                anyhow::bail!("keychain locked");
            }
            self.0.remove(key)
        }
    }

    #[test]
    fn test_clear_continues_past_failed_remove() {
        let store = StuckUsername(MemoryStore::with_credentials("alice", "secret"));
        let err = store.clear_credentials().unwrap_err();
        assert_eq!(err.to_string(), "keychain locked");

        let creds = store.credentials().unwrap();
        assert_eq!(creds.username.as_deref(), Some("alice"));
        assert_eq!(creds.password, None);
    }

    #[test]
    fn test_partial_credentials() {
        let store = MemoryStore::new();
        store.set(USERNAME_KEY, "alice").unwrap();
        let creds = store.credentials().unwrap();
        assert!(!creds.is_complete());
        assert_eq!(creds.password, None);
    }
}
