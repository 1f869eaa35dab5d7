use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Substring identifying the server's session cookie.
pub const SESSION_COOKIE_MARKER: &str = "sessionid";

/// Username/password pair as read from the credential store.
/// Compared by value; either half may be missing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }

    /// Both halves present
    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    /// `None` means the cookie never expires on its own.
    pub expires: Option<DateTime<Utc>>,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
        }
    }

    pub fn with_expiry(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|at| now >= at).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_session_cookie(&self) -> bool {
        self.name.contains(SESSION_COOKIE_MARKER)
    }

    /// `name=value` pair for a `Cookie` request header
    pub fn header_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("expires", &self.expires)
            .finish()
    }
}

/// Per-client session state: the credentials last used to log in and the
/// cookie that login produced.
#[derive(Debug, Default)]
pub struct SessionState {
    cached: Credentials,
    cookie: Option<SessionCookie>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.cached
    }

    pub fn cookie(&self) -> Option<&SessionCookie> {
        self.cookie.as_ref()
    }

    /// Compare cached credentials against the stored ones.
    ///
    /// If either side is incomplete, or the two differ, the session is
    /// dropped and the stored values are adopted as-is. Returns true when
    /// the session was invalidated.
    pub fn reconcile(&mut self, stored: Credentials) -> bool {
        if !self.cached.is_complete() || !stored.is_complete() || self.cached != stored {
            self.cookie = None;
            self.cached = stored;
            true
        } else {
            false
        }
    }

    /// Replace cached credentials without touching the cookie unless they differ.
    pub fn adopt(&mut self, stored: Credentials) {
        if self.cached != stored {
            self.cookie = None;
        }
        self.cached = stored;
    }

    /// A login is required when no unexpired cookie is held.
    pub fn needs_login_at(&self, now: DateTime<Utc>) -> bool {
        match self.cookie {
            Some(ref cookie) => cookie.is_expired_at(now),
            None => true,
        }
    }

    pub fn needs_login(&self) -> bool {
        self.needs_login_at(Utc::now())
    }

    /// Install a freshly issued cookie. Ignored unless credentials are cached.
    pub fn activate(&mut self, cookie: SessionCookie) {
        if self.cached.is_complete() {
            self.cookie = Some(cookie);
        }
    }

    pub fn invalidate(&mut self) {
        self.cookie = None;
    }
}
