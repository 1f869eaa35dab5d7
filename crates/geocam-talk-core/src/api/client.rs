//! Session client for a GeoCam Talk server.
//!
//! `SessionClient` wraps an unauthenticated `Transport` and keeps a server
//! session alive behind it. Every authenticated call reconciles the cached
//! credentials with the credential store, logs in again when they changed or
//! the session cookie expired, and only then sends the request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{
    CredentialStore, Credentials, KeyringStore, NoopRegistrar, PushRegistrar, SessionState,
};
use crate::config::Config;

use super::endpoints::Endpoints;
use super::response::ServerResponse;
use super::transport::{HttpRequest, HttpResponse, HttpTransport, MultipartPart, RequestBody, Transport};
use super::SessionError;

type Result<T> = std::result::Result<T, SessionError>;

/// Form fields or query parameters, sent in key order.
pub type Params = BTreeMap<String, String>;

// ============================================================================
// Constants
// ============================================================================

/// The server answers a good login or logout with a redirect.
const REDIRECT_STATUS: u16 = 302;

const AUDIO_PART_NAME: &str = "audio";
const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";
const AUDIO_FILE_NAME: &str = "audio.mp4";

/// Content-type substring marking a binary audio download.
const BINARY_CONTENT_MARKER: &str = "mp4";

/// Capability set of an authenticated session.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    async fn post(&self, path: &str, params: &Params, audio: Option<&[u8]>) -> Result<ServerResponse>;

    async fn get(&self, path: &str, params: &Params) -> Result<ServerResponse>;

    async fn fetch_binary(&self, path: &str, params: &Params, destination: &Path) -> Result<PathBuf>;

    async fn login(&self) -> Result<()>;

    async fn logout(&self) -> Result<()>;

    async fn is_logged_in(&self) -> bool;

    async fn reauthenticate(&self);
}

/// Everything guarded by the client's lock.
struct Inner {
    session: SessionState,
    endpoints: Endpoints,
}

pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    registrar: Arc<dyn PushRegistrar>,
    invalidate_on_auth_failure: bool,
    /// Held from credential reconciliation until the response arrives.
    inner: Mutex<Inner>,
}

impl SessionClient {
    pub fn new(config: &Config, transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            store,
            registrar: Arc::new(NoopRegistrar),
            invalidate_on_auth_failure: config.invalidate_on_auth_failure,
            inner: Mutex::new(Inner {
                session: SessionState::new(),
                endpoints: Endpoints::new(config.server_root.clone(), config.app_path.clone()),
            }),
        }
    }

    /// Client over reqwest with credentials in the OS keychain
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self::new(config, Arc::new(transport), Arc::new(KeyringStore::new())))
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn PushRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Point the client at another server. The current session is kept;
    /// call `reauthenticate` to force a fresh login.
    pub async fn set_root(&self, root: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.endpoints.set_root(root);
    }

    pub async fn root(&self) -> String {
        self.inner.lock().await.endpoints.root().to_string()
    }

    // ===== Authenticated Requests =====

    /// POST to `<root>/<app_path>/<path>`.
    ///
    /// With `audio`, the body is multipart: one text part per parameter plus
    /// an `audio` part. Otherwise it is a URL-encoded form.
    pub async fn post(&self, path: &str, params: &Params, audio: Option<&[u8]>) -> Result<ServerResponse> {
        if params.is_empty() {
            return Err(SessionError::InvalidArgument(
                "post parameters are required".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        self.ensure_authenticated(&mut inner).await?;

        let body = match audio {
            Some(bytes) => multipart_body(params, bytes),
            None => form_body(params),
        };
        let request = HttpRequest::post(inner.endpoints.under_app(path)?, body).no_redirects();

        let response = self.send_authenticated(&mut inner, request).await?;
        ServerResponse::read(response).await
    }

    pub async fn post_form(&self, path: &str, params: &Params) -> Result<ServerResponse> {
        self.post(path, params, None).await
    }

    /// GET `<root>/<app_path>/<path>` with `params` as the query string.
    pub async fn get(&self, path: &str, params: &Params) -> Result<ServerResponse> {
        let mut inner = self.inner.lock().await;
        self.ensure_authenticated(&mut inner).await?;

        let url = inner.endpoints.under_app_with_query(path, params)?;
        let response = self.send_authenticated(&mut inner, HttpRequest::get(url)).await?;
        ServerResponse::read(response).await
    }

    /// POST to `<root>/<path>` and stream an audio payload to `destination`.
    ///
    /// Fails with `UnexpectedContentType` (and writes nothing) when the
    /// server answers with anything but an mp4 payload.
    pub async fn fetch_binary(&self, path: &str, params: &Params, destination: &Path) -> Result<PathBuf> {
        let mut inner = self.inner.lock().await;
        self.ensure_authenticated(&mut inner).await?;

        let body = if params.is_empty() {
            RequestBody::Empty
        } else {
            form_body(params)
        };
        let request = HttpRequest::post(inner.endpoints.under_root(path)?, body);
        let response = self.send_authenticated(&mut inner, request).await?;
        drop(inner);

        let content_type = response.content_type().unwrap_or_default().to_string();
        if !content_type.contains(BINARY_CONTENT_MARKER) {
            warn!(path = path, status = response.status, content_type = %content_type, "Not an audio payload");
            return Err(SessionError::UnexpectedContentType(if content_type.is_empty() {
                "none".to_string()
            } else {
                content_type
            }));
        }

        match write_body(response, destination).await {
            Ok(written) => {
                debug!(path = path, bytes = written, destination = %destination.display(), "Saved audio");
                Ok(destination.to_path_buf())
            }
            Err(e) => {
                // Don't leave a truncated file behind
                let _ = tokio::fs::remove_file(destination).await;
                Err(e)
            }
        }
    }

    // ===== Session Lifecycle =====

    /// Log in with whatever the credential store currently holds.
    pub async fn login(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stored = self.stored_credentials()?;
        inner.session.adopt(stored);
        if !inner.session.credentials().is_complete() {
            return Err(SessionError::credentials_not_set());
        }
        self.login_locked(&mut inner).await
    }

    /// Unregister from push notifications, end the server session, and
    /// forget the stored credentials.
    ///
    /// The credentials are removed from the store whatever the server says.
    /// A failed logout request is reported first; after a successful one the
    /// local session is dropped before any store failure is returned.
    pub async fn logout(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Best effort
        match inner.endpoints.unregister() {
            Ok(url) => {
                let request = HttpRequest::get(url).with_cookie(inner.session.cookie());
                match self.transport.execute(request).await {
                    Ok(response) => debug!(status = response.status, "Unregistered from push notifications"),
                    Err(e) => warn!(error = %e, "Unregister request failed"),
                }
            }
            Err(e) => warn!(error = %e, "Unregister URL invalid"),
        }

        let Credentials { username, password } = inner.session.credentials().clone();
        let fields = [
            ("username".to_string(), username.unwrap_or_default()),
            ("password".to_string(), password.unwrap_or_default()),
        ];
        let sent = match inner.endpoints.logout() {
            Ok(url) => {
                let request = HttpRequest::post(url, RequestBody::Form(fields.to_vec())).no_redirects();
                self.transport.execute(request).await
            }
            Err(e) => Err(e),
        };

        let cleared = self.store.clear_credentials().map_err(SessionError::CredentialStore);
        if let Err(ref e) = cleared {
            warn!(error = %e, "Failed to clear stored credentials");
        }

        let response = sent?;
        if response.status != REDIRECT_STATUS {
            warn!(status = response.status, "Unexpected logout response");
            return Err(SessionError::unexpected_status(response.status));
        }

        // The server session is gone even if the store kept something
        inner.session.invalidate();
        cleared?;
        info!("Logged out");
        Ok(())
    }

    /// True when a session cookie is held and the store still has both
    /// credentials. Does not contact the server.
    pub async fn is_logged_in(&self) -> bool {
        let inner = self.inner.lock().await;
        if inner.session.cookie().is_none() {
            return false;
        }
        match self.store.credentials() {
            Ok(stored) => stored.is_complete(),
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials");
                false
            }
        }
    }

    /// Drop the session; the next authenticated call logs in again.
    pub async fn reauthenticate(&self) {
        self.inner.lock().await.session.invalidate();
    }

    // ===== Internals =====

    fn stored_credentials(&self) -> Result<Credentials> {
        self.store.credentials().map_err(SessionError::CredentialStore)
    }

    async fn ensure_authenticated(&self, inner: &mut Inner) -> Result<()> {
        let stored = self.stored_credentials()?;
        if inner.session.reconcile(stored) {
            debug!("Credentials missing or changed, session dropped");
        }

        if !inner.session.credentials().is_complete() {
            return Err(SessionError::credentials_not_set());
        }

        if inner.session.needs_login() {
            self.login_locked(inner).await?;
        }
        Ok(())
    }

    async fn login_locked(&self, inner: &mut Inner) -> Result<()> {
        inner.session.invalidate();

        let (username, password) = match inner.session.credentials() {
            Credentials {
                username: Some(u),
                password: Some(p),
            } => (u.clone(), p.clone()),
            _ => return Err(SessionError::credentials_not_set()),
        };

        let fields = vec![
            ("username".to_string(), username.clone()),
            ("password".to_string(), password),
        ];
        let request = HttpRequest::post(inner.endpoints.login()?, RequestBody::Form(fields)).no_redirects();
        let response = self.transport.execute(request).await?;

        if response.status != REDIRECT_STATUS {
            warn!(status = response.status, username = %username, "Login rejected");
            return Err(SessionError::unexpected_status(response.status));
        }

        let cookie = response.session_cookie().cloned().ok_or_else(|| {
            SessionError::AuthenticationFailed("session cookie missing".to_string())
        })?;

        inner.session.activate(cookie);
        info!(username = %username, "Logged in");

        if let Err(e) = self.registrar.register() {
            warn!(error = %e, "Push registration failed");
        }
        Ok(())
    }

    async fn send_authenticated(&self, inner: &mut Inner, request: HttpRequest) -> Result<HttpResponse> {
        let request = request.with_cookie(inner.session.cookie());
        let response = self.transport.execute(request).await?;

        if let Some(err) = SessionError::from_status(response.status) {
            warn!(status = response.status, "Server rejected the session");
            if self.invalidate_on_auth_failure {
                inner.session.invalidate();
            }
            return Err(err);
        }
        Ok(response)
    }
}

#[async_trait]
impl SessionAuthenticator for SessionClient {
    async fn post(&self, path: &str, params: &Params, audio: Option<&[u8]>) -> Result<ServerResponse> {
        SessionClient::post(self, path, params, audio).await
    }

    async fn get(&self, path: &str, params: &Params) -> Result<ServerResponse> {
        SessionClient::get(self, path, params).await
    }

    async fn fetch_binary(&self, path: &str, params: &Params, destination: &Path) -> Result<PathBuf> {
        SessionClient::fetch_binary(self, path, params, destination).await
    }

    async fn login(&self) -> Result<()> {
        SessionClient::login(self).await
    }

    async fn logout(&self) -> Result<()> {
        SessionClient::logout(self).await
    }

    async fn is_logged_in(&self) -> bool {
        SessionClient::is_logged_in(self).await
    }

    async fn reauthenticate(&self) {
        SessionClient::reauthenticate(self).await
    }
}

fn form_body(params: &Params) -> RequestBody {
    RequestBody::Form(params.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn multipart_body(params: &Params, audio: &[u8]) -> RequestBody {
    let mut parts: Vec<MultipartPart> = params
        .iter()
        .map(|(name, value)| MultipartPart::Text {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    parts.push(MultipartPart::Bytes {
        name: AUDIO_PART_NAME.to_string(),
        data: audio.to_vec(),
        content_type: AUDIO_CONTENT_TYPE.to_string(),
        file_name: AUDIO_FILE_NAME.to_string(),
    });
    RequestBody::Multipart(parts)
}

async fn write_body(response: HttpResponse, destination: &Path) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(destination).await?;
    response.body.write_to(&mut file).await
}
