use reqwest::Url;

use super::SessionError;

const LOGIN_PATH: &str = "accounts/login/";
const LOGOUT_PATH: &str = "accounts/logout/";
const UNREGISTER_PATH: &str = "unregister";

/// URL layout of a talk server: account endpoints hang off the root,
/// application endpoints off `<root>/<app_path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    root: String,
    app_path: String,
}

impl Endpoints {
    pub fn new(root: impl Into<String>, app_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            app_path: app_path.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn set_root(&mut self, root: impl Into<String>) {
        self.root = root.into();
    }

    pub fn login(&self) -> Result<Url, SessionError> {
        self.under_root(LOGIN_PATH)
    }

    pub fn logout(&self) -> Result<Url, SessionError> {
        self.under_root(LOGOUT_PATH)
    }

    pub fn unregister(&self) -> Result<Url, SessionError> {
        self.under_app(UNREGISTER_PATH)
    }

    /// `<root>/<path>`
    pub fn under_root(&self, path: &str) -> Result<Url, SessionError> {
        Self::parse(&join(&self.root, path))
    }

    /// `<root>/<app_path>/<path>`
    pub fn under_app(&self, path: &str) -> Result<Url, SessionError> {
        Self::parse(&join(&join(&self.root, &self.app_path), path))
    }

    /// `<root>/<app_path>/<path>?k=v&...`
    pub fn under_app_with_query<'a, I>(&self, path: &str, query: I) -> Result<Url, SessionError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut url = self.under_app(path)?;
        let mut pairs = query.into_iter().peekable();
        if pairs.peek().is_some() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    fn parse(raw: &str) -> Result<Url, SessionError> {
        Url::parse(raw).map_err(|e| SessionError::InvalidArgument(format!("bad URL {}: {}", raw, e)))
    }
}

fn join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
