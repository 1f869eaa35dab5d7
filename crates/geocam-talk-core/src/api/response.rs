use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use super::transport::HttpResponse;
use super::SessionError;

/// Response from an authenticated call, body fully read.
#[derive(Debug, Clone)]
pub struct ServerResponse {
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ServerResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub(crate) async fn read(response: HttpResponse) -> Result<Self, SessionError> {
        let body = response.body.bytes().await?;
        Ok(Self::new(response.status, response.headers, body))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
