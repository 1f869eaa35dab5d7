//! HTTP transport seam.
//!
//! The session client never talks to reqwest directly; it builds an
//! `HttpRequest` and hands it to a `Transport`. `HttpTransport` is the
//! production implementation.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{self, HeaderMap};
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Client, Url};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::auth::SessionCookie;

use super::SessionError;

type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartPart {
    Text {
        name: String,
        value: String,
    },
    Bytes {
        name: String,
        data: Vec<u8>,
        content_type: String,
        file_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartPart>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub body: RequestBody,
    pub cookies: Vec<SessionCookie>,
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            body: RequestBody::Empty,
            cookies: Vec::new(),
            follow_redirects: true,
        }
    }

    pub fn post(url: Url, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            url,
            body,
            cookies: Vec::new(),
            follow_redirects: true,
        }
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    pub fn with_cookie(mut self, cookie: Option<&SessionCookie>) -> Self {
        if let Some(cookie) = cookie {
            self.cookies.push(cookie.clone());
        }
        self
    }
}

/// Response body, read lazily.
pub struct ResponseBody {
    chunks: BoxStream<'static, Result<Vec<u8>>>,
}

impl ResponseBody {
    pub fn from_stream(chunks: BoxStream<'static, Result<Vec<u8>>>) -> Self {
        Self { chunks }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self::from_stream(stream::once(async move { Ok(data) }).boxed())
    }

    /// Collect the whole body into memory
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(chunk) = self.chunks.try_next().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Stream the body into `writer`, returning the number of bytes written.
    pub async fn write_to<W>(mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.chunks.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody { .. }")
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Cookies the server set on this response
    pub cookies: Vec<SessionCookie>,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// First unexpired cookie whose name marks it as the server session.
    pub fn session_cookie(&self) -> Option<&SessionCookie> {
        let now = Utc::now();
        self.cookies
            .iter()
            .find(|c| c.is_session_cookie() && !c.is_expired_at(now))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed transport.
/// Clone is cheap - both clients share their connection pools.
#[derive(Clone)]
pub struct HttpTransport {
    direct: Client,
    following: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let direct = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        let following = Client::builder().timeout(timeout).build()?;
        Ok(Self { direct, following })
    }

    fn build_form(parts: Vec<MultipartPart>) -> Result<Form> {
        let mut form = Form::new();
        for part in parts {
            form = match part {
                MultipartPart::Text { name, value } => form.text(name, value),
                MultipartPart::Bytes {
                    name,
                    data,
                    content_type,
                    file_name,
                } => {
                    let part = Part::bytes(data)
                        .file_name(file_name)
                        .mime_str(&content_type)?;
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }

    fn convert_cookie(cookie: &reqwest::cookie::Cookie<'_>) -> SessionCookie {
        SessionCookie {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            expires: cookie_expiry(cookie.max_age(), cookie.expires(), Utc::now()),
        }
    }
}

/// `Max-Age` wins over `Expires`. An age past the end of the calendar means
/// the cookie never expires.
fn cookie_expiry(
    max_age: Option<Duration>,
    expires: Option<SystemTime>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match max_age {
        Some(age) => chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| now.checked_add_signed(age)),
        None => expires.map(DateTime::<Utc>::from),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        debug!(method = ?request.method, url = %request.url, "Sending request");

        let mut builder = match request.method {
            Method::Get => client.get(request.url),
            Method::Post => client.post(request.url),
        };

        if !request.cookies.is_empty() {
            let cookie_header = request
                .cookies
                .iter()
                .map(SessionCookie::header_pair)
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, cookie_header);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart(parts) => builder.multipart(Self::build_form(parts)?),
        };

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let cookies = response.cookies().map(|c| Self::convert_cookie(&c)).collect();
        let headers = response.headers().clone();
        let chunks = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(SessionError::from)
            .boxed();

        Ok(HttpResponse {
            status,
            headers,
            cookies,
            body: ResponseBody::from_stream(chunks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    #[tokio::test]
    async fn test_body_from_bytes() {
        let body = ResponseBody::from_bytes(b"hello".to_vec());
        assert_eq!(body.bytes().await.unwrap(), b"hello");
        assert!(ResponseBody::from_bytes(Vec::new()).bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_write_to_multiple_chunks() {
        let chunks = stream::iter(vec![Ok(b"ab".to_vec()), Ok(b"cd".to_vec())]).boxed();
        let mut out = Vec::new();
        let written = ResponseBody::from_stream(chunks).write_to(&mut out).await.unwrap();
        assert_eq!(written, 4);
        assert_eq!(out, b"abcd");
    }

    #[tokio::test]
    async fn test_body_error_propagates() {
        let chunks = stream::iter(vec![
            Ok(b"ab".to_vec()),
            Err(SessionError::Transport("connection reset".into())),
        ])
        .boxed();
        let err = ResponseBody::from_stream(chunks).bytes().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_request_builders() {
        let url = Url::parse("http://talk.example/accounts/login/").unwrap();
        let cookie = SessionCookie::new("sessionid", "abc");
        let req = HttpRequest::post(url, RequestBody::Empty)
            .no_redirects()
            .with_cookie(Some(&cookie))
            .with_cookie(None);
        assert_eq!(req.method, Method::Post);
        assert!(!req.follow_redirects);
        assert_eq!(req.cookies, vec![cookie]);
    }

    #[test]
    fn test_response_session_cookie_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "video/mp4".parse().unwrap());
        let response = HttpResponse {
            status: 302,
            headers,
            cookies: vec![
                SessionCookie::new("csrftoken", "x"),
                SessionCookie::new("sessionid_X", "abc"),
            ],
            body: ResponseBody::from_bytes(Vec::new()),
        };
        assert_eq!(response.content_type(), Some("video/mp4"));
        assert_eq!(response.session_cookie().map(|c| c.value.as_str()), Some("abc"));
    }

    #[test]
    fn test_response_session_cookie_skips_expired() {
        let stale = SessionCookie::new("sessionid", "old")
            .with_expiry(Utc::now() - chrono::Duration::minutes(1));
        let mut response = HttpResponse {
            status: 302,
            headers: HeaderMap::new(),
            cookies: vec![stale.clone()],
            body: ResponseBody::from_bytes(Vec::new()),
        };
        assert!(response.session_cookie().is_none());

        response.cookies.push(SessionCookie::new("sessionid", "fresh"));
        assert_eq!(response.session_cookie().map(|c| c.value.as_str()), Some("fresh"));
    }

    #[test]
    fn test_cookie_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let at = SystemTime::from(Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap());

        assert_eq!(
            cookie_expiry(Some(Duration::from_secs(60)), Some(at), now),
            Some(now + chrono::Duration::seconds(60))
        );
        assert_eq!(
            cookie_expiry(None, Some(at), now),
            Some(Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(cookie_expiry(None, None, now), None);
        // Past the largest representable date
        assert_eq!(cookie_expiry(Some(Duration::from_secs(10_000_000_000_000)), None, now), None);
        assert_eq!(cookie_expiry(Some(Duration::MAX), None, now), None);
    }

    /// Accept one connection on a loopback port, answer it with `response`
    /// and hand back the raw request head.
    async fn serve_once(response: &'static str) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (Url::parse(&format!("http://{}/", addr)).unwrap(), handle)
    }

    #[tokio::test]
    async fn test_http_transport_redirect_and_cookies() {
        let (url, server) = serve_once(
            "HTTP/1.1 302 Found\r\n\
             Location: /elsewhere\r\n\
             Set-Cookie: sessionid=abc; Max-Age=3600; Path=/\r\n\
             Set-Cookie: csrftoken=t; Path=/\r\n\
             Content-Length: 0\r\n\
             Connection: close\r\n\r\n",
        )
        .await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let old = SessionCookie::new("sessionid", "old");

        let before = Utc::now();
        let response = transport
            .execute(
                HttpRequest::get(url.join("accounts/login/").unwrap())
                    .no_redirects()
                    .with_cookie(Some(&old)),
            )
            .await
            .unwrap();
        let after = Utc::now();

        // Not followed: the server only answers once
        assert_eq!(response.status, 302);
        assert_eq!(
            response.headers.get(header::LOCATION).and_then(|v| v.to_str().ok()),
            Some("/elsewhere")
        );

        let session = response.session_cookie().unwrap();
        assert_eq!(session.value, "abc");
        let expires = session.expires.unwrap();
        assert!(expires >= before + chrono::Duration::seconds(3600));
        assert!(expires <= after + chrono::Duration::seconds(3600));

        let csrf = response.cookies.iter().find(|c| c.name == "csrftoken").unwrap();
        assert_eq!(csrf.expires, None);

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /accounts/login/ "));
        assert!(request.contains("cookie: sessionid=old"));
    }

    #[tokio::test]
    async fn test_http_transport_cookie_expiry_formats() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\n\
             Set-Cookie: sessionid=abc; Max-Age=10000000000000\r\n\
             Set-Cookie: other=x; Expires=Wed, 21 Oct 2037 07:28:00 GMT\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 2\r\n\
             Connection: close\r\n\r\n\
             ok",
        )
        .await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let response = transport.execute(HttpRequest::get(url)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("text/plain"));

        let session = response.session_cookie().unwrap();
        assert_eq!(session.expires, None);
        let other = response.cookies.iter().find(|c| c.name == "other").unwrap();
        assert_eq!(other.expires, Some(Utc.with_ymd_and_hms(2037, 10, 21, 7, 28, 0).unwrap()));

        assert_eq!(response.body.bytes().await.unwrap(), b"ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_transport_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("http://{}/", addr)).unwrap();
        let err = transport.execute(HttpRequest::get(url)).await.unwrap_err();
        assert!(matches!(err, SessionError::Network(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_build_form_accepts_parts() {
        let parts = vec![
            MultipartPart::Text {
                name: "title".into(),
                value: "x".into(),
            },
            MultipartPart::Bytes {
                name: "audio".into(),
                data: vec![1, 2, 3],
                content_type: "audio/mpeg".into(),
                file_name: "audio.mp4".into(),
            },
        ];
        assert!(HttpTransport::build_form(parts).is_ok());
    }
}
