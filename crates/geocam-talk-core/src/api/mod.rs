//! HTTP session layer for a GeoCam Talk server.
//!
//! This module provides the `SessionClient`, which layers cookie-based
//! authentication on top of a plain `Transport`. The server hands out a
//! `sessionid` cookie from its Django-style `accounts/login/` endpoint;
//! the client keeps that cookie fresh and attaches it to every call.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod response;
pub mod transport;

pub use client::{Params, SessionAuthenticator, SessionClient};
pub use endpoints::Endpoints;
pub use error::SessionError;
pub use response::ServerResponse;
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, MultipartPart, RequestBody, ResponseBody,
    Transport,
};
