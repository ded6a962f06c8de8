//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use http::HeaderMap;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::body::{self, BodyError, UploadedFile, Uploads};
use crate::cookie::parse_cookies;
use crate::error::BoxError;
use crate::location::Location;
use crate::method::Method;
use crate::params::Params;

/// Where the payload currently lives.
pub(crate) enum Payload {
    /// Still on the wire.
    Pending(UnsyncBoxBody<Bytes, BoxError>),
    /// Already in memory, from a test or an earlier read.
    Buffered(Bytes),
}

/// An incoming HTTP request.
///
/// Location, query, cookies and path parameters are filled in before the
/// first middleware runs. The body is filled in after the global middleware
/// chain, and only for `POST`, `PUT` and `PATCH`.
pub struct Request {
    method: Method,
    target: String,
    location: Location,
    headers: HeaderMap,
    params: Params,
    cookies: HashMap<String, String>,
    body: Value,
    body_error: Option<BodyError>,
    uploads: Uploads,
    raw_body: Bytes,
    // Behind a mutex only so `Request` stays `Sync` while the streamed body is in it.
    payload: Mutex<Option<Payload>>,
    remote_addr: Option<SocketAddr>,
    extensions: http::Extensions,
}

impl Request {
    pub(crate) fn from_hyper(
        req: hyper::Request<Incoming>,
        method: Method,
        remote_addr: SocketAddr,
    ) -> Self {
        let (parts, incoming) = req.into_parts();
        // Absolute-form targets keep their authority; origin form is the norm.
        let target = match parts.uri.scheme() {
            Some(_) => parts.uri.to_string(),
            None => parts.uri.path_and_query().map_or("/", |pq| pq.as_str()).to_owned(),
        };
        let body = incoming.map_err(|e| Box::new(e) as BoxError).boxed_unsync();
        Self::from_parts(method, target, parts.headers, Payload::Pending(body), Some(remote_addr))
    }

    pub(crate) fn from_parts(
        method: Method,
        target: impl Into<String>,
        headers: HeaderMap,
        payload: Payload,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let target = target.into();
        let host = headers.get(http::header::HOST).and_then(|v| v.to_str().ok());
        let location = Location::parse(&target, host);

        let cookie_header = headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");
        let cookies = parse_cookies(&cookie_header);

        Self {
            method,
            target,
            location,
            headers,
            params: Params::new(),
            cookies,
            body: Value::Object(Map::new()),
            body_error: None,
            uploads: Uploads::None,
            raw_body: Bytes::new(),
            payload: Mutex::new(Some(payload)),
            remote_addr,
            extensions: http::Extensions::new(),
        }
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Buffers the payload and parses it into [`Request::body`].
    ///
    /// Only a body over `limit` is returned as an error. Read and parse
    /// failures are recorded in [`Request::body_error`] and leave an empty
    /// object behind.
    pub(crate) async fn parse_body(&mut self, limit: Option<usize>) -> Result<(), BodyError> {
        let slot = self.payload.get_mut().unwrap_or_else(PoisonError::into_inner);
        let raw = match slot.take() {
            Some(Payload::Pending(body)) => match read_pending(body, limit).await {
                Ok(raw) => raw,
                Err(e @ BodyError::TooLarge { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "request body unreadable");
                    self.body_error = Some(e);
                    return Ok(());
                }
            },
            Some(Payload::Buffered(bytes)) => bytes,
            None => return Ok(()),
        };
        if let Some(limit) = limit.filter(|&l| raw.len() > l) {
            return Err(BodyError::TooLarge { limit });
        }
        *self.payload.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(Payload::Buffered(raw.clone()));

        match body::parse(self.header("content-type"), &raw) {
            Ok(parsed) => {
                self.body = parsed.value;
                self.uploads = parsed.uploads;
            }
            Err(e) => {
                tracing::debug!(error = %e, "request body discarded");
                self.body = Value::Object(Map::new());
                self.uploads = Uploads::None;
                self.body_error = Some(e);
            }
        }
        self.raw_body = raw;
        Ok(())
    }

    pub fn method(&self) -> Method { self.method }

    /// The request target as received, e.g. `/users/42?full=1`.
    pub fn target(&self) -> &str { &self.target }

    /// The normalized path, without query and with no trailing slash.
    pub fn path(&self) -> &str { &self.location.path }

    pub fn location(&self) -> &Location { &self.location }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &Params { &self.params }

    /// A decoded query-string value.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.location.query.get(key).map(String::as_str)
    }

    pub fn query_map(&self) -> &HashMap<String, String> { &self.location.query }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> { &self.cookies }

    /// The parsed body. An empty object until parsed, or when parsing failed.
    pub fn body(&self) -> &Value { &self.body }

    /// Deserializes the parsed body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }

    /// Why the payload could not be parsed, if it could not.
    ///
    /// Distinguishes a malformed payload from one that was validly empty.
    pub fn body_error(&self) -> Option<&BodyError> { self.body_error.as_ref() }

    /// The payload bytes as received. Empty for methods without a body.
    pub fn raw_body(&self) -> &[u8] { &self.raw_body }

    pub fn uploads(&self) -> &Uploads { &self.uploads }

    /// The uploaded file, when exactly one was sent.
    pub fn file(&self) -> Option<&UploadedFile> { self.uploads.file() }

    /// The uploaded files, when more than one was sent.
    pub fn files(&self) -> &[UploadedFile] { self.uploads.files() }

    /// Typed values middleware can hand to later stages.
    pub fn extensions(&self) -> &http::Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut http::Extensions { &mut self.extensions }
}

async fn read_pending(
    body: UnsyncBoxBody<Bytes, BoxError>,
    limit: Option<usize>,
) -> Result<Bytes, BodyError> {
    match limit {
        // Type-erased so the pending future does not hold a `Limited`, whose
        // `Body` bound rustc cannot prove `Send` for inside the spawned pipeline.
        Some(limit) => match Limited::new(body, limit).boxed_unsync().collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(BodyError::TooLarge { limit })
            }
            Err(e) => Err(BodyError::Read(e.to_string())),
        },
        None => body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| BodyError::Read(e.to_string())),
    }
}
