//! The per-request response handle.
//!
//! Every request gets one [`Response`]. It is a cheap, cloneable handle: the
//! middleware chain passes it along, and whichever stage calls a terminal
//! writer (`json`, `text`, `redirect`, ...) answers the request. The handle
//! moves through two states:
//!
//! ```text
//!   unsent ──(first terminal write)──▶ sent
//! ```
//!
//! Writes after the first are ignored and logged. Status, headers and
//! cookies set before the write are applied to it.
//!
//! Status precedence for every writer except [`Response::error`] is
//! `status()` call, then the per-call [`WriteOptions`] status, then the
//! writer's default (200, or 302 for redirects).

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::cookie::{self, CookieOptions};

/// Read size for streamed files.
const FILE_CHUNK: usize = 16 * 1024;

pub(crate) type Body = UnsyncBoxBody<Bytes, std::io::Error>;
pub(crate) type HttpResponse = http::Response<Body>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for [`WriteOptions::content_type`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    PlainText,   // text/plain
    Html,        // text/html
    Json,        // application/json
    Xml,         // application/xml
    Css,         // text/css
    JavaScript,  // application/javascript
    Markdown,    // text/markdown
    Csv,         // text/csv
    Pdf,         // application/pdf
    Jpeg,        // image/jpeg
    Png,         // image/png
    Gif,         // image/gif
    Svg,         // image/svg+xml
    Mpeg,        // audio/mpeg
    Wav,         // audio/wav
    Mp4,         // video/mp4
    OctetStream, // application/octet-stream
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainText   => "text/plain",
            Self::Html        => "text/html",
            Self::Json        => "application/json",
            Self::Xml         => "application/xml",
            Self::Css         => "text/css",
            Self::JavaScript  => "application/javascript",
            Self::Markdown    => "text/markdown",
            Self::Csv         => "text/csv",
            Self::Pdf         => "application/pdf",
            Self::Jpeg        => "image/jpeg",
            Self::Png         => "image/png",
            Self::Gif         => "image/gif",
            Self::Svg         => "image/svg+xml",
            Self::Mpeg        => "audio/mpeg",
            Self::Wav         => "audio/wav",
            Self::Mp4         => "video/mp4",
            Self::OctetStream => "application/octet-stream",
        }
    }
}

impl From<ContentType> for String {
    fn from(ct: ContentType) -> Self {
        ct.as_str().to_owned()
    }
}

// ── WriteOptions ──────────────────────────────────────────────────────────────

/// Per-call options for the `*_with` writers.
///
/// `content_type` is only read by [`Response::buffer_with`]; every other
/// writer has a fixed content type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub status: Option<u16>,
    pub content_type: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, code: u16) -> Self {
        self.status = Some(code);
        self
    }

    pub fn content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

enum Phase {
    Unsent(oneshot::Sender<HttpResponse>),
    Sent,
}

struct State {
    deferred_status: Option<u16>,
    headers: Vec<(String, String)>,
    phase: Phase,
}

/// Handle to the response of one request.
///
/// ```rust
/// use corvid::{Request, Response};
///
/// async fn create(_req: Request, res: Response) {
///     res.status(201).json(&serde_json::json!({ "ok": true }));
/// }
/// ```
#[derive(Clone)]
pub struct Response {
    state: Arc<Mutex<State>>,
}

impl Response {
    /// A fresh unsent handle plus the receiving end the server awaits.
    pub(crate) fn channel() -> (Self, oneshot::Receiver<HttpResponse>) {
        let (tx, rx) = oneshot::channel();
        let state = State {
            deferred_status: None,
            headers: Vec::new(),
            phase: Phase::Unsent(tx),
        };
        (Self { state: Arc::new(Mutex::new(state)) }, rx)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the status used by the next terminal write. The last call wins.
    pub fn status(&self, code: u16) -> &Self {
        self.lock().deferred_status = Some(code);
        self
    }

    /// Adds a header to the response. Repeated names are all sent.
    pub fn header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        self.lock().headers.push((name.into(), value.into()));
        self
    }

    /// Appends a `Set-Cookie` header.
    pub fn set_cookie(&self, name: &str, value: &str, opts: &CookieOptions) -> &Self {
        self.header("Set-Cookie", cookie::serialize(name, value, opts))
    }

    /// Appends a `Set-Cookie` header that expires `name` immediately.
    pub fn delete_cookie(&self, name: &str, opts: &CookieOptions) -> &Self {
        self.header("Set-Cookie", cookie::deletion(name, opts))
    }

    /// Whether a terminal writer already answered this request.
    pub fn is_sent(&self) -> bool {
        matches!(self.lock().phase, Phase::Sent)
    }

    // ── Terminal writers ──────────────────────────────────────────────────────

    /// `application/json`, serialized with serde.
    pub fn json<T: Serialize + ?Sized>(&self, data: &T) {
        self.json_with(data, WriteOptions::default());
    }

    pub fn json_with<T: Serialize + ?Sized>(&self, data: &T, opts: WriteOptions) {
        match serde_json::to_vec(data) {
            Ok(bytes) => self.send("json", 200, opts.status, Some("application/json"), None, full(bytes)),
            Err(e) => {
                error!("failed to serialize JSON response: {e}");
                self.reject(500, "Internal Server Error");
            }
        }
    }

    /// `text/html`.
    pub fn html(&self, body: impl Into<String>) {
        self.html_with(body, WriteOptions::default());
    }

    pub fn html_with(&self, body: impl Into<String>, opts: WriteOptions) {
        self.send("html", 200, opts.status, Some("text/html"), None, text_body(body));
    }

    /// `application/xml`.
    pub fn xml(&self, body: impl Into<String>) {
        self.xml_with(body, WriteOptions::default());
    }

    pub fn xml_with(&self, body: impl Into<String>, opts: WriteOptions) {
        self.send("xml", 200, opts.status, Some("application/xml"), None, text_body(body));
    }

    /// `text/plain`.
    pub fn text(&self, body: impl Into<String>) {
        self.text_with(body, WriteOptions::default());
    }

    pub fn text_with(&self, body: impl Into<String>, opts: WriteOptions) {
        self.send("text", 200, opts.status, Some("text/plain"), None, text_body(body));
    }

    /// Raw bytes with no `Content-Type`.
    pub fn buffer(&self, body: impl Into<Bytes>) {
        self.buffer_with(body, WriteOptions::default());
    }

    /// Raw bytes; `Content-Type` is sent only when `opts` names one.
    pub fn buffer_with(&self, body: impl Into<Bytes>, opts: WriteOptions) {
        let body: Bytes = body.into();
        let content_type = opts.content_type.as_deref();
        self.send("buffer", 200, opts.status, content_type, None, full(body));
    }

    /// Empty-bodied redirect to `url`, `302` unless told otherwise.
    pub fn redirect(&self, url: impl Into<String>) {
        self.redirect_with(url, WriteOptions::default());
    }

    pub fn redirect_with(&self, url: impl Into<String>, opts: WriteOptions) {
        let location = ("Location", url.into());
        self.send("redirect", 302, opts.status, None, Some(location), full(Bytes::new()));
    }

    /// Plain-text error. A `status()` set earlier wins over `status`.
    pub fn error(&self, status: u16, message: impl Into<String>) {
        self.send("error", status, None, Some("text/plain"), None, text_body(message));
    }

    /// Streams the file at `path`. No content type is inferred.
    ///
    /// Answers `404 Not Found` if the path cannot be opened as a regular
    /// file, whatever status was set before.
    pub async fn send_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let file = match open_regular(path).await {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), "send_file: {e}");
                self.reject(404, "Not Found");
                return;
            }
        };

        let chunks = futures_util::stream::try_unfold(file, |mut file| async move {
            let mut buf = vec![0u8; FILE_CHUNK];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok::<_, std::io::Error>(Some((Frame::data(Bytes::from(buf)), file)))
        });
        self.send("send_file", 200, None, None, None, StreamBody::new(chunks).boxed_unsync());
    }

    /// Plain-text answer for errors the framework itself detects. Unlike
    /// [`Response::error`], an earlier `status()` call does not apply.
    pub(crate) fn reject(&self, status: u16, message: impl Into<String>) {
        self.lock().deferred_status = None;
        self.error(status, message);
    }

    /// Answers `500` unless something was already written. Ignores any
    /// deferred status.
    pub(crate) fn fail(&self) {
        let phase = std::mem::replace(&mut self.lock().phase, Phase::Sent);
        if let Phase::Unsent(tx) = phase {
            tx.send(internal_error()).ok();
        }
    }

    fn send(
        &self,
        writer: &'static str,
        default_status: u16,
        option_status: Option<u16>,
        content_type: Option<&str>,
        extra: Option<(&str, String)>,
        body: Body,
    ) {
        let mut state = self.lock();
        let tx = match std::mem::replace(&mut state.phase, Phase::Sent) {
            Phase::Unsent(tx) => tx,
            Phase::Sent => {
                warn!(writer, "response already sent, ignoring write");
                return;
            }
        };

        let status = state.deferred_status.or(option_status).unwrap_or(default_status);
        let mut builder = http::Response::builder().status(status);
        if let Some(ct) = content_type {
            builder = builder.header("Content-Type", ct);
        }
        if let Some((name, value)) = extra {
            builder = builder.header(name, value);
        }
        for (name, value) in &state.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        drop(state);

        let response = builder.body(body).unwrap_or_else(|e| {
            error!(writer, status, "invalid response: {e}");
            internal_error()
        });
        if tx.send(response).is_err() {
            debug!(writer, "client went away before the response was written");
        }
    }
}

async fn open_regular(path: &Path) -> std::io::Result<tokio::fs::File> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "not a regular file"));
    }
    tokio::fs::File::open(path).await
}

pub(crate) fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

fn text_body(body: impl Into<String>) -> Body {
    let body: String = body.into();
    full(body)
}

/// A `500` that cannot fail to build.
pub(crate) fn internal_error() -> HttpResponse {
    let mut response = http::Response::new(full("Internal Server Error"));
    *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain"),
    );
    response
}
