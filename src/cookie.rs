//! `Cookie` header parsing and `Set-Cookie` serialization.

use std::collections::HashMap;
use std::fmt::Write as _;

/// The expiry every deletion header carries.
const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// `SameSite` attribute values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax    => "Lax",
            Self::None   => "None",
        }
    }
}

/// Attributes appended to a `Set-Cookie` header.
///
/// ```rust
/// use corvid::{CookieOptions, SameSite};
///
/// let opts = CookieOptions::default()
///     .path("/")
///     .max_age(3600)
///     .http_only()
///     .same_site(SameSite::Lax);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CookieOptions {
    pub max_age: Option<i64>,
    /// Preformatted HTTP-date, e.g. `"Wed, 21 Oct 2026 07:28:00 GMT"`.
    pub expires: Option<String>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn expires(mut self, http_date: impl Into<String>) -> Self {
        self.expires = Some(http_date.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

/// Parses a `Cookie` request header into name → value.
///
/// Pairs without `=` are skipped, surrounding whitespace is trimmed and a
/// double-quoted value loses its quotes. A repeated name keeps its first
/// value, matching how browsers order more specific cookies first.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else { continue };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        cookies.entry(name.to_owned()).or_insert_with(|| value.to_owned());
    }
    cookies
}

/// Builds a `Set-Cookie` header value.
pub fn serialize(name: &str, value: &str, opts: &CookieOptions) -> String {
    let mut out = format!("{name}={value}");
    if let Some(age) = opts.max_age {
        let _ = write!(out, "; Max-Age={age}");
    }
    if let Some(expires) = &opts.expires {
        let _ = write!(out, "; Expires={expires}");
    }
    if let Some(domain) = &opts.domain {
        let _ = write!(out, "; Domain={domain}");
    }
    if let Some(path) = &opts.path {
        let _ = write!(out, "; Path={path}");
    }
    if opts.secure {
        out.push_str("; Secure");
    }
    if opts.http_only {
        out.push_str("; HttpOnly");
    }
    if let Some(same_site) = opts.same_site {
        let _ = write!(out, "; SameSite={}", same_site.as_str());
    }
    out
}

/// Builds a `Set-Cookie` value that makes the browser drop `name`.
///
/// `Domain` and `Path` must match the ones the cookie was set with, so they
/// are taken from `opts`; any expiry in `opts` is overridden.
pub fn deletion(name: &str, opts: &CookieOptions) -> String {
    let opts = CookieOptions {
        max_age: Some(0),
        expires: Some(EPOCH.to_owned()),
        ..opts.clone()
    };
    serialize(name, "", &opts)
}
