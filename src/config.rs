//! Server configuration.

use std::path::PathBuf;

use crate::error::Error;

/// Requests larger than this are answered with `413` unless configured.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Mount point used for `CORVID_PUBLIC_DIR`.
pub const PUBLIC_MOUNT: &str = "/public";

/// Everything [`Server::new`](crate::Server::new) needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// `host:port` to listen on.
    pub addr: String,
    /// Largest accepted request body in bytes. `None` accepts any size.
    pub body_limit: Option<usize>,
    /// URL prefix and directory for static files.
    pub static_mount: Option<(String, PathBuf)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_owned(),
            body_limit: Some(DEFAULT_BODY_LIMIT),
            static_mount: None,
        }
    }
}

impl Config {
    /// Reads `CORVID_ADDR`, `CORVID_BODY_LIMIT` and `CORVID_PUBLIC_DIR`,
    /// falling back to [`Config::default`] for anything unset.
    ///
    /// `CORVID_BODY_LIMIT` is a byte count or `none`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(addr) = lookup("CORVID_ADDR") {
            config.addr = addr;
        }
        if let Some(raw) = lookup("CORVID_BODY_LIMIT") {
            config.body_limit = parse_limit(&raw)?;
        }
        if let Some(dir) = lookup("CORVID_PUBLIC_DIR") {
            config.static_mount = Some((PUBLIC_MOUNT.to_owned(), PathBuf::from(dir)));
        }
        Ok(config)
    }
}

fn parse_limit(raw: &str) -> Result<Option<usize>, Error> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|e| Error::Config(format!("CORVID_BODY_LIMIT `{raw}`: {e}")))
}
