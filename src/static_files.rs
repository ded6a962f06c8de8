//! Static file mount.
//!
//! Requests under the mount prefix skip routing and middleware entirely.
//! The rest of the path is joined onto the directory; regular files stream
//! back with `200`, anything else is a `404`.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::location::normalize_path;
use crate::response::Response;

#[derive(Clone, Debug)]
pub(crate) struct StaticMount {
    prefix: String,
    dir: PathBuf,
}

impl StaticMount {
    pub(crate) fn new(prefix: &str, dir: impl Into<PathBuf>) -> Self {
        Self { prefix: normalize_path(prefix), dir: dir.into() }
    }

    /// The part of `path` below the mount, or `None` if `path` is outside it.
    pub(crate) fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Maps the remainder onto the directory. Refuses anything that would
    /// climb out of it.
    fn resolve(&self, rest: &str) -> Option<PathBuf> {
        let relative = Path::new(rest.trim_start_matches('/'));
        let mut path = self.dir.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }

    pub(crate) async fn serve(&self, rest: &str, res: &Response) {
        match self.resolve(rest) {
            Some(path) => res.send_file(path).await,
            None => {
                debug!(rest, "static path escapes the mount");
                res.error(404, "Not Found");
            }
        }
    }
}
