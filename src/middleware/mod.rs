//! Middleware: pipeline stages that run before a route's handler.
//!
//! A middleware is any `async fn` shaped like
//!
//! ```text
//! async fn name(req: Request, res: Response, next: Next) -> impl IntoOutcome
//! ```
//!
//! It may inspect or change the request, set headers or a status on the
//! response, and then either hand over with `next.run(req, res).await` or
//! stop the chain. Stopping is done by answering through `res` and simply
//! returning. Returning without answering and without calling `next`
//! leaves the request unanswered; the server closes the connection.
//!
//! ```rust
//! use corvid::middleware::Next;
//! use corvid::{BoxError, Request, Response};
//!
//! async fn require_token(req: Request, res: Response, next: Next) -> Result<(), BoxError> {
//!     if req.header("authorization").is_none() {
//!         res.error(401, "missing token");
//!         return Ok(());
//!     }
//!     next.run(req, res).await
//! }
//! ```
//!
//! # Order
//!
//! For a routed request the stages run as:
//!
//! ```text
//! global middleware → body parsing (POST/PUT/PATCH) → scoped middleware
//!                   → route middleware → handler
//! ```

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::body::BodyError;
use crate::error::IntoOutcome;
use crate::handler::{BoxFuture, BoxedHandler, Outcome};
use crate::request::Request;
use crate::response::Response;

#[doc(hidden)]
pub trait ErasedMiddleware {
    fn call(&self, req: Request, res: Response, next: Next) -> BoxFuture<Outcome>;
}

#[doc(hidden)]
pub type BoxedMiddleware = Arc<dyn ErasedMiddleware + Send + Sync + 'static>;

/// Implemented for every valid middleware function.
///
/// The three-argument shape is the whole contract: a function that cannot
/// take a [`Next`] cannot be registered as middleware.
pub trait Middleware: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_middleware(self) -> BoxedMiddleware;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Middleware for F
where
    F: Fn(Request, Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_middleware(self) -> BoxedMiddleware {
        Arc::new(FnMiddleware(self))
    }
}

struct FnMiddleware<F>(F);

impl<F, Fut, R> ErasedMiddleware for FnMiddleware<F>
where
    F: Fn(Request, Response, Next) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request, res: Response, next: Next) -> BoxFuture<Outcome> {
        let fut = (self.0)(req, res, next);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered list of middleware, run first to last.
///
/// ```rust
/// # use corvid::middleware::{Chain, Next};
/// # use corvid::{Request, Response};
/// # async fn auth(req: Request, res: Response, next: Next) { next.run(req, res).await.ok(); }
/// # async fn audit(req: Request, res: Response, next: Next) { next.run(req, res).await.ok(); }
/// let chain = Chain::new().with(auth).with(audit);
/// assert_eq!(chain.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<BoxedMiddleware>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.stages.push(middleware.into_boxed_middleware());
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &BoxedMiddleware> {
        self.stages.iter()
    }

    pub(crate) fn extend(&mut self, other: Chain) {
        self.stages.extend(other.stages);
    }
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// One step of a request's pipeline.
pub(crate) enum Stage {
    Middleware(BoxedMiddleware),
    ParseBody { limit: Option<usize> },
    Handler(BoxedHandler),
}

/// The rest of the pipeline, handed to each middleware.
///
/// Consumed by [`Next::run`], so a middleware can continue at most once.
pub struct Next {
    stages: Arc<[Stage]>,
    index: usize,
}

impl Next {
    pub(crate) fn new(stages: Arc<[Stage]>) -> Self {
        Self { stages, index: 0 }
    }

    /// Runs the remaining stages and resolves when they finish.
    ///
    /// The result is whatever the next middleware or the handler returned,
    /// so errors propagate back up through every middleware that awaited it.
    pub async fn run(mut self, mut req: Request, res: Response) -> Outcome {
        while let Some(stage) = self.stages.get(self.index) {
            self.index += 1;
            match stage {
                Stage::Middleware(middleware) => {
                    let middleware = Arc::clone(middleware);
                    return middleware.call(req, res, self).await;
                }
                Stage::Handler(handler) => {
                    let handler = Arc::clone(handler);
                    return handler.call(req, res).await;
                }
                Stage::ParseBody { limit } => {
                    let limit = *limit;
                    if let Err(e) = req.parse_body(limit).await {
                        reject_body(&res, &e);
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

// Only an oversized body stops the pipeline; other failures reach the
// handler through `Request::body_error`.
fn reject_body(res: &Response, e: &BodyError) {
    warn!(error = %e, "rejecting request body");
    res.reject(413, "Payload Too Large");
}
