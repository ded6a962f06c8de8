//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router keeps handlers of *different* concrete types in one ordered
//! `Vec`, so each is hidden behind a trait object (`dyn ErasedHandler`):
//!
//! ```text
//! async fn show(req: Request, res: Response) { … }   ← user writes this
//!        ↓ router.get("/users/:id", show)
//! show.into_boxed_handler()                          ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show))                          ← stored as BoxedHandler
//!        ↓
//! handler.call(req, res)  at request time            ← one vtable dispatch
//!        ↓
//! Box::pin(async { show(req, res).await.into_outcome() })
//! ```
//!
//! Middleware is erased the same way; see [`crate::middleware`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{BoxError, IntoOutcome};
use crate::request::Request;
use crate::response::Response;

/// A heap-allocated, type-erased future. `Send + 'static` so the pipeline
/// can run on its own tokio task.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What every stage of the pipeline resolves to.
pub type Outcome = Result<(), BoxError>;

/// Object-safe face of a handler. Public only because
/// [`Handler::into_boxed_handler`] names it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request, res: Response) -> BoxFuture<Outcome>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid terminal route handler.
///
/// You never implement this yourself. It is satisfied by any `async fn`
/// with the signature:
///
/// ```text
/// async fn name(req: Request, res: Response) -> impl IntoOutcome
/// ```
///
/// A handler answers through `res`; its return value only reports failure.
/// The trait is sealed so the blanket impl below is the only one.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Holds a concrete handler `F` and bridges it to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request, res: Response) -> BoxFuture<Outcome> {
        let fut = (self.0)(req, res);
        Box::pin(async move { fut.await.into_outcome() })
    }
}
