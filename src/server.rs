//! HTTP server and graceful shutdown.
//!
//! # Request lifecycle
//!
//! ```text
//! accept ─▶ connection task ─▶ per request:
//!     unknown method?        → 405
//!     under a static mount?  → file or 404, no routing
//!     otherwise              → router picks stages, pipeline task runs them
//!                              connection task waits for the first write
//! ```
//!
//! The pipeline runs on its own task so that a panicking handler cannot take
//! the connection down with it, and so that work after the response is
//! written does not hold the response back.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`].

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{Config, DEFAULT_BODY_LIMIT};
use crate::error::Error;
use crate::handler::Outcome;
use crate::method::Method;
use crate::middleware::Next;
use crate::request::Request;
use crate::response::{HttpResponse, Response, full};
use crate::router::Router;
use crate::static_files::StaticMount;

/// Returned to hyper when nothing answered; hyper then drops the connection.
#[derive(Debug, thiserror::Error)]
#[error("request left unanswered")]
struct Unanswered;

/// The HTTP server.
pub struct Server {
    addr: String,
    body_limit: Option<usize>,
    static_mount: Option<StaticMount>,
}

/// What every connection task shares.
struct App {
    router: Router,
    body_limit: Option<usize>,
    static_mount: Option<StaticMount>,
}

impl Server {
    /// Configures the server to listen on `addr` once [`serve`](Server::serve)
    /// is called. The address is checked there, not here.
    ///
    /// ```rust,no_run
    /// use corvid::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            body_limit: Some(DEFAULT_BODY_LIMIT),
            static_mount: None,
        }
    }

    pub fn new(config: Config) -> Self {
        let server = Self::bind(config.addr).body_limit(config.body_limit);
        match config.static_mount {
            Some((mount, dir)) => server.serve_static(&mount, dir),
            None => server,
        }
    }

    /// Largest request body to accept, in bytes. `None` lifts the limit.
    pub fn body_limit(mut self, limit: Option<usize>) -> Self {
        self.body_limit = limit;
        self
    }

    /// Serves files from `dir` for requests under `mount`.
    pub fn serve_static(mut self, mount: &str, dir: impl Into<PathBuf>) -> Self {
        self.static_mount = Some(StaticMount::new(mount, dir));
        self
    }

    /// Binds, then serves `router` until SIGTERM or Ctrl-C.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let addr: SocketAddr = self.addr.parse().map_err(|source| Error::Addr {
            addr: self.addr.clone(),
            source,
        })?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, router, shutdown_signal()).await
    }

    /// Serves `router` on an already bound listener until `shutdown`
    /// resolves, then drains in-flight connections.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        router: Router,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let local = listener.local_addr()?;
        let app = Arc::new(App {
            router,
            body_limit: self.body_limit,
            static_mount: self.static_mount,
        });

        info!(addr = %local, "corvid listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown is checked first so a signal stops accepting even
                // while connections are still queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                            debug!(peer = %remote_addr, "connection closed: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the set stays small.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("corvid stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<HttpResponse, Unanswered> {
    let Ok(method) = req.method().as_str().parse::<Method>() else {
        debug!(method = %req.method(), "unsupported method");
        return Ok(method_not_allowed());
    };

    let mut request = Request::from_hyper(req, method, remote_addr);
    let path = request.path().to_owned();
    let span = info_span!("request", %method, path = %path);

    async move {
        let (res, rx) = Response::channel();

        if let Some(mount) = &app.static_mount {
            if let Some(rest) = mount.strip(&path) {
                mount.serve(rest, &res).await;
                return settle(rx);
            }
        }

        let plan = app.router.dispatch(method, &path, app.body_limit);
        request.set_params(plan.params);

        let pipeline = Next::new(plan.stages).run(request, res.clone());
        let mut pipeline = tokio::spawn(pipeline.in_current_span());
        let mut rx = rx;

        tokio::select! {
            // A written response goes out at once, even if the pipeline
            // keeps working.
            biased;

            Ok(response) = &mut rx => return Ok(response),
            joined = &mut pipeline => finish(joined, &res),
        }

        settle(rx)
    }
    .instrument(span)
    .await
}

/// Turns a failed or panicked pipeline into a `500` if nothing was written.
fn finish(joined: Result<Outcome, JoinError>, res: &Response) {
    match joined {
        Ok(Ok(())) => return,
        Ok(Err(e)) => error!(error = %e, "request failed"),
        Err(e) if e.is_panic() => error!("handler panicked"),
        Err(e) => error!("request task ended: {e}"),
    }
    res.fail();
}

/// Whatever was written, or the signal to drop the connection.
fn settle(mut rx: oneshot::Receiver<HttpResponse>) -> Result<HttpResponse, Unanswered> {
    match rx.try_recv() {
        Ok(response) => Ok(response),
        Err(_) => {
            warn!("no response was written, closing the connection");
            Err(Unanswered)
        }
    }
}

fn method_not_allowed() -> HttpResponse {
    let mut response = http::Response::new(full("Method Not Allowed"));
    *response.status_mut() = http::StatusCode::METHOD_NOT_ALLOWED;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain"),
    );
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C.
///
/// A signal handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
