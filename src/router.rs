//! Ordered request router.
//!
//! Routes are kept in registration order and scanned front to back; the
//! first route whose pattern matches the path *and* whose method accepts
//! the request wins. There is no ranking of static over dynamic segments:
//! register the more specific route first.
//!
//! A request nothing matches goes to the first `GET *` route, whatever its
//! method, or gets a plain-text `404`. `*` routes are only ever reached that
//! way: they never win the ordered scan, and a `*` under any other method is
//! never used.

use std::sync::Arc;

use tracing::{debug, error};

use crate::handler::{BoxedHandler, Handler};
use crate::location::normalize_path;
use crate::method::{Method, RouteMethod};
use crate::middleware::{BoxedMiddleware, Chain, Middleware, Stage};
use crate::params::{Params, Pattern};
use crate::request::Request;
use crate::response::Response;

struct Route {
    method: RouteMethod,
    pattern: Pattern,
    chain: Chain,
    handler: BoxedHandler,
}

struct Scope {
    prefix: String,
    middleware: BoxedMiddleware,
}

impl Scope {
    fn covers(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        path.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// Everything the server needs to run one request.
pub(crate) struct Dispatch {
    pub(crate) stages: Arc<[Stage]>,
    pub(crate) params: Params,
}

/// The application router.
///
/// Build it once at startup and pass it to [`Server::serve`](crate::Server::serve).
/// Every registration returns `self` so calls chain:
///
/// ```rust
/// use corvid::middleware::{Chain, Next};
/// use corvid::{Request, Response, RouteMethod, Router};
///
/// # async fn list(_: Request, res: Response) { res.text("") }
/// # async fn show(_: Request, res: Response) { res.text("") }
/// # async fn update(_: Request, res: Response) { res.text("") }
/// # async fn auth(req: Request, res: Response, next: Next) { next.run(req, res).await.ok(); }
/// let app = Router::new()
///     .get("/users",     list)
///     .get("/users/:id", show)
///     .on(RouteMethod::Put, "/users/:id", Chain::new().with(auth), update);
/// ```
pub struct Router {
    routes: Vec<Route>,
    global: Chain,
    scoped: Vec<Scope>,
    not_found: BoxedHandler,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            global: Chain::new(),
            scoped: Vec::new(),
            not_found: not_found.into_boxed_handler(),
        }
    }

    /// Registers a route with its own middleware chain.
    ///
    /// `path` is `*` or starts with `/`; `:name` segments bind parameters.
    /// An invalid pattern is logged and the route is left out.
    pub fn on(mut self, method: RouteMethod, path: &str, chain: Chain, handler: impl Handler) -> Self {
        match Pattern::parse(path) {
            Ok(pattern) => {
                debug!(%method, path, middleware = chain.len(), "route registered");
                self.routes.push(Route {
                    method,
                    pattern,
                    chain,
                    handler: handler.into_boxed_handler(),
                });
            }
            Err(e) => error!(%method, path, "route not registered: {e}"),
        }
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(RouteMethod::Get, path, Chain::new(), handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(RouteMethod::Post, path, Chain::new(), handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(RouteMethod::Put, path, Chain::new(), handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(RouteMethod::Patch, path, Chain::new(), handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(RouteMethod::Delete, path, Chain::new(), handler)
    }

    /// Registers a route that accepts every method.
    pub fn all(self, path: &str, handler: impl Handler) -> Self {
        self.on(RouteMethod::All, path, Chain::new(), handler)
    }

    /// Appends one middleware to the global chain.
    ///
    /// Global middleware runs for every request that reaches the router,
    /// before the body is parsed.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.global = self.global.with(middleware);
        self
    }

    /// Appends a whole chain to the global chain.
    pub fn config(mut self, chain: Chain) -> Self {
        self.global.extend(chain);
        self
    }

    /// Runs `middleware` for requests whose path is `prefix` or lies under it.
    ///
    /// Scoped middleware runs after body parsing and before the route's own
    /// chain. When several scopes cover a path they all run, in the order
    /// they were registered.
    pub fn scope(mut self, prefix: &str, middleware: impl Middleware) -> Self {
        if !prefix.starts_with('/') {
            error!(prefix, "scope not registered: prefix must start with `/`");
            return self;
        }
        self.scoped.push(Scope {
            prefix: normalize_path(prefix),
            middleware: middleware.into_boxed_middleware(),
        });
        self
    }

    /// Picks the route for `path` and lays out the stages to run.
    pub(crate) fn dispatch(&self, method: Method, path: &str, body_limit: Option<usize>) -> Dispatch {
        let (route, params) = self.resolve(method, path);

        let mut stages: Vec<Stage> = self.global.iter().cloned().map(Stage::Middleware).collect();
        if method.carries_body() {
            stages.push(Stage::ParseBody { limit: body_limit });
        }
        stages.extend(
            self.scoped
                .iter()
                .filter(|scope| scope.covers(path))
                .map(|scope| Stage::Middleware(Arc::clone(&scope.middleware))),
        );
        match route {
            Some(route) => {
                debug!(route = route.pattern.as_str(), method = %route.method, "route matched");
                stages.extend(route.chain.iter().cloned().map(Stage::Middleware));
                stages.push(Stage::Handler(Arc::clone(&route.handler)));
            }
            None => stages.push(Stage::Handler(Arc::clone(&self.not_found))),
        }

        Dispatch { stages: stages.into(), params }
    }

    /// First route that matches both path and method, or the `GET *`
    /// fallback. The params are those of the last route whose pattern
    /// matched, whether or not its method did.
    ///
    /// `*` routes never take part in the scan, so registering one early
    /// does not shadow later routes.
    fn resolve(&self, method: Method, path: &str) -> (Option<&Route>, Params) {
        let mut last = Params::new();
        for route in self.routes.iter().filter(|route| !route.pattern.is_wildcard()) {
            let Some(params) = route.pattern.matches(path) else {
                continue;
            };
            if route.method.accepts(method) {
                return (Some(route), params);
            }
            last = params;
        }

        let fallback = self
            .routes
            .iter()
            .find(|route| route.pattern.is_wildcard() && route.method == RouteMethod::Get);
        (fallback, last)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

async fn not_found(req: Request, res: Response) {
    res.reject(404, format!("{}: '{}' could not find\n", req.method(), req.path()));
}
