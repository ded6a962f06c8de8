//! # corvid
//!
//! A small HTTP application core: ordered routing with `:param` segments,
//! middleware chains, and a body parser for JSON, URL-encoded forms and
//! multipart uploads. Transport is hyper's HTTP/1.1 server.
//!
//! ## Model
//!
//! - Routes are scanned in registration order; the first one whose path
//!   and method match wins. A `GET *` route catches whatever is left.
//! - Handlers and middleware answer through a [`Response`] handle. The
//!   first write sends; later writes are ignored.
//! - Middleware continues with [`Next::run`] or stops by not calling it.
//! - `POST`, `PUT` and `PATCH` bodies are buffered up to a limit and parsed
//!   before scoped and route middleware run.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use corvid::{Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), corvid::Error> {
//!     let app = Router::new()
//!         .get("/users/:id", get_user)
//!         .post("/users",    create_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn get_user(req: Request, res: Response) {
//!     let id = req.param("id").unwrap_or("unknown");
//!     res.json(&serde_json::json!({ "id": id }));
//! }
//!
//! async fn create_user(req: Request, res: Response) {
//!     if req.body_error().is_some() {
//!         res.error(400, "invalid body");
//!         return;
//!     }
//!     res.status(201).header("location", "/users/99").json(req.body());
//! }
//! ```

mod config;
mod error;
mod handler;
mod location;
mod method;
mod request;
mod response;
mod router;
mod server;
mod static_files;

pub mod body;
pub mod cookie;
pub mod middleware;
pub mod params;

pub use body::{BodyError, FormError, MultipartError, UploadedFile, Uploads};
pub use config::{Config, DEFAULT_BODY_LIMIT};
pub use cookie::{CookieOptions, SameSite};
pub use error::{BoxError, Error, IntoOutcome};
pub use handler::Handler;
pub use location::Location;
pub use method::{Method, RouteMethod};
pub use middleware::{Chain, Middleware, Next};
pub use params::{Params, PatternError, match_path};
pub use request::Request;
pub use response::{ContentType, Response, WriteOptions};
pub use router::Router;
pub use server::Server;
