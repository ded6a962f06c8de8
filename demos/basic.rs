//! Minimal corvid app: JSON CRUD, a form, uploads, cookies and a wildcard.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X POST http://localhost:3000/login -d 'user=alice&pass=secret'
//!   curl -F note=hello -F file=@Cargo.toml http://localhost:3000/upload
//!   curl -H 'authorization: token' http://localhost:3000/admin/stats
//!   curl http://localhost:3000/anything/else

use corvid::middleware::{Chain, Next};
use corvid::{Config, CookieOptions, Request, Response, RouteMethod, Router, SameSite, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .middleware(log_request)
        .scope("/admin", require_token)
        .get("/users/:id",    get_user)
        .post("/users",       create_user)
        .delete("/users/:id", delete_user)
        .post("/login",       login)
        .post("/upload",      upload)
        .on(RouteMethod::Get, "/admin/stats", Chain::new().with(no_store), stats)
        .get("*",             fallback);

    Server::new(Config::from_env()?).serve(app).await?;
    Ok(())
}

async fn log_request(req: Request, res: Response, next: Next) -> Result<(), corvid::BoxError> {
    tracing::info!(method = %req.method(), target = req.target(), "incoming");
    next.run(req, res).await
}

async fn require_token(req: Request, res: Response, next: Next) -> Result<(), corvid::BoxError> {
    if req.header("authorization").is_none() {
        res.error(401, "missing token");
        return Ok(());
    }
    next.run(req, res).await
}

async fn no_store(req: Request, res: Response, next: Next) -> Result<(), corvid::BoxError> {
    res.header("cache-control", "no-store");
    next.run(req, res).await
}

async fn get_user(req: Request, res: Response) {
    let id = req.param("id").unwrap_or("unknown");
    res.json(&serde_json::json!({ "id": id, "name": "alice" }));
}

async fn create_user(req: Request, res: Response) {
    match req.body().get("name").and_then(|n| n.as_str()) {
        Some(name) => res.status(201).json(&serde_json::json!({ "id": 99, "name": name })),
        None => res.error(400, "name is required"),
    }
}

async fn delete_user(_req: Request, res: Response) {
    res.status(204).buffer(Vec::new());
}

async fn login(req: Request, res: Response) {
    let user = req.body().get("user").and_then(|u| u.as_str()).unwrap_or("guest");
    let opts = CookieOptions::default()
        .path("/")
        .http_only()
        .same_site(SameSite::Lax)
        .max_age(3600);
    res.set_cookie("session", user, &opts).redirect("/users/1");
}

async fn upload(req: Request, res: Response) {
    let files: Vec<_> = match req.file() {
        Some(file) => vec![file],
        None => req.files().iter().collect(),
    };
    let summary: Vec<_> = files
        .iter()
        .map(|f| serde_json::json!({ "field": f.field, "filename": f.filename, "size": f.size }))
        .collect();
    res.json(&serde_json::json!({ "fields": req.body(), "files": summary }));
}

async fn stats(_req: Request, res: Response) {
    res.json(&serde_json::json!({ "uptime": "forever" }));
}

async fn fallback(req: Request, res: Response) {
    res.status(404).html(format!("<h1>Nothing at {}</h1>", req.path()));
}
