mod common;

use common::{get, request, start};
use corvid::{Request, Response, Router};

async fn list_users(_req: Request, res: Response) {
    res.text("list");
}

async fn create_user(_req: Request, res: Response) {
    res.text("create");
}

async fn any_user(req: Request, res: Response) {
    res.text(format!("any {}", req.method()));
}

async fn show_post(req: Request, res: Response) {
    let user = req.param("user").unwrap_or("-");
    let post = req.param("post").unwrap_or("-");
    res.json(&serde_json::json!({ "user": user, "post": post, "q": req.query("q") }));
}

async fn fallback(req: Request, res: Response) {
    res.status(404).html(format!("<p>{} {}</p>", req.method(), req.path()));
}

fn app() -> Router {
    Router::new()
        .get("/users", list_users)
        .post("/users", create_user)
        .all("/users", any_user)
        .get("/users/:user/posts/:post", show_post)
}

#[tokio::test]
async fn routes_by_method_and_path() {
    let server = start(app()).await;

    let reply = get(server.addr, "/users").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("content-type"), Some("text/plain"));
    assert_eq!(reply.text(), "list");

    assert_eq!(request(server.addr, "POST", "/users", &[], b"").await.text(), "create");
    assert_eq!(request(server.addr, "PUT", "/users/", &[], b"").await.text(), "any PUT");

    server.stop().await;
}

#[tokio::test]
async fn binds_params_and_query() {
    let server = start(app()).await;

    let reply = get(server.addr, "/users/ada/posts/7?q=hello%20world").await;
    assert_eq!(reply.status, 200);
    assert_eq!(
        reply.json(),
        serde_json::json!({ "user": "ada", "post": "7", "q": "hello world" })
    );

    server.stop().await;
}

#[tokio::test]
async fn unmatched_path_without_wildcard_is_404() {
    let server = start(app()).await;

    let reply = get(server.addr, "/users/ada/posts/7/extra").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.text(), "GET: '/users/ada/posts/7/extra' could not find\n");

    let reply = request(server.addr, "DELETE", "/nope", &[], b"").await;
    assert_eq!(reply.text(), "DELETE: '/nope' could not find\n");

    server.stop().await;
}

#[tokio::test]
async fn wildcard_takes_unmatched_requests() {
    let server = start(app().get("*", fallback)).await;

    let reply = get(server.addr, "/missing/page").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.header("content-type"), Some("text/html"));
    assert_eq!(reply.text(), "<p>GET /missing/page</p>");

    let reply = request(server.addr, "PATCH", "/missing", &[], b"").await;
    assert_eq!(reply.text(), "<p>PATCH /missing</p>");

    // matched routes are unaffected
    assert_eq!(get(server.addr, "/users").await.text(), "list");

    server.stop().await;
}

#[tokio::test]
async fn unknown_method_is_405() {
    let server = start(app()).await;

    let reply = request(server.addr, "BREW", "/users", &[], b"").await;
    assert_eq!(reply.status, 405);
    assert_eq!(reply.text(), "Method Not Allowed");

    server.stop().await;
}
