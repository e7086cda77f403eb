//! Router-level tests against an in-memory database

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use serde_json::{json, Value};
use tempfile::TempDir;

use ledgerpress::api::{build_router, AppState};
use ledgerpress::config::Config;
use ledgerpress::db::{create_test_pool, migrations};

const ADMIN_EMAIL: &str = "owner@hartandco.example";
const ADMIN_PASSWORD: &str = "correct horse battery";

struct TestApp {
    server: TestServer,
    uploads: TempDir,
}

async fn app() -> TestApp {
    let uploads = TempDir::new().unwrap();
    let mut config = Config::default();
    config.upload.path = uploads.path().to_path_buf();
    config.site.base_url = "https://hartandco.example".into();

    let pool = create_test_pool().await.unwrap();
    migrations::run_migrations(&pool).await.unwrap();
    let state = AppState::from_config(pool, &config).unwrap();
    let server = TestServer::new(build_router(state, "http://localhost:3000")).unwrap();

    TestApp { server, uploads }
}

/// Run first-time setup and return the admin's token
async fn setup_admin(server: &TestServer) -> String {
    let res = server
        .post("/api/auth/setup")
        .json(&json!({
            "email": ADMIN_EMAIL,
            "password": ADMIN_PASSWORD,
            "display_name": "Owner"
        }))
        .await;
    res.assert_status(StatusCode::CREATED);
    res.json::<Value>()["token"].as_str().unwrap().to_string()
}

async fn login(server: &TestServer, email: &str, password: &str) -> String {
    let res = server
        .post("/api/auth/login")
        .json(&json!({ "email": email, "password": password }))
        .await;
    res.assert_status_ok();
    res.json::<Value>()["token"].as_str().unwrap().to_string()
}

async fn create_category(server: &TestServer, token: &str, name: &str) -> i64 {
    let res = server
        .post("/api/admin/categories")
        .authorization_bearer(token)
        .json(&json!({ "name": name }))
        .await;
    res.assert_status(StatusCode::CREATED);
    res.json::<Value>()["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_setup_and_session_flow() {
    let TestApp { server, .. } = app().await;

    let status = server.get("/api/auth/status").await.json::<Value>();
    assert_eq!(status["needs_setup"], true);

    let token = setup_admin(&server).await;

    let again = server
        .post("/api/auth/setup")
        .json(&json!({ "email": "x@example.com", "password": "another password", "display_name": "X" }))
        .await;
    again.assert_status(StatusCode::CONFLICT);

    let me = server
        .get("/api/auth/me")
        .authorization_bearer(&token)
        .await;
    me.assert_status_ok();
    let me = me.json::<Value>();
    assert_eq!(me["email"], ADMIN_EMAIL);
    assert_eq!(me["role"], "admin");
    assert!(me.get("password_hash").is_none());

    server
        .get("/api/auth/me")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    server
        .post("/api/auth/logout")
        .authorization_bearer(&token)
        .await
        .assert_status_ok();
    server
        .get("/api/auth/me")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_rate_limited_by_email() {
    let TestApp { server, .. } = app().await;
    setup_admin(&server).await;

    for _ in 0..5 {
        server
            .post("/api/auth/login")
            .json(&json!({ "email": ADMIN_EMAIL, "password": "wrong password" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    let res = server
        .post("/api/auth/login")
        .json(&json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }))
        .await;
    res.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body = res.json::<Value>();
    assert_eq!(body["error"]["code"], "RATE_LIMIT");
    assert_eq!(body["error"]["details"]["retry_after"], 900);
}

#[tokio::test]
async fn test_post_round_trip_and_public_visibility() {
    let TestApp { server, .. } = app().await;
    let token = setup_admin(&server).await;
    let category_id = create_category(&server, &token, "Payroll").await;

    let created = server
        .post("/api/admin/posts")
        .authorization_bearer(&token)
        .json(&json!({
            "title": "Year-End Payroll Checklist",
            "content": "## Before you close\n\nReconcile **every** pay run.",
            "status": "published",
            "category_ids": [category_id],
            "tags": ["Payroll", "Deadlines"]
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let created = created.json::<Value>();
    assert_eq!(created["slug"], "year-end-payroll-checklist");
    assert!(created["content_html"].as_str().unwrap().contains("<strong>every</strong>"));
    assert!(created["published_at"].is_string());
    assert_eq!(created["reading_time_minutes"], 1);

    let public = server.get("/api/posts/year-end-payroll-checklist").await;
    public.assert_status_ok();
    let public = public.json::<Value>();
    assert_eq!(public["title"], "Year-End Payroll Checklist");
    assert_eq!(public["categories"][0]["slug"], "payroll");
    assert_eq!(public["tags"].as_array().unwrap().len(), 2);

    let listed = server
        .get("/api/posts")
        .add_query_param("category", "payroll")
        .await
        .json::<Value>();
    assert_eq!(listed["total"], 1);

    let draft = server
        .post("/api/admin/posts")
        .authorization_bearer(&token)
        .json(&json!({ "title": "Unfinished Thoughts" }))
        .await
        .json::<Value>();
    assert_eq!(draft["status"], "draft");
    server
        .get("/api/posts/unfinished-thoughts")
        .await
        .assert_status_not_found();

    let duplicate = server
        .post("/api/admin/posts")
        .authorization_bearer(&token)
        .json(&json!({ "title": "Another", "slug": "year-end-payroll-checklist" }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);

    let delete = server
        .delete(&format!("/api/admin/categories/{}", category_id))
        .authorization_bearer(&token)
        .await;
    delete.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(delete.json::<Value>()["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_scheduled_post_requires_future_time() {
    let TestApp { server, .. } = app().await;
    let token = setup_admin(&server).await;

    server
        .post("/api/admin/posts")
        .authorization_bearer(&token)
        .json(&json!({
            "title": "Too Late",
            "status": "scheduled",
            "scheduled_at": "2001-01-01T00:00:00Z"
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_roles_gate_admin_routes() {
    let TestApp { server, .. } = app().await;
    let admin = setup_admin(&server).await;

    server
        .post("/api/admin/users")
        .authorization_bearer(&admin)
        .json(&json!({
            "email": "junior@hartandco.example",
            "display_name": "Junior",
            "password": "author password",
            "role": "author"
        }))
        .await
        .assert_status(StatusCode::CREATED);
    let author = login(&server, "junior@hartandco.example", "author password").await;

    server
        .post("/api/admin/categories")
        .authorization_bearer(&author)
        .json(&json!({ "name": "Audit" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .get("/api/admin/users")
        .authorization_bearer(&author)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Authors still write their own posts
    server
        .post("/api/admin/posts")
        .authorization_bearer(&author)
        .json(&json!({ "title": "My First Draft" }))
        .await
        .assert_status(StatusCode::CREATED);

    server
        .get("/api/admin/dashboard")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    let dashboard = server
        .get("/api/admin/dashboard")
        .authorization_bearer(&admin)
        .await;
    dashboard.assert_status_ok();
    let dashboard = dashboard.json::<Value>();
    assert_eq!(dashboard["posts"]["draft"], 1);
    assert!(dashboard["requests"]["total_requests"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_newsletter_signup_and_unconfigured_send() {
    let TestApp { server, .. } = app().await;
    let token = setup_admin(&server).await;

    let first = server
        .post("/api/newsletter/subscribe")
        .json(&json!({ "email": "Client@Example.com", "source": "footer" }))
        .await;
    first.assert_status(StatusCode::CREATED);
    assert_eq!(first.json::<Value>()["subscriber"]["email"], "client@example.com");

    let second = server
        .post("/api/newsletter/subscribe")
        .json(&json!({ "email": "client@example.com" }))
        .await;
    second.assert_status_ok();
    assert_eq!(second.json::<Value>()["outcome"], "already_active");

    server
        .post("/api/newsletter/subscribe")
        .json(&json!({ "email": "not-an-email" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .get("/api/newsletter/unsubscribe")
        .add_query_param("email", "client@example.com")
        .add_query_param("token", "forged")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let send = server
        .post("/api/admin/newsletter/send")
        .authorization_bearer(&token)
        .json(&json!({ "subject": "April update", "body": "Hello" }))
        .await;
    send.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(send.json::<Value>()["error"]["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_ai_helpers() {
    let TestApp { server, .. } = app().await;
    let token = setup_admin(&server).await;

    server
        .post("/api/ai/fix")
        .json(&json!({ "title": "x", "content": "y" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let fixed = server
        .post("/api/ai/fix")
        .authorization_bearer(&token)
        .json(&json!({
            "title": "Claiming Expenses",
            "content": "Keep every reciept for each expence you claim.",
            "keyword": "self assessment"
        }))
        .await
        .json::<Value>();
    let content = fixed["content"].as_str().unwrap();
    assert!(content.contains("receipt"));
    assert!(content.contains("expense"));
    assert!(content.contains("self assessment"));

    let seo = server
        .post("/api/ai/seo")
        .authorization_bearer(&token)
        .json(&json!({ "title": "Short", "content": "Tiny." }))
        .await
        .json::<Value>();
    assert!(seo["score"].as_u64().unwrap() <= 100);

    let generated = server
        .post("/api/ai/generate")
        .authorization_bearer(&token)
        .json(&json!({ "kind": "excerpt", "title": "T", "content": "C" }))
        .await;
    generated.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_campaign_transitions() {
    let TestApp { server, .. } = app().await;
    let token = setup_admin(&server).await;

    let post = server
        .post("/api/admin/posts")
        .authorization_bearer(&token)
        .json(&json!({ "title": "Making Tax Digital", "content": "What changes in April." }))
        .await
        .json::<Value>();

    let campaign = server
        .post("/api/admin/campaigns")
        .authorization_bearer(&token)
        .json(&json!({ "post_id": post["id"], "platforms": ["linkedin"] }))
        .await;
    campaign.assert_status(StatusCode::CREATED);
    let campaign = campaign.json::<Value>();
    assert_eq!(campaign["status"], "draft");
    let id = campaign["id"].as_i64().unwrap();

    // Only a ready campaign can be published
    server
        .post(&format!("/api/admin/campaigns/{}/publish", id))
        .authorization_bearer(&token)
        .json(&json!({}))
        .await
        .assert_status(StatusCode::CONFLICT);

    server
        .post(&format!("/api/admin/campaigns/{}/generate", id))
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    server
        .post("/api/admin/campaigns")
        .authorization_bearer(&token)
        .json(&json!({ "post_id": 9999 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_offline_sync_is_idempotent() {
    let TestApp { server, .. } = app().await;
    let token = setup_admin(&server).await;

    let batch = json!({
        "operations": [{
            "client_id": "draft-7f3a",
            "action": "save_draft",
            "title": "Written on the train",
            "content": "VAT thresholds explained.",
            "client_updated_at": "2030-01-01T00:00:00Z"
        }]
    });

    let first = server
        .post("/api/admin/sync")
        .authorization_bearer(&token)
        .json(&batch)
        .await;
    first.assert_status_ok();
    let first = first.json::<Value>();
    assert_eq!(first["results"][0]["outcome"], "applied");
    assert_eq!(first["results"][0]["duplicate"], false);
    let post_id = first["results"][0]["post_id"].as_i64().unwrap();

    let replay = server
        .post("/api/admin/sync")
        .authorization_bearer(&token)
        .json(&batch)
        .await
        .json::<Value>();
    assert_eq!(replay["results"][0]["duplicate"], true);
    assert_eq!(replay["results"][0]["post_id"], post_id);

    let posts = server
        .get("/api/admin/posts")
        .authorization_bearer(&token)
        .await
        .json::<Value>();
    assert_eq!(posts["total"], 1);
}

#[tokio::test]
async fn test_public_xml_documents() {
    let TestApp { server, .. } = app().await;
    let token = setup_admin(&server).await;
    create_category(&server, &token, "Tax & VAT").await;

    server
        .post("/api/admin/posts")
        .authorization_bearer(&token)
        .json(&json!({ "title": "Quarterly VAT Returns", "status": "published" }))
        .await
        .assert_status(StatusCode::CREATED);

    let rss = server.get("/rss.xml").await;
    rss.assert_status_ok();
    assert!(rss
        .header("content-type")
        .to_str()
        .unwrap()
        .starts_with("application/rss+xml"));
    let rss = rss.text();
    assert!(rss.contains("<title>Quarterly VAT Returns</title>"));
    assert!(rss.contains("https://hartandco.example/blog/quarterly-vat-returns"));

    let sitemap = server.get("/sitemap.xml").await.text();
    assert!(sitemap.contains("<loc>https://hartandco.example/about</loc>"));
    assert!(sitemap.contains("/blog/quarterly-vat-returns"));
    assert!(sitemap.contains("/blog/category/tax-vat"));
}

#[tokio::test]
async fn test_media_upload() {
    let TestApp { server, uploads } = app().await;
    let token = setup_admin(&server).await;

    let png = Part::bytes(vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3])
        .file_name("logo.png")
        .mime_type("image/png");
    let res = server
        .post("/api/admin/media")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_part("file", png))
        .await;
    res.assert_status(StatusCode::CREATED);
    let body = res.json::<Value>();
    let filename = body["filename"].as_str().unwrap();
    assert!(filename.ends_with(".png"));
    assert_eq!(body["url"], format!("/uploads/{}", filename));
    assert!(uploads.path().join(filename).exists());

    let served = server.get(&format!("/uploads/{}", filename)).await;
    served.assert_status_ok();
    assert!(served
        .header("content-security-policy")
        .to_str()
        .unwrap()
        .contains("sandbox"));
    assert_eq!(served.header("x-content-type-options"), "nosniff");

    let svg = Part::bytes(b"<svg xmlns=\"http://www.w3.org/2000/svg\"><script>alert(1)</script></svg>".to_vec())
        .file_name("logo.svg")
        .mime_type("image/svg+xml");
    server
        .post("/api/admin/media")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_part("file", svg))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let script = Part::bytes(b"#!/bin/sh".to_vec())
        .file_name("run.sh")
        .mime_type("text/x-shellscript");
    server
        .post("/api/admin/media")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_part("file", script))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let TestApp { server, .. } = app().await;
    let res = server.get("/api/nope").await;
    res.assert_status_not_found();
    assert_eq!(res.json::<Value>()["error"]["code"], "NOT_FOUND");
}
