//! HTTP round trips through the actix-web routes

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use purr_relay::auth::{AuthConfig, TokenAuthority};
use purr_relay::config::DEFAULT_MAX_PAYLOAD_BYTES;
use purr_relay::fingerprint::fingerprint;
use purr_relay::http::{configure, AppState};
use purr_relay::{ClipKind, ClipboardRelay, ClipboardRelayApi};
use serde_json::{json, Value};
use std::sync::Arc;

const PASSWORD: &str = "correct horse";

fn state() -> web::Data<AppState> {
    let relay: Arc<dyn ClipboardRelayApi> = Arc::new(ClipboardRelay::new_in_memory().unwrap());
    let auth = TokenAuthority::new(AuthConfig::new(PASSWORD).with_secret(b"http-test-secret".to_vec()));
    web::Data::new(AppState::new(relay, auth))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .configure(|cfg| configure(cfg, DEFAULT_MAX_PAYLOAD_BYTES)),
        )
        .await
    };
}

fn bearer(state: &web::Data<AppState>, device: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", state.auth.issue(device)))
}

#[actix_web::test]
async fn login_issues_usable_token() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/auth")
        .set_json(json!({ "password": PASSWORD, "deviceInfo": "MacBook" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let token = body["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri("/api/clipboard")
        .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!([]));
}

#[actix_web::test]
async fn wrong_password_is_rejected() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/auth")
        .set_json(json!({ "password": "nope", "deviceInfo": "MacBook" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn api_requires_bearer_token() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/api/clipboard").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Unauthenticated: No authorization header provided");

    let req = test::TestRequest::get()
        .uri("/api/clipboard")
        .insert_header((header::AUTHORIZATION, "Bearer not-a-token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/split-words")
        .set_json(json!({ "text": "hello" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn ingest_returns_201_then_200() {
    let state = state();
    let app = app!(state);
    let auth = bearer(&state, "MacBook");

    let payload = json!({ "content": "Hello\r\nWorld", "deviceInfo": "MacBook", "type": "text" });
    let req = test::TestRequest::post()
        .uri("/api/clipboard")
        .insert_header(auth.clone())
        .set_json(&payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["id"], 1);
    assert_eq!(created["type"], "text");
    assert!(created.get("imageData").is_none());
    assert!(created["createdAt"].is_string());

    let req = test::TestRequest::post()
        .uri("/api/clipboard")
        .insert_header(auth)
        .set_json(json!({ "content": "Hello\nWorld", "deviceInfo": "iPhone", "type": "text" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let deduped: Value = test::read_body_json(resp).await;
    assert_eq!(deduped["id"], 1);
    assert_eq!(deduped["deviceInfo"], "MacBook");
}

#[actix_web::test]
async fn empty_device_info_defaults_to_token_device() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/clipboard")
        .insert_header(bearer(&state, "Pixel 8"))
        .set_json(json!({ "content": "from the token", "type": "text" }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(created["deviceInfo"], "Pixel 8");
}

#[actix_web::test]
async fn image_round_trip_uses_base64() {
    let state = state();
    let app = app!(state);
    let auth = bearer(&state, "iPhone");

    let req = test::TestRequest::post()
        .uri("/api/clipboard")
        .insert_header(auth.clone())
        .set_json(json!({ "content": "", "deviceInfo": "iPhone", "type": "image", "imageData": "iVBORw==" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::get()
        .uri("/api/clipboard/latest?new=0")
        .insert_header(auth.clone())
        .to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page[0]["imageData"], "iVBORw==");

    let digest = fingerprint(ClipKind::Image, "", &[0x89, 0x50, 0x4e, 0x47]).unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/api/is_exist?sha256={}", digest))
        .insert_header(auth)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "exists": true }));
}

#[actix_web::test]
async fn invalid_payloads_are_400() {
    let state = state();
    let app = app!(state);
    let auth = bearer(&state, "desk");

    let cases = [
        json!({ "content": "x", "deviceInfo": "d", "type": "video" }),
        json!({ "content": "", "deviceInfo": "d", "type": "image" }),
        json!({ "content": "", "deviceInfo": "d", "type": "image", "imageData": "%%%" }),
        json!({ "content": "missing type" }),
    ];
    for payload in cases {
        let req = test::TestRequest::post()
            .uri("/api/clipboard")
            .insert_header(auth.clone())
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "payload {}", payload);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }
}

#[actix_web::test]
async fn paging_endpoints() {
    let state = state();
    let app = app!(state);
    let auth = bearer(&state, "desk");

    for i in 0..12 {
        let req = test::TestRequest::post()
            .uri("/api/clipboard")
            .insert_header(auth.clone())
            .set_json(json!({ "content": format!("note {}", i), "deviceInfo": "desk", "type": "text" }))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get().uri("/api/clipboard").insert_header(auth.clone()).to_request();
    let newest: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    let ids: Vec<i64> = newest.iter().map(|e| e["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, (3..=12).rev().collect::<Vec<_>>());

    let req = test::TestRequest::get().uri("/api/clipboard?old=3").insert_header(auth.clone()).to_request();
    let older: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(older.len(), 2);

    let req = test::TestRequest::get().uri("/api/clipboard/latest?new=10").insert_header(auth.clone()).to_request();
    let newer: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(newer.len(), 2);
    assert_eq!(newer[0]["id"], 11);

    let req = test::TestRequest::get().uri("/api/clipboard/latest").insert_header(auth.clone()).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Missing new parameter");

    let req = test::TestRequest::get().uri("/api/clipboard/latest?new=-5").insert_header(auth).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn search_endpoint() {
    let state = state();
    let app = app!(state);
    let auth = bearer(&state, "desk");

    for content in ["alpha one", "beta", "alpha two", "ALPHA three"] {
        let req = test::TestRequest::post()
            .uri("/api/clipboard")
            .insert_header(auth.clone())
            .set_json(json!({ "content": content, "deviceInfo": "desk", "type": "text" }))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get().uri("/api/clipboard/search?q=alpha").insert_header(auth.clone()).to_request();
    let hits: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    let contents: Vec<&str> = hits.iter().map(|e| e["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["ALPHA three", "alpha two", "alpha one"]);

    let req = test::TestRequest::get().uri("/api/clipboard/search?q=alpha&limit=1").insert_header(auth.clone()).to_request();
    let hits: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(hits.len(), 1);

    let req = test::TestRequest::get().uri("/api/clipboard/search?q=%20%20").insert_header(auth.clone()).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get().uri("/api/clipboard/search?q=a&limit=many").insert_header(auth).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn existence_endpoint_validates_digest() {
    let state = state();
    let app = app!(state);
    let auth = bearer(&state, "desk");

    let req = test::TestRequest::get().uri("/api/is_exist").insert_header(auth.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get().uri("/api/is_exist?sha256=abc").insert_header(auth.clone()).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri(&format!("/api/is_exist?sha256={}", "0".repeat(64)))
        .insert_header(auth)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "exists": false }));
}

#[actix_web::test]
async fn split_words_endpoint() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/split-words")
        .insert_header(bearer(&state, "desk"))
        .set_json(json!({ "text": "hello123世界你好" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "words": ["hello", "123", "世界", "你好"] }));
}

#[actix_web::test]
async fn health_is_public() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "status": "ok", "items": 0 }));
}
