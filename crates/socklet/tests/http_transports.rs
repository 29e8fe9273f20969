//! Integration tests for the HTTP transports, driven through the router
//! with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use futures_util::StreamExt;
use socklet::prelude::*;
use socklet::timer::ManualScheduler;
use tower::ServiceExt;

// =========================================================================
// Helpers
// =========================================================================

struct Echo;

impl SessionCallback for Echo {
    fn on_message(&mut self, session: &Session, message: String) -> CallbackResult {
        session.send(message)?;
        Ok(())
    }
}

fn echo_service(builder: ServiceBuilder) -> Service {
    builder
        .scheduler(Arc::new(ManualScheduler::new()))
        .build(|_: &SessionId| Box::new(Echo) as Box<dyn SessionCallback>)
}

fn app() -> (Service, Router) {
    let service = echo_service(ServiceBuilder::new());
    let router = service.router();
    (service, router)
}

async fn call(app: &Router, method: Method, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_owned()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn call_form(app: &Router, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_owned()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn poll(app: &Router, session: &str) -> String {
    let response = call(app, Method::POST, &format!("/000/{session}/xhr"), "").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await
}

// =========================================================================
// Greeting and info
// =========================================================================

#[tokio::test]
async fn test_greeting_returns_welcome_text() {
    let (_service, app) = app();

    let response = call(&app, Method::GET, "/", "").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Welcome to SockJS!\n");
}

#[tokio::test]
async fn test_info_reports_capabilities() {
    let (_service, app) = app();

    let response = call(&app, Method::GET, "/info", "").await;

    assert_eq!(response.status(), StatusCode::OK);
    let cache = response.headers()[header::CACHE_CONTROL].to_str().unwrap();
    assert!(cache.contains("no-store"));
    let info: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(info["websocket"], true);
    assert_eq!(info["origins"], serde_json::json!(["*:*"]));
    assert_eq!(info["cookie_needed"], false);
    assert!(info["entropy"].is_u64());
}

#[tokio::test]
async fn test_info_websocket_disabled_reports_false() {
    let service = echo_service(ServiceBuilder::new().websocket_enabled(false));
    let app = service.router();

    let info: serde_json::Value =
        serde_json::from_str(&body_text(call(&app, Method::GET, "/info", "").await).await)
            .unwrap();
    assert_eq!(info["websocket"], false);

    let response = call(&app, Method::GET, "/websocket", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_router_nested_under_prefix() {
    let service = echo_service(ServiceBuilder::new().prefix("/echo"));
    let app = service.router();

    let response = call(&app, Method::GET, "/echo/info", "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = call(&app, Method::GET, "/info", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =========================================================================
// XHR polling and send
// =========================================================================

#[tokio::test]
async fn test_xhr_first_poll_returns_open_frame() {
    let (service, app) = app();

    assert_eq!(poll(&app, "s1").await, "o\n");

    let session = service.registry().get_session(&SessionId::from("s1")).unwrap();
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_xhr_send_unknown_session_returns_404() {
    let (_service, app) = app();

    let response = call(&app, Method::POST, "/000/nope/xhr_send", r#"["x"]"#).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_xhr_send_then_poll_echoes_message() {
    let (_service, app) = app();
    assert_eq!(poll(&app, "s1").await, "o\n");

    let response = call(&app, Method::POST, "/000/s1/xhr_send", r#"["hello","wörld"]"#).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let mut echoed = Vec::new();
    while echoed.len() < 2 {
        let body = poll(&app, "s1").await;
        let frame = socklet::protocol::Frame::decode(body.trim_end()).unwrap();
        match frame {
            socklet::protocol::Frame::Message(batch) => echoed.extend(batch),
            other => panic!("expected a message frame, got {other:?}"),
        }
    }
    assert_eq!(echoed, ["hello", "wörld"]);
}

#[tokio::test]
async fn test_xhr_send_empty_body_is_payload_expected() {
    let (_service, app) = app();
    poll(&app, "s1").await;

    let response = call(&app, Method::POST, "/000/s1/xhr_send", "").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Payload expected.");
}

#[tokio::test]
async fn test_xhr_send_broken_json_is_rejected() {
    let (_service, app) = app();
    poll(&app, "s1").await;

    let response = call(&app, Method::POST, "/000/s1/xhr_send", "[\"x").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Broken JSON encoding.");
}

#[tokio::test]
async fn test_second_concurrent_poll_gets_2010() {
    let (service, app) = app();
    poll(&app, "s1").await;

    // Nothing queued: this poll stays open.
    let waiting = call(&app, Method::POST, "/000/s1/xhr", "").await;

    let conflict = poll(&app, "s1").await;
    assert_eq!(conflict, "c[2010,\"Another connection still open\"]\n");

    let session = service.registry().get_session(&SessionId::from("s1")).unwrap();
    session.send("pushed").unwrap();
    assert_eq!(body_text(waiting).await, "a[\"pushed\"]\n");
}

#[tokio::test]
async fn test_polls_after_close_get_close_frame() {
    let (service, app) = app();
    poll(&app, "s1").await;
    let session = service.registry().get_session(&SessionId::from("s1")).unwrap();

    session.close();

    assert_eq!(poll(&app, "s1").await, "c[1000,\"Normal closure\"]\n");
    session.closed().await;
    assert!(!service.registry().contains(&SessionId::from("s1")));
}

// =========================================================================
// JSONP
// =========================================================================

#[tokio::test]
async fn test_jsonp_without_callback_is_rejected() {
    let (_service, app) = app();

    let response = call(&app, Method::GET, "/000/s1/jsonp", "").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "\"callback\" parameter required");
}

#[tokio::test]
async fn test_jsonp_wraps_frame_in_callback() {
    let (_service, app) = app();

    let response = call(&app, Method::GET, "/000/s1/jsonp?c=cb", "").await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("application/javascript"));
    assert_eq!(body_text(response).await, "cb(\"o\");\r\n");
}

#[tokio::test]
async fn test_jsonp_send_form_field_is_delivered() {
    let (_service, app) = app();
    call(&app, Method::GET, "/000/s1/jsonp?c=cb", "").await;

    let response = call_form(&app, "/000/s1/jsonp_send", "d=%5B%22hi%22%5D").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");

    let response = call(&app, Method::GET, "/000/s1/jsonp?c=cb", "").await;
    assert_eq!(body_text(response).await, "cb(\"a[\\\"hi\\\"]\");\r\n");
}

#[tokio::test]
async fn test_jsonp_send_form_without_d_is_payload_expected() {
    let (_service, app) = app();
    call(&app, Method::GET, "/000/s1/jsonp?c=cb", "").await;

    let response = call_form(&app, "/000/s1/jsonp_send", "x=1").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Payload expected.");
}

// =========================================================================
// Streaming
// =========================================================================

#[tokio::test]
async fn test_xhr_streaming_sends_prelude_then_open() {
    let (service, app) = app();

    let response = call(&app, Method::POST, "/000/s1/xhr_streaming", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();

    let prelude = body.next().await.unwrap().unwrap();
    assert_eq!(prelude.len(), 2049);
    assert!(prelude[..2048].iter().all(|b| *b == b'h'));
    assert_eq!(prelude[2048], b'\n');
    assert_eq!(&body.next().await.unwrap().unwrap()[..], b"o\n");

    let session = service.registry().get_session(&SessionId::from("s1")).unwrap();
    session.send("one").unwrap();
    session.send("two").unwrap();
    let mut received = String::new();
    while !received.contains("two") {
        let chunk = body.next().await.unwrap().unwrap();
        received.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    assert!(received.starts_with("a[\"one\""));
}

#[tokio::test]
async fn test_xhr_streaming_ends_at_size_ceiling_without_closing_session() {
    let service = echo_service(ServiceBuilder::new().max_response_size(2));
    let app = service.router();

    let response = call(&app, Method::POST, "/000/s1/xhr_streaming", "").await;
    let body = body_text(response).await;

    assert!(body.ends_with("\no\n"));
    let session = service.registry().get_session(&SessionId::from("s1")).unwrap();
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Open);
    assert_eq!(snapshot.receiver, None);
}

#[tokio::test]
async fn test_eventsource_frames_are_data_lines() {
    let (_service, app) = app();

    let response = call(&app, Method::GET, "/000/s1/eventsource", "").await;
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    let mut body = response.into_body().into_data_stream();

    assert_eq!(&body.next().await.unwrap().unwrap()[..], b"\r\n");
    assert_eq!(&body.next().await.unwrap().unwrap()[..], b"data: o\r\n\r\n");
}

#[tokio::test]
async fn test_htmlfile_without_callback_is_rejected() {
    let (_service, app) = app();

    let response = call(&app, Method::GET, "/000/s1/htmlfile", "").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_htmlfile_prelude_names_callback() {
    let (_service, app) = app();

    let response = call(&app, Method::GET, "/000/s1/htmlfile?c=parent.cb", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();

    let prelude = body.next().await.unwrap().unwrap();
    let prelude = std::str::from_utf8(&prelude).unwrap();
    assert!(prelude.contains("parent.cb"));
    assert!(prelude.len() > 1024);

    let open = body.next().await.unwrap().unwrap();
    assert_eq!(&open[..], b"<script>\np(\"o\");\n</script>\r\n");
}

// =========================================================================
// Disconnects
// =========================================================================

#[tokio::test]
async fn test_dropped_streaming_response_detaches_receiver() {
    let (service, app) = app();

    let response = call(&app, Method::POST, "/000/s1/xhr_streaming", "").await;
    let session = service.registry().get_session(&SessionId::from("s1")).unwrap();
    assert!(session.snapshot().await.unwrap().receiver.is_some());

    drop(response);

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.receiver, None);
    assert!(snapshot.timeout_armed);
}
