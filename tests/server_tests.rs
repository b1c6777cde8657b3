#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::http::{request, send_request};
use common::test_server::{setup_may_runtime, TestServer};
use fnrunner::cli::build_service;
use fnrunner::config::ServerConfig;
use fnrunner::dispatcher::WAIT_HEADER;
use fnrunner::server::{InboundRequest, RequestHead, ResponseWriter};
use std::time::{Duration, Instant};

#[test]
fn test_health_endpoint() {
    let server = TestServer::start(&ServerConfig::default());

    let resp = send_request(&server.addr, &request("GET", "/health", None));

    assert_eq!(resp.status, 200);
    assert_eq!(resp.json(), serde_json::json!({ "status": "ok" }));
}

#[test]
fn test_sync_echo_over_http() {
    let server = TestServer::start(&ServerConfig::default());

    let resp = send_request(
        &server.addr,
        &request("POST", "/r/demo/echo?debug=1", Some(r#"{"n":7}"#)),
    );

    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("Content-Type"), Some("application/json"));
    let body = resp.json();
    assert_eq!(body["app"], "demo");
    assert_eq!(body["path"], "/echo");
    assert_eq!(body["body"]["n"], 7);
    assert!(resp.header(WAIT_HEADER).is_none());
}

#[test]
fn test_sync_hello_default_name() {
    let server = TestServer::start(&ServerConfig::default());

    let resp = send_request(&server.addr, &request("POST", "/r/demo/hello", None));

    assert_eq!(resp.status, 200);
    assert_eq!(resp.json()["message"], "Hello world!");
}

#[test]
fn test_async_call_then_lookup() {
    let server = TestServer::start(&ServerConfig::default());

    let resp = send_request(
        &server.addr,
        &request("POST", "/r/demo/hello-async", Some(r#"{"name":"Grace"}"#)),
    );
    assert_eq!(resp.status, 202);
    let call_id = resp.json()["call_id"].as_str().unwrap().to_string();

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut last = serde_json::Value::Null;
    while Instant::now() < deadline {
        let lookup = send_request(
            &server.addr,
            &request("GET", &format!("/v1/calls/{call_id}"), None),
        );
        assert_eq!(lookup.status, 200);
        last = lookup.json();
        if last["call"]["status"] == "success" {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(last["call"]["status"], "success");
    assert_eq!(last["call"]["id"], call_id.as_str());
    assert_eq!(last["call"]["type"], "async");
}

#[test]
fn test_call_lookup_not_found() {
    let server = TestServer::start(&ServerConfig::default());

    let resp = send_request(&server.addr, &request("GET", "/v1/calls/not-an-id", None));
    assert_eq!(resp.status, 404);

    let unknown = fnrunner::ids::CallId::new();
    let resp = send_request(&server.addr, &request("GET", &format!("/v1/calls/{unknown}"), None));
    assert_eq!(resp.status, 404);
    assert_eq!(resp.json()["error"]["message"], "Call not found");
}

#[test]
fn test_invocation_errors() {
    let server = TestServer::start(&ServerConfig::default());

    let resp = send_request(&server.addr, &request("POST", "/r/", Some("x")));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.json()["error"]["message"], "Missing app name");

    let resp = send_request(&server.addr, &request("POST", "/r/ghost/echo", None));
    assert_eq!(resp.status, 404);

    let resp = send_request(&server.addr, &request("POST", "/r/demo/missing", None));
    assert_eq!(resp.status, 404);

    let resp = send_request(&server.addr, &request("POST", "/r/demo/hello", Some("not json")));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.json()["error"]["message"], "Invalid payload");
}

#[test]
fn test_unknown_route_is_404() {
    let server = TestServer::start(&ServerConfig::default());

    let resp = send_request(&server.addr, &request("GET", "/nowhere", None));

    assert_eq!(resp.status, 404);
    assert_eq!(resp.json()["path"], "/nowhere");
}

#[test]
fn test_metrics_endpoint_counts_dispatches() {
    let server = TestServer::start(&ServerConfig::default());

    send_request(&server.addr, &request("POST", "/r/demo/echo", Some("{}")));
    send_request(&server.addr, &request("POST", "/r/demo/echo", Some("{}")));
    let resp = send_request(&server.addr, &request("GET", "/metrics", None));

    assert_eq!(resp.status, 200);
    assert!(resp.header("Content-Type").unwrap().starts_with("text/plain"));
    let text = String::from_utf8(resp.body).unwrap();
    assert!(text.contains("fn_dispatch_total 2"), "{text}");
    assert!(text.contains("fn_dispatch_completed_total 2"));
    assert!(text.contains("fn_app_dispatch_total{app=\"demo\"} 2"));
    assert!(text.contains("fn_pool_dispatched_total 2"));
}

#[test]
fn test_configured_apps_replace_demo() {
    let config = ServerConfig::from_yaml_str(
        r#"
apps:
  shop:
    routes:
      - path: /cart
        function: echo
      - path: /greet
        function: hello
        type: async
"#,
    )
    .unwrap();
    let server = TestServer::start(&config);

    let resp = send_request(&server.addr, &request("POST", "/r/shop/cart", Some("[1,2]")));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.json()["body"], serde_json::json!([1, 2]));

    let resp = send_request(&server.addr, &request("POST", "/r/shop/greet", Some("{}")));
    assert_eq!(resp.status, 202);

    let resp = send_request(&server.addr, &request("POST", "/r/demo/echo", None));
    assert_eq!(resp.status, 404);
}

#[test]
fn test_shutdown_context_stops_new_calls() {
    setup_may_runtime();
    let built = build_service(&ServerConfig::default()).unwrap();
    built.service.shutdown_context().cancel();

    for path in ["/r/demo/hello-async", "/r/demo/echo"] {
        let writer = ResponseWriter::new();
        let head = RequestHead::new("POST", path);
        built
            .service
            .handle(InboundRequest::new(head, &b"{}"[..]), &writer);
        assert_eq!(writer.status(), 499, "{path}");
    }
    assert_eq!(built.agent.queued(), 0);

    let writer = ResponseWriter::new();
    built
        .service
        .handle(InboundRequest::new(RequestHead::new("GET", "/health"), &b""[..]), &writer);
    assert_eq!(writer.status(), 200);
    built.agent.shutdown();
}
