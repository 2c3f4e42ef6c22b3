//! End-to-end tests against a real loopback HTTP server

use std::time::Duration;

use fetchx::{Client, ClientOptions, ConnectFailure, Error, Request, RequestOptions, StatusCode};
use serde_json::json;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn follow() -> ClientOptions {
    ClientOptions::new().with_follow_redirects(true)
}

#[tokio::test]
async fn test_get_returns_status_and_body() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hi"))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new();
    let request = Request::get(&format!("{}/a", server.uri())).unwrap();
    let options = RequestOptions::new().with_read_timeout(Duration::from_millis(5000));
    let response = client.execute(request, options).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), b"hi");
    assert_eq!(response.redirect_count(), 0);
}

#[tokio::test]
async fn test_follows_moved_permanently() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/b", server.uri()).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("final"))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::with_options(follow());
    let request = Request::get(&format!("{}/a", server.uri())).unwrap();
    let response = client
        .execute(request, RequestOptions::new().with_max_redirects(10))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "final");
    assert_eq!(response.redirect_count(), 1);
    assert_eq!(response.url().path(), "/b");
}

#[tokio::test]
async fn test_redirect_not_followed_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
        .mount(&server)
        .await;

    let client = Client::new();
    let request = Request::get(&format!("{}/a", server.uri())).unwrap();
    let response = client.execute(request, RequestOptions::default()).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.location(), Some("/b"));
}

#[tokio::test]
async fn test_slow_server_hits_read_timeout() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = Client::new();
    let request = Request::get(&server.uri()).unwrap();
    let options = RequestOptions::new()
        .with_read_timeout(Duration::from_millis(200))
        .with_total_timeout(Duration::from_secs(10));
    let err = client.execute(request, options).await.unwrap_err();

    assert!(matches!(err, Error::ReadTimeout { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_default_headers_reach_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", "fetchx-test"))
        .and(header("accept", "*/*"))
        .and(header("connection", "close"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::with_options(ClientOptions::new().with_user_agent("fetchx-test"));
    let request = Request::get(&server.uri()).unwrap();
    let response = client.execute(request, RequestOptions::default()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_post_json_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .and(body_json(json!({"name": "widget"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new();
    let created: serde_json::Value = client
        .post_json(
            &format!("{}/items", server.uri()),
            &json!({"name": "widget"}),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(created["id"], 7);
}

#[tokio::test]
async fn test_head_has_no_body() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ignored"))
        .mount(&server)
        .await;

    let client = Client::new();
    let request = Request::get(&server.uri()).unwrap();
    let response = client.head(request, RequestOptions::quick()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());
}

#[tokio::test]
async fn test_error_for_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let client = Client::new();
    let request = Request::get(&server.uri()).unwrap();
    let response = client.get(request, RequestOptions::default()).await.unwrap();
    let err = response.error_for_status().unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
    assert_eq!(err.response().text(), "missing");
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = Client::new();
    let request = Request::get(&format!("http://127.0.0.1:{}/", port)).unwrap();
    let err = client.execute(request, RequestOptions::quick()).await.unwrap_err();

    assert!(err.is_connect());
    assert!(matches!(
        err,
        Error::Connection {
            cause: ConnectFailure::Refused,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cache_serves_second_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let client = Client::with_options(ClientOptions::new().with_cache_resolved(true));
    for _ in 0..2 {
        let request = Request::get(&server.uri()).unwrap();
        client.execute(request, RequestOptions::default()).await.unwrap();
    }
    assert_eq!(client.resolution_cache().unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_request_sent_twice_carries_its_body_both_times() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/p"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let client = Client::new();
    let request = Request::post(&format!("{}/p", server.uri()))
        .unwrap()
        .text("hello");
    let options = RequestOptions::new().with_total_timeout(Duration::from_secs(5));

    let first = client.execute(request.clone(), options.clone()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = client.execute(request, options).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
}
