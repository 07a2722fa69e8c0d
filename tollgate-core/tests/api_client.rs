//! Integration tests for ApiClient.
//!
//! A wiremock server plays both the token endpoint and the data API, so these
//! tests cover the full path: token fetch, header attachment, response
//! classification and the single retry after an auth failure.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tollgate_core::{
    ApiClient, ApiClientConfig, ApiError, AuthHeader, ClientCredentialsSource, RequestSpec,
    ResponseDecoder, TokenCache,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

#[derive(Debug, Deserialize, PartialEq)]
struct Tract {
    fips_code: String,
}

fn token_body(access_token: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600
    })
}

async fn mount_token(server: &MockServer, access_token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/as/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access_token)))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

fn client_with(server: &MockServer, config: ApiClientConfig) -> ApiClient<ClientCredentialsSource> {
    let source = ClientCredentialsSource::new(
        format!("{}/as/token", server.uri()),
        "test-client-id",
        "test-client-secret",
    );
    ApiClient::new(config, Arc::new(TokenCache::new(source))).unwrap()
}

fn client(server: &MockServer) -> ApiClient<ClientCredentialsSource> {
    client_with(
        server,
        ApiClientConfig::new(server.uri()).with_auth_header(AuthHeader::raw("x-public-access-token")),
    )
}

#[tokio::test]
async fn test_success_attaches_custom_header() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("GET"))
        .and(path("/v1/income-limits/censustracts"))
        .and(query_param("fips_code", "51059"))
        .and(header("x-public-access-token", "T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"fips_code": "51059"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = RequestSpec::get("/v1/income-limits/censustracts").query("fips_code", "51059");
    let tracts: Vec<Tract> = client.execute_list(&spec, &ResponseDecoder::new()).await.unwrap();

    assert_eq!(tracts, vec![Tract { fips_code: "51059".to_string() }]);
}

#[tokio::test]
async fn test_bearer_header_by_default() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "u1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, ApiClientConfig::new(server.uri()));
    let profile: serde_json::Value = client.execute_json(&RequestSpec::get("/me")).await.unwrap();
    assert_eq!(profile["id"], "u1");
}

#[tokio::test]
async fn test_unauthorized_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;
    mount_token(&server, "T2", 1).await;

    Mock::given(method("GET"))
        .and(path("/v1/income-limits/censustracts"))
        .and(header("x-public-access-token", "T1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/income-limits/censustracts"))
        .and(header("x-public-access-token", "T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"fips_code": "51059"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = RequestSpec::get("/v1/income-limits/censustracts").query("fips_code", "51059");
    let tracts: Vec<Tract> = client.execute_list(&spec, &ResponseDecoder::new()).await.unwrap();

    assert_eq!(tracts.len(), 1);
    assert_eq!(tracts[0].fips_code, "51059");
    assert_eq!(client.tokens().current_token().unwrap().expose(), "T2");
}

#[tokio::test]
async fn test_forbidden_also_triggers_refresh() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;
    mount_token(&server, "T2", 1).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, ApiClientConfig::new(server.uri()));
    client.execute_empty(&RequestSpec::get("/data")).await.unwrap();
}

#[tokio::test]
async fn test_second_unauthorized_fails_without_third_attempt() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;
    mount_token(&server, "T2", 1).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client.execute_json::<serde_json::Value>(&RequestSpec::get("/data")).await;

    assert!(matches!(result, Err(ApiError::AuthenticationFailed)));
}

#[tokio::test]
async fn test_token_failure_skips_data_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/as/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_client"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client.execute_empty(&RequestSpec::get("/data")).await;

    assert!(matches!(result, Err(ApiError::AuthenticationFailed)));
}

#[tokio::test]
async fn test_rate_limited_is_not_retried() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client.execute_empty(&RequestSpec::get("/data")).await;

    match result {
        Err(ApiError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_surfaces_body() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client.execute_empty(&RequestSpec::get("/data")).await;

    match result {
        Err(ApiError::HttpError { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "Internal Server Error");
        }
        other => panic!("expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_structured_error_message() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("GET"))
        .and(path("/playlists/missing/tracks"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"status": 404, "message": "Resource not found"}
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client.execute_empty(&RequestSpec::get("/playlists/missing/tracks")).await;

    match result {
        Err(ApiError::HttpError { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "Resource not found");
        }
        other => panic!("expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_decode_failure() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"unexpected": true})))
        .mount(&server)
        .await;

    let client = client(&server);
    let result = client
        .execute_list::<Tract>(&RequestSpec::get("/data"), &ResponseDecoder::new())
        .await;

    assert!(matches!(result, Err(ApiError::DecodingFailed(_))));
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = RequestSpec::get("/slow").with_timeout(Duration::from_millis(200));
    let result = client.execute_empty(&spec).await;

    match result {
        Err(ApiError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(200)),
        other => panic!("expected Timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_network_error() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    // Token endpoint is live, data endpoint is not.
    let source = ClientCredentialsSource::new(
        format!("{}/as/token", server.uri()),
        "test-client-id",
        "test-client-secret",
    );
    let client = ApiClient::new(
        ApiClientConfig::new("http://127.0.0.1:1"),
        Arc::new(TokenCache::new(source)),
    )
    .unwrap();

    let result = client.execute_empty(&RequestSpec::get("/data")).await;
    assert!(matches!(result, Err(ApiError::NetworkError(_))));
}

#[tokio::test]
async fn test_truncated_error_body_is_reported() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    // Announces 100 body bytes, sends 7, then closes.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(
                b"HTTP/1.1 500 Internal Server Error\r\n\
                  Content-Length: 100\r\n\
                  Connection: close\r\n\r\n\
                  partial",
            )
            .await
            .unwrap();
    });

    let source = ClientCredentialsSource::new(
        format!("{}/as/token", server.uri()),
        "test-client-id",
        "test-client-secret",
    );
    let client = ApiClient::new(
        ApiClientConfig::new(format!("http://{}", addr)),
        Arc::new(TokenCache::new(source)),
    )
    .unwrap();

    match client.execute_empty(&RequestSpec::get("/data")).await {
        Err(ApiError::HttpError { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.starts_with("failed to read response body"), "body: {}", body);
        }
        other => panic!("expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    mount_token(&server, "T1", 1).await;

    Mock::given(method("POST"))
        .and(path("/v1/pool-prefix/multiple"))
        .and(wiremock::matchers::body_json(serde_json::json!({
            "poolPrefixRequests": [{"businessLine": "SF"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let spec = RequestSpec::post("/v1/pool-prefix/multiple").json(serde_json::json!({
        "poolPrefixRequests": [{"businessLine": "SF"}]
    }));
    let body: serde_json::Value = client.execute_json(&spec).await.unwrap();
    assert_eq!(body["ok"], true);
}
