//! The seen-list handler: one resource, `/seen`, read or replaced per user.
//!
//! Every request ends in exactly one response carrying the CORS header set,
//! and touches the store at most once:
//!
//! - `OPTIONS` anywhere: empty 200, no store access
//! - any other method off `/seen`: 404
//! - `GET /seen`: stored bytes verbatim, or `[]` if the user has none
//! - `PUT /seen`: pin check, then array check, then unconditional overwrite
//! - anything else on `/seen`: 405

use std::fmt;
use std::sync::Arc;

use axum::extract::{Query, Request};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header;
use http::HeaderValue;
use http_body_util::LengthLimitError;
use serde::Serialize;
use tracing::Instrument;

use crate::error::SeenError;
use crate::request_id;
use crate::store::SeenStore;

/// The only resource path served.
pub const SEEN_PATH: &str = "/seen";

/// Header carrying the write pin.
pub const PIN_HEADER: &str = "x-pin";

const USER_PARAM: &str = "user";
const DEFAULT_USER: &str = "default";
const STORAGE_PREFIX: &str = "seen:";
const EMPTY_LIST: &[u8] = b"[]";

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET, PUT, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, X-Pin";

/// Normalized `user` query parameter.
///
/// Absent and empty both collapse to `default`; if the parameter repeats, the
/// first occurrence wins. The value is otherwise used verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKey(String);

impl UserKey {
    pub fn from_uri(uri: &Uri) -> Self {
        let user = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .ok()
            .and_then(|Query(pairs)| {
                pairs
                    .into_iter()
                    .find(|(name, _)| name == USER_PARAM)
                    .map(|(_, value)| value)
            })
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        Self(user)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which this user's list lives in the store: `seen:<user>`.
    pub fn storage_key(&self) -> String {
        format!("{STORAGE_PREFIX}{}", self.0)
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Success body for a PUT: `{"ok":true,"count":N}`.
#[derive(Debug, Serialize)]
struct WriteAck {
    ok: bool,
    count: usize,
}

/// Stateless dispatcher over an injected store. Cheap to clone.
#[derive(Clone)]
pub struct SeenHandler {
    store: Arc<dyn SeenStore>,
    pin: Arc<str>,
    max_body_bytes: usize,
}

impl SeenHandler {
    pub fn new(store: Arc<dyn SeenStore>, pin: impl Into<Arc<str>>, max_body_bytes: usize) -> Self {
        Self {
            store,
            pin: pin.into(),
            max_body_bytes,
        }
    }

    /// Turn one request into one response. Never fails: every error is
    /// rendered, and CORS headers are attached on every path.
    pub async fn handle(&self, request: Request) -> Response {
        let request_id = request_id::generate_id();
        let span =
            seen_tracing::seen_request_span!(&request_id, request.method(), request.uri().path());

        async {
            let mut response = match self.route(request).await {
                Ok(response) => response,
                Err(e) => {
                    log_rejection(&e);
                    e.into_response()
                }
            };
            apply_cors(response.headers_mut());
            tracing::Span::current().record("status", response.status().as_u16());
            response
        }
        .instrument(span)
        .await
    }

    async fn route(&self, request: Request) -> Result<Response, SeenError> {
        if *request.method() == Method::OPTIONS {
            return Ok(StatusCode::OK.into_response());
        }

        if request.uri().path() != SEEN_PATH {
            return Err(SeenError::NotFound);
        }

        let user = UserKey::from_uri(request.uri());
        tracing::Span::current().record("user", user.as_str());

        match *request.method() {
            Method::GET => self.read(&user).await,
            Method::PUT => self.write(&user, request).await,
            _ => Err(SeenError::MethodNotAllowed),
        }
    }

    async fn read(&self, user: &UserKey) -> Result<Response, SeenError> {
        let key = user.storage_key();
        let stored = self
            .store
            .get(&key)
            .instrument(seen_tracing::store_op_span!("get", &key))
            .await?;

        let body = stored.unwrap_or_else(|| Bytes::from_static(EMPTY_LIST));
        Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
    }

    async fn write(&self, user: &UserKey, request: Request) -> Result<Response, SeenError> {
        if !self.pin_matches(request.headers()) {
            return Err(SeenError::InvalidPin);
        }

        if declared_length(request.headers()).is_some_and(|len| len > self.max_body_bytes) {
            return Err(SeenError::BodyTooLarge {
                limit: self.max_body_bytes,
            });
        }

        let body = axum::body::to_bytes(request.into_body(), self.max_body_bytes)
            .await
            .map_err(|e| {
                if exceeded_limit(&e) {
                    SeenError::BodyTooLarge {
                        limit: self.max_body_bytes,
                    }
                } else {
                    SeenError::UnreadableBody(e)
                }
            })?;

        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(SeenError::InvalidJson)?;
        let serde_json::Value::Array(items) = value else {
            return Err(SeenError::NotAnArray);
        };

        let count = items.len();
        let encoded = serde_json::to_vec(&items).map_err(SeenError::Encode)?;

        let key = user.storage_key();
        self.store
            .put(&key, Bytes::from(encoded))
            .instrument(seen_tracing::store_op_span!("put", &key))
            .await?;

        tracing::info!(user = %user, count, "Seen list replaced");
        Ok(axum::Json(WriteAck { ok: true, count }).into_response())
    }

    fn pin_matches(&self, headers: &HeaderMap) -> bool {
        headers
            .get(PIN_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|pin| pin == &*self.pin)
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Whether a body read failed because it ran past the size limit, as opposed
/// to the stream itself breaking.
fn exceeded_limit(err: &axum::Error) -> bool {
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cause {
        if e.is::<LengthLimitError>() {
            return true;
        }
        cause = e.source();
    }
    false
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
}

fn log_rejection(err: &SeenError) {
    match err {
        SeenError::NotFound | SeenError::MethodNotAllowed => {
            tracing::debug!(error = %err, "Request rejected");
        }
        SeenError::Store(e) => {
            let cause = std::error::Error::source(e).map(ToString::to_string);
            tracing::error!(error = %e, cause = ?cause, "Store operation failed");
        }
        SeenError::Encode(_) => {
            tracing::error!(error = %err, "Failed to encode seen list");
        }
        _ => {
            tracing::warn!(error = %err, "Request rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::Body;

    use crate::store::{MemoryStore, StoreError};

    const PIN: &str = "7714";

    fn handler_with_store() -> (SeenHandler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let handler = SeenHandler::new(store.clone(), PIN, 1024);
        (handler, store)
    }

    fn request(method: &str, uri: &str, pin: Option<&str>, body: &str) -> Request {
        let mut builder = http::Request::builder().method(method).uri(uri);
        if let Some(pin) = pin {
            builder = builder.header("X-Pin", pin);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(handler: &SeenHandler, request: Request) -> (StatusCode, HeaderMap, String) {
        let response = handler.handle(request).await;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn assert_cors(headers: &HeaderMap) {
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "GET, PUT, OPTIONS");
        assert_eq!(headers["access-control-allow-headers"], "Content-Type, X-Pin");
    }

    /// Store whose every call fails, for the 500 path.
    struct BrokenStore;

    #[async_trait]
    impl SeenStore for BrokenStore {
        async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
            Err(StoreError::Read {
                key: key.to_string(),
                path: "/broken".into(),
                source: std::io::Error::other("disk gone"),
            })
        }

        async fn put(&self, key: &str, _value: Bytes) -> Result<(), StoreError> {
            Err(StoreError::Write {
                key: key.to_string(),
                path: "/broken".into(),
                source: std::io::Error::other("disk gone"),
            })
        }
    }

    #[test]
    fn test_user_key_defaults_when_absent_or_empty() {
        let absent = UserKey::from_uri(&"/seen".parse().unwrap());
        let empty = UserKey::from_uri(&"/seen?user=".parse().unwrap());
        let other = UserKey::from_uri(&"/seen?list=x".parse().unwrap());

        assert_eq!(absent.as_str(), "default");
        assert_eq!(empty.as_str(), "default");
        assert_eq!(other.as_str(), "default");
        assert_eq!(absent.storage_key(), "seen:default");
    }

    #[test]
    fn test_user_key_is_decoded_and_first_wins() {
        let key = UserKey::from_uri(&"/seen?user=j%C3%BCrgen+k&user=bob".parse().unwrap());
        assert_eq!(key.as_str(), "jürgen k");
        assert_eq!(key.storage_key(), "seen:jürgen k");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_for_any_method() {
        let (handler, _) = handler_with_store();

        for method in ["GET", "PUT", "POST", "DELETE"] {
            let (status, headers, body) =
                send(&handler, request(method, "/other?user=alice", Some(PIN), "[]")).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method}");
            assert_eq!(body, "Not found");
            assert_cors(&headers);
        }

        let (status, _, _) = send(&handler, request("GET", "/seen/extra", None, "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unsupported_method_is_405() {
        let (handler, _) = handler_with_store();

        for method in ["POST", "DELETE", "PATCH", "HEAD"] {
            let (status, headers, _) = send(&handler, request(method, "/seen", None, "")).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{method}");
            assert_cors(&headers);
        }

        let (_, _, body) = send(&handler, request("POST", "/seen", None, "")).await;
        assert_eq!(body, "Method not allowed");
    }

    #[tokio::test]
    async fn test_preflight_is_empty_200_on_any_path() {
        let (handler, store) = handler_with_store();

        for uri in ["/seen", "/anything"] {
            let (status, headers, body) = send(&handler, request("OPTIONS", uri, None, "")).await;
            assert_eq!(status, StatusCode::OK);
            assert!(body.is_empty());
            assert_cors(&headers);
        }
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_get_before_any_write_is_empty_array() {
        let (handler, _) = handler_with_store();

        let (status, headers, body) =
            send(&handler, request("GET", "/seen?user=alice", None, "")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(body, "[]");
        assert_cors(&headers);
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let (handler, store) = handler_with_store();

        let (status, headers, body) =
            send(&handler, request("PUT", "/seen?user=alice", Some(PIN), "[1,2,3]")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true,"count":3}"#);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_cors(&headers);

        let stored = store.get("seen:alice").await.unwrap();
        assert_eq!(stored.as_deref(), Some(&b"[1,2,3]"[..]));

        let (status, _, body) = send(&handler, request("GET", "/seen?user=alice", None, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[1,2,3]");
    }

    #[tokio::test]
    async fn test_put_stores_compact_json_and_keeps_element_order() {
        let (handler, _) = handler_with_store();

        let body = r#"[ "tt0113189",  {"z": 1, "a": 2}, 3 ]"#;
        let (status, _, ack) = send(&handler, request("PUT", "/seen", Some(PIN), body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, r#"{"ok":true,"count":3}"#);

        let (_, _, stored) = send(&handler, request("GET", "/seen", None, "")).await;
        assert_eq!(stored, r#"["tt0113189",{"z":1,"a":2},3]"#);
    }

    #[tokio::test]
    async fn test_get_returns_stored_bytes_verbatim() {
        let (handler, store) = handler_with_store();
        store
            .put("seen:alice", Bytes::from_static(b"[ 1, 2 ]"))
            .await
            .unwrap();

        let (_, _, body) = send(&handler, request("GET", "/seen?user=alice", None, "")).await;
        assert_eq!(body, "[ 1, 2 ]");
    }

    #[tokio::test]
    async fn test_wrong_or_missing_pin_is_403_and_store_untouched() {
        let (handler, _) = handler_with_store();
        send(&handler, request("PUT", "/seen?user=alice", Some(PIN), "[1]")).await;

        for pin in [None, Some("0000"), Some(""), Some("7714 ")] {
            let (status, headers, body) =
                send(&handler, request("PUT", "/seen?user=alice", pin, "[9,9]")).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{pin:?}");
            assert_eq!(body, r#"{"error":"Invalid PIN"}"#);
            assert_cors(&headers);
        }

        let (_, _, body) = send(&handler, request("GET", "/seen?user=alice", None, "")).await;
        assert_eq!(body, "[1]");
    }

    #[tokio::test]
    async fn test_pin_is_checked_before_body() {
        let (handler, _) = handler_with_store();

        let (status, _, body) =
            send(&handler, request("PUT", "/seen", Some("0000"), "not json")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, r#"{"error":"Invalid PIN"}"#);
    }

    #[tokio::test]
    async fn test_non_array_body_is_400_and_store_untouched() {
        let (handler, store) = handler_with_store();

        for body in [r#"{"a":1}"#, "42", r#""x""#, "null"] {
            let (status, headers, response) =
                send(&handler, request("PUT", "/seen?user=alice", Some(PIN), body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(response, r#"{"error":"Body must be a JSON array"}"#);
            assert_cors(&headers);
        }
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_json_is_400_not_500() {
        let (handler, store) = handler_with_store();

        for body in ["[1,2", "", "{oops}"] {
            let (status, _, response) =
                send(&handler, request("PUT", "/seen", Some(PIN), body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");
            assert_eq!(response, r#"{"error":"Body must be a JSON array"}"#);
        }
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_mixed_element_types_are_accepted() {
        let (handler, _) = handler_with_store();

        let (status, _, body) =
            send(&handler, request("PUT", "/seen", Some(PIN), r#"[{}, "x", null, [1]]"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true,"count":4}"#);
    }

    #[tokio::test]
    async fn test_empty_array_overwrites_previous_list() {
        let (handler, _) = handler_with_store();
        send(&handler, request("PUT", "/seen", Some(PIN), "[1,2]")).await;

        let (_, _, ack) = send(&handler, request("PUT", "/seen", Some(PIN), "[]")).await;
        assert_eq!(ack, r#"{"ok":true,"count":0}"#);

        let (_, _, body) = send(&handler, request("GET", "/seen", None, "")).await;
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_omitted_user_shares_default_list() {
        let (handler, store) = handler_with_store();

        send(&handler, request("PUT", "/seen", Some(PIN), "[5]")).await;

        assert!(store.get("seen:default").await.unwrap().is_some());
        let (_, _, implicit) = send(&handler, request("GET", "/seen", None, "")).await;
        let (_, _, explicit) = send(&handler, request("GET", "/seen?user=default", None, "")).await;
        assert_eq!(implicit, "[5]");
        assert_eq!(explicit, "[5]");
    }

    #[tokio::test]
    async fn test_users_do_not_share_lists() {
        let (handler, _) = handler_with_store();

        send(&handler, request("PUT", "/seen?user=alice", Some(PIN), "[1]")).await;

        let (_, _, body) = send(&handler, request("GET", "/seen?user=bob", None, "")).await;
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_repeated_put_is_idempotent() {
        let (handler, store) = handler_with_store();

        let first = send(&handler, request("PUT", "/seen?user=a", Some(PIN), "[3,1,3]")).await;
        let after_first = store.get("seen:a").await.unwrap();
        let second = send(&handler, request("PUT", "/seen?user=a", Some(PIN), "[3,1,3]")).await;
        let after_second = store.get("seen:a").await.unwrap();

        assert_eq!(first.0, second.0);
        assert_eq!(first.2, second.2);
        assert_eq!(first.2, r#"{"ok":true,"count":3}"#);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let (handler, store) = handler_with_store();
        let big = format!("[{}]", vec!["1"; 1000].join(","));

        let (status, headers, body) = send(
            &handler,
            http::Request::builder()
                .method("PUT")
                .uri("/seen")
                .header("X-Pin", PIN)
                .header(header::CONTENT_LENGTH, big.len())
                .body(Body::from(big))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, r#"{"error":"Body too large"}"#);
        assert_cors(&headers);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_oversized_body_without_length_is_413() {
        let (handler, store) = handler_with_store();
        let big = format!("[{}]", vec!["1"; 1000].join(","));

        let (status, headers, body) =
            send(&handler, request("PUT", "/seen", Some(PIN), &big)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, r#"{"error":"Body too large"}"#);
        assert_cors(&headers);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_500_with_cors() {
        let handler = SeenHandler::new(Arc::new(BrokenStore), PIN, 1024);

        let (status, headers, body) = send(&handler, request("GET", "/seen", None, "")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"error":"Storage failure"}"#);
        assert_cors(&headers);

        let (status, headers, body) =
            send(&handler, request("PUT", "/seen", Some(PIN), "[1]")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, r#"{"error":"Storage failure"}"#);
        assert_cors(&headers);
    }
}
