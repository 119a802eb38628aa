//! JSON-RPC 2.0 transport: a single HTTP POST endpoint exposing `start_speek`
//! and `stop_speek` per the wire format in `SPEC_FULL.md` §4.7.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::dispatcher::{DispatchError, Dispatcher};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    params: Value,
    /// Absent entirely for a notification; `Some(Value::Null)` is a request
    /// whose id happens to be JSON null, a distinct wire form.
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

enum RpcError {
    ParseError,
    MethodNotFound(String),
    InvalidParams(String),
    TooManyConversions,
    Internal,
}

impl RpcError {
    fn code(&self) -> i64 {
        match self {
            RpcError::ParseError => -32700,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::TooManyConversions => -32000,
            RpcError::Internal => -32603,
        }
    }

    fn message(&self) -> String {
        match self {
            RpcError::ParseError => "parse error".to_string(),
            RpcError::MethodNotFound(m) => format!("method not found: {m}"),
            RpcError::InvalidParams(m) => format!("invalid params: {m}"),
            RpcError::TooManyConversions => "server error".to_string(),
            RpcError::Internal => "internal error".to_string(),
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            RpcError::TooManyConversions => Some(Value::String("too many requests".into())),
            _ => None,
        }
    }

    fn into_body(self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code(),
            message: self.message(),
            data: self.data(),
        }
    }
}

impl From<DispatchError> for RpcError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::TooManyConversions => RpcError::TooManyConversions,
        }
    }
}

/// Builds the router serving both RPC methods at `path`, backed by `dispatcher`.
pub fn router(path: &str, dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().route(path, post(handle)).with_state(dispatcher)
}

async fn handle(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed JSON-RPC request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(RpcResponse {
                    jsonrpc: "2.0",
                    result: None,
                    error: Some(RpcError::ParseError.into_body()),
                    id: Value::Null,
                }),
            )
                .into_response();
        }
    };

    let is_notification = request.id.is_none();
    let id = request.id.clone().unwrap_or(Value::Null);
    let result = dispatch(&dispatcher, request).await;

    if is_notification {
        return StatusCode::OK.into_response();
    }

    let response = match result {
        Ok(value) => RpcResponse {
            jsonrpc: "2.0",
            result: Some(value),
            error: None,
            id,
        },
        Err(rpc_err) => RpcResponse {
            jsonrpc: "2.0",
            result: None,
            error: Some(rpc_err.into_body()),
            id,
        },
    };
    (StatusCode::OK, Json(response)).into_response()
}

async fn dispatch(dispatcher: &Arc<Dispatcher>, request: RpcRequest) -> Result<Value, RpcError> {
    // Isolate a panic inside dispatch logic (e.g. a future provider bug) from
    // taking down the whole HTTP server task.
    match request.method.as_str() {
        "start_speek" => {
            let (text, host, port, event_tag) = parse_start_params(&request.params)?;
            let dispatcher = dispatcher.clone();
            let handle = tokio::spawn(async move { dispatcher.start(text, host, port, event_tag).await });
            match handle.await {
                Ok(result) => Ok(Value::from(result?)),
                Err(join_err) => {
                    error!(error = %join_err, "start_speek handler panicked");
                    Err(RpcError::Internal)
                }
            }
        }
        "stop_speek" => {
            let request_id = parse_stop_params(&request.params)?;
            let dispatcher = dispatcher.clone();
            let handle = tokio::spawn(async move { dispatcher.stop(request_id) });
            match handle.await {
                Ok(stopped) => Ok(Value::from(stopped)),
                Err(join_err) => {
                    error!(error = %join_err, "stop_speek handler panicked");
                    Err(RpcError::Internal)
                }
            }
        }
        other => Err(RpcError::MethodNotFound(other.to_string())),
    }
}

fn parse_start_params(params: &Value) -> Result<(String, IpAddr, u16, String), RpcError> {
    let (text, host, port, event_tag) = match params {
        Value::Array(items) if items.len() == 4 => (
            items[0].clone(),
            items[1].clone(),
            items[2].clone(),
            items[3].clone(),
        ),
        Value::Object(map) => (
            map.get("text").cloned().unwrap_or(Value::Null),
            map.get("host").cloned().unwrap_or(Value::Null),
            map.get("port").cloned().unwrap_or(Value::Null),
            map.get("on_completed_event").cloned().unwrap_or(Value::Null),
        ),
        _ => return Err(RpcError::InvalidParams("expected a 4-element array or object".into())),
    };

    let text = text
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams("text must be a string".into()))?
        .to_string();
    let host: IpAddr = host
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams("host must be a string".into()))?
        .parse()
        .map_err(|_| RpcError::InvalidParams("host must be an IP address".into()))?;
    let port = port
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| RpcError::InvalidParams("port must be a u16".into()))?;
    let event_tag = event_tag
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams("on_completed_event must be a string".into()))?
        .to_string();

    Ok((text, host, port, event_tag))
}

fn parse_stop_params(params: &Value) -> Result<u64, RpcError> {
    let request_id = match params {
        Value::Array(items) if items.len() == 1 => items[0].clone(),
        Value::Object(map) => map.get("request_id").cloned().unwrap_or(Value::Null),
        _ => return Err(RpcError::InvalidParams("expected a 1-element array or object".into())),
    };
    request_id
        .as_u64()
        .ok_or_else(|| RpcError::InvalidParams("request_id must be a non-negative integer".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::tts::DemoTtsProvider;
    use axum::body::Body;
    use axum::http::Request;
    use std::num::NonZeroUsize;
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Debug, Default)]
    struct NullSink;
    impl EventSink for NullSink {
        fn publish(&self, _event: &str) {}
    }

    fn app() -> Router {
        let dispatcher = Arc::new(Dispatcher::new(
            10,
            Arc::new(DemoTtsProvider::new(Duration::from_millis(0))),
            Arc::new(NullSink),
            NonZeroUsize::new(8).unwrap(),
        ));
        router("/api/v1", dispatcher)
    }

    async fn post_json(app: Router, body: Value) -> Value {
        let response = app
            .oneshot(
                Request::post("/api/v1")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn start_speek_with_positional_params_returns_incrementing_ids() {
        let app = app();
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "start_speek",
            "params": ["hi", "127.0.0.1", 1, "tag"],
            "id": 1
        });
        let response = post_json(app, body).await;
        assert_eq!(response["result"], Value::from(1));
        assert_eq!(response["id"], Value::from(1));
    }

    #[tokio::test]
    async fn start_speek_with_named_params_is_equivalent() {
        let app = app();
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "start_speek",
            "params": {
                "text": "hi",
                "host": "127.0.0.1",
                "port": 1,
                "on_completed_event": "tag"
            },
            "id": "a"
        });
        let response = post_json(app, body).await;
        assert_eq!(response["result"], Value::from(1));
        assert_eq!(response["id"], "a");
    }

    #[tokio::test]
    async fn stop_speek_unknown_id_returns_false() {
        let app = app();
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "stop_speek",
            "params": [999],
            "id": 7
        });
        let response = post_json(app, body).await;
        assert_eq!(response["result"], Value::from(false));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let app = app();
        let body = serde_json::json!({"jsonrpc": "2.0", "method": "bogus", "params": [], "id": 1});
        let response = post_json(app, body).await;
        assert_eq!(response["error"]["code"], Value::from(-32601));
    }

    #[tokio::test]
    async fn malformed_body_is_a_transport_level_bad_request() {
        let app = app();
        let response = app
            .oneshot(
                Request::post("/api/v1")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], Value::from(-32700));
    }

    #[tokio::test]
    async fn notification_without_id_gets_an_empty_200_regardless_of_outcome() {
        let app = app();
        let body = serde_json::json!({"jsonrpc": "2.0", "method": "stop_speek", "params": [999]});
        let response = app
            .oneshot(
                Request::post("/api/v1")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn admission_rejection_surfaces_as_server_error_with_data() {
        let dispatcher = Arc::new(Dispatcher::new(
            0,
            Arc::new(DemoTtsProvider::new(Duration::from_millis(0))),
            Arc::new(NullSink),
            NonZeroUsize::new(8).unwrap(),
        ));
        let app = router("/api/v1", dispatcher);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "start_speek",
            "params": ["y", "127.0.0.1", 1, "tag"],
            "id": 1
        });
        let response = post_json(app, body).await;
        assert_eq!(response["error"]["code"], Value::from(-32000));
        assert_eq!(response["error"]["data"], "too many requests");
    }
}
