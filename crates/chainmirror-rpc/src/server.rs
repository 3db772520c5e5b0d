//! HTTP transport: JSON-RPC 2.0 over POST, single requests and batches.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

use chainmirror_core::error::MirrorError;
use chainmirror_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse, RpcId};

use crate::dispatch::Dispatcher;
use crate::error::RpcError;

/// Axum router serving JSON-RPC on `/`.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", post(handle_body))
        .with_state(dispatcher)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: F,
) -> Result<(), MirrorError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| MirrorError::Other(format!("listener address: {e}")))?;
    info!(%addr, "JSON-RPC server listening");
    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| MirrorError::Other(format!("server: {e}")))
}

async fn handle_body(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> Json<Value> {
    Json(handle_payload(&dispatcher, &body).await)
}

fn error_response(error: RpcError) -> JsonRpcResponse {
    JsonRpcResponse::failure(RpcId::Null, error.to_json_error())
}

async fn handle_one(dispatcher: &Dispatcher, value: Value) -> JsonRpcResponse {
    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(req) => dispatcher.handle(req).await,
        Err(e) => error_response(RpcError::InvalidRequest(e.to_string())),
    }
}

fn to_json(resp: JsonRpcResponse) -> Value {
    serde_json::to_value(resp).unwrap_or(Value::Null)
}

/// Decode a raw body and answer it. Batches are answered in order.
pub async fn handle_payload(dispatcher: &Dispatcher, body: &[u8]) -> Value {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return to_json(error_response(RpcError::Parse(e.to_string()))),
    };

    match value {
        Value::Array(items) if items.is_empty() => {
            to_json(error_response(RpcError::InvalidRequest("empty batch".into())))
        }
        Value::Array(items) => {
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                responses.push(to_json(handle_one(dispatcher, item).await));
            }
            Value::Array(responses)
        }
        Value::Object(_) => to_json(handle_one(dispatcher, value).await),
        other => to_json(error_response(RpcError::InvalidRequest(format!(
            "expected an object or a batch, got {other}"
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmirror_storage::MemoryStore;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(MemoryStore::new()), 1, 100)
    }

    #[tokio::test]
    async fn invalid_json_is_parse_error() {
        let resp = handle_payload(&dispatcher(), b"{not json").await;
        assert_eq!(resp["error"]["code"], json!(-32700));
        assert!(resp["id"].is_null());
    }

    #[tokio::test]
    async fn non_request_is_invalid_request() {
        let d = dispatcher();
        for body in [&b"42"[..], b"[]", br#"{"jsonrpc":"2.0","id":1}"#] {
            let resp = handle_payload(&d, body).await;
            assert_eq!(resp["error"]["code"], json!(-32600), "{resp}");
        }
    }

    #[tokio::test]
    async fn batch_answers_in_order() {
        let body = json!([
            { "jsonrpc": "2.0", "id": 1, "method": "eth_chainId" },
            { "jsonrpc": "2.0", "id": "two", "method": "eth_mining" },
            { "jsonrpc": "2.0", "id": 3, "method": "eth_blockNumber", "params": [] }
        ]);
        let resp = handle_payload(&dispatcher(), body.to_string().as_bytes()).await;
        let items = resp.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["result"], json!("0x1"));
        assert_eq!(items[1]["id"], json!("two"));
        assert_eq!(items[1]["error"]["code"], json!(-32004));
        assert_eq!(items[2]["result"], json!("0x0"));
    }

    #[tokio::test]
    async fn null_result_is_serialized() {
        let body = br#"{"jsonrpc":"2.0","id":7,"method":"eth_getBlockByNumber","params":["latest",false]}"#;
        let resp = handle_payload(&dispatcher(), body).await;
        assert!(resp.as_object().unwrap().contains_key("result"));
        assert!(resp["result"].is_null());
    }

    #[tokio::test]
    async fn serves_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, Arc::new(dispatcher()), async {
            let _ = rx.await;
        }));

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "net_version" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["id"], json!(1));
        assert_eq!(body["result"], json!("1"));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
