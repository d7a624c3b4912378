mod profile;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::main_lib::AppState;

async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .nest("/api/v1", profile::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::config::{ServerConfig, DEFAULT_SESSION_COOKIE};
    use crate::main_lib::build_state;

    pub(crate) fn test_app() -> Router {
        let data_dir = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().expect("addr"),
            data_dir,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
        };
        app_router(build_state(&config).expect("state"))
    }

    pub(crate) async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        if bytes.is_empty() {
            return Value::Null;
        }
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn root_returns_greeting() {
        let response = test_app()
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "Hello World");
    }
}
