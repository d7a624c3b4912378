//! Profile endpoints: one contact record per signed-in identity.
//!
//! GET returns the stored record (empty when the identity has none yet),
//! POST replaces it wholesale. The identity is the bearer token, or the
//! value of the configured session cookie when no bearer token is sent.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderMap,
    },
    routing::get,
    Json, Router,
};
use safecircle_core::contacts::{Contact, ContactRecord, KeyValueStoreTrait};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

const PROFILE_KEY_PREFIX: &str = "profile:";

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn request_identity(headers: &HeaderMap, state: &AppState) -> ApiResult<String> {
    bearer_token(headers)
        .or_else(|| session_token(headers, &state.session_cookie))
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))
}

fn profile_key(identity: &str) -> String {
    format!("{}{}", PROFILE_KEY_PREFIX, identity)
}

fn validate_record(record: &ContactRecord) -> ApiResult<()> {
    if let Some(entry) = record.unrecognized_contacts.first() {
        // Decoding set this entry aside; surface why.
        let contact = serde_json::from_value::<Contact>(entry.clone())
            .map_err(|e| ApiError::BadRequest(format!("Malformed contact entry: {}", e)))?;
        contact.validate()?;
    }
    let mut seen = HashSet::new();
    for contact in &record.emergency_contacts {
        contact.validate()?;
        if !seen.insert(contact.id.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "Duplicate contact id '{}'",
                contact.id
            )));
        }
    }
    Ok(())
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<ContactRecord>> {
    let identity = request_identity(&headers, &state)?;
    let Some(raw) = state.kv.get(&profile_key(&identity)).await? else {
        debug!("[Server] No profile stored yet");
        return Ok(Json(ContactRecord::default()));
    };

    let record = serde_json::from_str::<ContactRecord>(&raw)
        .map_err(|e| ApiError::Internal(format!("Stored profile is unreadable: {}", e)))?;
    Ok(Json(record))
}

async fn replace_profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(record): Json<ContactRecord>,
) -> ApiResult<Json<Value>> {
    let identity = request_identity(&headers, &state)?;
    validate_record(&record)?;

    let raw = serde_json::to_string(&record)
        .map_err(|e| ApiError::Internal(format!("Failed to encode profile: {}", e)))?;
    state.kv.set(&profile_key(&identity), raw).await?;

    info!(
        "[Server] Stored profile with {} contacts",
        record.emergency_contacts.len()
    );
    Ok(Json(json!({
        "ok": true,
        "count": record.emergency_contacts.len(),
    })))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/profile", get(get_profile).post(replace_profile))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{body_json, test_app};
    use axum::body::Body;
    use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
    use axum::Router;
    use tower::ServiceExt;

    fn get_request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::get("/api/v1/profile");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).expect("request")
    }

    fn post_request(token: &str, body: serde_json::Value) -> Request<Body> {
        Request::post("/api/v1/profile")
            .header("authorization", format!("Bearer {}", token))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
        app.clone().oneshot(request).await.expect("response")
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = test_app();
        let response = send(&app, get_request(None)).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["detail"], "Not authenticated");
    }

    #[tokio::test]
    async fn unknown_identity_gets_an_empty_record() {
        let app = test_app();
        let response = send(&app, get_request(Some("new-user"))).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["emergencyContacts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn post_replaces_the_record_per_identity() {
        let app = test_app();
        let record = serde_json::json!({
            "emergencyContacts": [
                {"id": "temp_1", "name": "Mom", "phone": "555-0100", "relationship": "mother"}
            ],
            "userInfo": {"name": "Alex"},
            "medicalInfo": {"bloodType": "O+"}
        });

        let response = send(&app, post_request("alex", record)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["count"], 1);

        let body = body_json(send(&app, get_request(Some("alex"))).await).await;
        assert_eq!(body["emergencyContacts"][0]["name"], "Mom");
        assert_eq!(body["medicalInfo"]["bloodType"], "O+");

        let other = body_json(send(&app, get_request(Some("sam"))).await).await;
        assert_eq!(other["emergencyContacts"], serde_json::json!([]));

        let emptied = send(
            &app,
            post_request("alex", serde_json::json!({"emergencyContacts": []})),
        )
        .await;
        assert_eq!(emptied.status(), StatusCode::OK);
        let body = body_json(send(&app, get_request(Some("alex"))).await).await;
        assert_eq!(body["emergencyContacts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn invalid_contacts_are_rejected() {
        let app = test_app();
        let no_phone = serde_json::json!({
            "emergencyContacts": [{"id": "a", "name": "Mom", "phone": "n/a"}]
        });
        let response = send(&app, post_request("alex", no_phone)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let duplicate = serde_json::json!({
            "emergencyContacts": [
                {"id": "a", "name": "Mom", "phone": "555-0100"},
                {"id": "a", "name": "Dad", "phone": "555-0101"}
            ]
        });
        let response = send(&app, post_request("alex", duplicate)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_json(response).await["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("Duplicate"));

        let malformed = serde_json::json!({
            "emergencyContacts": [{"label": "not a contact"}]
        });
        let response = send(&app, post_request("alex", malformed)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(send(&app, get_request(Some("alex"))).await).await;
        assert_eq!(body["emergencyContacts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn session_cookie_identifies_the_caller() {
        let app = test_app();
        let record = serde_json::json!({
            "emergencyContacts": [{"id": "temp_1", "name": "Mom", "phone": "555-0100"}]
        });
        let stored = send(&app, post_request("alex", record)).await;
        assert_eq!(stored.status(), StatusCode::OK);

        let by_cookie = Request::get("/api/v1/profile")
            .header("cookie", "theme=dark; session=alex")
            .body(Body::empty())
            .expect("request");
        let response = send(&app, by_cookie).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["emergencyContacts"][0]["name"], "Mom");

        let other_cookie = Request::get("/api/v1/profile")
            .header("cookie", "sid=alex")
            .body(Body::empty())
            .expect("request");
        let response = send(&app, other_cookie).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
