//! HTTP route definitions.

mod auth;
mod health;
mod rows;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(rows::routes())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::TokenRegistry;
    use crate::config::Config;
    use crate::db::MemoryRowStore;
    use crate::rules::SyncRules;
    use crate::{build_app, AppState};

    fn app_with(config: Config) -> Router {
        let rules = SyncRules::from_json(include_str!("../../config/sync_rules.json")).unwrap();
        build_app(AppState {
            rows: Arc::new(MemoryRowStore::new()),
            rules: Arc::new(rules),
            tokens: Arc::new(TokenRegistry::new(Duration::from_secs(60))),
            config: Arc::new(config),
        })
    }

    fn app() -> Router {
        app_with(Config::default())
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn sign_in(app: &Router, identity: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/auth/token",
            None,
            Some(json!({"identity": identity, "secret": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tables"], 4);
    }

    #[tokio::test]
    async fn rows_require_a_known_token() {
        let app = app();

        let (status, body) = send(&app, Method::GET, "/rows/doctors", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "PGRST301");

        let (status, _) = send(&app, Method::GET, "/rows/doctors", Some("forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn shared_secret_gates_sign_in() {
        let app = app_with(Config {
            auth_secret: Some("s3cret".to_string()),
            ..Config::default()
        });

        let (status, _) = send(
            &app,
            Method::POST,
            "/auth/token",
            None,
            Some(json!({"identity": "alice", "secret": "guess"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app,
            Method::POST,
            "/auth/token",
            None,
            Some(json!({"identity": "alice", "secret": "s3cret"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].is_string());
        assert!(body["expiresAt"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn rows_are_scoped_to_the_callers_bucket() {
        let app = app();
        let alice = sign_in(&app, "alice").await;
        let bob = sign_in(&app, "bob").await;

        let (status, _) = send(
            &app,
            Method::PUT,
            "/rows/doctors/d-1",
            Some(&alice),
            Some(json!({"owner_id": "alice", "name": "Dr. Ada"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            Method::PUT,
            "/rows/patients/p-1",
            Some(&alice),
            Some(json!({"doctor_id": "d-1", "name": "Grace", "age": 41})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, rows) = send(&app, Method::GET, "/rows/patients", Some(&alice), None).await;
        assert_eq!(rows, json!([{"id": "p-1", "doctor_id": "d-1", "name": "Grace", "age": 41}]));

        let (_, rows) = send(&app, Method::GET, "/rows/patients", Some(&bob), None).await;
        assert_eq!(rows, json!([]));

        // Bob can neither attach patients to Alice's doctor nor read them.
        let (status, body) = send(
            &app,
            Method::PUT,
            "/rows/patients/p-2",
            Some(&bob),
            Some(json!({"doctor_id": "d-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "42501");

        let (status, body) = send(&app, Method::GET, "/rows/patients/p-1", Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "PGRST116");
    }

    #[tokio::test]
    async fn patches_cannot_leave_the_bucket() {
        let app = app();
        let alice = sign_in(&app, "alice").await;

        send(
            &app,
            Method::PUT,
            "/rows/doctors/d-1",
            Some(&alice),
            Some(json!({"owner_id": "alice", "name": "Dr. Ada"})),
        )
        .await;

        let (status, body) = send(
            &app,
            Method::PATCH,
            "/rows/doctors/d-1",
            Some(&alice),
            Some(json!({"name": "Dr. Ada Lovelace"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Dr. Ada Lovelace");
        assert_eq!(body["owner_id"], "alice");

        let (status, body) = send(
            &app,
            Method::PATCH,
            "/rows/doctors/d-1",
            Some(&alice),
            Some(json!({"owner_id": "bob"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "42501");
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let app = app();
        let alice = sign_in(&app, "alice").await;

        for method in [Method::PATCH, Method::DELETE] {
            let body = (method == Method::PATCH).then(|| json!({"name": "x"}));
            let (status, body) =
                send(&app, method, "/rows/doctors/ghost", Some(&alice), body).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["code"], "PGRST116");
        }

        send(
            &app,
            Method::PUT,
            "/rows/doctors/d-1",
            Some(&alice),
            Some(json!({"owner_id": "alice"})),
        )
        .await;
        let (status, _) = send(&app, Method::DELETE, "/rows/doctors/d-1", Some(&alice), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, Method::GET, "/rows/doctors/d-1", Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn schema_violations_carry_sqlstate_codes() {
        let app = app();
        let alice = sign_in(&app, "alice").await;

        let cases = [
            ("/rows/ghosts/g-1", json!({"name": "boo"}), "42P01"),
            ("/rows/doctors/d-1", json!({"shoe_size": 44}), "42703"),
            ("/rows/patients/p-1", json!({"age": "old"}), "22P02"),
        ];
        for (uri, payload, code) in cases {
            let (status, body) = send(&app, Method::PUT, uri, Some(&alice), Some(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["code"], code, "{}", uri);
        }
    }
}
