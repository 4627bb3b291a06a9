use crate::{
    controller::{health_check_controller, membership_controller, publish_controller},
    middleware::publish_auth::require_publish_token,
    ws::handler::ws_handler,
    AppState,
};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes(app_state.clone()))
        .merge(ws_routes(app_state.clone()))
        .merge(internal_routes(app_state))
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .with_state(app_state)
}

fn ws_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

fn internal_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/internal/publish", post(publish_controller::publish))
        .route(
            "/internal/membership",
            post(membership_controller::update_membership),
        )
        .route_layer(from_fn_with_state(app_state.clone(), require_publish_token))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use clap::Parser;
    use hub::{channel_pair, Hub, MessageType};
    use serde_json::{json, Value};
    use service::config::Config;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app_state(publish_token: Option<&str>) -> AppState {
        let config = Config::try_parse_from(["realtime_hub"])
            .unwrap()
            .set_publish_token(publish_token.map(str::to_string));
        let hub = Arc::new(Hub::new(config.hub_config().unwrap()));
        AppState::new(config, &hub)
    }

    fn publish_request(body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/internal/publish")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_connected_clients() {
        let state = app_state(None);
        let (connection, _peer) = channel_pair(8);
        state.hub.register(7, [], connection);

        let response = define_routes(state.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"status": "healthy", "clients": 1})
        );
        state.hub.shutdown().await;
    }

    #[tokio::test]
    async fn ws_without_subject_is_unauthorized() {
        let response = define_routes(app_state(None))
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_with_malformed_subject_is_rejected() {
        let response = define_routes(app_state(None))
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("x-subject-id", "not-a-number")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publish_delivers_to_the_scoped_user() {
        let state = app_state(None);
        let (connection, mut peer) = channel_pair(8);
        state.hub.register(7, [3], connection);

        let response = define_routes(state.clone())
            .oneshot(publish_request(
                json!({
                    "scope": {"type": "user", "subject_id": 7},
                    "invalidation": {"queryKeys": ["settings"]}
                }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"delivered": 1}));

        let envelope = peer.recv().await.unwrap().unwrap();
        assert_eq!(envelope.message_type(), &MessageType::Invalidate);
        let payload: Value = envelope.payload_json().unwrap();
        assert_eq!(payload["queryKeys"], json!(["settings"]));
        assert!(payload["timestamp"].as_i64().unwrap() > 0);

        state.hub.shutdown().await;
    }

    #[tokio::test]
    async fn publish_to_an_offline_group_delivers_nothing() {
        let response = define_routes(app_state(None))
            .oneshot(publish_request(
                json!({
                    "scope": {"type": "group", "group_id": 42},
                    "invalidation": {"event": "settings:updated"}
                }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"delivered": 0}));
    }

    #[tokio::test]
    async fn publish_requires_the_configured_token() {
        let body = json!({
            "scope": {"type": "broadcast"},
            "invalidation": {"queryKeys": ["settings"]}
        });

        let missing = define_routes(app_state(Some("s3cret")))
            .oneshot(publish_request(body.clone(), None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = define_routes(app_state(Some("s3cret")))
            .oneshot(publish_request(body.clone(), Some("guess")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let accepted = define_routes(app_state(Some("s3cret")))
            .oneshot(publish_request(body, Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn membership_change_moves_live_clients_between_groups() {
        let state = app_state(Some("s3cret"));
        let (connection, mut peer) = channel_pair(8);
        let client = state.hub.register(7, [3], connection);

        let request = Request::builder()
            .method("POST")
            .uri("/internal/membership")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::from(
                json!({"subject_id": 7, "group_ids": [5]}).to_string(),
            ))
            .unwrap();
        let response = define_routes(state.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"clients": 1}));
        assert_eq!(
            state.hub.groups_of(client.id()),
            Some(std::collections::HashSet::from([5]))
        );
        assert_eq!(state.hub.group_member_count(3), 0);

        let body = json!({
            "scope": {"type": "group", "group_id": 5},
            "invalidation": {"queryKeys": ["members"]}
        });
        let response = define_routes(state.clone())
            .oneshot(publish_request(body, Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"delivered": 1}));
        assert_eq!(
            peer.recv().await.unwrap().unwrap().message_type(),
            &MessageType::Invalidate
        );

        state.hub.shutdown().await;
    }

    #[tokio::test]
    async fn membership_requires_the_configured_token() {
        let response = define_routes(app_state(Some("s3cret")))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/membership")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"subject_id": 7}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn publish_with_unknown_scope_is_unprocessable() {
        let response = define_routes(app_state(None))
            .oneshot(publish_request(
                json!({
                    "scope": {"type": "planet", "id": 3},
                    "invalidation": {"queryKeys": ["settings"]}
                }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
