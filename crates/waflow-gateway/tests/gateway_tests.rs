// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Route-level tests driven through tower's oneshot, no sockets bound.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use waflow_core::types::{CloudCredentials, TicketStatus, TransportKind};
use waflow_core::{ConnectionId, TenantId};
use waflow_gateway::{build_router, AppState};
use waflow_notify::Notifier;
use waflow_router::Router;
use waflow_storage::queries::tickets;
use waflow_storage::Database;
use waflow_test_utils::{seed_connection, seed_contact, MockTransport};
use waflow_transport::{CloudSettings, CloudTransport, SessionRegistry};

struct Harness {
    app: axum::Router,
    db: Database,
    tenant: TenantId,
    connection: ConnectionId,
}

async fn harness(auth_token: Option<&str>) -> Harness {
    let db = Database::open_in_memory().await.unwrap();
    let notifier = Notifier::new();
    let registry = SessionRegistry::new();
    let tenant = TenantId(1);

    let connection = seed_connection(&db, tenant, TransportKind::Socket).await;
    let transport = Arc::new(MockTransport::new(TransportKind::Socket));
    registry.register(tenant, connection, transport);

    let (events_tx, events_rx) = mpsc::channel(64);
    let cloud = Arc::new(
        CloudTransport::new(
            CloudSettings {
                base_url: "http://localhost:0".into(),
                send_timeout: Duration::from_secs(1),
            },
            events_tx,
        )
        .unwrap(),
    );
    let cloud_connection = seed_connection(&db, tenant, TransportKind::CloudApi).await;
    cloud.register(
        cloud_connection,
        tenant,
        CloudCredentials {
            phone_number_id: "10987".into(),
            business_id: None,
            access_token: "tok".into(),
            webhook_verify_token: Some("verify-me".into()),
        },
    );

    let router = Arc::new(Router::new(db.clone(), notifier.clone(), registry));
    {
        let router = router.clone();
        tokio::spawn(async move { router.run(events_rx).await });
    }

    let state = AppState {
        db: db.clone(),
        router,
        notifier,
        cloud,
        auth_token: auth_token.map(str::to_string),
    };
    Harness {
        app: build_router(state),
        db,
        tenant,
        connection,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_open() {
    let h = harness(Some("secret")).await;
    let response = h
        .app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_verification_echoes_challenge() {
    let h = harness(None).await;
    let response = h
        .app
        .oneshot(
            Request::get(
                "/webhook/cloud?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=12345",
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"12345");
}

#[tokio::test]
async fn webhook_verification_rejects_bad_token() {
    let h = harness(None).await;
    let response = h
        .app
        .oneshot(
            Request::get("/webhook/cloud?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_post_is_always_200() {
    let h = harness(None).await;
    let response = h
        .app
        .clone()
        .oneshot(
            Request::post("/webhook/cloud")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("this is not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .app
        .oneshot(
            Request::post("/webhook/cloud")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"entry": "unexpected shape"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_message_flows_into_a_ticket() {
    let h = harness(None).await;
    let payload = json!({
        "entry": [{
            "changes": [{
                "value": {
                    "metadata": {"phone_number_id": "10987"},
                    "contacts": [{"profile": {"name": "Ana"}, "wa_id": "5215550001"}],
                    "messages": [{
                        "from": "5215550001",
                        "id": "wamid.IN1",
                        "timestamp": "1700000000",
                        "type": "text",
                        "text": {"body": "hola"}
                    }]
                }
            }]
        }]
    });
    let response = h
        .app
        .oneshot(
            Request::post("/webhook/cloud")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The router task consumes the event asynchronously.
    let mut ticket = None;
    for _ in 0..50 {
        let contact = seed_contact(&h.db, h.tenant, "5215550001").await;
        if let Some(found) = tickets::find_active_for_contact(&h.db, h.tenant, contact.id)
            .await
            .unwrap()
        {
            ticket = Some(found);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let ticket = ticket.expect("webhook message should open a ticket");
    assert_eq!(ticket.status, TicketStatus::Pending);
    assert_eq!(ticket.last_message.as_deref(), Some("hola"));
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let h = harness(Some("secret")).await;
    let body = json!({
        "tenant_id": h.tenant.0,
        "recipient": "5215550001",
        "content": {"type": "text", "body": "hi"}
    });

    let request = |auth: Option<&str>| {
        let mut builder = Request::post(format!("/v1/connections/{}/messages", h.connection.0))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    };

    let response = h.app.clone().oneshot(request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .app
        .clone()
        .oneshot(request(Some("Bearer wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h.app.oneshot(request(Some("Bearer secret"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn send_endpoint_returns_receipt() {
    let h = harness(None).await;
    let body = json!({
        "tenant_id": h.tenant.0,
        "recipient": "5215550001",
        "content": {"type": "text", "body": "hi"}
    });
    let response = h
        .app
        .oneshot(
            Request::post(format!("/v1/connections/{}/messages", h.connection.0))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["wire_message_id"], "MOCK-1");
    assert_eq!(json["message_id"], Value::Null);
}

#[tokio::test]
async fn send_to_unknown_connection_is_bad_gateway() {
    let h = harness(None).await;
    let body = json!({
        "tenant_id": h.tenant.0,
        "recipient": "5215550001",
        "content": {"type": "text", "body": "hi"}
    });
    let response = h
        .app
        .oneshot(
            Request::post("/v1/connections/999/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn close_endpoint_closes_ticket() {
    let h = harness(None).await;
    let contact = seed_contact(&h.db, h.tenant, "5215550001").await;
    let ticket = tickets::create_ticket(
        &h.db,
        tickets::NewTicket {
            tenant_id: h.tenant,
            contact_id: contact.id,
            connection_id: h.connection,
            department_id: None,
            chat_id: "5215550001@s.whatsapp.net".into(),
        },
    )
    .await
    .unwrap();

    let response = h
        .app
        .oneshot(
            Request::post(format!("/v1/tickets/{}/close", ticket.id.0))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"tenant_id": h.tenant.0, "reason": "resolved"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "closed");
    assert_eq!(json["close_reason"], "resolved");
}

#[tokio::test]
async fn update_endpoint_rejects_foreign_tenant() {
    let h = harness(None).await;
    let contact = seed_contact(&h.db, h.tenant, "5215550001").await;
    let ticket = tickets::create_ticket(
        &h.db,
        tickets::NewTicket {
            tenant_id: h.tenant,
            contact_id: contact.id,
            connection_id: h.connection,
            department_id: None,
            chat_id: "5215550001@s.whatsapp.net".into(),
        },
    )
    .await
    .unwrap();

    let response = h
        .app
        .oneshot(
            Request::patch(format!("/v1/tickets/{}", ticket.id.0))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"tenant_id": 999, "priority": "high"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
