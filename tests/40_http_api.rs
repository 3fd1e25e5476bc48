mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::Fixture;
use hr_approval_core::app::{app, AppState};
use hr_approval_core::authz::Role;
use hr_approval_core::tenant::TenantContext;

struct Api {
    router: Router,
    fixture: Fixture,
}

impl Api {
    fn new() -> Self {
        let fixture = Fixture::new();
        let router = app(AppState::new(fixture.engine.clone(), common::tokens()));
        Self { router, fixture }
    }

    fn bearer(ctx: &TenantContext) -> String {
        format!("Bearer {}", common::tokens().issue_access(ctx).unwrap())
    }

    async fn call(&self, method: Method, uri: &str, auth: Option<String>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

fn create_body(approver: Uuid, submit: bool) -> Value {
    json!({
        "title": "Overtime 2026-10-10",
        "document_type": "overtime",
        "reference_type": "OVERTIME_REQUEST",
        "reference_id": Uuid::new_v4(),
        "submit": submit,
        "lines": [
            { "approver_id": approver, "approver_name": "Kim", "approver_role": "TEAM_LEADER" }
        ]
    })
}

#[tokio::test]
async fn health_is_public() {
    let api = Api::new();
    let (status, body) = api.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn api_requires_access_token() {
    let api = Api::new();
    let (status, body) = api.call(Method::GET, &format!("/api/approvals/{}", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let drafter = api.fixture.user([Role::Employee]);
    let refresh = format!("Bearer {}", common::tokens().issue_refresh(&drafter).unwrap());
    let (status, _) = api
        .call(Method::GET, &format!("/api/approvals/{}", Uuid::new_v4()), Some(refresh), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_and_approve_over_http() {
    let api = Api::new();
    let drafter = api.fixture.user([Role::Employee]);
    let approver_id = Uuid::new_v4();
    let approver = api.fixture.as_user(approver_id, [Role::TeamLeader]);

    let (status, body) = api
        .call(Method::POST, "/api/approvals", Some(Api::bearer(&drafter)), Some(create_body(approver_id, true)))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "IN_PROGRESS");
    assert_eq!(body["data"]["lines"][0]["status"], "ACTIVE");

    let id = body["data"]["id"].as_str().unwrap().to_string();
    let line_id = body["data"]["lines"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = api
        .call(
            Method::POST,
            &format!("/api/approvals/{id}/lines/{line_id}/decision"),
            Some(Api::bearer(&approver)),
            Some(json!({ "decision": "APPROVE", "comment": "ok" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "APPROVED");

    // Second decision on the finished document
    let (status, body) = api
        .call(
            Method::POST,
            &format!("/api/approvals/{id}/lines/{line_id}/decision"),
            Some(Api::bearer(&approver)),
            Some(json!({ "decision": "REJECT" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "ALREADY_PROCESSED");
}

#[tokio::test]
async fn errors_carry_specific_codes() {
    let api = Api::new();
    let drafter = api.fixture.user([Role::Employee]);
    let approver_id = Uuid::new_v4();

    let (_, body) = api
        .call(Method::POST, "/api/approvals", Some(Api::bearer(&drafter)), Some(create_body(approver_id, true)))
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let line_id = body["data"]["lines"][0]["id"].as_str().unwrap().to_string();
    let decision_uri = format!("/api/approvals/{id}/lines/{line_id}/decision");

    // Same role as the line, but not the designated approver
    let peer = api.fixture.user([Role::TeamLeader]);
    let (status, body) = api
        .call(Method::POST, &decision_uri, Some(Api::bearer(&peer)), Some(json!({ "decision": "APPROVE" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_AUTHORIZED_TO_APPROVE");

    let foreign = TenantContext::new(Uuid::new_v4(), approver_id, [Role::SuperAdmin]);
    let (status, body) = api
        .call(Method::GET, &format!("/api/approvals/{id}"), Some(Api::bearer(&foreign)), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "TENANT_MISMATCH");

    let (status, body) = api
        .call(Method::POST, &format!("/api/approvals/{id}/submit"), Some(Api::bearer(&drafter)), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE_TRANSITION");

    let (status, body) = api
        .call(Method::POST, &decision_uri, Some(Api::bearer(&peer)), Some(json!({ "decision": "MAYBE" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_JSON");
}

#[tokio::test]
async fn drafter_cancels_draft() {
    let api = Api::new();
    let drafter = api.fixture.user([Role::Employee]);

    let (_, body) = api
        .call(Method::POST, "/api/approvals", Some(Api::bearer(&drafter)), Some(create_body(Uuid::new_v4(), false)))
        .await;
    assert_eq!(body["data"]["status"], "DRAFT");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = api
        .call(Method::POST, &format!("/api/approvals/{id}/cancel"), Some(Api::bearer(&drafter)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "CANCELLED");

    let (status, body) = api
        .call(Method::GET, &format!("/api/approvals/{id}"), Some(Api::bearer(&drafter)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "CANCELLED");
}

#[tokio::test]
async fn malformed_path_id_uses_error_envelope() {
    let api = Api::new();
    let drafter = api.fixture.user([Role::Employee]);
    let (status, body) = api
        .call(Method::GET, "/api/approvals/not-a-uuid", Some(Api::bearer(&drafter)), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn approver_delegates_then_delegate_approves() {
    let api = Api::new();
    let drafter = api.fixture.user([Role::Employee]);
    let approver_id = Uuid::new_v4();
    let deputy_id = Uuid::new_v4();
    let approver = api.fixture.as_user(approver_id, [Role::TeamLeader]);
    let deputy = api.fixture.as_user(deputy_id, [Role::Employee]);

    let (_, body) = api
        .call(Method::POST, "/api/approvals", Some(Api::bearer(&drafter)), Some(create_body(approver_id, true)))
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let line_id = body["data"]["lines"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = api
        .call(
            Method::POST,
            &format!("/api/approvals/{id}/lines/{line_id}/delegate"),
            Some(Api::bearer(&approver)),
            Some(json!({ "delegate_id": drafter.user_id })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "SELF_APPROVAL");

    let (status, body) = api
        .call(
            Method::POST,
            &format!("/api/approvals/{id}/lines/{line_id}/delegate"),
            Some(Api::bearer(&approver)),
            Some(json!({ "delegate_id": deputy_id, "comment": "business trip" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["lines"][0]["delegate_id"], deputy_id.to_string());
    assert_eq!(body["data"]["lines"][0]["status"], "ACTIVE");

    let (status, body) = api
        .call(
            Method::POST,
            &format!("/api/approvals/{id}/lines/{line_id}/decision"),
            Some(Api::bearer(&deputy)),
            Some(json!({ "decision": "DIRECT_APPROVE" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "APPROVED");
}
