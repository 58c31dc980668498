//! Permission guard integration tests.
//!
//! These run the real router against the in-memory permission store and cover
//! resolution priority, module toggles, caching, forced refresh and logout.

mod common;

use common::TestApp;
use dealergate::permissions::{AppModule, UserRole};
use serde_json::{json, Value};
use serial_test::serial;

async fn check(app: &TestApp, token: &str, module: &str, key: &str) -> Value {
    let response = app
        .post(
            "/me/permissions/check",
            token,
            json!({ "module": module, "permission_key": key }),
        )
        .await;
    assert_status!(response, 200);
    response.json().await.expect("Failed to parse response")
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
#[serial]
async fn guard_endpoints_require_a_token() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app.get_public("/me/permissions").await;

    // Assert
    assert_status!(response, 401);
}

#[tokio::test]
#[serial]
async fn guard_endpoints_require_dealership_context() {
    // Arrange
    let app = TestApp::spawn().await;
    let token = app.token(uuid::Uuid::new_v4(), None);

    // Act
    let response = app.get("/me/permissions", &token).await;

    // Assert
    assert_status!(response, 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DEALERSHIP_CONTEXT_REQUIRED");
}

#[tokio::test]
#[serial]
async fn tampered_token_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[]);
    let tampered = format!("{}x", member.token);

    // Act
    let response = app.get("/me/permissions", &tampered).await;

    // Assert
    assert_status!(response, 401);
}

// ============================================================================
// Custom roles
// ============================================================================

#[tokio::test]
#[serial]
async fn carwash_only_role_sees_only_car_wash() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[
        (AppModule::CarWash, "view"),
        (AppModule::CarWash, "create_orders"),
    ]);

    // Act
    let granted = check(&app, &member.token, "car_wash", "create_orders").await;
    let other = check(&app, &member.token, "sales_orders", "view").await;

    // Assert
    assert_eq!(granted["allowed"], true);
    assert_eq!(granted["reason"], "granted_by_role");
    assert_eq!(other["allowed"], false);
    assert_eq!(other["reason"], "not_granted");

    let response = app.get("/me/modules/sales_orders", &member.token).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["allowed"], false);

    let response = app.get("/me/modules/car_wash", &member.token).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["allowed"], true);
}

#[tokio::test]
#[serial]
async fn disabled_module_denies_granted_keys() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::GetReady, "view_vehicles")]);
    app.store
        .set_module(member.dealership_id, AppModule::GetReady, false);

    // Act
    let body = check(&app, &member.token, "get_ready", "view_vehicles").await;

    // Assert
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "module_disabled");
}

#[tokio::test]
#[serial]
async fn member_without_role_is_denied_everything() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.elevated_member(UserRole::User, false);

    // Act
    let response = app.get("/me/permissions", &member.token).await;

    // Assert
    assert_status!(response, 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["source"]["kind"], "no_role");
    assert_eq!(body["permissions"].as_array().unwrap().len(), 0);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
#[serial]
async fn unknown_module_is_denied_not_rejected() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Chat, "view")]);

    // Act
    let response = app.get("/me/modules/spaceships", &member.token).await;

    // Assert
    assert_status!(response, 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "unknown_module");
}

#[tokio::test]
#[serial]
async fn level_checks_require_every_backing_key() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[
        (AppModule::Stock, "view"),
        (AppModule::Stock, "edit"),
    ]);

    // Act
    let edit = app
        .post(
            "/me/permissions/check",
            &member.token,
            json!({ "module": "stock", "level": "edit" }),
        )
        .await;
    let delete = app
        .post(
            "/me/permissions/check",
            &member.token,
            json!({ "module": "stock", "level": "delete" }),
        )
        .await;

    // Assert
    let edit: Value = edit.json().await.unwrap();
    let delete: Value = delete.json().await.unwrap();
    assert_eq!(edit["allowed"], true);
    assert_eq!(delete["allowed"], false);
}

#[tokio::test]
#[serial]
async fn check_without_key_or_level_is_bad_request() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[]);

    // Act
    let response = app
        .post(
            "/me/permissions/check",
            &member.token,
            json!({ "module": "stock" }),
        )
        .await;

    // Assert
    assert_status!(response, 400);
}

// ============================================================================
// Elevated users
// ============================================================================

#[tokio::test]
#[serial]
async fn system_admin_ignores_module_toggles() {
    // Arrange
    let app = TestApp::spawn().await;
    let admin = app.elevated_member(UserRole::SystemAdmin, false);
    app.store
        .set_module(admin.dealership_id, AppModule::GetReady, false);

    // Act
    let body = check(&app, &admin.token, "get_ready", "anything_at_all").await;

    // Assert
    assert_eq!(body["allowed"], true);
    assert_eq!(body["reason"], "system_admin");
}

#[tokio::test]
#[serial]
async fn bypass_grants_enabled_modules_only() {
    // Arrange
    let app = TestApp::spawn().await;
    let manager = app.elevated_member(UserRole::Supermanager, true);
    app.store
        .set_module(manager.dealership_id, AppModule::Reports, false);

    // Act
    let enabled = check(&app, &manager.token, "sales_orders", "delete").await;
    let disabled = check(&app, &manager.token, "reports", "view").await;

    // Assert
    assert_eq!(enabled["allowed"], true);
    assert_eq!(enabled["reason"], "bypass");
    assert_eq!(disabled["allowed"], false);
    assert_eq!(disabled["reason"], "module_disabled");
}

#[tokio::test]
#[serial]
async fn supermanager_without_bypass_uses_custom_role() {
    // Arrange
    let app = TestApp::spawn().await;
    let manager = app.elevated_member(UserRole::Supermanager, false);

    // Act
    let body = check(&app, &manager.token, "sales_orders", "view").await;

    // Assert
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "no_role");
}

// ============================================================================
// Bulk checks
// ============================================================================

#[tokio::test]
#[serial]
async fn bulk_check_reports_each_denial() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Contacts, "view")]);

    // Act
    let response = app
        .post(
            "/me/permissions/check-bulk",
            &member.token,
            json!({
                "checks": [
                    { "module": "contacts", "permission_key": "view" },
                    { "module": "contacts", "permission_key": "export" },
                    { "module": "chat", "level": "view" }
                ]
            }),
        )
        .await;

    // Assert
    assert_status!(response, 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["all_allowed"], false);
    assert_eq!(body["results"].as_array().unwrap().len(), 3);
    assert_eq!(body["denied"], json!(["contacts.export", "chat:view"]));
}

#[tokio::test]
#[serial]
async fn bulk_check_rejects_empty_list() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[]);

    // Act
    let response = app
        .post(
            "/me/permissions/check-bulk",
            &member.token,
            json!({ "checks": [] }),
        )
        .await;

    // Assert
    assert_status!(response, 400);
}

// ============================================================================
// Caching, refresh and logout
// ============================================================================

#[tokio::test]
#[serial]
async fn session_keeps_answers_until_refresh() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Chat, "view")]);
    let role = check(&app, &member.token, "chat", "view").await;
    assert_eq!(role["allowed"], true);

    // Act
    app.store
        .set_module(member.dealership_id, AppModule::Chat, false);
    let before_refresh = check(&app, &member.token, "chat", "view").await;
    let refreshed = app
        .post("/me/permissions/refresh", &member.token, json!({}))
        .await;
    let after_refresh = check(&app, &member.token, "chat", "view").await;

    // Assert
    assert_eq!(before_refresh["allowed"], true);
    assert_status!(refreshed, 200);
    assert_eq!(after_refresh["allowed"], false);
}

#[tokio::test]
#[serial]
async fn repeated_requests_hit_the_store_once() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Chat, "view")]);
    let before = app.store.fetch_count();

    // Act
    for _ in 0..5 {
        check(&app, &member.token, "chat", "view").await;
    }

    // Assert
    assert_eq!(app.store.fetch_count() - before, 1);
}

#[tokio::test]
#[serial]
async fn rapid_refresh_is_rate_limited() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Chat, "view")]);

    // Act
    let first = app
        .post("/me/permissions/refresh", &member.token, json!({}))
        .await;
    let second = app
        .post("/me/permissions/refresh", &member.token, json!({}))
        .await;

    // Assert
    assert_status!(first, 200);
    assert_status!(second, 429);
    assert!(second.headers().contains_key("retry-after"));
}

#[tokio::test]
#[serial]
async fn logout_closes_the_session() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Chat, "view")]);
    check(&app, &member.token, "chat", "view").await;
    assert_eq!(app.state.sessions.len(), 1);

    // Act
    let first = app.post("/auth/logout", &member.token, json!({})).await;
    let second = app.post("/auth/logout", &member.token, json!({})).await;

    // Assert
    let first: Value = first.json().await.unwrap();
    let second: Value = second.json().await.unwrap();
    assert_eq!(first["sessions_closed"], 1);
    assert_eq!(second["sessions_closed"], 0);
    assert!(app.state.sessions.is_empty());
}

#[tokio::test]
#[serial]
async fn logout_without_dealership_closes_every_session() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Chat, "view")]);
    check(&app, &member.token, "chat", "view").await;
    let unscoped = app.token(member.user_id, None);

    // Act
    let response = app.post("/auth/logout", &unscoped, json!({})).await;

    // Assert
    assert_status!(response, 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["sessions_closed"], 1);
}

#[tokio::test]
#[serial]
async fn store_outage_denies_and_recovers() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Chat, "view")]);
    app.store.set_failing(true);

    // Act
    let during = app.get("/me/permissions", &member.token).await;
    let during: Value = during.json().await.unwrap();
    app.store.set_failing(false);
    let after = check(&app, &member.token, "chat", "view").await;

    // Assert
    assert_eq!(during["retryable"], true);
    assert_eq!(during["source"]["kind"], "unavailable");
    assert_eq!(after["allowed"], true);
}

// ============================================================================
// Admin authorization (rejected before any database access)
// ============================================================================

#[tokio::test]
#[serial]
async fn role_admin_requires_manage_roles() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Users, "view")]);

    // Act
    let response = app
        .post(
            "/roles",
            &member.token,
            json!({ "role_name": "carwash_only", "display_name": "Car Wash Only" }),
        )
        .await;

    // Assert
    assert_status!(response, 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "PERMISSION_DENIED");
}

#[tokio::test]
#[serial]
async fn module_toggle_requires_manage_modules() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Users, "manage_roles")]);

    // Act
    let response = app
        .put("/modules/car_wash", &member.token, json!({ "is_enabled": false }))
        .await;

    // Assert
    assert_status!(response, 403);
}

#[tokio::test]
#[serial]
async fn admin_endpoints_report_unavailable_permissions() {
    // Arrange
    let app = TestApp::spawn().await;
    let member = app.member_with_grants(&[(AppModule::Dealerships, "manage_modules")]);
    app.store.set_failing(true);

    // Act
    let response = app
        .put("/modules/car_wash", &member.token, json!({ "is_enabled": false }))
        .await;

    // Assert
    assert_status!(response, 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "PERMISSIONS_UNAVAILABLE");
}

#[tokio::test]
#[serial]
async fn bypass_changes_require_system_admin() {
    // Arrange
    let app = TestApp::spawn().await;
    let manager = app.elevated_member(UserRole::Supermanager, true);

    // Act
    let response = app
        .put(
            &format!("/users/{}/bypass", uuid::Uuid::new_v4()),
            &manager.token,
            json!({ "bypass_custom_roles": true }),
        )
        .await;

    // Assert
    assert_status!(response, 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "SYSTEM_ADMIN_REQUIRED");
}
