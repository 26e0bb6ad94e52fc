//! Health endpoint tests

use serde_json::Value;

use crate::common::TestApp;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/health").await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_detailed_health_reports_components() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/health/detailed").await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["database"]["status"], "healthy");
    assert_eq!(body["components"]["audit"]["status"], "healthy");
    assert_eq!(body["components"]["audit"]["writeFailures"], 0);
}

#[tokio::test]
async fn test_liveness_and_readiness() {
    let app = TestApp::new().await;

    app.get("/api/v1/health/live").await.assert_ok();
    app.get("/api/v1/health/ready").await.assert_ok();
}
