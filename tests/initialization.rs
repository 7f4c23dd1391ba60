mod common;

use brightcal::components::google_calendar::InitPhase;
use brightcal::error::Error;
use common::{service_with, CountingProvider, TEST_PROJECT};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

#[tokio::test]
async fn test_concurrent_callers_share_one_initialization() {
    let server = MockServer::start().await;
    let provider = Arc::new(CountingProvider::new().slow(Duration::from_millis(100)));
    let service = service_with(&server, provider.clone());

    let initializer = service.initializer();
    assert_eq!(initializer.phase().await, InitPhase::Uninitialized);

    let (a, b, c) = tokio::join!(
        service.ensure_ready(),
        service.ensure_ready(),
        service.ensure_ready()
    );

    assert_eq!(a.unwrap().project_id, TEST_PROJECT);
    assert!(b.is_ok());
    assert!(c.is_ok());
    assert_eq!(provider.calls(), 1);
    assert_eq!(initializer.attempts(), 1);
    assert_eq!(initializer.phase().await, InitPhase::Ready);

    // Once ready, later calls reuse the handle
    service.ensure_ready().await.unwrap();
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_failed_initialization_is_retried() {
    let server = MockServer::start().await;
    let provider = Arc::new(CountingProvider::new().failing(1));
    let service = service_with(&server, provider.clone());

    let err = service.ensure_ready().await.err().unwrap();
    assert!(matches!(err, Error::Initialization(_)));
    assert!(err
        .to_string()
        .starts_with("Failed to initialize Google Calendar client: "));
    assert_eq!(
        service.initializer().phase().await,
        InitPhase::Uninitialized
    );

    let handle = service.ensure_ready().await.unwrap();
    assert_eq!(handle.project_id, TEST_PROJECT);
    assert_eq!(provider.calls(), 2);
    assert_eq!(service.initializer().attempts(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_a_failed_attempt() {
    let server = MockServer::start().await;
    let provider = Arc::new(
        CountingProvider::new()
            .failing(1)
            .slow(Duration::from_millis(100)),
    );
    let service = service_with(&server, provider.clone());

    let (a, b) = tokio::join!(service.ensure_ready(), service.ensure_ready());

    assert!(matches!(a, Err(Error::Initialization(_))));
    assert!(matches!(b, Err(Error::Initialization(_))));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_begin_initialization_runs_in_background() {
    let server = MockServer::start().await;
    let provider = Arc::new(CountingProvider::new().slow(Duration::from_millis(20)));
    let service = service_with(&server, provider.clone());

    service.begin_initialization();
    service.ensure_ready().await.unwrap();

    assert_eq!(service.initializer().phase().await, InitPhase::Ready);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_project_id_failure_fails_initialization() {
    let server = MockServer::start().await;
    let provider = Arc::new(CountingProvider::with_tokens(common::FakeTokens {
        fail_project: true,
        ..Default::default()
    }));
    let service = service_with(&server, provider);

    let err = service.ensure_ready().await.err().unwrap();
    assert!(err
        .to_string()
        .contains("Unable to detect a Project Id in the current environment"));
}
