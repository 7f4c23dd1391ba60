#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use brightcal::components::google_calendar::models::TokenInfo;
use brightcal::components::google_calendar::token::AccessToken;
use brightcal::components::google_calendar::{
    CalendarService, CredentialKind, CredentialProvider, TokenSource,
};
use brightcal::config::{CalendarConfig, Config, GoogleEndpoints};
use brightcal::error::RemoteError;
use brightcal::handlers::{router, AppState};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_PROJECT: &str = "bright-prodigy-test";
pub const TEST_IDENTITY: &str = "calendar@bright-prodigy-test.iam.gserviceaccount.com";

/// Token source that never talks to Google
#[derive(Default)]
pub struct FakeTokens {
    pub fail_project: bool,
    pub fail_token_info: bool,
    /// Acquisition still succeeds; only minting a token fails
    pub fail_access_token: bool,
}

#[async_trait]
impl TokenSource for FakeTokens {
    async fn access_token(&self) -> Result<AccessToken, RemoteError> {
        if self.fail_access_token {
            return Err(RemoteError::Credentials(
                "Failed to obtain access token: invalid_grant".to_string(),
            ));
        }
        Ok(AccessToken {
            token: TEST_TOKEN.to_string(),
            expires_at: None,
        })
    }

    async fn project_id(&self) -> Result<String, RemoteError> {
        if self.fail_project {
            return Err(RemoteError::Credentials(
                "Unable to detect a Project Id in the current environment".to_string(),
            ));
        }
        Ok(TEST_PROJECT.to_string())
    }

    async fn token_info(&self) -> Result<TokenInfo, RemoteError> {
        if self.fail_token_info {
            return Err(RemoteError::Transport("tokeninfo unreachable".to_string()));
        }
        Ok(TokenInfo {
            email: Some(TEST_IDENTITY.to_string()),
            expiry: Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).single(),
        })
    }

    fn kind(&self) -> CredentialKind {
        CredentialKind::ApplicationDefault
    }
}

/// Credential provider that counts acquisitions
pub struct CountingProvider {
    calls: AtomicUsize,
    remaining_failures: AtomicUsize,
    delay: Duration,
    tokens: Arc<FakeTokens>,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self::with_tokens(FakeTokens::default())
    }

    pub fn with_tokens(tokens: FakeTokens) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            remaining_failures: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
            tokens: Arc::new(tokens),
        }
    }

    /// Fail the first `n` acquisitions
    pub fn failing(mut self, n: usize) -> Self {
        self.remaining_failures = AtomicUsize::new(n);
        self
    }

    /// Hold each acquisition open for `delay`
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn acquire(&self) -> Result<Arc<dyn TokenSource>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let should_fail = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(RemoteError::Credentials(
                "Could not load the default credentials".to_string(),
            ));
        }

        let tokens: Arc<dyn TokenSource> = self.tokens.clone();
        Ok(tokens)
    }
}

/// Config pointing the calendar API at the mock server
pub fn test_config(server: &MockServer) -> Config {
    let mut calendars = HashMap::new();
    calendars.insert("brightProdigy".to_string(), "bright-cal".to_string());
    calendars.insert("crew1".to_string(), "crew-cal".to_string());
    calendars.insert("pending".to_string(), "pending-cal".to_string());

    Config {
        calendars: CalendarConfig::new(calendars),
        endpoints: GoogleEndpoints {
            calendar_api: format!("{}/calendar/v3", server.uri()),
            tokeninfo_url: format!("{}/tokeninfo", server.uri()),
            metadata_host: server.uri(),
        },
        ..Config::default()
    }
}

pub fn events_path(calendar_id: &str) -> String {
    format!("/calendar/v3/calendars/{}/events", calendar_id)
}

pub fn service_with(server: &MockServer, provider: Arc<CountingProvider>) -> Arc<CalendarService> {
    Arc::new(CalendarService::new(&test_config(server), provider))
}

pub fn app(service: Arc<CalendarService>) -> Router {
    router(AppState::new(service))
}

/// Drive one request through the router and decode the JSON reply
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
