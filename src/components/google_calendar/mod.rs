pub mod api;
pub mod init;
pub mod models;
pub mod token;

pub use init::{AuthHandle, InitPhase, Initializer};
pub use models::{AuthReport, CalendarEvent, CalendarEventResponse, ListOptions};
pub use token::{ApplicationDefaultCredentials, CredentialKind, CredentialProvider, TokenSource};

use crate::config::{CalendarConfig, CalendarKey, Config, Environment};
use crate::error::{AppResult, Error};
use chrono::{SecondsFormat, Utc};
use api::to_remote_event;
use models::EventQuery;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Calendar read to confirm API access
const ACCESS_CHECK_CALENDAR: &str = "primary";

/// Google Calendar client keyed by calendar key
pub struct CalendarService {
    calendars: CalendarConfig,
    environment: Environment,
    initializer: Arc<Initializer>,
}

impl CalendarService {
    /// Create a service that authenticates through `provider`
    pub fn new(config: &Config, provider: Arc<dyn CredentialProvider>) -> Self {
        let initializer = Initializer::new(
            provider,
            config.endpoints.calendar_api.clone(),
            config.environment,
        );

        Self {
            calendars: config.calendars.clone(),
            environment: config.environment,
            initializer: Arc::new(initializer),
        }
    }

    /// Create a service using Application Default Credentials
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::new(ApplicationDefaultCredentials::new(config)))
    }

    /// Kick off initialization in the background without waiting for it
    pub fn begin_initialization(&self) {
        let initializer = Arc::clone(&self.initializer);
        tokio::spawn(async move {
            if let Err(e) = initializer.ensure_ready().await {
                warn!("Google Calendar client not ready, will retry on next request: {}", e);
            }
        });
    }

    pub fn initializer(&self) -> &Arc<Initializer> {
        &self.initializer
    }

    pub async fn ensure_ready(&self) -> AppResult<Arc<AuthHandle>> {
        self.initializer.ensure_ready().await
    }

    /// Resolve a calendar key to its Google calendar id
    pub fn calendar_id(&self, key: &CalendarKey) -> AppResult<&str> {
        self.calendars.resolve(key)
    }

    /// List upcoming events, defaulting to events from now onwards
    pub async fn list_events(
        &self,
        key: &CalendarKey,
        options: ListOptions,
    ) -> AppResult<Vec<CalendarEventResponse>> {
        let calendar_id = self.calendar_id(key)?;
        let query = EventQuery::from_options(options, Utc::now())?;
        let handle = self.ensure_ready().await?;

        handle
            .api
            .list_events(calendar_id, &query)
            .await
            .map_err(|e| {
                e.log("list_events");
                Error::Calendar {
                    context: "Error fetching calendar events",
                    source: e,
                }
            })
    }

    /// Create an event. The payload is forwarded as-is.
    pub async fn create_event(
        &self,
        key: &CalendarKey,
        event: &CalendarEvent,
    ) -> AppResult<CalendarEventResponse> {
        let calendar_id = self.calendar_id(key)?;
        let remote_event = to_remote_event(event)
            .map_err(|e| Error::Validation(format!("Invalid event: {}", e)))?;
        let handle = self.ensure_ready().await?;

        let created = handle
            .api
            .insert_event(calendar_id, remote_event)
            .await
            .map_err(|e| {
                e.log("create_event");
                Error::Calendar {
                    context: "Error creating calendar event",
                    source: e,
                }
            })?;

        info!("Created event {} in calendar {}", created.id, key);
        Ok(created)
    }

    pub async fn delete_event(&self, key: &CalendarKey, event_id: &str) -> AppResult<bool> {
        let calendar_id = self.calendar_id(key)?;
        let handle = self.ensure_ready().await?;

        handle
            .api
            .delete_event(calendar_id, event_id)
            .await
            .map_err(|e| {
                e.log("delete_event");
                if e.is_not_found() {
                    Error::EventNotFound(event_id.to_string())
                } else {
                    Error::Calendar {
                        context: "Error deleting calendar event",
                        source: e,
                    }
                }
            })?;

        info!("Deleted event {} from calendar {}", event_id, key);
        Ok(true)
    }

    /// Report credential details and whether the API is reachable.
    ///
    /// A failed access check is reported as `connected: false`
    /// rather than returned as an error.
    pub async fn test_auth(&self) -> AppResult<AuthReport> {
        let handle = self.ensure_ready().await?;
        let tokens = handle.api.tokens();

        let token = tokens.access_token().await.map_err(|e| {
            error!("Google Calendar API error - test_auth: {}", e);
            Error::Calendar {
                context: "Error testing calendar authentication",
                source: e,
            }
        })?;

        let (identity, expiry) = match tokens.token_info().await {
            Ok(info) => (
                info.email.unwrap_or_else(|| "Unknown".to_string()),
                info.expiry,
            ),
            Err(e) => {
                warn!("Unable to retrieve token information in test_auth: {}", e);
                ("Unknown".to_string(), token.expires_at)
            }
        };

        let connected = match handle.api.get_calendar_list_entry(ACCESS_CHECK_CALENDAR).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Error testing calendar API access: {}", e);
                if let Some(status) = e.status() {
                    warn!("Status: {}", status);
                }
                false
            }
        };

        Ok(AuthReport {
            connected,
            project_id: handle.project_id.clone(),
            identity,
            token_expiry: expiry.map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            environment: self.environment.to_string(),
            credential_source: handle.credential_kind.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}
