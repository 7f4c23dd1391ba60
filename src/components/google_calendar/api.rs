use super::models::{CalendarEvent, CalendarEventResponse, EventQuery};
use super::token::TokenSource;
use crate::error::RemoteError;
use google_calendar3::api::{CalendarListEntry, Event};
use google_calendar3::common::GetToken;
use google_calendar3::hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use google_calendar3::hyper_util::client::legacy::connect::HttpConnector;
use google_calendar3::hyper_util::client::legacy::Client;
use google_calendar3::hyper_util::rt::TokioExecutor;
use google_calendar3::CalendarHub;
use serde_json::Value;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

type Connector = HttpsConnector<HttpConnector>;

/// Calendar hub over a rustls connector
pub type Hub = CalendarHub<Connector>;

/// rustls needs a process-wide provider once more than one backend is compiled in
pub(crate) fn install_crypto_provider() {
    // Err only means another provider won the race
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Hands tokens from a [`TokenSource`] to the hub
#[derive(Clone)]
struct HubAuth(Arc<dyn TokenSource>);

impl GetToken for HubAuth {
    fn get_token<'a>(
        &'a self,
        _scopes: &'a [&str],
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, Box<dyn StdError + Send + Sync>>> + Send + 'a>>
    {
        Box::pin(async move {
            let token = self.0.access_token().await?;
            Ok(Some(token.token))
        })
    }
}

/// Calendar v3 client bound to a token source
#[derive(Clone)]
pub struct GoogleCalendarApi {
    hub: Arc<Hub>,
    tokens: Arc<dyn TokenSource>,
}

impl GoogleCalendarApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self, RemoteError> {
        let connector = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|e| RemoteError::Transport(format!("Failed to configure TLS: {}", e)))?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let mut hub = CalendarHub::new(client, HubAuth(Arc::clone(&tokens)));
        // Method paths are appended to the base url, so it must end in '/'
        hub.base_url(format!("{}/", base_url.trim_end_matches('/')));

        Ok(Self {
            hub: Arc::new(hub),
            tokens,
        })
    }

    pub fn tokens(&self) -> &Arc<dyn TokenSource> {
        &self.tokens
    }

    /// `events.list` with single events expanded and ordered by start time
    pub async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEventResponse>, RemoteError> {
        debug!("Listing events for calendar {} from {}", calendar_id, query.time_min);

        let mut call = self
            .hub
            .events()
            .list(calendar_id)
            .time_min(query.time_min)
            .max_results(query.max_results_i32())
            .single_events(true)
            .order_by("startTime");
        if let Some(time_max) = query.time_max {
            call = call.time_max(time_max);
        }

        let (_, events) = call.doit().await?;
        events
            .items
            .unwrap_or_default()
            .into_iter()
            .map(from_remote_event)
            .collect()
    }

    /// `events.insert`
    pub async fn insert_event(
        &self,
        calendar_id: &str,
        event: Event,
    ) -> Result<CalendarEventResponse, RemoteError> {
        debug!("Creating event in calendar {}", calendar_id);

        let (_, created) = self.hub.events().insert(event, calendar_id).doit().await?;
        from_remote_event(created)
    }

    /// `events.delete`
    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), RemoteError> {
        debug!("Deleting event {} from calendar {}", event_id, calendar_id);

        self.hub.events().delete(calendar_id, event_id).doit().await?;
        Ok(())
    }

    /// `calendarList.get`, used as a cheap access check
    pub async fn get_calendar_list_entry(
        &self,
        calendar_id: &str,
    ) -> Result<CalendarListEntry, RemoteError> {
        let (_, entry) = self.hub.calendar_list().get(calendar_id).doit().await?;
        Ok(entry)
    }
}

/// Re-shape a request payload into the client library's event type
pub fn to_remote_event(event: &CalendarEvent) -> Result<Event, serde_json::Error> {
    serde_json::to_value(event).and_then(serde_json::from_value)
}

fn from_remote_event(event: Event) -> Result<CalendarEventResponse, RemoteError> {
    let value = serde_json::to_value(event).map_err(|e| RemoteError::Decode(e.to_string()))?;
    serde_json::from_value(without_nulls(value)).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// Unset fields serialize as `null`; drop them so responses only carry what Google sent
fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(without_nulls).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_payload_converts() {
        let event: CalendarEvent = serde_json::from_value(json!({
            "summary": "Install",
            "location": "12 Main St",
            "start": {"dateTime": "2025-03-01T09:00:00-08:00", "timeZone": "America/Los_Angeles"},
            "end": {"dateTime": "2025-03-01T10:00:00-08:00"},
            "extendedProperties": {"private": {"jobId": "J-42"}}
        }))
        .unwrap();

        let remote = to_remote_event(&event).unwrap();
        assert_eq!(remote.summary.as_deref(), Some("Install"));
        assert_eq!(remote.location.as_deref(), Some("12 Main St"));
        let start = remote.start.unwrap();
        assert_eq!(start.time_zone.as_deref(), Some("America/Los_Angeles"));
        assert_eq!(
            start.date_time.map(|dt| dt.timestamp()),
            Some(1_740_848_400)
        );
        assert!(remote.extended_properties.is_some());
    }

    #[test]
    fn test_invalid_date_time_is_rejected() {
        let event = CalendarEvent::new("Install", "next tuesday", "2025-03-01T10:00:00Z");
        assert!(to_remote_event(&event).is_err());
    }

    #[test]
    fn test_response_drops_unset_fields() {
        let event: Event = serde_json::from_value(json!({
            "id": "evt-1",
            "summary": "Walkthrough",
            "start": {"dateTime": "2025-03-01T17:00:00Z"}
        }))
        .unwrap();

        let response = from_remote_event(event).unwrap();
        assert_eq!(response.id, "evt-1");
        assert_eq!(response.summary.as_deref(), Some("Walkthrough"));
        assert!(response.start.unwrap().has_date_time());
        assert!(response.extra.values().all(|v| !v.is_null()));
    }

    #[test]
    fn test_response_without_id_fails() {
        let err = from_remote_event(Event::default()).unwrap_err();
        assert!(matches!(err, RemoteError::Decode(_)));
    }
}
