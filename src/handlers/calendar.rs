use super::AppState;
use crate::components::google_calendar::{CalendarEvent, ListOptions};
use crate::config::CalendarKey;
use crate::error::{validation_error, AppResult, Error};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

/// Query string accepted by the event listing
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub time_min: Option<String>,
    pub time_max: Option<String>,
    pub max_results: Option<String>,
}

impl From<EventsQuery> for ListOptions {
    fn from(query: EventsQuery) -> Self {
        // An unparsable maxResults falls back to the default
        ListOptions {
            time_min: query.time_min,
            time_max: query.time_max,
            max_results: query
                .max_results
                .and_then(|m| m.trim().parse::<u32>().ok()),
        }
    }
}

/// Check the fields Google requires before anything is sent
pub fn validate_event(event: &CalendarEvent) -> AppResult<()> {
    if !event.has_summary() {
        return Err(validation_error("Event summary is required"));
    }
    if !event.has_start() {
        return Err(validation_error("Event start date is required"));
    }
    if !event.has_end() {
        return Err(validation_error("Event end date is required"));
    }
    Ok(())
}

/// GET /:id/events
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(query) =
        query.map_err(|e| Error::Validation(format!("Invalid query string: {}", e.body_text())))?;
    let key = CalendarKey::from(id);
    let events = state.calendar.list_events(&key, query.into()).await?;

    Ok(Json(json!({
        "status": "success",
        "results": events.len(),
        "data": events,
    })))
}

/// POST /:id/event
pub async fn create_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CalendarEvent>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(event) =
        payload.map_err(|e| Error::Validation(format!("Invalid request body: {}", e.body_text())))?;
    validate_event(&event)?;

    let key = CalendarKey::from(id);
    let created = state.calendar.create_event(&key, &event).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "data": created,
        })),
    ))
}

/// DELETE /:id/event/:eventId
pub async fn delete_event(
    State(state): State<AppState>,
    Path((id, event_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    if event_id.trim().is_empty() {
        return Err(validation_error("Event ID is required"));
    }

    let key = CalendarKey::from(id);
    state.calendar.delete_event(&key, &event_id).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Event {} has been deleted", event_id),
    })))
}

/// DELETE /:id/event
pub async fn delete_event_without_id(Path(_id): Path<String>) -> AppResult<Json<Value>> {
    Err(validation_error("Event ID is required"))
}

/// GET /auth/test
pub async fn test_auth(State(state): State<AppState>) -> AppResult<Json<Value>> {
    info!("Testing Google Calendar authentication...");

    let report = state.calendar.test_auth().await.map_err(|e| {
        error!("Auth test failed: {}", e);
        e
    })?;

    Ok(Json(json!({
        "status": "success",
        "data": report,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_event_reports_missing_field() {
        let valid = CalendarEvent::new("Install", "2025-01-01T10:00:00Z", "2025-01-01T11:00:00Z");
        assert!(validate_event(&valid).is_ok());

        let no_summary = CalendarEvent {
            summary: None,
            ..valid.clone()
        };
        let err = validate_event(&no_summary).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Event summary is required");

        let empty_summary = CalendarEvent {
            summary: Some(String::new()),
            ..valid.clone()
        };
        assert!(validate_event(&empty_summary).is_err());

        let no_end = CalendarEvent {
            end: None,
            ..valid.clone()
        };
        assert_eq!(
            validate_event(&no_end).unwrap_err().to_string(),
            "Event end date is required"
        );

        let no_start = CalendarEvent {
            start: None,
            ..valid
        };
        assert_eq!(
            validate_event(&no_start).unwrap_err().to_string(),
            "Event start date is required"
        );
    }

    #[test]
    fn test_query_conversion() {
        let options: ListOptions = EventsQuery {
            time_min: Some("2025-01-01T00:00:00Z".to_string()),
            time_max: None,
            max_results: Some("25".to_string()),
        }
        .into();
        assert_eq!(options.max_results, Some(25));
        assert_eq!(options.time_min.as_deref(), Some("2025-01-01T00:00:00Z"));

        let options: ListOptions = EventsQuery {
            max_results: Some("lots".to_string()),
            ..Default::default()
        }
        .into();
        assert_eq!(options.max_results, None);
    }
}
