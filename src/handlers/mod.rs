pub mod calendar;
pub mod health;

use crate::components::google_calendar::CalendarService;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub calendar: Arc<CalendarService>,
}

impl AppState {
    pub fn new(calendar: Arc<CalendarService>) -> Self {
        Self { calendar }
    }
}

/// Calendar routes, mounted under `/api/calendar`
fn calendar_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/test", get(calendar::test_auth))
        .route("/{id}/events", get(calendar::list_events))
        .route(
            "/{id}/event",
            post(calendar::create_event).delete(calendar::delete_event_without_id),
        )
        .route("/{id}/event/{event_id}", delete(calendar::delete_event))
}

/// Build the API router without transport layers
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/health", get(health::health_handler))
        .nest("/api/calendar", calendar_routes())
        .with_state(state)
}
