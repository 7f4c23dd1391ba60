use brightcal::components::google_calendar::CalendarService;
use brightcal::error::Error;
use brightcal::startup;

/// Run the authentication self-test once and print the report
#[tokio::main]
async fn main() -> miette::Result<()> {
    dotenvy::dotenv().ok();
    startup::init_logging()?;

    let config = startup::load_config()?;
    let service = CalendarService::from_config(&config);

    let report = service.test_auth().await?;
    let output = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::Other(format!("Failed to serialize report: {}", e)))?;
    println!("{}", output);

    if !report.connected {
        return Err(Error::Other(
            "Credentials resolved but the Google Calendar API could not be reached".to_string(),
        )
        .into());
    }

    Ok(())
}
