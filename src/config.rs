use crate::error::{env_error, AppResult, Error};
use dotenvy::dotenv;
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, error, warn};

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default location of the calendar mapping file
pub const DEFAULT_CALENDAR_FILE: &str = "config/calendars.toml";

/// Origins allowed when `CORS_ORIGIN` is not set
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = [
    "http://localhost:3000",
    "https://bright-prodigy-app-923339654929.us-west2.run.app",
];

/// Built-in calendar mapping
const DEFAULT_CALENDARS: [(&str, &str); 3] = [
    (
        "brightProdigy",
        "1sd0he5vr6t8p7ulncgfikc4ng@group.calendar.google.com",
    ),
    (
        "crew1",
        "e3a19cf17894d270c54b5309d0ad2886c8c93e214e4f9828ac8beede5994d27b@group.calendar.google.com",
    ),
    (
        "pending",
        "21b795c08b44f1f27fe32c43ec0a37d3aa6a2a806a96018dfd16e940ca748901@group.calendar.google.com",
    ),
];

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic name of a calendar
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CalendarKey {
    BrightProdigy,
    Crew1,
    Pending,
    Other(String),
}

impl CalendarKey {
    pub fn as_str(&self) -> &str {
        match self {
            CalendarKey::BrightProdigy => "brightProdigy",
            CalendarKey::Crew1 => "crew1",
            CalendarKey::Pending => "pending",
            CalendarKey::Other(key) => key,
        }
    }
}

impl From<&str> for CalendarKey {
    fn from(key: &str) -> Self {
        match key {
            "brightProdigy" => CalendarKey::BrightProdigy,
            "crew1" => CalendarKey::Crew1,
            "pending" => CalendarKey::Pending,
            other => CalendarKey::Other(other.to_string()),
        }
    }
}

impl From<String> for CalendarKey {
    fn from(key: String) -> Self {
        CalendarKey::from(key.as_str())
    }
}

impl fmt::Display for CalendarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from calendar keys to Google calendar ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarConfig {
    calendars: HashMap<String, String>,
}

impl CalendarConfig {
    pub fn new(calendars: HashMap<String, String>) -> Self {
        Self { calendars }
    }

    /// The built-in production calendars
    pub fn with_defaults() -> Self {
        let calendars = DEFAULT_CALENDARS
            .iter()
            .map(|(key, id)| (key.to_string(), id.to_string()))
            .collect();
        Self { calendars }
    }

    /// Overlay entries on top of the current mapping
    pub fn merge(&mut self, overrides: HashMap<String, String>) {
        self.calendars.extend(overrides);
    }

    /// Resolve a calendar key to its configured calendar id
    pub fn resolve(&self, key: &CalendarKey) -> AppResult<&str> {
        match self.calendars.get(key.as_str()) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => {
                error!("Calendar not found: {}", key);
                Err(Error::CalendarNotFound(key.to_string()))
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.calendars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.calendars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calendars.is_empty()
    }
}

/// Base URLs of the Google endpoints the service talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleEndpoints {
    pub calendar_api: String,
    pub tokeninfo_url: String,
    pub metadata_host: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            calendar_api: "https://www.googleapis.com/calendar/v3".to_string(),
            tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo".to_string(),
            metadata_host: "http://metadata.google.internal".to_string(),
        }
    }
}

/// Main configuration structure for the server
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    pub environment: Environment,
    /// Origins allowed to make credentialed CORS requests
    pub cors_origins: Vec<String>,
    pub calendars: CalendarConfig,
    /// Explicit credentials file (GOOGLE_APPLICATION_CREDENTIALS)
    pub credentials_file: Option<PathBuf>,
    /// Project id override
    pub project_id: Option<String>,
    /// Directory of built front-end assets
    pub static_dir: Option<PathBuf>,
    pub endpoints: GoogleEndpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            environment: Environment::Development,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
            calendars: CalendarConfig::with_defaults(),
            credentials_file: None,
            project_id: None,
            static_dir: None,
            endpoints: GoogleEndpoints::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = match var("HOST") {
            Some(host) => host
                .parse::<IpAddr>()
                .map_err(|_| env_error("Invalid HOST format"))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port = match var("PORT") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| env_error("Invalid PORT format"))?,
            None => DEFAULT_PORT,
        };

        let environment = match var("APP_ENV") {
            Some(name) => Environment::from_name(&name).unwrap_or_else(|| {
                warn!("Unknown APP_ENV '{}', falling back to development", name);
                Environment::Development
            }),
            None => Environment::Development,
        };

        let cors_origins = match var("CORS_ORIGIN") {
            Some(origins) => origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
        };

        let mut calendars = CalendarConfig::with_defaults();
        let calendar_file = var("CALENDAR_CONFIG").unwrap_or_else(|| DEFAULT_CALENDAR_FILE.to_string());
        if let Some(overrides) = load_calendar_file(&calendar_file)? {
            calendars.merge(overrides);
        }

        let project_id = var("GOOGLE_CLOUD_PROJECT").or_else(|| var("GCLOUD_PROJECT"));

        let defaults = GoogleEndpoints::default();
        let endpoints = GoogleEndpoints {
            calendar_api: var("GOOGLE_CALENDAR_API_URL").unwrap_or(defaults.calendar_api),
            tokeninfo_url: var("GOOGLE_TOKENINFO_URL").unwrap_or(defaults.tokeninfo_url),
            metadata_host: var("GCE_METADATA_HOST")
                .map(|host| {
                    if host.starts_with("http") {
                        host
                    } else {
                        format!("http://{}", host)
                    }
                })
                .unwrap_or(defaults.metadata_host),
        };

        Ok(Config {
            host,
            port,
            environment,
            cors_origins,
            calendars,
            credentials_file: var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            project_id,
            static_dir: var("STATIC_DIR").map(PathBuf::from),
            endpoints,
        })
    }
}

/// Read a `key = "calendar id"` TOML table; a missing file is not an error
fn load_calendar_file(path: &str) -> AppResult<Option<HashMap<String, String>>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No calendar config at {}, using built-in calendars", path);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let calendars = toml::from_str::<HashMap<String, String>>(&content)?;
    debug!("Loaded {} calendars from {}", calendars.len(), path);
    Ok(Some(calendars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_resolve_known_keys() {
        let calendars = CalendarConfig::with_defaults();
        for (key, id) in DEFAULT_CALENDARS {
            assert_eq!(calendars.resolve(&CalendarKey::from(key)).unwrap(), id);
        }
    }

    #[test]
    fn test_resolve_unknown_key() {
        let calendars = CalendarConfig::with_defaults();
        for key in ["unknownKey", "greetings", "", "BRIGHTPRODIGY"] {
            let err = calendars.resolve(&CalendarKey::from(key)).unwrap_err();
            assert_eq!(err.status_code(), 404);
            assert_eq!(
                err.to_string(),
                format!("Calendar \"{}\" not found in configuration", key)
            );
        }
    }

    #[test]
    fn test_calendar_key_parsing() {
        assert_eq!(CalendarKey::from("crew1"), CalendarKey::Crew1);
        assert_eq!(
            CalendarKey::from("greetings"),
            CalendarKey::Other("greetings".to_string())
        );
        assert_eq!(CalendarKey::Pending.to_string(), "pending");
    }

    #[test]
    fn test_merge_overrides_and_extends() {
        let mut calendars = CalendarConfig::with_defaults();
        let mut overrides = HashMap::new();
        overrides.insert("crew1".to_string(), "crew@example.com".to_string());
        overrides.insert("crew2".to_string(), "crew2@example.com".to_string());
        calendars.merge(overrides);

        assert_eq!(calendars.len(), 4);
        assert_eq!(calendars.resolve(&CalendarKey::Crew1).unwrap(), "crew@example.com");
        assert_eq!(
            calendars.resolve(&CalendarKey::from("crew2")).unwrap(),
            "crew2@example.com"
        );
    }

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = Config::from_lookup(lookup(&[("CALENDAR_CONFIG", "/nonexistent/calendars.toml")]))
            .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.calendars.len(), 3);
        assert!(config.credentials_file.is_none());
        assert_eq!(config.endpoints, GoogleEndpoints::default());
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "3001"),
            ("APP_ENV", "production"),
            ("CORS_ORIGIN", "https://a.example, https://b.example,"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "/secrets/key.json"),
            ("GCLOUD_PROJECT", "bright-prodigy"),
            ("GCE_METADATA_HOST", "127.0.0.1:9000"),
            ("CALENDAR_CONFIG", "/nonexistent/calendars.toml"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3001);
        assert!(config.environment.is_production());
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(config.credentials_file, Some(PathBuf::from("/secrets/key.json")));
        assert_eq!(config.project_id.as_deref(), Some("bright-prodigy"));
        assert_eq!(config.endpoints.metadata_host, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_port() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("Invalid PORT format"));
    }

    #[test]
    fn test_calendar_file_is_merged() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "greetings = \"greetings@group.calendar.google.com\"").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = Config::from_lookup(lookup(&[("CALENDAR_CONFIG", path.as_str())])).unwrap();
        assert_eq!(
            config.calendars.resolve(&CalendarKey::from("greetings")).unwrap(),
            "greetings@group.calendar.google.com"
        );
        assert!(config.calendars.resolve(&CalendarKey::BrightProdigy).is_ok());
    }

    #[test]
    fn test_malformed_calendar_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "crew1 = [1, 2]").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let err = Config::from_lookup(lookup(&[("CALENDAR_CONFIG", path.as_str())])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
