use super::api::GoogleCalendarApi;
use super::token::{CredentialKind, CredentialProvider};
use crate::config::Environment;
use crate::error::{AppResult, Error, RemoteError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Authenticated client shared by every calendar call once initialized
#[derive(Clone)]
pub struct AuthHandle {
    pub api: GoogleCalendarApi,
    pub project_id: String,
    pub credential_kind: CredentialKind,
}

/// Observable initialization phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    Uninitialized,
    Initializing,
    Ready,
}

type InitFuture = Shared<BoxFuture<'static, AppResult<Arc<AuthHandle>>>>;

enum InitState {
    Uninitialized,
    Initializing { attempt: u64, future: InitFuture },
    Ready(Arc<AuthHandle>),
}

/// One-shot asynchronous initialization guard.
///
/// Concurrent callers during an attempt all await the same shared future.
/// A failed attempt resets the state so the next caller starts a fresh one.
pub struct Initializer {
    provider: Arc<dyn CredentialProvider>,
    api_base: String,
    environment: Environment,
    state: Mutex<InitState>,
    attempts: AtomicU64,
}

impl Initializer {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        api_base: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            provider,
            api_base: api_base.into(),
            environment,
            state: Mutex::new(InitState::Uninitialized),
            attempts: AtomicU64::new(0),
        }
    }

    pub async fn phase(&self) -> InitPhase {
        match &*self.state.lock().await {
            InitState::Uninitialized => InitPhase::Uninitialized,
            InitState::Initializing { .. } => InitPhase::Initializing,
            InitState::Ready(_) => InitPhase::Ready,
        }
    }

    /// Number of initialization attempts started so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the authenticated handle, starting an attempt if none is running
    pub async fn ensure_ready(&self) -> AppResult<Arc<AuthHandle>> {
        let (attempt, future) = {
            let mut state = self.state.lock().await;
            match &*state {
                InitState::Ready(handle) => return Ok(Arc::clone(handle)),
                InitState::Initializing { attempt, future } => (*attempt, future.clone()),
                InitState::Uninitialized => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.start_attempt().shared();
                    *state = InitState::Initializing {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let result = future.await;

        // Only the attempt we awaited may settle the state
        let mut state = self.state.lock().await;
        if let InitState::Initializing { attempt: current, .. } = &*state {
            if *current == attempt {
                *state = match &result {
                    Ok(handle) => InitState::Ready(Arc::clone(handle)),
                    Err(_) => InitState::Uninitialized,
                };
            }
        }

        result
    }

    fn start_attempt(&self) -> BoxFuture<'static, AppResult<Arc<AuthHandle>>> {
        let provider = Arc::clone(&self.provider);
        let api_base = self.api_base.clone();
        let environment = self.environment;

        async move { initialize(provider, api_base, environment).await }.boxed()
    }
}

async fn initialize(
    provider: Arc<dyn CredentialProvider>,
    api_base: String,
    environment: Environment,
) -> AppResult<Arc<AuthHandle>> {
    info!("Initializing Google Calendar client");

    let acquired = async {
        let tokens = provider.acquire().await?;
        let project_id = tokens.project_id().await?;
        let api = GoogleCalendarApi::new(&api_base, Arc::clone(&tokens))?;
        Ok::<_, RemoteError>((tokens, project_id, api))
    }
    .await;

    let (tokens, project_id, api) = acquired.map_err(|e| {
        error!("Failed to initialize Google Calendar client: {}", e);
        Error::Initialization(e.to_string())
    })?;

    let identity = match tokens.token_info().await {
        Ok(info) => info.email.unwrap_or_else(|| "Unknown".to_string()),
        Err(e) => {
            warn!("Unable to retrieve token information: {}", e);
            "Unknown".to_string()
        }
    };

    let credential_kind = tokens.kind();
    info!(
        environment = %environment,
        project_id = %project_id,
        identity = %identity,
        credential_source = %credential_kind,
        "Google Calendar client initialized successfully"
    );

    Ok(Arc::new(AuthHandle {
        api,
        project_id,
        credential_kind,
    }))
}
