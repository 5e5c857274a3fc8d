//! Application state shared across routes

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::game::{MatchOutcome, SessionSettings};
use crate::rooms::SessionManager;
use crate::store::{
    MemoryStore, RetryPolicy, StoreError, SupabaseClient, SupabaseTournamentStore, TournamentStore,
};
use crate::tournament::TournamentService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<SessionManager>,
    pub tournaments: Arc<TournamentService>,
}

impl AppState {
    /// Build state with the store selected by configuration. The returned
    /// receiver carries results from tournament rooms and must be handed to
    /// `TournamentService::run_outcomes`.
    pub fn new(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<MatchOutcome>), StoreError> {
        let store: Arc<dyn TournamentStore> = match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "Persisting tournaments to Supabase");
                let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key)?;
                Arc::new(SupabaseTournamentStore::new(client))
            }
            None => {
                warn!("SUPABASE_URL not set, tournaments are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn TournamentStore>,
    ) -> (Self, mpsc::UnboundedReceiver<MatchOutcome>) {
        let config = Arc::new(config);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let defaults = SessionSettings {
            win_score: config.default_win_score,
            tick_rate_hz: config.tick_rate_hz,
            ..SessionSettings::default()
        };
        let rooms = Arc::new(SessionManager::new(defaults, config.room_grace, outcome_tx));

        let retry = RetryPolicy::new(config.persist_max_attempts, config.persist_backoff);
        let tournaments = Arc::new(TournamentService::new(store, retry, rooms.clone()));

        (
            Self {
                config,
                rooms,
                tournaments,
            },
            outcome_rx,
        )
    }
}
