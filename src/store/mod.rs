//! Tournament persistence

pub mod memory;
pub mod retry;
pub mod supabase;
pub mod tournaments;

use async_trait::async_trait;

use crate::tournament::Tournament;

pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use supabase::SupabaseClient;
pub use tournaments::SupabaseTournamentStore;

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of tournaments, participants and matches.
/// The in-memory tournament state stays authoritative; the store mirrors it.
#[async_trait]
pub trait TournamentStore: Send + Sync {
    /// Upsert the whole tournament (entity rows are keyed, so this is idempotent)
    async fn save(&self, tournament: &Tournament) -> Result<(), StoreError>;

    async fn load_all(&self) -> Result<Vec<Tournament>, StoreError>;
}
