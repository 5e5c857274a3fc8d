//! Application state shared across routes

mod state;

pub use state::AppState;
