//! Live room table

mod manager;

pub use manager::SessionManager;
