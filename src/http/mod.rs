//! HTTP surface: router, auth middleware, tournament endpoints

pub mod middleware;
pub mod routes;

pub use routes::build_router;
