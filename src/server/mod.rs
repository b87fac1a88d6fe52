//! HTTP seeding endpoint.
//!
//! A thin trigger in front of the seed dispatcher: it enqueues the root's
//! child directories and returns immediately, without waiting for the
//! crawl.

pub mod routes;

pub use routes::{build_router, serve, AppState};
