//! Cloud Doctor patient service
//!
//! A small message-board API (users, posts, bearer tokens) that carries a
//! chaos harness: seven scenarios that each reproduce one class of production
//! fault and finish with a structured diagnostic report.

pub mod api;
pub mod auth;
pub mod chaos;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod store;
