//! BitPredict Backend Library
//!
//! Bitcoin up/down prediction game: advisory locks over the store, the guess
//! lifecycle, delayed resolution tasks, and the HTTP surface. The `bitpredict`
//! binary and the integration tests build on these modules.

pub mod api;
pub mod auth;
pub mod config;
pub mod game;
pub mod middleware;
pub mod models;
pub mod scrapers;
pub mod store;
pub mod tasks;
