//! Murmur kernel library.
//!
//! Post API request pipeline and the services behind it. The `murmur`
//! binary is the entry point for running the server; everything here is
//! public so integration tests can assemble the app without external
//! services.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod seed;
pub mod services;
pub mod state;
pub mod store;
