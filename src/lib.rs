//! EcoCollect: municipal waste-collection platform in Rust
//!
//! One sled-backed store serves residents (pickup scheduling), waste pickers
//! (assignments, collection verification) and administrators (accounts,
//! routes, alerts, reports) through an Axum REST API.
//!
//! This lib exposes the storage layer, the domain services and the router.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;
pub mod validation;

pub mod auth;

// Domain services on top of Storage
pub mod accounts;
pub mod alerts;
pub mod assignments;
pub mod reports;
pub mod routes;
pub mod schedule;
pub mod seed;
pub mod verification;

// REST API module: Axum HTTP handlers on port 11111
pub mod rest;
