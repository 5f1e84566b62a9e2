// shop/src/lib.rs

//! Hera Collection payment core: M-Pesa STK push initiation, callback
//! settlement, order materialization and status polling.

pub mod config;
pub mod errors;
pub mod models;
pub mod pipelines;
pub mod serde_util;
pub mod services;
pub mod state;
pub mod store;
pub mod web;

pub use errors::{AppError, Result};
pub use state::AppState;
