//! Gridcast aligns day-ahead renewable and load forecasts onto a market
//! delivery-interval grid, merges them into a gap-filled feature matrix,
//! validates completeness, and exports settlement-price predictions.

pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod predict;
pub mod provider;
pub mod telemetry;
