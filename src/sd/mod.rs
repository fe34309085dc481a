//! Client side of the text-to-image inference server.
//!
//! - `transport`: the HTTP primitive and Basic-Auth handling.
//! - `models`: wire types.
//! - `catalog`: model catalog and model selection with legacy-path fallback.
//! - `request`: generation requests and payload building.
//! - `progress`: progress endpoint sampling.
pub mod catalog;
pub mod models;
pub mod progress;
pub mod request;
pub mod transport;
