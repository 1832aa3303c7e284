//! Shared building blocks for the Meridian runtime: application
//! configuration, the scalar value model, API DTOs and the retry helper.

pub mod config;
pub mod models;
pub mod retry;
pub mod value;
