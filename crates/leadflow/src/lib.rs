//! Core library for the insurance lead routing platform: scoring, assignment
//! lifecycle management, expiry sweeping, and webhook-driven reactions.

pub mod config;
pub mod error;
pub mod ingest;
pub mod routing;
pub mod telemetry;
