//! billing-pipeline: usage-based billing pipeline service.
//!
//! Four independently triggerable job handlers composed only through
//! persisted state: usage recording, usage aggregation, invoice building,
//! and payment synchronization.

pub mod auth;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod store;
