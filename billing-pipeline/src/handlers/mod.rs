//! HTTP job intake handlers.
//!
//! These are the worker boundary: an external queue with at-least-once
//! delivery posts job payloads here. Payloads are validated before any
//! persistence; failures surface as error responses for the queue layer
//! to retry or alert on.

mod aggregates;
mod invoices;
mod payments;
mod usage;

pub use aggregates::run_aggregation;
pub use invoices::build_invoice;
pub use payments::sync_payment;
pub use usage::record_usage_batch;
