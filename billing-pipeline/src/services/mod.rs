//! Pipeline components and metrics.

pub mod metrics;

mod aggregator;
mod invoicer;
mod payment_sync;
mod recorder;

pub use aggregator::UsageAggregator;
pub use invoicer::InvoiceBuilder;
pub use metrics::{get_metrics, init_metrics};
pub use payment_sync::PaymentSyncEngine;
pub use recorder::UsageRecorder;
