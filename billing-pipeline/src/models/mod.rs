//! Domain models for the billing pipeline.

mod credit_memo;
mod invoice;
mod subscription;
mod usage_aggregate;
mod usage_event;

pub use credit_memo::{CreateCreditMemo, CreditMemo, CreditReason};
pub use invoice::{
    CreateInvoice, CreateInvoiceLine, Invoice, InvoiceLine, InvoiceStateUpdate, InvoiceStatus,
    LineType,
};
pub use subscription::{FeatureLimit, LimitType, Subscription, SubscriptionStatus};
pub use usage_aggregate::{AggregateResolution, UpsertAggregate, UsageAggregate};
pub use usage_event::{NewUsageEvent, UsageEvent, UsageSource};
