//! Postgres store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::error::AppError;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::models::{
    AggregateResolution, CreateCreditMemo, CreateInvoice, CreateInvoiceLine, CreditMemo,
    FeatureLimit, Invoice, InvoiceLine, InvoiceStateUpdate, NewUsageEvent, Subscription,
    UpsertAggregate, UsageAggregate, UsageEvent,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::store::Store;

const INVOICE_COLUMNS: &str = "invoice_id, organization_id, subscription_id, number, status, currency, subtotal_cents, tax_cents, total_cents, balance_cents, period_start, period_end, issued_at, due_at, paid_at, voided_at, metadata, created_utc, updated_utc";

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, organization_id, package_id, status, currency, recurring_amount_cents, billing_interval, current_period_start, current_period_end, cancel_at_period_end, metadata, created_utc, updated_utc";

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool.
    #[instrument(skip(database_url), fields(service = "billing-pipeline"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, events), fields(organization_id = %ctx.organization_id, attempted = events.len()))]
    async fn insert_usage_events(
        &self,
        ctx: &AuthContext,
        events: &[NewUsageEvent],
    ) -> Result<u64, AppError> {
        if events.is_empty() {
            return Ok(0);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_usage_events"])
            .start_timer();

        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO usage_events (event_id, organization_id, subscription_id, tenant_id, product_id, feature_key, quantity, unit, recorded_at, source, metadata, fingerprint) ",
        );
        builder.push_values(events.iter(), |mut row, event| {
            row.push_bind(Uuid::new_v4())
                .push_bind(ctx.organization_id)
                .push_bind(event.subscription_id)
                .push_bind(event.tenant_id)
                .push_bind(event.product_id)
                .push_bind(&event.feature_key)
                .push_bind(event.quantity)
                .push_bind(&event.unit)
                .push_bind(event.recorded_at)
                .push_bind(event.source.as_str())
                .push_bind(&event.metadata)
                .push_bind(&event.fingerprint);
        });
        // Re-delivered fingerprinted readings are a no-op, not a double count.
        builder.push(
            " ON CONFLICT (organization_id, fingerprint) WHERE fingerprint IS NOT NULL DO NOTHING",
        );

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to insert usage events: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, feature_keys), fields(organization_id = %ctx.organization_id, subscription_id = %subscription_id))]
    async fn usage_events_in_window(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        feature_keys: Option<&[String]>,
    ) -> Result<Vec<UsageEvent>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["usage_events_in_window"])
            .start_timer();

        let events = sqlx::query_as::<_, UsageEvent>(
            r#"
            SELECT event_id, organization_id, subscription_id, tenant_id, product_id, feature_key, quantity, unit, recorded_at, source, metadata, fingerprint, created_utc
            FROM usage_events
            WHERE organization_id = $1 AND subscription_id = $2
              AND recorded_at >= $3 AND recorded_at < $4
              AND ($5::text[] IS NULL OR feature_key = ANY($5))
            ORDER BY recorded_at
            "#,
        )
        .bind(ctx.organization_id)
        .bind(subscription_id)
        .bind(period_start)
        .bind(period_end)
        .bind(feature_keys)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load usage events: {}", e)))?;

        timer.observe_duration();

        Ok(events)
    }

    #[instrument(skip(self), fields(organization_id = %ctx.organization_id))]
    async fn find_active_subscription(
        &self,
        ctx: &AuthContext,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE organization_id = $1 AND status = 'active'
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        ))
        .bind(ctx.organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find active subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(organization_id = %ctx.organization_id, subscription_id = %subscription_id))]
    async fn get_subscription(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE organization_id = $1 AND subscription_id = $2
            "#,
        ))
        .bind(ctx.organization_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(organization_id = %ctx.organization_id, package_id = %package_id))]
    async fn get_feature_limits(
        &self,
        ctx: &AuthContext,
        package_id: Uuid,
    ) -> Result<Vec<FeatureLimit>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_feature_limits"])
            .start_timer();

        let limits = sqlx::query_as::<_, FeatureLimit>(
            r#"
            SELECT fl.limit_id, fl.package_id, fl.feature_key, fl.limit_type, fl.limit_value, fl.unit, fl.usage_period
            FROM feature_limits fl
            JOIN packages p ON fl.package_id = p.package_id
            WHERE p.organization_id = $1 AND fl.package_id = $2
            ORDER BY fl.feature_key
            "#,
        )
        .bind(ctx.organization_id)
        .bind(package_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get feature limits: {}", e))
        })?;

        timer.observe_duration();

        Ok(limits)
    }

    #[instrument(skip(self, input), fields(organization_id = %ctx.organization_id, feature_key = %input.feature_key))]
    async fn upsert_aggregate(
        &self,
        ctx: &AuthContext,
        input: &UpsertAggregate,
    ) -> Result<UsageAggregate, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_aggregate"])
            .start_timer();

        let aggregate = sqlx::query_as::<_, UsageAggregate>(
            r#"
            INSERT INTO usage_aggregates (aggregate_id, organization_id, subscription_id, feature_key, resolution, period_start, period_end, quantity, unit, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (organization_id, subscription_id, feature_key, resolution, period_start, period_end)
            DO UPDATE SET quantity = EXCLUDED.quantity, unit = EXCLUDED.unit, source = EXCLUDED.source, updated_utc = NOW()
            RETURNING aggregate_id, organization_id, subscription_id, feature_key, resolution, period_start, period_end, quantity, unit, source, created_utc, updated_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ctx.organization_id)
        .bind(input.subscription_id)
        .bind(&input.feature_key)
        .bind(input.resolution.as_str())
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(input.quantity)
        .bind(&input.unit)
        .bind(input.source.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert aggregate: {}", e))
        })?;

        timer.observe_duration();

        Ok(aggregate)
    }

    #[instrument(skip(self), fields(organization_id = %ctx.organization_id, feature_key = %feature_key))]
    async fn sum_aggregate_quantity(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
        feature_key: &str,
        resolution: AggregateResolution,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Decimal>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sum_aggregate_quantity"])
            .start_timer();

        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(quantity)
            FROM usage_aggregates
            WHERE organization_id = $1 AND subscription_id = $2
              AND feature_key = $3 AND resolution = $4
              AND period_start >= $5 AND period_end <= $6
            "#,
        )
        .bind(ctx.organization_id)
        .bind(subscription_id)
        .bind(feature_key)
        .bind(resolution.as_str())
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sum aggregates: {}", e))
        })?;

        timer.observe_duration();

        Ok(total)
    }

    #[instrument(skip(self, input), fields(organization_id = %ctx.organization_id, number = %input.number))]
    async fn create_invoice(
        &self,
        ctx: &AuthContext,
        input: &CreateInvoice,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (invoice_id, organization_id, subscription_id, number, status, currency, subtotal_cents, tax_cents, total_cents, balance_cents, period_start, period_end, issued_at, due_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(ctx.organization_id)
        .bind(input.subscription_id)
        .bind(&input.number)
        .bind(input.status.as_str())
        .bind(&input.currency)
        .bind(input.subtotal_cents)
        .bind(input.tax_cents)
        .bind(input.total_cents)
        .bind(input.balance_cents)
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(input.issued_at)
        .bind(input.due_at)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Duplicate invoice number"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        timer.observe_duration();
        info!(invoice_id = %invoice.invoice_id, number = %invoice.number, "Invoice created");

        Ok(invoice)
    }

    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    async fn append_invoice_line(
        &self,
        ctx: &AuthContext,
        input: &CreateInvoiceLine,
    ) -> Result<InvoiceLine, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_invoice_line"])
            .start_timer();

        let line = sqlx::query_as::<_, InvoiceLine>(
            r#"
            INSERT INTO invoice_lines (line_id, invoice_id, line_type, description, feature_key, quantity, unit_amount_cents, amount_cents, usage_period_start, usage_period_end)
            SELECT $1, i.invoice_id, $3, $4, $5, $6, $7, $8, $9, $10
            FROM invoices i
            WHERE i.organization_id = $2 AND i.invoice_id = $11
            RETURNING line_id, invoice_id, line_type, description, feature_key, quantity, unit_amount_cents, amount_cents, usage_period_start, usage_period_end, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ctx.organization_id)
        .bind(input.line_type.as_str())
        .bind(&input.description)
        .bind(&input.feature_key)
        .bind(input.quantity)
        .bind(input.unit_amount_cents)
        .bind(input.amount_cents)
        .bind(input.usage_period_start)
        .bind(input.usage_period_end)
        .bind(input.invoice_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                AppError::NotFound(anyhow::anyhow!("Invoice not found"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to append invoice line: {}", e)),
        })?;

        timer.observe_duration();

        Ok(line)
    }

    #[instrument(skip(self), fields(organization_id = %ctx.organization_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE organization_id = $1 AND invoice_id = $2
            "#,
        ))
        .bind(ctx.organization_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(organization_id = %ctx.organization_id, invoice_id = %invoice_id))]
    async fn list_invoice_lines(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoice_lines"])
            .start_timer();

        let lines = sqlx::query_as::<_, InvoiceLine>(
            r#"
            SELECT l.line_id, l.invoice_id, l.line_type, l.description, l.feature_key, l.quantity, l.unit_amount_cents, l.amount_cents, l.usage_period_start, l.usage_period_end, l.created_utc
            FROM invoice_lines l
            JOIN invoices i ON l.invoice_id = i.invoice_id
            WHERE i.organization_id = $1 AND l.invoice_id = $2
            ORDER BY l.created_utc
            "#,
        )
        .bind(ctx.organization_id)
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list invoice lines: {}", e))
        })?;

        timer.observe_duration();

        Ok(lines)
    }

    #[instrument(skip(self, update), fields(organization_id = %ctx.organization_id, invoice_id = %invoice_id))]
    async fn update_invoice_state(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
        update: &InvoiceStateUpdate,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_state"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = COALESCE($3::text, status),
                balance_cents = COALESCE($4::bigint, balance_cents),
                paid_at = COALESCE($5::timestamptz, paid_at),
                voided_at = COALESCE($6::timestamptz, voided_at),
                updated_utc = NOW()
            WHERE organization_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(ctx.organization_id)
        .bind(invoice_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.balance_cents)
        .bind(update.paid_at)
        .bind(update.voided_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, input), fields(organization_id = %ctx.organization_id))]
    async fn create_credit_memo(
        &self,
        ctx: &AuthContext,
        input: &CreateCreditMemo,
    ) -> Result<CreditMemo, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_credit_memo"])
            .start_timer();

        let memo = sqlx::query_as::<_, CreditMemo>(
            r#"
            INSERT INTO credit_memos (memo_id, organization_id, invoice_id, amount_cents, currency, reason, expires_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING memo_id, organization_id, invoice_id, amount_cents, currency, reason, expires_at, metadata, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ctx.organization_id)
        .bind(input.invoice_id)
        .bind(input.amount_cents)
        .bind(&input.currency)
        .bind(input.reason.as_str())
        .bind(input.expires_at)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create credit memo: {}", e))
        })?;

        timer.observe_duration();
        info!(memo_id = %memo.memo_id, amount_cents = memo.amount_cents, reason = %memo.reason, "Credit memo issued");

        Ok(memo)
    }
}
