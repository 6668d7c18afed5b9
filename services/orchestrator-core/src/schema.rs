//! Database schema bootstrap. Grounded on `oms::persistence::run_migrations`'s
//! "inline `CREATE TABLE IF NOT EXISTS`, called once from the service's
//! startup path" pattern, corrected to standalone Postgres DDL — the
//! teacher's inline `INDEX (...)` clause inside `CREATE TABLE` is MySQL
//! syntax and does not run against Postgres, so indexes here are separate
//! `CREATE INDEX IF NOT EXISTS` statements instead.
//!
//! Idempotent: safe to run on every boot against an already-migrated
//! database. No down-migrations — this system has never needed to roll one
//! back, and a hand-rolled rollback path is more likely to destroy data than
//! a forward-only schema mistake is to need one.

use orchestrator_common::error::{CoreError, CoreResult};
use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS retailers (
        id UUID PRIMARY KEY,
        phone TEXT NOT NULL UNIQUE,
        credit_limit BIGINT NOT NULL DEFAULT 0,
        outstanding_debt BIGINT NOT NULL DEFAULT 0,
        credit_score INTEGER NOT NULL DEFAULT 650,
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE INDEX IF NOT EXISTS idx_retailers_status ON retailers (status)",
    r"CREATE TABLE IF NOT EXISTS vendors (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        phone TEXT NOT NULL,
        working_hours_start INTEGER NOT NULL DEFAULT 0,
        working_hours_end INTEGER NOT NULL DEFAULT 23,
        is_active BOOLEAN NOT NULL DEFAULT true,
        active_orders_count BIGINT NOT NULL DEFAULT 0,
        pending_orders_count BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE INDEX IF NOT EXISTS idx_vendors_active ON vendors (is_active)",
    r"CREATE TABLE IF NOT EXISTS products (
        id UUID PRIMARY KEY,
        canonical_name TEXT NOT NULL,
        aliases TEXT[] NOT NULL DEFAULT '{}',
        unit TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE TABLE IF NOT EXISTS vendor_product_offers (
        vendor_id UUID NOT NULL REFERENCES vendors (id),
        product_id UUID NOT NULL REFERENCES products (id),
        stock BIGINT NOT NULL DEFAULT 0,
        unit_price BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (vendor_id, product_id)
    )",
    r"CREATE INDEX IF NOT EXISTS idx_vendor_offers_product ON vendor_product_offers (product_id)",
    r"CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        order_number TEXT NOT NULL UNIQUE,
        retailer_id UUID NOT NULL REFERENCES retailers (id),
        vendor_id UUID REFERENCES vendors (id),
        status TEXT NOT NULL DEFAULT 'DRAFT',
        source TEXT NOT NULL DEFAULT 'TEXT',
        requires_approval BOOLEAN NOT NULL DEFAULT false,
        needs_admin BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status)",
    r"CREATE INDEX IF NOT EXISTS idx_orders_retailer ON orders (retailer_id)",
    r"CREATE INDEX IF NOT EXISTS idx_orders_vendor ON orders (vendor_id)",
    r"CREATE INDEX IF NOT EXISTS idx_orders_needs_admin ON orders (needs_admin) WHERE needs_admin",
    r"CREATE TABLE IF NOT EXISTS order_items (
        id BIGSERIAL PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders (id),
        product_id UUID NOT NULL REFERENCES products (id),
        quantity BIGINT NOT NULL,
        unit_price BIGINT NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items (order_id)",
    r"CREATE TABLE IF NOT EXISTS order_status_log (
        id BIGSERIAL PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders (id),
        from_status TEXT,
        to_status TEXT NOT NULL,
        actor_id TEXT,
        reason TEXT,
        at TIMESTAMPTZ NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS idx_order_status_log_order ON order_status_log (order_id)",
    r"CREATE TABLE IF NOT EXISTS credit_ledger_entries (
        id UUID PRIMARY KEY,
        retailer_id UUID NOT NULL REFERENCES retailers (id),
        ledger_number BIGINT NOT NULL,
        order_id UUID REFERENCES orders (id),
        entry_type TEXT NOT NULL,
        amount BIGINT NOT NULL,
        previous_balance BIGINT NOT NULL,
        running_balance BIGINT NOT NULL,
        at TIMESTAMPTZ NOT NULL,
        UNIQUE (retailer_id, ledger_number)
    )",
    r"CREATE INDEX IF NOT EXISTS idx_ledger_entries_retailer ON credit_ledger_entries (retailer_id)",
    r"CREATE INDEX IF NOT EXISTS idx_ledger_entries_order ON credit_ledger_entries (order_id)",
    r"CREATE TABLE IF NOT EXISTS rejected_orders (
        id BIGSERIAL PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders (id),
        retailer_id UUID NOT NULL REFERENCES retailers (id),
        reason TEXT NOT NULL,
        at TIMESTAMPTZ NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS idx_rejected_orders_retailer ON rejected_orders (retailer_id)",
    r"CREATE TABLE IF NOT EXISTS webhook_events (
        id UUID PRIMARY KEY,
        channel TEXT NOT NULL,
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        received_at TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        next_attempt_at TIMESTAMPTZ,
        UNIQUE (channel, external_id)
    )",
    r"CREATE INDEX IF NOT EXISTS idx_webhook_events_status ON webhook_events (status, received_at)",
    r"CREATE TABLE IF NOT EXISTS workflow_states (
        id UUID PRIMARY KEY,
        order_id UUID REFERENCES orders (id),
        wf_type TEXT NOT NULL,
        current_step TEXT NOT NULL,
        step_ordinal INTEGER NOT NULL,
        step_state JSONB NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'IN_PROGRESS',
        heartbeat_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0
    )",
    r"CREATE INDEX IF NOT EXISTS idx_workflow_states_order ON workflow_states (order_id)",
    r"CREATE INDEX IF NOT EXISTS idx_workflow_states_stale ON workflow_states (status, heartbeat_at) WHERE status = 'IN_PROGRESS'",
    r"CREATE TABLE IF NOT EXISTS vendor_assignment_retries (
        id BIGSERIAL PRIMARY KEY,
        order_id UUID NOT NULL REFERENCES orders (id),
        vendor_id UUID NOT NULL REFERENCES vendors (id),
        attempt BIGINT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        assigned_at TIMESTAMPTZ NOT NULL,
        response_deadline TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (order_id, attempt)
    )",
    r"CREATE INDEX IF NOT EXISTS idx_assignment_retries_order ON vendor_assignment_retries (order_id)",
    r"CREATE INDEX IF NOT EXISTS idx_assignment_retries_pending ON vendor_assignment_retries (status, response_deadline) WHERE status = 'PENDING'",
    r"CREATE TABLE IF NOT EXISTS vendor_score_events (
        id UUID PRIMARY KEY,
        vendor_id UUID NOT NULL REFERENCES vendors (id),
        kind TEXT NOT NULL,
        at TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL DEFAULT '{}'
    )",
    r"CREATE INDEX IF NOT EXISTS idx_score_events_vendor ON vendor_score_events (vendor_id, at)",
    r"CREATE INDEX IF NOT EXISTS idx_score_events_kind ON vendor_score_events (kind, at)",
    r"CREATE TABLE IF NOT EXISTS vendor_score_snapshots (
        vendor_id UUID PRIMARY KEY REFERENCES vendors (id),
        response_speed BIGINT NOT NULL,
        acceptance_rate BIGINT NOT NULL,
        price_competitiveness BIGINT NOT NULL,
        delivery_success BIGINT NOT NULL,
        cancellation_rate BIGINT NOT NULL,
        overall BIGINT NOT NULL,
        tier TEXT NOT NULL,
        computed_at TIMESTAMPTZ NOT NULL,
        dirty BOOLEAN NOT NULL DEFAULT false
    )",
    r"CREATE TABLE IF NOT EXISTS vendor_round_robin_counters (
        product_id UUID PRIMARY KEY REFERENCES products (id),
        counter BIGINT NOT NULL DEFAULT 0
    )",
    r"CREATE TABLE IF NOT EXISTS uploaded_image_orders (
        id UUID PRIMARY KEY,
        retailer_id UUID NOT NULL REFERENCES retailers (id),
        order_id UUID REFERENCES orders (id),
        status TEXT NOT NULL DEFAULT 'PROCESSING',
        raw_text TEXT,
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS idx_uploaded_image_orders_retailer ON uploaded_image_orders (retailer_id)",
    r"CREATE INDEX IF NOT EXISTS idx_uploaded_image_orders_status ON uploaded_image_orders (status)",
];

/// Runs every statement in order inside a single connection, idempotently.
/// Called once from the service binary's startup path, before the recovery
/// worker or HTTP listener start — mirroring `oms`'s `new()` -> `run_migrations`
/// sequencing.
pub async fn run_migrations(pool: &PgPool) -> CoreResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await.map_err(|e| CoreError::Internal(e.into()))?;
    }
    info!(count = STATEMENTS.len(), "schema migrations applied");
    Ok(())
}
