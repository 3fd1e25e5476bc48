use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, Row};
use thiserror::Error;
use uuid::Uuid;

use super::binder::{BindError, PgSessionPool, TenantBinder};
use crate::approval::{ApprovalDocument, ApprovalHistory, ApprovalLine};
use crate::tenant::TenantContext;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Binding(#[from] BindError),

    #[error("Version conflict on document {id} (expected version {expected})")]
    VersionConflict { id: Uuid, expected: i64 },

    #[error("Document {0} already exists")]
    Duplicate(Uuid),

    #[error("Document {0} not found")]
    NotFound(Uuid),

    #[error("Corrupt row: {0}")]
    Decode(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Persistence contract for approval documents.
///
/// Every tenant-scoped method takes the caller's context and must execute
/// under that tenant's RLS binding. `update` is a compare-and-swap on
/// `version`: it fails with `VersionConflict` when the stored version is not
/// `expected_version`.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, ctx: &TenantContext, doc: &ApprovalDocument) -> Result<(), StoreError>;

    async fn load(&self, ctx: &TenantContext, id: Uuid) -> Result<Option<ApprovalDocument>, StoreError>;

    async fn update(
        &self,
        ctx: &TenantContext,
        doc: &ApprovalDocument,
        expected_version: i64,
    ) -> Result<(), StoreError>;

    /// `status = IN_PROGRESS AND deadline_at < now AND escalated = false`, oldest deadline first
    async fn overdue_batch(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalDocument>, StoreError>;

    /// Tenants the deadline sweep should visit
    async fn active_tenants(&self) -> Result<Vec<Uuid>, StoreError>;
}

/// Postgres-backed store; every statement runs on a tenant-bound connection.
///
/// RLS hides other tenants' rows, so `load` of a foreign document returns
/// `None` and the engine reports `DocumentNotFound` (404) where
/// `MemoryApprovalStore` lets the engine's `TenantMismatch` check fire (403).
pub struct PgApprovalStore {
    binder: TenantBinder<PgSessionPool>,
}

const DOCUMENT_COLUMNS: &str = r#"
    id, tenant_id, document_number, title, document_type, reference_type, reference_id,
    drafter_id, status, deadline_at, escalated, version, created_at, submitted_at, completed_at
"#;

impl PgApprovalStore {
    pub fn new(pool: PgSessionPool) -> Self {
        Self {
            binder: TenantBinder::new(pool),
        }
    }

    pub fn binder(&self) -> &TenantBinder<PgSessionPool> {
        &self.binder
    }

    fn parse<T: std::str::FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T, StoreError> {
        let raw: String = row.try_get(column)?;
        raw.parse().map_err(StoreError::Decode)
    }

    fn line_from_row(row: &PgRow) -> Result<ApprovalLine, StoreError> {
        let role: String = row.try_get("approver_role")?;
        Ok(ApprovalLine {
            id: row.try_get("id")?,
            sequence: row.try_get("sequence")?,
            approver_id: row.try_get("approver_id")?,
            approver_name: row.try_get("approver_name")?,
            approver_role: role.parse().map_err(|e| StoreError::Decode(format!("{}", e)))?,
            line_type: Self::parse(row, "line_type")?,
            status: Self::parse(row, "status")?,
            delegate_id: row.try_get("delegate_id")?,
            comment: row.try_get("comment")?,
            acted_at: row.try_get("acted_at")?,
        })
    }

    fn history_from_row(row: &PgRow) -> Result<ApprovalHistory, StoreError> {
        Ok(ApprovalHistory {
            id: row.try_get("id")?,
            actor_id: row.try_get("actor_id")?,
            action: Self::parse(row, "action")?,
            from_status: Self::parse(row, "from_status")?,
            to_status: Self::parse(row, "to_status")?,
            line_sequence: row.try_get("line_sequence")?,
            comment: row.try_get("comment")?,
            at: row.try_get("at")?,
        })
    }

    async fn hydrate(conn: &mut PgConnection, row: &PgRow) -> Result<ApprovalDocument, StoreError> {
        let id: Uuid = row.try_get("id")?;

        let lines = sqlx::query(
            r#"
            SELECT id, sequence, approver_id, approver_name, approver_role, line_type,
                   status, delegate_id, comment, acted_at
            FROM approval_lines
            WHERE document_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(Self::line_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let history = sqlx::query(
            r#"
            SELECT id, actor_id, action, from_status, to_status, line_sequence, comment, at
            FROM approval_histories
            WHERE document_id = $1
            ORDER BY at, id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(Self::history_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(ApprovalDocument {
            id,
            tenant_id: row.try_get("tenant_id")?,
            document_number: row.try_get("document_number")?,
            title: row.try_get("title")?,
            document_type: row.try_get("document_type")?,
            reference_type: row.try_get("reference_type")?,
            reference_id: row.try_get("reference_id")?,
            drafter_id: row.try_get("drafter_id")?,
            status: Self::parse(row, "status")?,
            deadline_at: row.try_get("deadline_at")?,
            escalated: row.try_get("escalated")?,
            lines,
            history,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            submitted_at: row.try_get("submitted_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    async fn insert_on(conn: &mut PgConnection, doc: &ApprovalDocument) -> Result<(), StoreError> {
        let mut tx = conn.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO approval_documents (
                id, tenant_id, document_number, title, document_type, reference_type, reference_id,
                drafter_id, status, deadline_at, escalated, version, created_at, submitted_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(doc.id)
        .bind(doc.tenant_id)
        .bind(&doc.document_number)
        .bind(&doc.title)
        .bind(&doc.document_type)
        .bind(&doc.reference_type)
        .bind(doc.reference_id)
        .bind(doc.drafter_id)
        .bind(doc.status.as_str())
        .bind(doc.deadline_at)
        .bind(doc.escalated)
        .bind(doc.version)
        .bind(doc.created_at)
        .bind(doc.submitted_at)
        .bind(doc.completed_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::Duplicate(doc.id));
        }

        for line in &doc.lines {
            sqlx::query(
                r#"
                INSERT INTO approval_lines (
                    id, document_id, tenant_id, sequence, approver_id, approver_name, approver_role,
                    line_type, status, delegate_id, comment, acted_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(line.id)
            .bind(doc.id)
            .bind(doc.tenant_id)
            .bind(line.sequence)
            .bind(line.approver_id)
            .bind(&line.approver_name)
            .bind(line.approver_role.as_str())
            .bind(line.line_type.as_str())
            .bind(line.status.as_str())
            .bind(line.delegate_id)
            .bind(&line.comment)
            .bind(line.acted_at)
            .execute(&mut *tx)
            .await?;
        }

        Self::append_history(&mut tx, doc).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_on(
        conn: &mut PgConnection,
        doc: &ApprovalDocument,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut tx = conn.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE approval_documents
            SET status = $3, escalated = $4, version = $5, deadline_at = $6,
                submitted_at = $7, completed_at = $8
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(doc.id)
        .bind(expected_version)
        .bind(doc.status.as_str())
        .bind(doc.escalated)
        .bind(doc.version)
        .bind(doc.deadline_at)
        .bind(doc.submitted_at)
        .bind(doc.completed_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Dropping tx rolls back
            return Err(StoreError::VersionConflict {
                id: doc.id,
                expected: expected_version,
            });
        }

        for line in &doc.lines {
            sqlx::query(
                r#"
                UPDATE approval_lines
                SET status = $2, delegate_id = $3, comment = $4, acted_at = $5
                WHERE id = $1
                "#,
            )
            .bind(line.id)
            .bind(line.status.as_str())
            .bind(line.delegate_id)
            .bind(&line.comment)
            .bind(line.acted_at)
            .execute(&mut *tx)
            .await?;
        }

        Self::append_history(&mut tx, doc).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_history(conn: &mut PgConnection, doc: &ApprovalDocument) -> Result<(), StoreError> {
        for entry in &doc.history {
            sqlx::query(
                r#"
                INSERT INTO approval_histories (
                    id, document_id, tenant_id, actor_id, action, from_status, to_status,
                    line_sequence, comment, at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(entry.id)
            .bind(doc.id)
            .bind(doc.tenant_id)
            .bind(entry.actor_id)
            .bind(entry.action.as_str())
            .bind(entry.from_status.as_str())
            .bind(entry.to_status.as_str())
            .bind(entry.line_sequence)
            .bind(&entry.comment)
            .bind(entry.at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn load_on(conn: &mut PgConnection, id: Uuid) -> Result<Option<ApprovalDocument>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM approval_documents WHERE id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::hydrate(conn, &row).await?)),
            None => Ok(None),
        }
    }

    async fn overdue_on(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalDocument>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM approval_documents
            WHERE status = 'IN_PROGRESS' AND deadline_at < $1 AND escalated = false
            ORDER BY deadline_at
            LIMIT $2
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *conn)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            documents.push(Self::hydrate(conn, row).await?);
        }
        Ok(documents)
    }
}

#[async_trait]
impl ApprovalStore for PgApprovalStore {
    async fn insert(&self, ctx: &TenantContext, doc: &ApprovalDocument) -> Result<(), StoreError> {
        let mut bound = self.binder.checkout(ctx).await?;
        let result = Self::insert_on(&mut bound, doc).await;
        self.binder.release(bound).await;
        result
    }

    async fn load(&self, ctx: &TenantContext, id: Uuid) -> Result<Option<ApprovalDocument>, StoreError> {
        let mut bound = self.binder.checkout(ctx).await?;
        let result = Self::load_on(&mut bound, id).await;
        self.binder.release(bound).await;
        result
    }

    async fn update(
        &self,
        ctx: &TenantContext,
        doc: &ApprovalDocument,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut bound = self.binder.checkout(ctx).await?;
        let result = Self::update_on(&mut bound, doc, expected_version).await;
        self.binder.release(bound).await;
        result
    }

    async fn overdue_batch(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalDocument>, StoreError> {
        let mut bound = self.binder.checkout(ctx).await?;
        let result = Self::overdue_on(&mut bound, now, limit).await;
        self.binder.release(bound).await;
        result
    }

    async fn active_tenants(&self) -> Result<Vec<Uuid>, StoreError> {
        // The tenant registry is not row-level secured; idle connections carry no stamp
        let rows = sqlx::query("SELECT id FROM tenants WHERE status = 'ACTIVE' ORDER BY id")
            .fetch_all(self.binder.pool().inner())
            .await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(StoreError::from))
            .collect()
    }
}
