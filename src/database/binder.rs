use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use thiserror::Error;
use uuid::Uuid;

use crate::tenant::{ContextScope, TenantContext};

/// Session setting read by the RLS policies
pub const TENANT_SETTING: &str = "app.current_tenant";

/// Value a connection carries while it sits idle in the pool
pub const NO_TENANT: &str = "";

#[derive(Debug, Error)]
pub enum BindError {
    #[error("No tenant context; refusing to hand out an unscoped connection")]
    MissingTenantContext,

    #[error("Failed to acquire connection: {0}")]
    Acquire(String),

    #[error("Failed to stamp tenant on connection: {0}")]
    StampFailed(String),
}

/// The physical pool underneath the binder.
///
/// Implementations only move connections in and out and run the
/// `set_config` statement; the fail-closed policy lives in `TenantBinder`.
#[async_trait]
pub trait SessionPool: Send + Sync {
    type Conn: Send;

    async fn acquire(&self) -> Result<Self::Conn, BindError>;

    /// Sets the tenant session setting on `conn` to `value`
    async fn set_session_tenant(&self, conn: &mut Self::Conn, value: &str) -> Result<(), String>;

    /// Returns a cleared connection to the pool
    async fn recycle(&self, conn: Self::Conn);

    /// Closes a connection whose session state is unknown
    async fn discard(&self, conn: Self::Conn);
}

/// A checked-out connection together with the tenant it is stamped for.
///
/// Hand it back with `TenantBinder::release`. A guard that is dropped
/// instead (panic, cancelled future) never re-enters the pool stamped: the
/// Postgres pool resets the setting in its `after_release` hook and the
/// in-memory pool simply loses the connection.
pub struct BoundConnection<C> {
    conn: C,
    tenant_id: Uuid,
}

impl<C> BoundConnection<C> {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }
}

impl<C> Deref for BoundConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for BoundConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// Stamps the caller's tenant onto every connection it hands out and clears
/// the stamp before the connection goes back.
pub struct TenantBinder<P: SessionPool> {
    pool: P,
}

impl<P: SessionPool> TenantBinder<P> {
    pub fn new(pool: P) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Checkout against the unit of work's scope; an empty scope fails closed
    pub async fn checkout_scoped(
        &self,
        scope: &ContextScope,
    ) -> Result<BoundConnection<P::Conn>, BindError> {
        let ctx = scope.current().map_err(|_| BindError::MissingTenantContext)?;
        self.checkout(ctx).await
    }

    pub async fn checkout(&self, ctx: &TenantContext) -> Result<BoundConnection<P::Conn>, BindError> {
        if ctx.tenant_id.is_nil() {
            return Err(BindError::MissingTenantContext);
        }

        let mut conn = self.pool.acquire().await?;
        let stamp = ctx.tenant_id.to_string();

        if let Err(e) = self.pool.set_session_tenant(&mut conn, &stamp).await {
            tracing::error!(tenant_id = %ctx.tenant_id, "Tenant stamp failed, discarding connection: {}", e);
            self.pool.discard(conn).await;
            return Err(BindError::StampFailed(e));
        }

        tracing::debug!(tenant_id = %ctx.tenant_id, "Connection bound to tenant");
        Ok(BoundConnection {
            conn,
            tenant_id: ctx.tenant_id,
        })
    }

    pub async fn release(&self, bound: BoundConnection<P::Conn>) {
        let BoundConnection { mut conn, tenant_id } = bound;

        match self.pool.set_session_tenant(&mut conn, NO_TENANT).await {
            Ok(()) => self.pool.recycle(conn).await,
            Err(e) => {
                tracing::warn!(%tenant_id, "Tenant reset failed, discarding connection: {}", e);
                self.pool.discard(conn).await;
            }
        }
    }
}

/// `SessionPool` over a sqlx Postgres pool
#[derive(Clone)]
pub struct PgSessionPool {
    pool: PgPool,
}

impl PgSessionPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionPool for PgSessionPool {
    type Conn = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<Self::Conn, BindError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| BindError::Acquire(e.to_string()))
    }

    async fn set_session_tenant(&self, conn: &mut Self::Conn, value: &str) -> Result<(), String> {
        sqlx::query("SELECT set_config($1, $2, false)")
            .bind(TENANT_SETTING)
            .bind(value)
            .execute(&mut **conn)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn recycle(&self, conn: Self::Conn) {
        drop(conn);
    }

    async fn discard(&self, conn: Self::Conn) {
        if let Err(e) = conn.close().await {
            tracing::warn!("Error closing discarded connection: {}", e);
        }
    }
}
