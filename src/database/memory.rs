//! In-process implementations of the storage seams.
//!
//! `MemoryPool` models a bounded connection pool whose connections carry a
//! session tenant setting, and `MemoryApprovalStore` keeps documents in a map
//! while still routing every operation through a `TenantBinder`. Both back the
//! test suites and local runs without Postgres.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use super::binder::{BindError, BoundConnection, SessionPool, TenantBinder, NO_TENANT};
use super::store::{ApprovalStore, StoreError};
use crate::approval::{ApprovalDocument, DocumentStatus};
use crate::tenant::TenantContext;

const DEFAULT_CAPACITY: usize = 8;

/// A pooled in-memory connection with its own session setting
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
    session_tenant: String,
    _permit: OwnedSemaphorePermit,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn session_tenant(&self) -> &str {
        &self.session_tenant
    }
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<(usize, String)>,
    opened: usize,
    discarded: usize,
    failing_stamps: usize,
}

#[derive(Clone)]
pub struct MemoryPool {
    permits: Arc<Semaphore>,
    state: Arc<Mutex<PoolState>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    /// Makes the next `n` `set_config` calls fail
    pub async fn fail_next_stamps(&self, n: usize) {
        self.state.lock().await.failing_stamps = n;
    }

    /// Session settings of the idle connections, in pool order
    pub async fn idle_stamps(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .idle
            .iter()
            .map(|(_, stamp)| stamp.clone())
            .collect()
    }

    pub async fn opened(&self) -> usize {
        self.state.lock().await.opened
    }

    pub async fn discarded(&self) -> usize {
        self.state.lock().await.discarded
    }
}

#[async_trait]
impl SessionPool for MemoryPool {
    type Conn = MemoryConnection;

    async fn acquire(&self) -> Result<Self::Conn, BindError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| BindError::Acquire(e.to_string()))?;

        let mut state = self.state.lock().await;
        let (id, session_tenant) = match state.idle.pop() {
            Some(idle) => idle,
            None => {
                state.opened += 1;
                (state.opened, NO_TENANT.to_string())
            }
        };

        Ok(MemoryConnection {
            id,
            session_tenant,
            _permit: permit,
        })
    }

    async fn set_session_tenant(&self, conn: &mut Self::Conn, value: &str) -> Result<(), String> {
        let mut state = self.state.lock().await;
        if state.failing_stamps > 0 {
            state.failing_stamps -= 1;
            return Err(format!("simulated failure setting tenant on connection {}", conn.id));
        }
        conn.session_tenant = value.to_string();
        Ok(())
    }

    async fn recycle(&self, conn: Self::Conn) {
        let mut state = self.state.lock().await;
        state.idle.push((conn.id, conn.session_tenant.clone()));
    }

    async fn discard(&self, conn: Self::Conn) {
        let mut state = self.state.lock().await;
        state.discarded += 1;
        drop(conn);
    }
}

/// Map-backed `ApprovalStore` with the same optimistic-version semantics as Postgres
pub struct MemoryApprovalStore {
    binder: TenantBinder<MemoryPool>,
    documents: Mutex<HashMap<Uuid, ApprovalDocument>>,
    tenants: Mutex<BTreeSet<Uuid>>,
}

impl Default for MemoryApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::with_pool(MemoryPool::new())
    }

    pub fn with_pool(pool: MemoryPool) -> Self {
        Self {
            binder: TenantBinder::new(pool),
            documents: Mutex::new(HashMap::new()),
            tenants: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn pool(&self) -> &MemoryPool {
        self.binder.pool()
    }

    pub async fn register_tenant(&self, tenant_id: Uuid) {
        self.tenants.lock().await.insert(tenant_id);
    }

    /// Raw fetch that skips tenant scoping, for assertions
    pub async fn snapshot(&self, id: Uuid) -> Option<ApprovalDocument> {
        self.documents.lock().await.get(&id).cloned()
    }

    async fn bind(&self, ctx: &TenantContext) -> Result<BoundConnection<MemoryConnection>, StoreError> {
        let bound = self.binder.checkout(ctx).await?;
        if bound.session_tenant() != ctx.tenant_id.to_string() {
            let stamp = bound.session_tenant().to_string();
            self.binder.release(bound).await;
            return Err(StoreError::Binding(BindError::StampFailed(format!(
                "connection carries '{}'",
                stamp
            ))));
        }
        Ok(bound)
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn insert(&self, ctx: &TenantContext, doc: &ApprovalDocument) -> Result<(), StoreError> {
        let bound = self.bind(ctx).await?;
        let result = {
            let mut documents = self.documents.lock().await;
            if documents.contains_key(&doc.id) {
                Err(StoreError::Duplicate(doc.id))
            } else {
                documents.insert(doc.id, doc.clone());
                Ok(())
            }
        };
        self.binder.release(bound).await;

        if result.is_ok() {
            self.register_tenant(doc.tenant_id).await;
        }
        result
    }

    async fn load(&self, ctx: &TenantContext, id: Uuid) -> Result<Option<ApprovalDocument>, StoreError> {
        let bound = self.bind(ctx).await?;
        let doc = self.documents.lock().await.get(&id).cloned();
        self.binder.release(bound).await;
        Ok(doc)
    }

    async fn update(
        &self,
        ctx: &TenantContext,
        doc: &ApprovalDocument,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let bound = self.bind(ctx).await?;
        let result = {
            let mut documents = self.documents.lock().await;
            match documents.get_mut(&doc.id) {
                Some(stored) if stored.tenant_id == ctx.tenant_id && stored.version == expected_version => {
                    *stored = doc.clone();
                    Ok(())
                }
                Some(stored) if stored.tenant_id == ctx.tenant_id => Err(StoreError::VersionConflict {
                    id: doc.id,
                    expected: expected_version,
                }),
                _ => Err(StoreError::NotFound(doc.id)),
            }
        };
        self.binder.release(bound).await;
        result
    }

    async fn overdue_batch(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalDocument>, StoreError> {
        let bound = self.bind(ctx).await?;
        let mut overdue: Vec<ApprovalDocument> = self
            .documents
            .lock()
            .await
            .values()
            .filter(|d| d.tenant_id == ctx.tenant_id)
            .filter(|d| d.status == DocumentStatus::InProgress && d.is_overdue(now))
            .cloned()
            .collect();
        self.binder.release(bound).await;

        overdue.sort_by_key(|d| d.deadline_at);
        overdue.truncate(limit as usize);
        Ok(overdue)
    }

    async fn active_tenants(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.tenants.lock().await.iter().copied().collect())
    }
}
