//! Transaction abstractions modeled after Spring's TransactionTemplate, plus a
//! manager that drives any [`Connection`].

use std::sync::Arc;
use std::time::Duration;

use crate::{Connection, Error, Result};

/// Transaction propagation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Required,
    RequiresNew,
    Supports,
    NotSupported,
    Never,
    Nested,
}

/// Transaction isolation level (best-effort across backends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Transaction definition describing desired semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefinition {
    pub propagation: Propagation,
    pub isolation: Isolation,
    pub read_only: bool,
    pub timeout: Option<Duration>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            read_only: false,
            timeout: None,
        }
    }
}

impl TransactionDefinition {
    /// Always opens a new scope, a savepoint when a transaction is already active.
    pub fn nested() -> Self {
        Self {
            propagation: Propagation::Nested,
            ..Self::default()
        }
    }
}

/// Mutable transaction status recorded by the manager for a running transaction.
#[derive(Debug, Default)]
pub struct TransactionStatus {
    new: bool,
    rollback_only: bool,
}

impl TransactionStatus {
    pub fn new(is_new: bool) -> Self {
        Self {
            new: is_new,
            rollback_only: false,
        }
    }
    pub fn is_new_transaction(&self) -> bool {
        self.new
    }
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }
}

/// Opaque handle passed to transactional callbacks.
#[derive(Debug, Clone, Copy)]
pub struct TransactionContext<'a> {
    _priv: std::marker::PhantomData<&'a ()>,
}

impl<'a> TransactionContext<'a> {
    pub fn new() -> Self {
        Self {
            _priv: std::marker::PhantomData,
        }
    }
}

impl<'a> Default for TransactionContext<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
pub trait TransactionManager: Send + Sync {
    /// Execute the provided async callback within a transactional scope according to
    /// the given definition. Implementations must ensure commit/rollback as appropriate.
    async fn execute<'a, R, F, Fut>(&'a self, def: &TransactionDefinition, f: F) -> Result<R>
    where
        F: FnOnce(TransactionContext<'a>) -> Fut + Send + 'a,
        Fut: core::future::Future<Output = Result<R>> + Send + 'a,
        R: Send + 'a;
}

/// Convenience wrapper similar to Spring's TransactionTemplate.
#[derive(Debug)]
pub struct TransactionTemplate<M: TransactionManager> {
    manager: M,
    defaults: TransactionDefinition,
}

impl<M: TransactionManager> TransactionTemplate<M> {
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            defaults: TransactionDefinition::default(),
        }
    }
    pub fn with_defaults(mut self, def: TransactionDefinition) -> Self {
        self.defaults = def;
        self
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub async fn execute<R, F, Fut>(&self, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> Fut + Send,
        Fut: core::future::Future<Output = Result<R>> + Send,
        R: Send + 'static,
    {
        self.manager.execute(&self.defaults, f).await
    }

    pub async fn execute_with<R, F, Fut>(&self, def: &TransactionDefinition, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(TransactionContext<'a>) -> Fut + Send,
        Fut: core::future::Future<Output = Result<R>> + Send,
        R: Send + 'static,
    {
        self.manager.execute(def, f).await
    }
}

/// Runs callbacks inside `begin_transaction` / `commit` / `roll_back` of a [`Connection`].
///
/// `Required` joins an active transaction and begins one otherwise. `RequiresNew`
/// and `Nested` always begin, which nests as a savepoint. `Supports` and
/// `NotSupported` never begin. `Never` fails inside an active transaction.
#[derive(Clone)]
pub struct ConnectionTransactionManager {
    conn: Arc<dyn Connection>,
}

impl ConnectionTransactionManager {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self { conn }
    }

    fn begins(&self, def: &TransactionDefinition) -> Result<bool> {
        let active = self.conn.is_transaction_active();
        match def.propagation {
            Propagation::Never if active => Err(Error::InvalidArgument(
                "transaction exists but Propagation::Never requested".into(),
            )),
            Propagation::Required => Ok(!active),
            Propagation::RequiresNew | Propagation::Nested => Ok(true),
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => Ok(false),
        }
    }
}

impl std::fmt::Debug for ConnectionTransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTransactionManager")
            .field("nesting_level", &self.conn.transaction_nesting_level())
            .finish()
    }
}

#[async_trait::async_trait]
impl TransactionManager for ConnectionTransactionManager {
    async fn execute<'a, R, F, Fut>(&'a self, def: &TransactionDefinition, f: F) -> Result<R>
    where
        F: FnOnce(TransactionContext<'a>) -> Fut + Send + 'a,
        Fut: core::future::Future<Output = Result<R>> + Send + 'a,
        R: Send + 'a,
    {
        let mut status = TransactionStatus::new(self.begins(def)?);
        if !status.is_new_transaction() {
            return f(TransactionContext::new()).await;
        }

        self.conn.begin_transaction().await?;
        let result = f(TransactionContext::new()).await;
        if result.is_err() {
            status.set_rollback_only();
        }

        if status.is_rollback_only() {
            // The callback's error is returned; a failed rollback is only logged.
            if let Err(_rollback) = self.conn.roll_back().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_rollback, "rollback failed");
            }
        } else {
            self.conn.commit().await?;
        }
        result
    }
}
