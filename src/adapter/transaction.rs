//! Transaction contract
//!
//! A transaction pins one connection for its lifetime. Commit and
//! rollback consume the handle, and the trait exposes no `begin`, so a
//! nested transaction on the same handle is impossible by construction.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

use crate::error::OrmResult;
use crate::value::Row;

use super::{DatabaseAdapter, ExecuteOutcome, Statement};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One in-progress transaction
#[async_trait]
pub trait AdapterTransaction: Send {
    async fn query(&mut self, stmt: &Statement) -> OrmResult<Vec<Row>>;

    async fn execute(&mut self, stmt: &Statement) -> OrmResult<ExecuteOutcome>;

    async fn commit(self: Box<Self>) -> OrmResult<()>;

    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Run `f` inside a transaction: commit when it returns Ok, roll back on
/// any error. Writes are never partially applied.
pub async fn run_in_transaction<T, F>(adapter: &dyn DatabaseAdapter, f: F) -> OrmResult<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn AdapterTransaction) -> BoxFuture<'t, OrmResult<T>> + Send,
{
    let mut tx = adapter.begin().await?;
    match f(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "transaction rollback failed");
            }
            Err(e)
        }
    }
}
