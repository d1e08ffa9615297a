//! Function binders
//!
//! A binder turns a SQL template into a bound function: an owned value that,
//! when called, renders the template against its arguments, runs it on the
//! caller's active connection (leasing one if none is active) and maps the
//! result into the declared return type.
//!
//! [`FunctionBinder`] serves blocking pools and keeps one connection scope
//! per thread. [`AsyncFunctionBinder`] serves async pools and keeps one scope
//! per tokio task.

mod async_scope;
mod asynchronous;
mod blocking;
mod scope;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::template::Template;
use crate::traits::Signature;

pub use async_scope::AsyncSession;
pub use asynchronous::{
    AsyncBoundExecution, AsyncBoundQuery, AsyncBoundStream, AsyncBoundTransaction,
    AsyncFunctionBinder, AsyncRowStream,
};
pub use blocking::{
    BoundExecution, BoundQuery, BoundStream, BoundTransaction, FunctionBinder, RowStream,
};
pub use scope::Session;

/// A bound function of a blocking binder.
pub trait BoundFunction<Args> {
    type Output;

    fn call(&self, args: Args) -> Result<Self::Output>;
}

/// A bound function of an async binder.
pub trait AsyncBoundFunction<Args> {
    type Output;

    fn call(&self, args: Args) -> impl Future<Output = Result<Self::Output>> + Send;
}

static NEXT_BINDER_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by a binder and everything bound through it.
pub(crate) struct BinderState<P> {
    id: u64,
    pool: OnceLock<P>,
}

impl<P> BinderState<P> {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_BINDER_ID.fetch_add(1, Ordering::Relaxed),
            pool: OnceLock::new(),
        }
    }

    /// Scope key: nested calls share a connection only through the same binder.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn set_pool(&self, pool: P) -> Result<()> {
        self.pool.set(pool).map_err(|_| Error::PoolAlreadySet)
    }

    pub(crate) fn pool(&self) -> Result<&P> {
        self.pool.get().ok_or(Error::NoPoolSet)
    }
}

/// Parse `sql` and check every placeholder root against `A`'s parameters.
pub(crate) fn bind_template<A: Signature>(sql: &str) -> Result<Template> {
    let template = Template::parse(sql)?;
    let declared = A::parameter_names();
    let missing = template
        .arguments()
        .iter()
        .filter_map(|path| path.first())
        .find(|root| !declared.contains(&root.as_str()));
    if let Some(root) = missing {
        return Err(Error::MissingTemplateArgument {
            argument: root.clone(),
            function: std::any::type_name::<A>().to_string(),
        });
    }
    Ok(template)
}
