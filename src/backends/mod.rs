//! The concrete interpreter backends.
//!
//! All three evaluate with the shared core in [`crate::native`]; they differ
//! in heap, protection discipline and threading:
//!
//! - [`arena`]: mark/sweep arena with a refcounted root table, evaluation
//!   serialised through a confinement executor
//! - [`confined`]: ownership-managed nodes, context owned by an executor
//!   worker thread
//! - [`direct`]: ownership-managed nodes, context owned by the thread that
//!   created the interpreter

use std::sync::Arc;

use tracing::trace;

use crate::Error;
use crate::adapter::{HostProcedure, Scheme, SchemeError};
use crate::handle::Handle;
use crate::native::Arity;
use crate::registry::SchemeFactory;

pub mod arena;
pub mod confined;
mod context;
pub mod direct;
mod node_value;

pub use arena::{ArenaScheme, ArenaValue};
pub use confined::ConfinedScheme;
pub use direct::DirectScheme;
pub use node_value::NodeValue;

/// One installed host procedure
pub(crate) struct HostEntry {
    pub name: String,
    pub procedure: HostProcedure,
    pub arity: Arity,
}

impl HostEntry {
    pub fn new(name: &str, procedure: HostProcedure, arity: Arity) -> Self {
        HostEntry {
            name: name.to_owned(),
            procedure,
            arity,
        }
    }
}

/// Run a host procedure on behalf of interpreter code.
///
/// `args` is the argument list as built by the backend; `count` its length.
/// Failures come back as interpreter errors so that interpreter code sees
/// them like any other evaluation failure.
pub(crate) fn invoke_host(
    scheme: &dyn Scheme,
    entry: &HostEntry,
    args: Handle,
    count: usize,
) -> Result<Handle, Error> {
    entry
        .arity
        .validate(count)
        .map_err(|_| Error::arity_error_in(entry.arity, count, &entry.name))?;
    trace!(procedure = %entry.name, count, "calling host procedure");
    (entry.procedure)(scheme, args).map_err(|err| match err {
        SchemeError::Evaluation { message } => Error::EvalError(message),
        other => Error::EvalError(format!("{}: {other}", entry.name)),
    })
}

fn make_arena() -> Arc<dyn Scheme> {
    Arc::new(ArenaScheme::new())
}

fn make_confined() -> Arc<dyn Scheme> {
    Arc::new(ConfinedScheme::new())
}

fn make_direct() -> Arc<dyn Scheme> {
    Arc::new(DirectScheme::new())
}

/// Factories for the backends compiled into this crate
pub(crate) fn builtin_factories() -> Vec<SchemeFactory> {
    vec![
        SchemeFactory::new(arena::NAME, make_arena),
        SchemeFactory::new(confined::NAME, make_confined),
        SchemeFactory::new(direct::NAME, make_direct),
    ]
}
