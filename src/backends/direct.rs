//! Direct backend: ownership-managed nodes, context pinned to its creator.
//!
//! There is no executor. The context is built on the thread that creates
//! the adapter and stays in that thread's local table; evaluating, calling
//! or installing from any other thread is a programming error and panics.
//! Value constructors do not touch the context and work anywhere.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use tracing::{debug, error, warn};

use super::HostEntry;
use super::context::{SharedContext, node_of};
use super::node_value::NodeValue;
use crate::Error;
use crate::adapter::{HostProcedure, Scheme, SchemeError};
use crate::blackbox::Blackbox;
use crate::handle::Handle;
use crate::native::shared::{self, FrameRef, NodeRef};
use crate::native::{Arity, Datum};

pub const NAME: &str = "direct";

static NEXT_DIRECT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXTS: RefCell<HashMap<u64, Rc<SharedContext>>> = RefCell::new(HashMap::new());
}

struct DirectInner {
    id: u64,
    owner: ThreadId,
}

impl Drop for DirectInner {
    fn drop(&mut self) {
        if thread::current().id() != self.owner {
            warn!(
                backend = NAME,
                id = self.id,
                "interpreter dropped away from its thread, context kept until that thread exits"
            );
            return;
        }
        // Dropping the context may drop host closures holding other adapters
        let context = CONTEXTS
            .try_with(|contexts| contexts.borrow_mut().remove(&self.id))
            .ok()
            .flatten();
        drop(context);
        debug!(backend = NAME, id = self.id, "interpreter released");
    }
}

/// The creator-thread interpreter adapter
#[derive(Clone)]
pub struct DirectScheme {
    inner: Arc<DirectInner>,
}

impl Default for DirectScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DirectScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectScheme")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .finish()
    }
}

impl DirectScheme {
    /// Build an interpreter owned by the calling thread
    pub fn new() -> Self {
        let id = NEXT_DIRECT_ID.fetch_add(1, Ordering::Relaxed);
        let context = SharedContext::boot(NAME);
        CONTEXTS.with(|contexts| contexts.borrow_mut().insert(id, context));
        DirectScheme {
            inner: Arc::new(DirectInner {
                id,
                owner: thread::current().id(),
            }),
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.inner.owner
    }

    fn context(&self) -> Result<Rc<SharedContext>, Error> {
        let current = thread::current().id();
        assert_eq!(
            current, self.inner.owner,
            "the {NAME} interpreter was used from {current:?} but belongs to {:?}",
            self.inner.owner
        );
        CONTEXTS
            .with(|contexts| contexts.borrow().get(&self.inner.id).cloned())
            .ok_or_else(|| Error::EvalError(format!("{NAME} interpreter {} is gone", self.inner.id)))
    }

    fn wrap(&self, datum: Datum<NodeRef, FrameRef>) -> Handle {
        NodeValue::handle(NAME, shared::node(datum))
    }

    fn run(
        &self,
        job: impl FnOnce(&SharedContext) -> Result<NodeRef, Error>,
    ) -> Result<Handle, SchemeError> {
        let context = self.context()?;
        let node = job(&context)?;
        Ok(NodeValue::handle(NAME, node))
    }
}

impl Scheme for DirectScheme {
    fn name(&self) -> &'static str {
        NAME
    }

    fn dialect(&self) -> &'static str {
        NAME
    }

    fn null(&self) -> Handle {
        self.wrap(Datum::Nil)
    }

    fn unspecified(&self) -> Handle {
        self.wrap(Datum::Unspecified)
    }

    fn true_value(&self) -> Handle {
        self.wrap(Datum::Bool(true))
    }

    fn false_value(&self) -> Handle {
        self.wrap(Datum::Bool(false))
    }

    fn long_to_value(&self, n: i64) -> Handle {
        self.wrap(Datum::Int(n))
    }

    fn double_to_value(&self, x: f64) -> Handle {
        self.wrap(Datum::Real(x))
    }

    fn string_to_value(&self, s: &str) -> Handle {
        self.wrap(Datum::Str(s.into()))
    }

    fn symbol_to_value(&self, name: &str) -> Handle {
        self.wrap(Datum::Sym(name.into()))
    }

    fn blackbox_to_value(&self, blackbox: Blackbox) -> Handle {
        self.wrap(Datum::Foreign(blackbox))
    }

    fn eval_text(&self, text: &str) -> Result<Handle, SchemeError> {
        self.run(|context| context.eval_text(self, text))
    }

    fn eval_value(&self, expr: &Handle) -> Result<Handle, SchemeError> {
        let expr = node_of(NAME, expr)?;
        self.run(|context| context.eval_value(self, &expr))
    }

    fn call(&self, function: &Handle, args: &[Handle]) -> Result<Handle, SchemeError> {
        let function = node_of(NAME, function)?;
        let args = args
            .iter()
            .map(|arg| node_of(NAME, arg))
            .collect::<Result<Vec<_>, _>>()?;
        self.run(|context| context.call(self, &function, args))
    }

    fn install_procedure(&self, name: &str, procedure: HostProcedure, required: usize, optional: usize) {
        assert!(
            optional == 0,
            "{name}: optional arguments are not supported by the {NAME} backend"
        );
        let entry = HostEntry::new(name, procedure, Arity::Exact(required));
        match self.context() {
            Ok(context) => context.install(name, entry),
            Err(err) => error!(backend = NAME, procedure = name, %err, "cannot install procedure"),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::adapter::host_procedure;

    #[test]
    fn test_runs_on_the_creating_thread() {
        let scheme = DirectScheme::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let record = seen.clone();
        scheme.install_procedure(
            "record-thread",
            host_procedure(move |scheme, _| {
                *record.lock() = Some(thread::current().id());
                Ok(scheme.unspecified())
            }),
            0,
            0,
        );
        scheme.eval_text("(record-thread)").unwrap();
        assert_eq!(*seen.lock(), Some(scheme.owner()));
    }

    #[test]
    fn test_use_from_another_thread_panics() {
        let scheme = DirectScheme::new();
        let elsewhere = scheme.clone();
        let outcome = thread::spawn(move || elsewhere.eval_text("1").map(|_| ())).join();
        assert!(outcome.is_err());
        assert_eq!(scheme.eval_text("(+ 2 3)").unwrap().to_long(), 5);
    }

    #[test]
    fn test_constructors_work_on_any_thread() {
        let scheme = DirectScheme::new();
        let elsewhere = scheme.clone();
        let text = thread::spawn(move || elsewhere.string_to_value("built").to_string_value())
            .join()
            .unwrap();
        assert_eq!(text, "built");
    }

    #[test]
    fn test_instances_do_not_share_globals() {
        let first = DirectScheme::new();
        let second = DirectScheme::new();
        first.eval_text("(define only-here 1)").unwrap();
        assert!(first.eval_text("only-here").is_ok());
        assert!(second.eval_text("only-here").is_err());
    }

    #[test]
    fn test_dropping_releases_the_context() {
        let scheme = DirectScheme::new();
        let id = scheme.inner.id;
        drop(scheme);
        assert!(CONTEXTS.with(|contexts| !contexts.borrow().contains_key(&id)));
    }

    #[test]
    #[should_panic(expected = "optional arguments are not supported")]
    fn test_optional_arguments_are_rejected() {
        let scheme = DirectScheme::new();
        scheme.install_procedure("opt", host_procedure(|scheme, _| Ok(scheme.null())), 1, 2);
    }
}
