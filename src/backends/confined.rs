//! Confined backend: ownership-managed nodes, context pinned to a worker.
//!
//! The interpreter context lives in a thread local of the executor's
//! worker, so nothing but the worker can ever reach it. Handles are plain
//! `Arc` nodes and need no protection; every operation that touches the
//! context is submitted to the executor.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{error, warn};

use super::context::{SharedContext, node_of};
use super::node_value::NodeValue;
use super::HostEntry;
use crate::Error;
use crate::adapter::{HostProcedure, Scheme, SchemeError};
use crate::blackbox::Blackbox;
use crate::executor::Executor;
use crate::handle::Handle;
use crate::native::shared::{self, NodeRef};
use crate::native::{Arity, Datum};

pub const NAME: &str = "confined";

thread_local! {
    static CONTEXT: RefCell<Option<Rc<SharedContext>>> = const { RefCell::new(None) };
}

fn current_context() -> Result<Rc<SharedContext>, Error> {
    CONTEXT
        .with(|slot| slot.borrow().clone())
        .ok_or_else(|| Error::EvalError(format!("no {NAME} interpreter on this thread")))
}

struct ConfinedInner {
    executor: Executor,
}

/// The worker-confined interpreter adapter
#[derive(Clone)]
pub struct ConfinedScheme {
    inner: Arc<ConfinedInner>,
}

impl Default for ConfinedScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfinedScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfinedScheme")
            .field("executor", &self.inner.executor)
            .finish()
    }
}

impl ConfinedScheme {
    pub fn new() -> Self {
        let executor = Executor::new(NAME, || {
            let context = SharedContext::boot(NAME);
            CONTEXT.with(|slot| *slot.borrow_mut() = Some(context));
        });
        ConfinedScheme {
            inner: Arc::new(ConfinedInner { executor }),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    fn wrap(&self, datum: Datum<NodeRef, shared::FrameRef>) -> Handle {
        NodeValue::handle(NAME, shared::node(datum))
    }

    fn run<F>(&self, job: F) -> Result<Handle, SchemeError>
    where
        F: FnOnce(&SharedContext, &ConfinedScheme) -> Result<NodeRef, Error> + Send + 'static,
    {
        let this = self.clone();
        let outcome = self.inner.executor.submit(move || {
            let context = current_context()?;
            job(&context, &this)
        });
        match outcome {
            Some(result) => Ok(NodeValue::handle(NAME, result?)),
            None => {
                warn!(backend = NAME, "interpreter is shut down, returning unspecified");
                Ok(self.unspecified())
            }
        }
    }
}

impl Scheme for ConfinedScheme {
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
        let text = text.to_owned();
        self.run(move |context, this| context.eval_text(this, &text))
    }

    fn eval_value(&self, expr: &Handle) -> Result<Handle, SchemeError> {
        let expr = node_of(NAME, expr)?;
        self.run(move |context, this| context.eval_value(this, &expr))
    }

    fn call(&self, function: &Handle, args: &[Handle]) -> Result<Handle, SchemeError> {
        let function = node_of(NAME, function)?;
        let args = args
            .iter()
            .map(|arg| node_of(NAME, arg))
            .collect::<Result<Vec<_>, _>>()?;
        self.run(move |context, this| context.call(this, &function, args))
    }

    fn install_procedure(&self, name: &str, procedure: HostProcedure, required: usize, optional: usize) {
        assert!(
            optional == 0,
            "{name}: optional arguments are not supported by the {NAME} backend"
        );
        let entry = HostEntry::new(name, procedure, Arity::Exact(required));
        let symbol = name.to_owned();
        let installed = self.run(move |context, _| {
            context.install(&symbol, entry);
            Ok(shared::node(Datum::Unspecified))
        });
        if let Err(err) = installed {
            error!(backend = NAME, procedure = name, %err, "cannot install procedure");
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use std::thread;

    use super::*;
    use crate::adapter::host_procedure;

    #[test]
    fn test_context_lives_only_on_the_worker() {
        let scheme = ConfinedScheme::new();
        assert_eq!(scheme.eval_text("(+ 1 2)").unwrap().to_long(), 3);
        assert!(current_context().is_err());
        let worker = scheme.executor().worker_thread();
        assert!(worker.is_some());
        assert_ne!(worker, Some(thread::current().id()));
    }

    #[test]
    fn test_reentrant_eval_from_a_host_procedure() {
        let scheme = ConfinedScheme::new();
        scheme.install_procedure(
            "eval-inside",
            host_procedure(|scheme, args| scheme.eval_text(&args.car().to_string_value())),
            1,
            0,
        );
        let value = scheme.eval_text("(eval-inside \"(* 6 7)\")").unwrap();
        assert_eq!(value.to_long(), 42);
    }

    #[test]
    #[should_panic(expected = "optional arguments are not supported")]
    fn test_optional_arguments_are_rejected() {
        let scheme = ConfinedScheme::new();
        scheme.install_procedure("opt", host_procedure(|scheme, _| Ok(scheme.null())), 1, 1);
    }

    #[test]
    fn test_values_from_other_backends_are_refused() {
        let confined = ConfinedScheme::new();
        let foreign = NodeValue::handle("direct", shared::node(Datum::Int(1)));
        let err = confined.eval_value(&foreign).unwrap_err();
        assert!(err.to_string().contains("direct backend"));
    }

    #[test]
    fn test_shut_down_interpreter_answers_unspecified() {
        let scheme = ConfinedScheme::new();
        scheme.eval_text("1").unwrap();
        scheme.executor().destroy();
        assert!(scheme.eval_text("(+ 1 2)").unwrap().is_unspecified());
    }
}
