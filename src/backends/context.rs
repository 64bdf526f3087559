//! Interpreter context shared by the two ownership-managed backends.
//!
//! A context is owned by exactly one thread (an executor worker or the
//! creating thread) and is `!Send`: the backends keep it in a
//! thread local and only hand out `Arc` nodes, which are.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, error, trace};

use super::node_value::NodeValue;
use super::{HostEntry, invoke_host};
use crate::Error;
use crate::adapter::Scheme;
use crate::handle::Handle;
use crate::native::shared::{NodeRef, SharedHeap};
use crate::native::{Datum, Heap, HostCalls, Machine, Primitive, Symbol, bootstrap};
use crate::reader::parse_program;

pub(super) struct SharedContext {
    backend: &'static str,
    heap: SharedHeap,
    hosts: RefCell<Vec<Rc<HostEntry>>>,
}

impl SharedContext {
    /// Build a context and evaluate the bootstrap library in it
    pub fn boot(backend: &'static str) -> Rc<Self> {
        debug!(backend, "bootstrapping interpreter");
        let context = SharedContext {
            backend,
            heap: SharedHeap::new(),
            hosts: RefCell::new(Vec::new()),
        };
        if let Err(err) = bootstrap(&context.heap) {
            error!(backend, %err, "bootstrap library failed");
        }
        Rc::new(context)
    }

    pub fn eval_text(&self, scheme: &dyn Scheme, text: &str) -> Result<NodeRef, Error> {
        let forms = parse_program(text)?;
        let host = self.host(scheme);
        let result = Machine::new(&self.heap, &host).eval_program(&forms);
        self.release_cycles();
        result
    }

    pub fn eval_value(&self, scheme: &dyn Scheme, expr: &NodeRef) -> Result<NodeRef, Error> {
        let host = self.host(scheme);
        let result = Machine::new(&self.heap, &host).eval(expr, &self.heap.global_env());
        self.release_cycles();
        result
    }

    pub fn call(&self, scheme: &dyn Scheme, function: &NodeRef, args: Vec<NodeRef>) -> Result<NodeRef, Error> {
        let host = self.host(scheme);
        let mut machine = Machine::new(&self.heap, &host);
        let result = match args.len() {
            0..=3 => machine.apply(function, args),
            _ => {
                let list = self.heap.list(args);
                machine.apply_list(function, &list)
            }
        };
        self.release_cycles();
        result
    }

    /// Frames still referenced by an evaluation in progress survive
    fn release_cycles(&self) {
        let cleared = self.heap.break_cycles();
        if cleared > 0 {
            trace!(backend = self.backend, cleared, "released local environments");
        }
    }

    /// Append `entry` to the host table and bind it globally
    pub fn install(&self, name: &str, entry: HostEntry) {
        let index = {
            let mut hosts = self.hosts.borrow_mut();
            hosts.push(Rc::new(entry));
            hosts.len() - 1
        };
        let symbol: Symbol = name.into();
        let procedure = self.heap.alloc(Datum::Primitive(Primitive::Host(index)));
        self.heap.define(&self.heap.global_env(), symbol, procedure);
    }

    fn host<'a>(&'a self, scheme: &'a dyn Scheme) -> ContextHost<'a> {
        ContextHost { context: self, scheme }
    }
}

/// Node behind a handle produced by `backend`
pub(super) fn node_of(backend: &'static str, value: &Handle) -> Result<NodeRef, Error> {
    match value.downcast::<NodeValue>() {
        Some(native) if value.backend() == backend => Ok(native.node().clone()),
        _ => Err(Error::TypeError(format!(
            "value from the {} backend passed to the {backend} interpreter",
            value.backend()
        ))),
    }
}

struct ContextHost<'a> {
    context: &'a SharedContext,
    scheme: &'a dyn Scheme,
}

impl HostCalls<SharedHeap> for ContextHost<'_> {
    fn call_host(&self, index: usize, args: Vec<NodeRef>) -> Result<NodeRef, Error> {
        // Released before the call: the procedure may install further procedures
        let entry = self
            .context
            .hosts
            .borrow()
            .get(index)
            .cloned()
            .ok_or_else(|| Error::EvalError(format!("No host procedure installed at index {index}")))?;
        let count = args.len();
        let backend = self.context.backend;
        let list = NodeValue::handle(backend, self.context.heap.list(args));
        let result = invoke_host(self.scheme, &entry, list, count)?;
        node_of(backend, &result)
    }
}
