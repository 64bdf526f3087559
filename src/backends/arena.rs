//! Arena backend: mark/sweep heap, protected handles, serialised evaluation.
//!
//! Values held by host code are collector roots for as long as a handle on
//! them exists. Constructors and handle operations run on the calling
//! thread under the heap's own locks; evaluation, calls and procedure
//! installation run on the executor's worker. Collection happens only on
//! the worker between outermost operations, when no unprotected cell can
//! be live on any stack.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use super::{HostEntry, invoke_host};
use crate::Error;
use crate::adapter::{HostProcedure, Scheme, SchemeError};
use crate::blackbox::Blackbox;
use crate::executor::Executor;
use crate::handle::{Handle, NativeValue, same_backend, type_mismatch};
use crate::native::arena::{ArenaHeap, CellRef, EnvRef, HeapStats};
use crate::native::{Arity, Datum, Heap, HostCalls, Machine, Primitive, Symbol, bootstrap};
use crate::reader::parse_program;

pub const NAME: &str = "arena";

/// A protected cell; the protection is released on drop
pub struct ArenaValue {
    heap: Arc<ArenaHeap>,
    cell: CellRef,
}

impl ArenaValue {
    /// Take ownership of one protection already registered for `cell`
    fn adopt(heap: &Arc<ArenaHeap>, cell: CellRef) -> Handle {
        Handle::new(ArenaValue {
            heap: heap.clone(),
            cell,
        })
    }

    fn alloc(heap: &Arc<ArenaHeap>, datum: Datum<CellRef, EnvRef>) -> Handle {
        Self::adopt(heap, heap.alloc_pinned(datum))
    }

    pub fn cell(&self) -> CellRef {
        self.cell
    }

    fn view(&self) -> Datum<CellRef, EnvRef> {
        self.heap.view(&self.cell)
    }

    fn other<'a>(&self, other: &'a dyn NativeValue) -> &'a ArenaValue {
        let other = same_backend::<ArenaValue>(self, other);
        assert!(
            Arc::ptr_eq(&self.heap, &other.heap),
            "cannot combine values from two arena interpreters"
        );
        other
    }
}

impl Drop for ArenaValue {
    fn drop(&mut self) {
        self.heap.unprotect(self.cell);
    }
}

impl fmt::Debug for ArenaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaValue({:?})", self.cell)
    }
}

impl NativeValue for ArenaValue {
    fn backend(&self) -> &'static str {
        NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe_type(&self) -> String {
        self.view().type_name().to_owned()
    }

    fn is_null(&self) -> bool {
        matches!(self.view(), Datum::Nil)
    }

    fn is_pair(&self) -> bool {
        matches!(self.view(), Datum::Pair(..))
    }

    fn is_list(&self) -> bool {
        self.heap.is_list(&self.cell)
    }

    fn is_bool(&self) -> bool {
        matches!(self.view(), Datum::Bool(_))
    }

    fn is_int(&self) -> bool {
        matches!(self.view(), Datum::Int(_))
    }

    fn is_real(&self) -> bool {
        matches!(self.view(), Datum::Real(_))
    }

    fn is_string(&self) -> bool {
        matches!(self.view(), Datum::Str(_))
    }

    fn is_symbol(&self) -> bool {
        matches!(self.view(), Datum::Sym(_))
    }

    fn is_procedure(&self) -> bool {
        self.view().is_procedure()
    }

    fn is_blackbox(&self) -> bool {
        matches!(self.view(), Datum::Foreign(_))
    }

    fn is_unspecified(&self) -> bool {
        matches!(self.view(), Datum::Unspecified)
    }

    fn combinable(&self, other: &dyn NativeValue) -> bool {
        other
            .as_any()
            .downcast_ref::<ArenaValue>()
            .is_some_and(|other| Arc::ptr_eq(&self.heap, &other.heap))
    }

    fn is_equal(&self, other: &dyn NativeValue) -> bool {
        let other = self.other(other);
        self.heap.is_equal(&self.cell, &other.cell)
    }

    fn cons(&self, cdr: &dyn NativeValue) -> Handle {
        let cdr = self.other(cdr).cell;
        ArenaValue::alloc(&self.heap, Datum::Pair(self.cell, cdr))
    }

    fn car(&self) -> Handle {
        let cell = self.heap.pinned(|heap| match heap.view(&self.cell) {
            Datum::Pair(car, _) => car,
            _ => type_mismatch("pair", self),
        });
        ArenaValue::adopt(&self.heap, cell)
    }

    fn cdr(&self) -> Handle {
        let cell = self.heap.pinned(|heap| match heap.view(&self.cell) {
            Datum::Pair(_, cdr) => cdr,
            _ => type_mismatch("pair", self),
        });
        ArenaValue::adopt(&self.heap, cell)
    }

    fn set_car(&self, value: &dyn NativeValue) {
        let value = self.other(value).cell;
        if !self.heap.set_car(&self.cell, value) {
            type_mismatch("pair", self)
        }
    }

    fn set_cdr(&self, value: &dyn NativeValue) {
        let value = self.other(value).cell;
        if !self.heap.set_cdr(&self.cell, value) {
            type_mismatch("pair", self)
        }
    }

    fn to_bool(&self) -> bool {
        match self.view() {
            Datum::Bool(b) => b,
            _ => type_mismatch("boolean", self),
        }
    }

    fn to_long(&self) -> i64 {
        match self.view() {
            Datum::Int(n) => n,
            _ => type_mismatch("integer", self),
        }
    }

    fn to_double(&self) -> f64 {
        match self.view() {
            Datum::Real(x) => x,
            // Exact integers widen to doubles
            Datum::Int(n) => n as f64,
            _ => type_mismatch("number", self),
        }
    }

    fn to_string_value(&self) -> String {
        match self.view() {
            Datum::Str(s) => s.to_string(),
            _ => type_mismatch("string", self),
        }
    }

    fn to_symbol(&self) -> String {
        match self.view() {
            Datum::Sym(s) => s.to_string(),
            _ => type_mismatch("symbol", self),
        }
    }

    fn to_blackbox(&self) -> Blackbox {
        match self.view() {
            Datum::Foreign(blackbox) => blackbox,
            _ => type_mismatch("blackbox", self),
        }
    }

    fn write(&self) -> String {
        self.heap.to_written(&self.cell)
    }
}

struct ArenaInner {
    heap: Arc<ArenaHeap>,
    executor: Executor,
    hosts: RwLock<Vec<Arc<HostEntry>>>,
    /// Depth of bridge operations currently running on the worker
    nesting: AtomicUsize,
}

/// The arena interpreter adapter
#[derive(Clone)]
pub struct ArenaScheme {
    inner: Arc<ArenaInner>,
}

impl Default for ArenaScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArenaScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaScheme")
            .field("heap", &self.inner.heap)
            .field("executor", &self.inner.executor)
            .finish()
    }
}

impl ArenaScheme {
    pub fn new() -> Self {
        let heap = Arc::new(ArenaHeap::new());
        let boot_heap = heap.clone();
        let executor = Executor::new(NAME, move || {
            debug!(backend = NAME, "bootstrapping interpreter");
            if let Err(err) = bootstrap(boot_heap.as_ref()) {
                error!(backend = NAME, %err, "bootstrap library failed");
            }
        });
        ArenaScheme {
            inner: Arc::new(ArenaInner {
                heap,
                executor,
                hosts: RwLock::new(Vec::new()),
                nesting: AtomicUsize::new(0),
            }),
        }
    }

    pub fn heap(&self) -> &Arc<ArenaHeap> {
        &self.inner.heap
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.heap.stats()
    }

    /// Run a full collection on the worker, returning the number of cells freed.
    ///
    /// Does nothing when called from inside an evaluation.
    pub fn collect_garbage(&self) -> usize {
        let this = self.clone();
        self.inner
            .executor
            .submit(move || {
                if this.inner.nesting.load(Ordering::SeqCst) > 0 {
                    debug!(backend = NAME, "collection skipped during evaluation");
                    return 0;
                }
                this.inner.heap.collect()
            })
            .unwrap_or(0)
    }

    fn wrap(&self, datum: Datum<CellRef, EnvRef>) -> Handle {
        ArenaValue::alloc(&self.inner.heap, datum)
    }

    fn cell_of(&self, value: &Handle) -> Result<CellRef, Error> {
        match value.downcast::<ArenaValue>() {
            Some(value) if Arc::ptr_eq(&value.heap, &self.inner.heap) => Ok(value.cell),
            _ => Err(Error::TypeError(format!(
                "value from the {} backend passed to the arena interpreter",
                value.backend()
            ))),
        }
    }

    /// Run `job` on the worker, collecting afterwards if this was the outermost operation
    fn run<F>(&self, job: F) -> Result<Handle, SchemeError>
    where
        F: FnOnce(&ArenaScheme) -> Result<Handle, Error> + Send + 'static,
    {
        let this = self.clone();
        let outcome = self.inner.executor.submit(move || {
            let nesting = Nesting::enter(&this.inner.nesting);
            let result = job(&this);
            if nesting.leave() && this.inner.heap.should_collect() {
                this.inner.heap.collect();
            }
            result
        });
        match outcome {
            Some(result) => result.map_err(SchemeError::from),
            None => {
                warn!(backend = NAME, "interpreter is shut down, returning unspecified");
                Ok(self.unspecified())
            }
        }
    }

    fn machine(&self) -> Machine<'_, ArenaHeap> {
        Machine::new(self.inner.heap.as_ref(), self)
    }

    /// A new handle holding its own protection on `cell`
    pub fn pin(&self, cell: CellRef) -> Handle {
        let heap = &self.inner.heap;
        ArenaValue::adopt(heap, heap.pinned(|_| cell))
    }
}

/// One evaluation in progress on the worker; the count is restored on unwind
struct Nesting<'a>(&'a AtomicUsize);

impl<'a> Nesting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Nesting(counter)
    }

    /// Finish normally, reporting whether this was the outermost evaluation
    fn leave(self) -> bool {
        let outermost = self.0.fetch_sub(1, Ordering::SeqCst) == 1;
        std::mem::forget(self);
        outermost
    }
}

impl Drop for Nesting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HostCalls<ArenaHeap> for ArenaScheme {
    fn call_host(&self, index: usize, args: Vec<CellRef>) -> Result<CellRef, Error> {
        let entry = self
            .inner
            .hosts
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| Error::EvalError(format!("No host procedure installed at index {index}")))?;
        let count = args.len();
        let heap = &self.inner.heap;
        let list = ArenaValue::adopt(heap, heap.pinned(|heap| heap.list(args)));
        let result = invoke_host(self, &entry, list, count)?;
        // No collection runs before the evaluator stores this cell
        self.cell_of(&result)
    }
}

impl Scheme for ArenaScheme {
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
        self.run(move |this| {
            let forms = parse_program(&text)?;
            let value = this.machine().eval_program(&forms)?;
            Ok(this.pin(value))
        })
    }

    fn eval_value(&self, expr: &Handle) -> Result<Handle, SchemeError> {
        let expr = expr.clone();
        self.run(move |this| {
            let cell = this.cell_of(&expr)?;
            let global = this.inner.heap.global_env();
            let value = this.machine().eval(&cell, &global)?;
            Ok(this.pin(value))
        })
    }

    fn call(&self, function: &Handle, args: &[Handle]) -> Result<Handle, SchemeError> {
        let function = function.clone();
        let args = args.to_vec();
        self.run(move |this| {
            let func = this.cell_of(&function)?;
            let cells = args
                .iter()
                .map(|arg| this.cell_of(arg))
                .collect::<Result<Vec<_>, _>>()?;
            let mut machine = this.machine();
            let value = match cells.len() {
                0..=3 => machine.apply(&func, cells)?,
                _ => {
                    let list = this.inner.heap.list(cells);
                    machine.apply_list(&func, &list)?
                }
            };
            Ok(this.pin(value))
        })
    }

    fn install_procedure(&self, name: &str, procedure: HostProcedure, required: usize, optional: usize) {
        let entry = HostEntry::new(name, procedure, Arity::with_optional(required, optional));
        let symbol: Symbol = name.into();
        let result = self.run(move |this| {
            let heap = &this.inner.heap;
            let index = {
                let mut hosts = this.inner.hosts.write();
                hosts.push(Arc::new(entry));
                hosts.len() - 1
            };
            let procedure = heap.alloc(Datum::Primitive(Primitive::Host(index)));
            heap.define(&heap.global_env(), symbol, procedure);
            Ok(this.unspecified())
        });
        if let Err(err) = result {
            error!(backend = NAME, procedure = name, %err, "cannot install procedure");
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::adapter::host_procedure;

    #[test]
    fn test_handles_protect_until_last_drop() {
        let scheme = ArenaScheme::new();
        let value = scheme.string_to_value("kept");
        let cell = value.downcast::<ArenaValue>().unwrap().cell();
        let copies: Vec<Handle> = (0..3).map(|_| value.clone()).collect();
        let sibling = scheme.pin(cell);
        assert_eq!(scheme.heap().protection_count(cell), 2);

        drop(value);
        drop(copies);
        scheme.collect_garbage();
        assert!(scheme.heap().is_live(cell));
        assert_eq!(sibling.to_string_value(), "kept");

        drop(sibling);
        assert_eq!(scheme.heap().protection_count(cell), 0);
        scheme.collect_garbage();
        assert!(!scheme.heap().is_live(cell));
    }

    #[test]
    fn test_collection_keeps_definitions_and_drops_garbage() {
        let scheme = ArenaScheme::new();
        scheme.eval_text("(define kept (list 1 2 3))").unwrap();
        scheme
            .eval_text("(let loop ((i 0)) (if (< i 100) (begin (list i i i) (loop (+ i 1)))))")
            .unwrap();
        let before = scheme.stats().live;
        assert!(scheme.collect_garbage() > 0);
        assert!(scheme.stats().live < before);
        assert_eq!(scheme.eval_text("kept").unwrap().write(), "(1 2 3)");
    }

    #[test]
    fn test_optional_arguments_are_supported() {
        let scheme = ArenaScheme::new();
        scheme.install_procedure(
            "count-args",
            host_procedure(|scheme, args| Ok(scheme.int_to_value(args.to_vec_of(|_| ()).len() as i32))),
            1,
            2,
        );
        assert_eq!(scheme.eval_text("(count-args 1)").unwrap().to_int(), 1);
        assert_eq!(scheme.eval_text("(count-args 1 2 3)").unwrap().to_int(), 3);
        assert!(scheme.eval_text("(count-args)").is_err());
        assert!(scheme.eval_text("(count-args 1 2 3 4)").is_err());
    }

    #[test]
    fn test_evaluation_runs_on_the_worker() {
        let scheme = ArenaScheme::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let record = seen.clone();
        scheme.install_procedure(
            "record-thread",
            host_procedure(move |scheme, _| {
                *record.lock() = Some(std::thread::current().id());
                Ok(scheme.unspecified())
            }),
            0,
            0,
        );
        scheme.eval_text("(record-thread)").unwrap();
        assert_eq!(*seen.lock(), scheme.executor().worker_thread());
        assert_ne!(*seen.lock(), Some(std::thread::current().id()));
    }

    #[test]
    fn test_fast_and_list_call_paths_agree() {
        let scheme = ArenaScheme::new();
        let list = scheme.eval_text("list").unwrap();
        for count in 0..6 {
            let args: Vec<Handle> = (0..count).map(|i| scheme.int_to_value(i)).collect();
            let result = scheme.call(&list, &args).unwrap();
            assert_eq!(result.to_array_int(), (0..count).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_collection_resumes_after_a_host_panic() {
        let scheme = ArenaScheme::new();
        scheme.install_procedure("boom", host_procedure(|_, _| panic!("host failure")), 0, 0);
        let garbage = "(let loop ((i 0)) (if (< i 100) (begin (list i i i) (loop (+ i 1)))))";

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| scheme.eval_text("(boom)")));
        assert!(outcome.is_err());

        scheme.eval_text(garbage).unwrap();
        assert!(scheme.collect_garbage() > 0);
        assert_eq!(scheme.eval_text("(+ 1 2)").unwrap().to_int(), 3);
    }

    #[test]
    fn test_circular_list_is_not_a_list() {
        let scheme = ArenaScheme::new();
        let result = scheme
            .eval_text("(define x (list 1 2)) (set-cdr! (cdr x) x) (list? x)")
            .unwrap();
        assert!(!result.to_bool());
        let circular = scheme.eval_text("x").unwrap();
        assert!(circular.is_pair());
        assert!(!circular.is_list());
        assert!(!circular.is_array_int());
        assert!(scheme.eval_text("(length x)").is_err());
    }
}
