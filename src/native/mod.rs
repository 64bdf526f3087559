//! Native interpreter layer shared by the backends.
//!
//! Every backend owns a heap implementing [`Heap`]. The evaluator in
//! [`eval`] and the primitives in [`builtins`] are written once against that
//! trait, so the backends differ only in how cells are stored, protected and
//! reclaimed.

use std::fmt;
use std::sync::Arc;

use crate::Error;
use crate::blackbox::Blackbox;
use crate::reader::{Sexpr, write_real, write_string_literal};

pub mod arena;
pub mod builtins;
pub mod eval;
pub mod shared;

pub use builtins::Builtin;
pub use eval::{HostCalls, Machine, NoHost};

/// Interned-or-shared symbol name
pub type Symbol = Arc<str>;

/// Scheme source of the library every backend evaluates while booting
pub const BOOTSTRAP_LIBRARY: &str = include_str!("bootstrap.scm");

/// Largest nesting printed before output is abbreviated
const MAX_PRINT_DEPTH: usize = 128;
/// Longest list printed before output is abbreviated
const MAX_PRINT_LENGTH: usize = 10_000;

/// Number of arguments a procedure accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
}

impl Arity {
    /// Arity of a procedure with `required` positional and `optional` trailing arguments
    pub fn with_optional(required: usize, optional: usize) -> Self {
        if optional == 0 {
            Arity::Exact(required)
        } else {
            Arity::Range(required, required + optional)
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
        }
    }

    pub fn validate(&self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
        }
    }
}

/// Procedure implemented outside the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Builtin(Builtin),
    /// Index into the owning adapter's host-procedure table
    Host(usize),
}

/// Parameter list of a lambda
#[derive(Debug, Clone, PartialEq)]
pub enum Formals {
    Fixed(Vec<Symbol>),
    /// Positional parameters followed by a rest parameter collecting the remainder
    Variadic(Vec<Symbol>, Symbol),
}

/// A closure: formals, body forms (as a native list) and captured environment
#[derive(Debug, Clone)]
pub struct Lambda<R, E> {
    pub formals: Arc<Formals>,
    pub body: R,
    pub env: E,
    pub name: Option<Symbol>,
}

/// Snapshot of one native cell, independent of how the heap stores it.
#[derive(Debug, Clone)]
pub enum Datum<R, E> {
    Nil,
    Unspecified,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(Arc<str>),
    Sym(Symbol),
    Pair(R, R),
    Closure(Lambda<R, E>),
    Primitive(Primitive),
    Foreign(Blackbox),
}

impl<R, E> Datum<R, E> {
    /// Short type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Nil => "null",
            Datum::Unspecified => "unspecified",
            Datum::Bool(_) => "boolean",
            Datum::Int(_) => "integer",
            Datum::Real(_) => "real",
            Datum::Str(_) => "string",
            Datum::Sym(_) => "symbol",
            Datum::Pair(..) => "pair",
            Datum::Closure(_) | Datum::Primitive(_) => "procedure",
            Datum::Foreign(_) => "blackbox",
        }
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Datum::Closure(_) | Datum::Primitive(_))
    }
}

/// Print mode for [`Heap::write_to`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    /// Machine-readable: strings are quoted and escaped
    Write,
    /// Human-readable: strings are emitted verbatim
    Display,
}

/// Storage for interpreter cells and environments.
///
/// Methods take `&self`; implementations synchronize internally and never
/// hold a lock across calls, so the evaluator can reenter the heap from
/// host callbacks.
pub trait Heap {
    type Ref: Clone + fmt::Debug;
    type Env: Clone;

    fn alloc(&self, datum: Datum<Self::Ref, Self::Env>) -> Self::Ref;
    fn view(&self, cell: &Self::Ref) -> Datum<Self::Ref, Self::Env>;
    /// Returns false if `pair` is not a pair
    fn set_car(&self, pair: &Self::Ref, value: Self::Ref) -> bool;
    /// Returns false if `pair` is not a pair
    fn set_cdr(&self, pair: &Self::Ref, value: Self::Ref) -> bool;
    /// Storage identity
    fn identical(&self, a: &Self::Ref, b: &Self::Ref) -> bool;

    fn global_env(&self) -> Self::Env;
    fn extend_env(&self, parent: &Self::Env, bindings: Vec<(Symbol, Self::Ref)>) -> Self::Env;
    fn define(&self, env: &Self::Env, name: Symbol, value: Self::Ref);
    fn lookup(&self, env: &Self::Env, name: &str) -> Option<Self::Ref>;
    /// Returns false if `name` is unbound
    fn assign(&self, env: &Self::Env, name: &str, value: Self::Ref) -> bool;

    fn nil(&self) -> Self::Ref {
        self.alloc(Datum::Nil)
    }

    fn unspecified(&self) -> Self::Ref {
        self.alloc(Datum::Unspecified)
    }

    fn boolean(&self, b: bool) -> Self::Ref {
        self.alloc(Datum::Bool(b))
    }

    fn integer(&self, n: i64) -> Self::Ref {
        self.alloc(Datum::Int(n))
    }

    fn real(&self, x: f64) -> Self::Ref {
        self.alloc(Datum::Real(x))
    }

    fn string(&self, s: &str) -> Self::Ref {
        self.alloc(Datum::Str(s.into()))
    }

    fn symbol(&self, name: &str) -> Self::Ref {
        self.alloc(Datum::Sym(name.into()))
    }

    fn cons(&self, car: Self::Ref, cdr: Self::Ref) -> Self::Ref {
        self.alloc(Datum::Pair(car, cdr))
    }

    fn list(&self, items: Vec<Self::Ref>) -> Self::Ref {
        let nil = self.nil();
        self.list_with_tail(items, nil)
    }

    fn list_with_tail(&self, items: Vec<Self::Ref>, tail: Self::Ref) -> Self::Ref {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| self.cons(item, acc))
    }

    /// Elements of a proper list, or `None` for anything else
    fn list_to_vec(&self, list: &Self::Ref) -> Option<Vec<Self::Ref>> {
        if !self.is_list(list) {
            return None;
        }
        let mut items = Vec::new();
        let mut cursor = list.clone();
        while let Datum::Pair(car, cdr) = self.view(&cursor) {
            items.push(car);
            cursor = cdr;
        }
        Some(items)
    }

    /// Proper, finite list; circular structure answers `false`
    fn is_list(&self, value: &Self::Ref) -> bool {
        let mut slow = value.clone();
        let mut fast = value.clone();
        loop {
            for _ in 0..2 {
                match self.view(&fast) {
                    Datum::Nil => return true,
                    Datum::Pair(_, cdr) => fast = cdr,
                    _ => return false,
                }
            }
            let Datum::Pair(_, cdr) = self.view(&slow) else {
                return false;
            };
            slow = cdr;
            if self.identical(&slow, &fast) {
                return false;
            }
        }
    }

    /// Scheme truthiness: everything except `#f` is true
    fn is_truthy(&self, value: &Self::Ref) -> bool {
        !matches!(self.view(value), Datum::Bool(false))
    }

    /// Build native cells for a parsed datum
    fn import(&self, sexpr: &Sexpr) -> Self::Ref {
        match sexpr {
            Sexpr::Integer(n) => self.integer(*n),
            Sexpr::Real(x) => self.real(*x),
            Sexpr::Bool(b) => self.boolean(*b),
            Sexpr::Str(s) => self.string(s),
            Sexpr::Symbol(name) => self.symbol(name),
            Sexpr::List(items, tail) => {
                let items = items.iter().map(|item| self.import(item)).collect();
                let tail = match tail {
                    Some(tail) => self.import(tail),
                    None => self.nil(),
                };
                self.list_with_tail(items, tail)
            }
        }
    }

    /// `eqv?`: value equality for atoms, identity for everything else
    fn is_eqv(&self, a: &Self::Ref, b: &Self::Ref) -> bool {
        match (self.view(a), self.view(b)) {
            (Datum::Nil, Datum::Nil) | (Datum::Unspecified, Datum::Unspecified) => true,
            (Datum::Bool(x), Datum::Bool(y)) => x == y,
            (Datum::Int(x), Datum::Int(y)) => x == y,
            (Datum::Real(x), Datum::Real(y)) => x == y,
            (Datum::Sym(x), Datum::Sym(y)) => x == y,
            (Datum::Primitive(x), Datum::Primitive(y)) => x == y,
            (Datum::Foreign(x), Datum::Foreign(y)) => x.same(&y),
            _ => self.identical(a, b),
        }
    }

    /// `equal?`: structural equality
    fn is_equal(&self, a: &Self::Ref, b: &Self::Ref) -> bool {
        let mut a = a.clone();
        let mut b = b.clone();
        loop {
            match (self.view(&a), self.view(&b)) {
                (Datum::Pair(car_a, cdr_a), Datum::Pair(car_b, cdr_b)) => {
                    if !self.is_equal(&car_a, &car_b) {
                        return false;
                    }
                    a = cdr_a;
                    b = cdr_b;
                }
                (Datum::Str(x), Datum::Str(y)) => return x == y,
                (Datum::Foreign(x), Datum::Foreign(y)) => return x.equals(&y),
                _ => return self.is_eqv(&a, &b),
            }
        }
    }

    fn write_to(&self, value: &Self::Ref, mode: PrintMode, out: &mut String) {
        write_cell(self, value, mode, out, 0);
    }

    /// Printed (`write`) representation
    fn to_written(&self, value: &Self::Ref) -> String {
        let mut out = String::new();
        self.write_to(value, PrintMode::Write, &mut out);
        out
    }
}

fn write_cell<H: Heap + ?Sized>(
    heap: &H,
    value: &H::Ref,
    mode: PrintMode,
    out: &mut String,
    depth: usize,
) {
    use std::fmt::Write as _;

    if depth > MAX_PRINT_DEPTH {
        out.push_str("...");
        return;
    }
    // Writing into a String cannot fail
    let _ = match heap.view(value) {
        Datum::Nil => write!(out, "()"),
        Datum::Unspecified => write!(out, "#<unspecified>"),
        Datum::Bool(b) => write!(out, "{}", if b { "#t" } else { "#f" }),
        Datum::Int(n) => write!(out, "{n}"),
        Datum::Real(x) => write_real(out, x),
        Datum::Str(s) => match mode {
            PrintMode::Write => write_string_literal(out, &s),
            PrintMode::Display => write!(out, "{s}"),
        },
        Datum::Sym(name) => write!(out, "{name}"),
        Datum::Closure(lambda) => match &lambda.name {
            Some(name) => write!(out, "#<procedure {name}>"),
            None => write!(out, "#<procedure>"),
        },
        Datum::Primitive(Primitive::Builtin(builtin)) => {
            write!(out, "#<primitive-procedure {}>", builtin.name())
        }
        Datum::Primitive(Primitive::Host(index)) => write!(out, "#<host-procedure {index}>"),
        Datum::Foreign(blackbox) => write!(out, "{}", blackbox.describe()),
        Datum::Pair(car, cdr) => {
            out.push('(');
            write_cell(heap, &car, mode, out, depth + 1);
            let mut cursor = cdr;
            let mut length = 1;
            loop {
                match heap.view(&cursor) {
                    Datum::Nil => break,
                    Datum::Pair(car, cdr) => {
                        if length >= MAX_PRINT_LENGTH {
                            out.push_str(" ...");
                            break;
                        }
                        out.push(' ');
                        write_cell(heap, &car, mode, out, depth + 1);
                        cursor = cdr;
                        length += 1;
                    }
                    _ => {
                        out.push_str(" . ");
                        write_cell(heap, &cursor, mode, out, depth + 1);
                        break;
                    }
                }
            }
            write!(out, ")")
        }
    };
}

/// Define every builtin procedure in the global environment
pub fn install_builtins<H: Heap>(heap: &H) {
    let global = heap.global_env();
    for builtin in Builtin::ALL {
        let procedure = heap.alloc(Datum::Primitive(Primitive::Builtin(*builtin)));
        heap.define(&global, builtin.name().into(), procedure);
    }
}

/// Install the builtins and evaluate the bootstrap library.
pub fn bootstrap<H: Heap>(heap: &H) -> Result<(), Error> {
    install_builtins(heap);
    let forms = crate::reader::parse_program(BOOTSTRAP_LIBRARY)?;
    Machine::new(heap, &NoHost).eval_program(&forms)?;
    Ok(())
}
