//! scmbridge - one interface over interchangeable embedded Scheme interpreters
//!
//! This crate embeds one of several Scheme interpreter backends into a host
//! application and exposes them through a single uniform interface. Host code
//! builds values, evaluates text, calls interpreter procedures and installs
//! host closures as interpreter procedures without knowing which backend is
//! active.
//!
//! ```scheme
//! ;; evaluated by whichever backend was selected at startup
//! (define (greet who) (string-append "hello " who))
//! (greet (get-user-login))
//! ```
//!
//! ## Backends
//!
//! The backends have incompatible object models and threading requirements:
//! - `arena`: index-addressed cells in a mark/sweep arena; every value held by
//!   host code is registered as a collector root through a refcounted table.
//! - `confined`: ownership-managed nodes; the interpreter context exists only
//!   on a dedicated worker thread and every operation is marshalled there.
//! - `direct`: ownership-managed nodes; the context lives on the thread that
//!   created the interpreter and may not be touched from anywhere else.
//!
//! ## Modules
//!
//! - `reader`: S-expression parsing from text
//! - `native`: heap abstraction, evaluator core and builtins shared by all backends
//! - `blackbox`: type-erased transport of host values through interpreter values
//! - `handle`: the opaque, protected value handle
//! - `adapter`: the backend contract and the bridge-level error type
//! - `backends`: the concrete backends
//! - `executor`: thread-confinement executor
//! - `registry`: backend factories and the process-wide active interpreter
//! - `object`: the high-level typed façade
//! - `delayed`: delayed and self-rescheduling commands
//! - `preferences`: preference storage and interpreter hooks
//! - `glue`: host procedures installed into every interpreter
//! - `boot`: startup sequence and configuration

use std::fmt;

/// Maximum parsing depth to prevent stack overflow attacks
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum evaluation depth to prevent stack overflow in recursive evaluation.
/// Tail calls do not count against this limit.
pub const MAX_EVAL_DEPTH: usize = 1000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, context: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
        }
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");
        Self::new(kind, message, Some(display_context))
    }
}

/// Errors raised inside an interpreter.
///
/// These never cross the bridge boundary as-is: adapters turn them into
/// [`adapter::SchemeError::Evaluation`] carrying the rendered message.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    EvalError(String),
    TypeError(String),
    UnboundVariable(String),
    ArityError {
        expected: String,
        got: usize,
        procedure: Option<String>,
    },
}

impl Error {
    /// Create an ArityError without naming the procedure
    pub fn arity_error(expected: impl fmt::Display, got: usize) -> Self {
        Error::ArityError {
            expected: expected.to_string(),
            got,
            procedure: None,
        }
    }

    /// Create an ArityError naming the procedure that rejected the call
    pub fn arity_error_in(expected: impl fmt::Display, got: usize, procedure: &str) -> Self {
        Error::ArityError {
            expected: expected.to_string(),
            got,
            procedure: Some(procedure.to_owned()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnboundVariable(var) => write!(f, "Unbound variable: {var}"),
            Error::ArityError {
                expected,
                got,
                procedure,
            } => match procedure {
                Some(name) => write!(
                    f,
                    "ArityError: {name}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: procedure expected {expected} arguments but got {got}"
                ),
            },
        }
    }
}

impl std::error::Error for Error {}

pub mod adapter;
pub mod backends;
pub mod blackbox;
pub mod boot;
pub mod delayed;
pub mod executor;
pub mod glue;
pub mod handle;
pub mod native;
pub mod object;
pub mod payload;
pub mod preferences;
pub mod reader;
pub mod registry;

pub use adapter::{HostProcedure, Scheme, SchemeError, host_procedure};
pub use blackbox::{Blackbox, Payload};
pub use handle::Handle;
pub use object::{EditorHooks, Object, SchemeExt};
