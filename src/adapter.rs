//! The backend contract and the bridge-level error type.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::blackbox::Blackbox;
use crate::handle::Handle;

/// Failures that cross the bridge boundary
#[derive(Debug, Error)]
pub enum SchemeError {
    /// The interpreter rejected or faulted on submitted code
    #[error("interpreter-evaluation-error: {message}")]
    Evaluation { message: String },

    #[error("unknown scheme '{name}' (available: {})", available.join(", "))]
    UnknownBackend {
        name: String,
        available: Vec<String>,
    },

    #[error("a scheme backend is already active: {active}")]
    AlreadySelected { active: String },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SchemeError {
    pub fn evaluation(message: impl Into<String>) -> Self {
        SchemeError::Evaluation {
            message: message.into(),
        }
    }
}

impl From<crate::Error> for SchemeError {
    fn from(err: crate::Error) -> Self {
        SchemeError::evaluation(err.to_string())
    }
}

/// A host closure installed as an interpreter procedure.
///
/// It receives the adapter it was installed into and the arguments as an
/// interpreter list.
pub type HostProcedure =
    Arc<dyn Fn(&dyn Scheme, Handle) -> Result<Handle, SchemeError> + Send + Sync>;

/// Wrap a closure as a [`HostProcedure`]
pub fn host_procedure(
    f: impl Fn(&dyn Scheme, Handle) -> Result<Handle, SchemeError> + Send + Sync + 'static,
) -> HostProcedure {
    Arc::new(f)
}

/// One interpreter backend.
///
/// Constructors never fail. Evaluation and calls surface interpreter
/// failures as [`SchemeError::Evaluation`] carrying the interpreter's own
/// diagnostic text.
pub trait Scheme: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Names the subdirectory holding this backend's init scripts
    fn dialect(&self) -> &'static str;

    fn null(&self) -> Handle;
    fn unspecified(&self) -> Handle;
    fn true_value(&self) -> Handle;
    fn false_value(&self) -> Handle;

    fn bool_to_value(&self, b: bool) -> Handle {
        if b { self.true_value() } else { self.false_value() }
    }

    fn int_to_value(&self, n: i32) -> Handle {
        self.long_to_value(i64::from(n))
    }

    fn long_to_value(&self, n: i64) -> Handle;
    fn double_to_value(&self, x: f64) -> Handle;
    fn string_to_value(&self, s: &str) -> Handle;
    fn symbol_to_value(&self, name: &str) -> Handle;
    fn blackbox_to_value(&self, blackbox: Blackbox) -> Handle;

    fn value_to_blackbox(&self, value: &Handle) -> Blackbox {
        value.to_blackbox()
    }

    /// Parse and evaluate every form in `text`, returning the last value
    fn eval_text(&self, text: &str) -> Result<Handle, SchemeError>;

    fn eval_file(&self, path: &Path) -> Result<Handle, SchemeError> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.eval_text(&text)
    }

    /// Evaluate an already built expression
    fn eval_value(&self, expr: &Handle) -> Result<Handle, SchemeError>;

    /// Apply a procedure value to positional arguments
    fn call(&self, function: &Handle, args: &[Handle]) -> Result<Handle, SchemeError>;

    /// Bind `name` in the global namespace to a procedure running `procedure`.
    ///
    /// # Panics
    ///
    /// Backends that cannot express optional arguments panic when
    /// `optional` is not zero.
    fn install_procedure(&self, name: &str, procedure: HostProcedure, required: usize, optional: usize);
}

impl std::fmt::Debug for dyn Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scheme({})", self.name())
    }
}
