//! Host types that cross into the interpreter inside blackboxes.
//!
//! The bridge transports these without interpreting them; the few
//! operations here exist so glue procedures and tests can build and
//! inspect them.

use std::fmt;
use std::sync::Arc;

use crate::blackbox::Payload;

/// Position inside a tree, as child indices from the root.
///
/// Paths travel as plain integer lists, not as blackboxes.
pub type Path = Vec<i32>;

/// Document tree: an atomic string or a labelled node with children
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tree {
    Atom(String),
    Compound { label: String, children: Vec<Tree> },
}

impl Tree {
    pub fn atom(text: impl Into<String>) -> Self {
        Tree::Atom(text.into())
    }

    pub fn compound(label: impl Into<String>, children: Vec<Tree>) -> Self {
        Tree::Compound {
            label: label.into(),
            children,
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, Tree::Atom(_))
    }

    /// The string of an atom, or the label of a compound node
    pub fn label(&self) -> &str {
        match self {
            Tree::Atom(text) => text,
            Tree::Compound { label, .. } => label,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Tree::Atom(_) => 0,
            Tree::Compound { children, .. } => children.len(),
        }
    }

    pub fn children(&self) -> &[Tree] {
        match self {
            Tree::Atom(_) => &[],
            Tree::Compound { children, .. } => children,
        }
    }

    /// Subtree at `path`, if every index is in range
    pub fn subtree(&self, path: &[i32]) -> Option<&Tree> {
        path.iter().try_fold(self, |tree, &index| {
            usize::try_from(index).ok().and_then(|i| tree.children().get(i))
        })
    }
}

impl fmt::Display for Tree {
    /// Scheme-tree form: atoms as string literals, nodes as `(label child ...)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tree::Atom(text) => crate::reader::write_string_literal(f, text),
            Tree::Compound { label, children } => {
                write!(f, "({label}")?;
                for child in children {
                    write!(f, " {child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Payload for Tree {
    fn describe(&self) -> String {
        format!("<tree {}>", self.label())
    }
}

/// Resource locator, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Url(pub String);

impl Url {
    pub fn new(path: impl Into<String>) -> Self {
        Url(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Payload for Url {
    fn describe(&self) -> String {
        format!("<url {}>", self.0)
    }
}

/// Editor-side listener attached to a tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Observer {
    pub id: u64,
    pub kind: String,
}

impl Payload for Observer {
    fn describe(&self) -> String {
        "<observer>".to_owned()
    }
}

/// GUI widget built by interpreter code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Widget {
    pub id: u64,
    pub kind: String,
}

impl Payload for Widget {
    fn describe(&self) -> String {
        "<widget>".to_owned()
    }
}

/// One elementary edit on a document tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Modification {
    /// Edit kind, e.g. `assign`, `insert`, `remove`
    pub kind: String,
    pub path: Path,
    pub tree: Tree,
}

impl Payload for Modification {
    fn describe(&self) -> String {
        "<modification>".to_owned()
    }
}

/// An undoable edit: one modification or a sequence of patches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Patch {
    Modification(Modification),
    Compound(Vec<Patch>),
}

impl Patch {
    /// Number of elementary modifications
    pub fn len(&self) -> usize {
        match self {
            Patch::Modification(_) => 1,
            Patch::Compound(parts) => parts.iter().map(Patch::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Payload for Patch {
    fn describe(&self) -> String {
        "<patch>".to_owned()
    }
}

/// Host action callable from the interpreter, compared by identity
#[derive(Clone)]
pub struct Command {
    pub name: String,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl Command {
    pub fn new(name: impl Into<String>, action: impl Fn() + Send + Sync + 'static) -> Self {
        Command {
            name: name.into(),
            action: Arc::new(action),
        }
    }

    pub fn run(&self) {
        (self.action)()
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.action, &other.action)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("name", &self.name).finish()
    }
}

impl Payload for Command {
    fn describe(&self) -> String {
        "<command>".to_owned()
    }
}
