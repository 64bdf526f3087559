//! Ownership-managed heap: every cell is an `Arc<Node>`.
//!
//! Cells are reclaimed when the last reference goes away, so there is no
//! tracing collector and no root table. Pairs are mutable through a lock.
//!
//! Reference counting alone cannot free a closure stored in the environment
//! it captured (named `let`, internal `define`, `set!` of a local to a
//! lambda). Frames that receive a procedure are remembered, and
//! [`SharedHeap::break_cycles`] clears the ones that nothing outside such
//! cycles refers to any more. Dropping the heap clears the global frame.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::{Datum, Heap, Lambda, Primitive, Symbol};
use crate::blackbox::Blackbox;

pub type NodeRef = Arc<Node>;
pub type FrameRef = Arc<Frame>;

/// One heap cell
pub enum Node {
    Nil,
    Unspecified,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(Arc<str>),
    Sym(Symbol),
    Pair(RwLock<(NodeRef, NodeRef)>),
    Closure(Lambda<NodeRef, FrameRef>),
    Primitive(Primitive),
    Foreign(Blackbox),
}

// Shallow, so cyclic structure cannot recurse forever
impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Nil => write!(f, "Nil"),
            Node::Unspecified => write!(f, "Unspecified"),
            Node::Bool(b) => write!(f, "Bool({b})"),
            Node::Int(n) => write!(f, "Int({n})"),
            Node::Real(x) => write!(f, "Real({x})"),
            Node::Str(s) => write!(f, "Str({s:?})"),
            Node::Sym(s) => write!(f, "Sym({s})"),
            Node::Pair(_) => write!(f, "Pair(..)"),
            Node::Closure(lambda) => write!(f, "Closure({:?})", lambda.name),
            Node::Primitive(p) => write!(f, "Primitive({p:?})"),
            Node::Foreign(b) => write!(f, "Foreign({})", b.describe()),
        }
    }
}

/// Lexical environment frame
pub struct Frame {
    bindings: RwLock<HashMap<Symbol, NodeRef>>,
    parent: Option<FrameRef>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("bindings", &self.bindings.read().len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Build a cell without going through a heap.
///
/// Cells are independent of the heap that evaluates them, so host code can
/// construct values on any thread.
pub fn node(datum: Datum<NodeRef, FrameRef>) -> NodeRef {
    Arc::new(match datum {
        Datum::Nil => Node::Nil,
        Datum::Unspecified => Node::Unspecified,
        Datum::Bool(b) => Node::Bool(b),
        Datum::Int(n) => Node::Int(n),
        Datum::Real(x) => Node::Real(x),
        Datum::Str(s) => Node::Str(s),
        Datum::Sym(s) => Node::Sym(s),
        Datum::Pair(car, cdr) => Node::Pair(RwLock::new((car, cdr))),
        Datum::Closure(lambda) => Node::Closure(lambda),
        Datum::Primitive(p) => Node::Primitive(p),
        Datum::Foreign(b) => Node::Foreign(b),
    })
}

/// Snapshot of a cell
pub fn view(cell: &NodeRef) -> Datum<NodeRef, FrameRef> {
    match &**cell {
        Node::Nil => Datum::Nil,
        Node::Unspecified => Datum::Unspecified,
        Node::Bool(b) => Datum::Bool(*b),
        Node::Int(n) => Datum::Int(*n),
        Node::Real(x) => Datum::Real(*x),
        Node::Str(s) => Datum::Str(s.clone()),
        Node::Sym(s) => Datum::Sym(s.clone()),
        Node::Pair(cell) => {
            let pair = cell.read();
            Datum::Pair(pair.0.clone(), pair.1.clone())
        }
        Node::Closure(lambda) => Datum::Closure(lambda.clone()),
        Node::Primitive(p) => Datum::Primitive(*p),
        Node::Foreign(b) => Datum::Foreign(b.clone()),
    }
}

/// Heap with an empty environment, for structural operations on nodes
/// held outside any interpreter (printing, `equal?`, list walks)
static DETACHED: LazyLock<SharedHeap> = LazyLock::new(SharedHeap::new);

pub fn detached() -> &'static SharedHeap {
    &DETACHED
}

pub struct SharedHeap {
    global: FrameRef,
    /// Local frames a procedure was stored into
    suspects: Mutex<Vec<Weak<Frame>>>,
}

impl SharedHeap {
    pub fn new() -> Self {
        SharedHeap {
            global: Arc::new(Frame {
                bindings: RwLock::new(HashMap::new()),
                parent: None,
            }),
            suspects: Mutex::new(Vec::new()),
        }
    }

    fn note_binding(&self, frame: &FrameRef, value: &NodeRef) {
        if !matches!(**value, Node::Closure(_)) || Arc::ptr_eq(frame, &self.global) {
            return;
        }
        let mut suspects = self.suspects.lock();
        if suspects.last().is_some_and(|last| last.as_ptr() == Arc::as_ptr(frame)) {
            return;
        }
        suspects.push(Arc::downgrade(frame));
    }

    /// Clear the remembered frames that only environment cycles keep alive.
    ///
    /// Returns the number of frames cleared. Must run on the thread that
    /// evaluates with this heap, outside any binding update; evaluations in
    /// progress keep their frames alive through the references they hold.
    pub fn break_cycles(&self) -> usize {
        let suspects = std::mem::take(&mut *self.suspects.lock());
        let graph = {
            let live: Vec<FrameRef> = suspects.iter().filter_map(Weak::upgrade).collect();
            if live.is_empty() {
                return 0;
            }
            FrameGraph::build(&self.global, &live)
        };
        let reachable = graph.reachable();

        let mut cleared = 0;
        for (id, vertex) in graph.vertices.iter().enumerate() {
            if let Vertex::Frame(frame) = vertex
                && !reachable[id]
            {
                let bindings = std::mem::take(&mut *frame.bindings.write());
                drop(bindings);
                cleared += 1;
            }
        }
        let mut kept = vec![false; graph.vertices.len()];
        let survivors = suspects.into_iter().filter(|frame| match graph.id_of(frame.as_ptr()) {
            Some(id) if reachable[id] && !kept[id] => {
                kept[id] = true;
                true
            }
            _ => false,
        });
        self.suspects.lock().extend(survivors);
        if cleared > 0 {
            trace!(cleared, "environment cycles released");
        }
        cleared
    }
}

enum Vertex {
    Frame(FrameRef),
    Closure(NodeRef),
}

/// Local frames and the closures bound in them, with the strong references
/// among them as edges. The global frame stands outside the graph.
struct FrameGraph {
    vertices: Vec<Vertex>,
    edges: Vec<Vec<usize>>,
    index: HashMap<usize, usize>,
}

impl FrameGraph {
    fn build(global: &FrameRef, suspects: &[FrameRef]) -> Self {
        let mut graph = FrameGraph {
            vertices: Vec::new(),
            edges: Vec::new(),
            index: HashMap::new(),
        };
        let mut queue: Vec<usize> = suspects
            .iter()
            .filter_map(|frame| graph.add_frame(global, frame).map(|(id, _)| id))
            .collect();
        while let Some(id) = queue.pop() {
            let mut targets = Vec::new();
            let mut discovered = Vec::new();
            match &graph.vertices[id] {
                Vertex::Frame(frame) => {
                    let parent = frame.parent.clone();
                    let closures: Vec<NodeRef> = frame
                        .bindings
                        .read()
                        .values()
                        .filter(|value| matches!(***value, Node::Closure(_)))
                        .cloned()
                        .collect();
                    if let Some(parent) = parent {
                        discovered.push(Discovered::Frame(parent));
                    }
                    discovered.extend(closures.into_iter().map(Discovered::Closure));
                }
                Vertex::Closure(node) => {
                    if let Node::Closure(lambda) = &**node {
                        discovered.push(Discovered::Frame(lambda.env.clone()));
                    }
                }
            }
            for item in discovered {
                let added = match item {
                    Discovered::Frame(frame) => graph.add_frame(global, &frame),
                    Discovered::Closure(node) => Some(graph.add_closure(&node)),
                };
                if let Some((target, fresh)) = added {
                    targets.push(target);
                    if fresh {
                        queue.push(target);
                    }
                }
            }
            graph.edges[id] = targets;
        }
        graph
    }

    fn add_frame(&mut self, global: &FrameRef, frame: &FrameRef) -> Option<(usize, bool)> {
        if Arc::ptr_eq(frame, global) {
            return None;
        }
        Some(self.add(Arc::as_ptr(frame) as usize, || Vertex::Frame(frame.clone())))
    }

    fn add_closure(&mut self, node: &NodeRef) -> (usize, bool) {
        self.add(Arc::as_ptr(node) as usize, || Vertex::Closure(node.clone()))
    }

    fn add(&mut self, key: usize, vertex: impl FnOnce() -> Vertex) -> (usize, bool) {
        if let Some(&id) = self.index.get(&key) {
            return (id, false);
        }
        let id = self.vertices.len();
        self.vertices.push(vertex());
        self.edges.push(Vec::new());
        self.index.insert(key, id);
        (id, true)
    }

    fn id_of(&self, frame: *const Frame) -> Option<usize> {
        self.index.get(&(frame as usize)).copied()
    }

    /// Vertices referenced from outside the graph, and everything they reach
    fn reachable(&self) -> Vec<bool> {
        let mut internal = vec![0usize; self.vertices.len()];
        for targets in &self.edges {
            for &target in targets {
                internal[target] += 1;
            }
        }
        let mut reachable = vec![false; self.vertices.len()];
        let mut queue = Vec::new();
        for (id, vertex) in self.vertices.iter().enumerate() {
            // One reference is the graph's own
            let strong = match vertex {
                Vertex::Frame(frame) => Arc::strong_count(frame),
                Vertex::Closure(node) => Arc::strong_count(node),
            };
            if strong.saturating_sub(1) > internal[id] {
                reachable[id] = true;
                queue.push(id);
            }
        }
        while let Some(id) = queue.pop() {
            for &target in &self.edges[id] {
                if !reachable[target] {
                    reachable[target] = true;
                    queue.push(target);
                }
            }
        }
        reachable
    }
}

enum Discovered {
    Frame(FrameRef),
    Closure(NodeRef),
}

impl Default for SharedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHeap")
            .field("global", &self.global)
            .finish()
    }
}

impl Drop for SharedHeap {
    fn drop(&mut self) {
        // Closures defined at top level hold the global frame
        let bindings = std::mem::take(&mut *self.global.bindings.write());
        drop(bindings);
        self.break_cycles();
    }
}

impl Heap for SharedHeap {
    type Ref = NodeRef;
    type Env = FrameRef;

    fn alloc(&self, datum: Datum<NodeRef, FrameRef>) -> NodeRef {
        node(datum)
    }

    fn view(&self, cell: &NodeRef) -> Datum<NodeRef, FrameRef> {
        view(cell)
    }

    fn set_car(&self, pair: &NodeRef, value: NodeRef) -> bool {
        match &**pair {
            Node::Pair(cell) => {
                cell.write().0 = value;
                true
            }
            _ => false,
        }
    }

    fn set_cdr(&self, pair: &NodeRef, value: NodeRef) -> bool {
        match &**pair {
            Node::Pair(cell) => {
                cell.write().1 = value;
                true
            }
            _ => false,
        }
    }

    fn identical(&self, a: &NodeRef, b: &NodeRef) -> bool {
        Arc::ptr_eq(a, b)
    }

    fn global_env(&self) -> FrameRef {
        self.global.clone()
    }

    fn extend_env(&self, parent: &FrameRef, bindings: Vec<(Symbol, NodeRef)>) -> FrameRef {
        Arc::new(Frame {
            bindings: RwLock::new(bindings.into_iter().collect()),
            parent: Some(parent.clone()),
        })
    }

    fn define(&self, env: &FrameRef, name: Symbol, value: NodeRef) {
        self.note_binding(env, &value);
        env.bindings.write().insert(name, value);
    }

    fn lookup(&self, env: &FrameRef, name: &str) -> Option<NodeRef> {
        let mut frame = Some(env);
        while let Some(current) = frame {
            if let Some(value) = current.bindings.read().get(name) {
                return Some(value.clone());
            }
            frame = current.parent.as_ref();
        }
        None
    }

    fn assign(&self, env: &FrameRef, name: &str, value: NodeRef) -> bool {
        let mut frame = Some(env);
        while let Some(current) = frame {
            let mut bindings = current.bindings.write();
            if let Some(slot) = bindings.get_mut(name) {
                self.note_binding(current, &value);
                *slot = value;
                return true;
            }
            drop(bindings);
            frame = current.parent.as_ref();
        }
        false
    }
}
