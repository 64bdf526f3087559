use std::any::Any;

use crate::blackbox::Blackbox;
use crate::handle::{Handle, NativeValue, same_backend, type_mismatch};
use crate::native::shared::{self, Node, NodeRef};
use crate::native::{Datum, Heap, PrintMode};

/// Handle payload for the ownership-managed backends.
///
/// Nodes keep themselves alive, so there is nothing to protect; holding the
/// `Arc` is the protection.
#[derive(Debug, Clone)]
pub struct NodeValue {
    backend: &'static str,
    node: NodeRef,
}

impl NodeValue {
    pub fn handle(backend: &'static str, node: NodeRef) -> Handle {
        Handle::new(NodeValue { backend, node })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    fn other<'a>(&self, other: &'a dyn NativeValue) -> &'a NodeValue {
        let other = same_backend::<NodeValue>(self, other);
        assert_eq!(
            self.backend, other.backend,
            "cannot combine values from different backends"
        );
        other
    }

    fn view(&self) -> Datum<NodeRef, shared::FrameRef> {
        shared::view(&self.node)
    }
}

impl NativeValue for NodeValue {
    fn backend(&self) -> &'static str {
        self.backend
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe_type(&self) -> String {
        self.view().type_name().to_owned()
    }

    fn is_null(&self) -> bool {
        matches!(*self.node, Node::Nil)
    }

    fn is_pair(&self) -> bool {
        matches!(*self.node, Node::Pair(_))
    }

    fn is_list(&self) -> bool {
        shared::detached().is_list(&self.node)
    }

    fn is_bool(&self) -> bool {
        matches!(*self.node, Node::Bool(_))
    }

    fn is_int(&self) -> bool {
        matches!(*self.node, Node::Int(_))
    }

    fn is_real(&self) -> bool {
        matches!(*self.node, Node::Real(_))
    }

    fn is_string(&self) -> bool {
        matches!(*self.node, Node::Str(_))
    }

    fn is_symbol(&self) -> bool {
        matches!(*self.node, Node::Sym(_))
    }

    fn is_procedure(&self) -> bool {
        matches!(*self.node, Node::Closure(_) | Node::Primitive(_))
    }

    fn is_blackbox(&self) -> bool {
        matches!(*self.node, Node::Foreign(_))
    }

    fn is_unspecified(&self) -> bool {
        matches!(*self.node, Node::Unspecified)
    }

    fn is_equal(&self, other: &dyn NativeValue) -> bool {
        let other = self.other(other);
        shared::detached().is_equal(&self.node, &other.node)
    }

    fn cons(&self, cdr: &dyn NativeValue) -> Handle {
        let cdr = self.other(cdr).node.clone();
        NodeValue::handle(
            self.backend,
            shared::node(Datum::Pair(self.node.clone(), cdr)),
        )
    }

    fn car(&self) -> Handle {
        match self.view() {
            Datum::Pair(car, _) => NodeValue::handle(self.backend, car),
            _ => type_mismatch("pair", self),
        }
    }

    fn cdr(&self) -> Handle {
        match self.view() {
            Datum::Pair(_, cdr) => NodeValue::handle(self.backend, cdr),
            _ => type_mismatch("pair", self),
        }
    }

    fn set_car(&self, value: &dyn NativeValue) {
        let value = self.other(value).node.clone();
        match &*self.node {
            Node::Pair(cell) => cell.write().0 = value,
            _ => type_mismatch("pair", self),
        }
    }

    fn set_cdr(&self, value: &dyn NativeValue) {
        let value = self.other(value).node.clone();
        match &*self.node {
            Node::Pair(cell) => cell.write().1 = value,
            _ => type_mismatch("pair", self),
        }
    }

    fn to_bool(&self) -> bool {
        match *self.node {
            Node::Bool(b) => b,
            _ => type_mismatch("boolean", self),
        }
    }

    fn to_long(&self) -> i64 {
        match *self.node {
            Node::Int(n) => n,
            _ => type_mismatch("integer", self),
        }
    }

    fn to_double(&self) -> f64 {
        match *self.node {
            Node::Real(x) => x,
            Node::Int(n) => n as f64,
            _ => type_mismatch("number", self),
        }
    }

    fn to_string_value(&self) -> String {
        match &*self.node {
            Node::Str(s) => s.to_string(),
            _ => type_mismatch("string", self),
        }
    }

    fn to_symbol(&self) -> String {
        match &*self.node {
            Node::Sym(s) => s.to_string(),
            _ => type_mismatch("symbol", self),
        }
    }

    fn to_blackbox(&self) -> Blackbox {
        match &*self.node {
            Node::Foreign(blackbox) => blackbox.clone(),
            _ => type_mismatch("blackbox", self),
        }
    }

    fn write(&self) -> String {
        let mut out = String::new();
        shared::detached().write_to(&self.node, PrintMode::Write, &mut out);
        out
    }
}
