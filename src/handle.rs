//! The opaque, protected value handle.
//!
//! A [`Handle`] wraps one backend-native value behind [`NativeValue`]. The
//! backend value protects its native datum from collection when it is
//! constructed and releases the protection when it is dropped; `Handle`
//! shares one backend value between clones, so cloning never re-protects.
//!
//! Predicates never panic. Extractors (`to_*`) panic on a type mismatch:
//! callers check the matching predicate first, and a mismatch is a bug in
//! the calling code, not a recoverable condition.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::blackbox::{Blackbox, Payload};
use crate::payload::{Command, Modification, Observer, Patch, Path, Tree, Url, Widget};

/// Backend side of a [`Handle`].
///
/// Implementations own whatever keeps the native datum alive and must be
/// usable from any thread. Operations that combine two values (`cons`,
/// `set_car`, `is_equal`) are only defined for values of the same backend.
pub trait NativeValue: Send + Sync + fmt::Debug {
    /// Registry name of the owning backend
    fn backend(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    /// Diagnostic type description, e.g. `integer` or `pair`
    fn describe_type(&self) -> String;

    fn is_null(&self) -> bool;
    fn is_pair(&self) -> bool;
    fn is_list(&self) -> bool;
    fn is_bool(&self) -> bool;
    fn is_int(&self) -> bool;
    fn is_real(&self) -> bool;
    fn is_string(&self) -> bool;
    fn is_symbol(&self) -> bool;
    fn is_procedure(&self) -> bool;
    fn is_blackbox(&self) -> bool;
    fn is_unspecified(&self) -> bool;
    /// `equal?` in the interpreter's sense
    fn is_equal(&self, other: &dyn NativeValue) -> bool;
    /// `other` may be passed to the binary operations of `self`
    fn combinable(&self, other: &dyn NativeValue) -> bool {
        self.backend() == other.backend()
    }

    fn cons(&self, cdr: &dyn NativeValue) -> Handle;
    fn car(&self) -> Handle;
    fn cdr(&self) -> Handle;
    fn set_car(&self, value: &dyn NativeValue);
    fn set_cdr(&self, value: &dyn NativeValue);

    fn to_bool(&self) -> bool;
    fn to_long(&self) -> i64;
    fn to_double(&self) -> f64;
    fn to_string_value(&self) -> String;
    fn to_symbol(&self) -> String;
    fn to_blackbox(&self) -> Blackbox;
    /// Printed (`write`) representation
    fn write(&self) -> String;
}

/// Downcast the other side of a binary operation to the caller's own type.
///
/// # Panics
///
/// When the two values come from different backends.
pub fn same_backend<'a, T: 'static>(this: &dyn NativeValue, other: &'a dyn NativeValue) -> &'a T {
    match other.as_any().downcast_ref::<T>() {
        Some(value) => value,
        None => panic!(
            "cannot combine a {} value with a {} value",
            this.backend(),
            other.backend()
        ),
    }
}

/// Panic for an extractor applied to the wrong kind of value
pub fn type_mismatch(expected: &str, value: &dyn NativeValue) -> ! {
    panic!(
        "type mismatch: expected {expected}, got {} {}",
        value.describe_type(),
        value.write()
    )
}

struct HandleInner {
    native: Box<dyn NativeValue>,
    type_name: OnceLock<String>,
}

/// Reference-counted handle on one interpreter value.
#[derive(Clone)]
pub struct Handle(Arc<HandleInner>);

impl Handle {
    pub fn new(native: impl NativeValue + 'static) -> Self {
        Handle(Arc::new(HandleInner {
            native: Box::new(native),
            type_name: OnceLock::new(),
        }))
    }

    pub fn native(&self) -> &dyn NativeValue {
        self.0.native.as_ref()
    }

    /// The backend value, when it is a `T`
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.0.native.as_any().downcast_ref::<T>()
    }

    pub fn backend(&self) -> &'static str {
        self.0.native.backend()
    }

    /// Diagnostic type description, computed on first use
    pub fn type_name(&self) -> &str {
        self.0.type_name.get_or_init(|| self.0.native.describe_type())
    }

    /// Both handles share one backend value
    pub fn same_handle(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_null(&self) -> bool {
        self.native().is_null()
    }

    pub fn is_pair(&self) -> bool {
        self.native().is_pair()
    }

    pub fn is_list(&self) -> bool {
        self.native().is_list()
    }

    pub fn is_bool(&self) -> bool {
        self.native().is_bool()
    }

    pub fn is_int(&self) -> bool {
        self.native().is_int()
    }

    /// Integers count as doubles
    pub fn is_double(&self) -> bool {
        self.native().is_real() || self.native().is_int()
    }

    pub fn is_string(&self) -> bool {
        self.native().is_string()
    }

    pub fn is_symbol(&self) -> bool {
        self.native().is_symbol()
    }

    pub fn is_procedure(&self) -> bool {
        self.native().is_procedure()
    }

    pub fn is_blackbox(&self) -> bool {
        self.native().is_blackbox()
    }

    pub fn is_unspecified(&self) -> bool {
        self.native().is_unspecified()
    }

    pub fn is_equal(&self, other: &Handle) -> bool {
        self.native().is_equal(other.native())
    }

    fn holds<T: Payload>(&self) -> bool {
        self.is_blackbox() && self.to_blackbox().is::<T>()
    }

    pub fn is_tree(&self) -> bool {
        self.holds::<Tree>()
    }

    /// Strings are accepted as urls
    pub fn is_url(&self) -> bool {
        self.is_string() || self.holds::<Url>()
    }

    pub fn is_observer(&self) -> bool {
        self.holds::<Observer>()
    }

    pub fn is_widget(&self) -> bool {
        self.holds::<Widget>()
    }

    pub fn is_patch(&self) -> bool {
        self.holds::<Patch>()
    }

    pub fn is_modification(&self) -> bool {
        self.holds::<Modification>()
    }

    pub fn is_command(&self) -> bool {
        self.holds::<Command>()
    }

    pub fn is_path(&self) -> bool {
        self.is_list_of(|item| item.is_int())
    }

    /// A string, a tree, or a scheme tree `(label content ...)`
    pub fn is_content(&self) -> bool {
        if self.is_string() || self.is_tree() {
            return true;
        }
        self.is_pair()
            && self.car().is_symbol()
            && self.cdr().is_list_of(|child| child.is_content())
    }

    /// Build a pair; both handles must come from the same backend
    pub fn cons(car: &Handle, cdr: &Handle) -> Handle {
        car.native().cons(cdr.native())
    }

    pub fn car(&self) -> Handle {
        self.native().car()
    }

    pub fn cdr(&self) -> Handle {
        self.native().cdr()
    }

    pub fn set_car(&self, value: &Handle) {
        self.native().set_car(value.native())
    }

    pub fn set_cdr(&self, value: &Handle) {
        self.native().set_cdr(value.native())
    }

    pub fn caar(&self) -> Handle {
        self.car().car()
    }

    pub fn cadr(&self) -> Handle {
        self.cdr().car()
    }

    pub fn cdar(&self) -> Handle {
        self.car().cdr()
    }

    pub fn cddr(&self) -> Handle {
        self.cdr().cdr()
    }

    pub fn caddr(&self) -> Handle {
        self.cddr().car()
    }

    pub fn cdddr(&self) -> Handle {
        self.cddr().cdr()
    }

    pub fn cadddr(&self) -> Handle {
        self.cdddr().car()
    }

    pub fn to_bool(&self) -> bool {
        self.native().to_bool()
    }

    /// # Panics
    ///
    /// When the value is not an integer or does not fit in an `i32`.
    pub fn to_int(&self) -> i32 {
        let value = self.to_long();
        i32::try_from(value).unwrap_or_else(|_| panic!("integer {value} does not fit in i32"))
    }

    pub fn to_long(&self) -> i64 {
        self.native().to_long()
    }

    pub fn to_double(&self) -> f64 {
        self.native().to_double()
    }

    pub fn to_string_value(&self) -> String {
        self.native().to_string_value()
    }

    pub fn to_symbol(&self) -> String {
        self.native().to_symbol()
    }

    pub fn to_blackbox(&self) -> Blackbox {
        self.native().to_blackbox()
    }

    /// Open the blackbox as a `T`; panics when it holds something else
    pub fn to_payload<T: Payload>(&self) -> T {
        self.to_blackbox().open::<T>()
    }

    pub fn to_tree(&self) -> Tree {
        self.to_payload()
    }

    pub fn to_url(&self) -> Url {
        if self.is_string() {
            Url::new(self.to_string_value())
        } else {
            self.to_payload()
        }
    }

    pub fn to_observer(&self) -> Observer {
        self.to_payload()
    }

    pub fn to_widget(&self) -> Widget {
        self.to_payload()
    }

    pub fn to_patch(&self) -> Patch {
        self.to_payload()
    }

    pub fn to_modification(&self) -> Modification {
        self.to_payload()
    }

    pub fn to_command(&self) -> Command {
        self.to_payload()
    }

    pub fn to_path(&self) -> Path {
        self.to_vec_of(Handle::to_int)
    }

    /// Tree view of a content value
    pub fn to_content(&self) -> Tree {
        if self.is_string() {
            Tree::Atom(self.to_string_value())
        } else if self.is_tree() {
            self.to_tree()
        } else if self.is_pair() && self.car().is_symbol() {
            Tree::Compound {
                label: self.car().to_symbol(),
                children: self.cdr().to_vec_of(Handle::to_content),
            }
        } else {
            type_mismatch("content", self.native())
        }
    }

    /// The value is a proper list whose every element satisfies `element`
    pub fn is_list_of(&self, element: impl Fn(&Handle) -> bool) -> bool {
        if !self.is_list() {
            return false;
        }
        let mut cursor = self.clone();
        while cursor.is_pair() {
            if !element(&cursor.car()) {
                return false;
            }
            cursor = cursor.cdr();
        }
        true
    }

    /// Convert each element of a proper list
    ///
    /// # Panics
    ///
    /// When the value is not a proper list.
    pub fn to_vec_of<T>(&self, element: impl Fn(&Handle) -> T) -> Vec<T> {
        if !self.is_list() {
            type_mismatch("list", self.native());
        }
        let mut items = Vec::new();
        let mut cursor = self.clone();
        while cursor.is_pair() {
            items.push(element(&cursor.car()));
            cursor = cursor.cdr();
        }
        items
    }

    pub fn is_list_string(&self) -> bool {
        self.is_list_of(Handle::is_string)
    }

    pub fn to_list_string(&self) -> Vec<String> {
        self.to_vec_of(Handle::to_string_value)
    }

    pub fn is_list_tree(&self) -> bool {
        self.is_list_of(Handle::is_tree)
    }

    pub fn to_list_tree(&self) -> Vec<Tree> {
        self.to_vec_of(Handle::to_tree)
    }

    pub fn is_array_int(&self) -> bool {
        self.is_list_of(Handle::is_int)
    }

    pub fn to_array_int(&self) -> Vec<i32> {
        self.to_vec_of(Handle::to_int)
    }

    pub fn is_array_double(&self) -> bool {
        self.is_list_of(Handle::is_double)
    }

    pub fn to_array_double(&self) -> Vec<f64> {
        self.to_vec_of(Handle::to_double)
    }

    pub fn is_array_array_double(&self) -> bool {
        self.is_list_of(Handle::is_array_double)
    }

    pub fn to_array_array_double(&self) -> Vec<Vec<f64>> {
        self.to_vec_of(Handle::to_array_double)
    }

    pub fn is_array_array_array_double(&self) -> bool {
        self.is_list_of(Handle::is_array_array_double)
    }

    pub fn to_array_array_array_double(&self) -> Vec<Vec<Vec<f64>>> {
        self.to_vec_of(Handle::to_array_array_double)
    }

    pub fn is_array_string(&self) -> bool {
        self.is_list_string()
    }

    pub fn to_array_string(&self) -> Vec<String> {
        self.to_list_string()
    }

    pub fn is_array_tree(&self) -> bool {
        self.is_list_tree()
    }

    pub fn to_array_tree(&self) -> Vec<Tree> {
        self.to_list_tree()
    }

    pub fn is_array_url(&self) -> bool {
        self.is_list_of(Handle::is_url)
    }

    pub fn to_array_url(&self) -> Vec<Url> {
        self.to_vec_of(Handle::to_url)
    }

    pub fn is_array_patch(&self) -> bool {
        self.is_list_of(Handle::is_patch)
    }

    pub fn to_array_patch(&self) -> Vec<Patch> {
        self.to_vec_of(Handle::to_patch)
    }

    pub fn is_array_path(&self) -> bool {
        self.is_list_of(Handle::is_path)
    }

    pub fn to_array_path(&self) -> Vec<Path> {
        self.to_vec_of(Handle::to_path)
    }

    pub fn is_array_widget(&self) -> bool {
        self.is_list_of(Handle::is_widget)
    }

    pub fn to_array_widget(&self) -> Vec<Widget> {
        self.to_vec_of(Handle::to_widget)
    }

    /// An association list of `(key . value)` string pairs
    pub fn is_table_string_string(&self) -> bool {
        self.is_list_of(|entry| entry.is_pair() && entry.car().is_string() && entry.cdr().is_string())
    }

    pub fn to_table_string_string(&self) -> BTreeMap<String, String> {
        self.to_vec_of(|entry| (entry.car().to_string_value(), entry.cdr().to_string_value()))
            .into_iter()
            .collect()
    }

    /// Printed (`write`) representation
    pub fn write(&self) -> String {
        self.native().write()
    }
}

/// Structural equality; values of different backends are never equal
impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.native().combinable(other.native()) && self.is_equal(other)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", self.backend(), self.write())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.write())
    }
}
