//! Type-erased transport of host values through interpreter values.
//!
//! A [`Blackbox`] holds one host value together with a small integer tag
//! identifying its Rust type. Tags are handed out from a monotonic counter
//! the first time a type is boxed, so they are stable for the life of the
//! process and cheap to compare.
//!
//! The payload is shared immutably: cloning a blackbox shares the boxed
//! value, and [`Blackbox::open`] returns a copy. The boxed value is dropped
//! exactly once, when the last blackbox sharing it goes away.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

/// A host type that may travel through the interpreter inside a blackbox.
pub trait Payload: Any + Clone + PartialEq + fmt::Debug + Send + Sync {
    /// Printed representation inside the interpreter
    fn describe(&self) -> String {
        "<blackbox>".to_owned()
    }
}

static NEXT_TYPE_ID: AtomicU32 = AtomicU32::new(1);
static TYPE_IDS: LazyLock<RwLock<HashMap<TypeId, u32>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// The tag assigned to `T`, allocating one on first use
pub fn type_tag<T: Payload>() -> u32 {
    let key = TypeId::of::<T>();
    if let Some(tag) = TYPE_IDS.read().get(&key) {
        return *tag;
    }
    *TYPE_IDS
        .write()
        .entry(key)
        .or_insert_with(|| NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed))
}

trait Erased: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_erased(&self, other: &dyn Erased) -> bool;
    fn describe(&self) -> String;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T: Payload> Erased for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_erased(&self, other: &dyn Erased) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn describe(&self) -> String {
        Payload::describe(self)
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A closed box holding one host value of a registered type.
#[derive(Clone)]
pub struct Blackbox {
    tag: u32,
    payload: Arc<dyn Erased>,
}

impl Blackbox {
    /// Box a copy of `value`
    pub fn close<T: Payload>(value: T) -> Self {
        Blackbox {
            tag: type_tag::<T>(),
            payload: Arc::new(value),
        }
    }

    /// Copy the boxed value out.
    ///
    /// # Panics
    ///
    /// When the box holds a different type. That is a bridge bug, not bad
    /// input: callers check [`is`](Self::is) or a handle predicate first.
    pub fn open<T: Payload>(&self) -> T {
        match self.try_open::<T>() {
            Some(value) => value,
            None => panic!(
                "blackbox tag mismatch: holds tag {} ({}), opened as tag {} ({})",
                self.tag,
                self.describe(),
                type_tag::<T>(),
                std::any::type_name::<T>()
            ),
        }
    }

    pub fn try_open<T: Payload>(&self) -> Option<T> {
        if self.tag != type_tag::<T>() {
            return None;
        }
        self.payload.as_any().downcast_ref::<T>().cloned()
    }

    pub fn is<T: Payload>(&self) -> bool {
        self.tag == type_tag::<T>()
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Both boxes share the same stored value
    pub fn same(&self, other: &Blackbox) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }

    /// Same type and equal payloads
    pub fn equals(&self, other: &Blackbox) -> bool {
        self.tag == other.tag && self.payload.eq_erased(other.payload.as_ref())
    }

    pub fn describe(&self) -> String {
        self.payload.describe()
    }
}

impl fmt::Debug for Blackbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blackbox#{}(", self.tag)?;
        self.payload.debug(f)?;
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point(i32, i32);
    impl Payload for Point {
        fn describe(&self) -> String {
            format!("<point {} {}>", self.0, self.1)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);
    impl Payload for Label {}

    #[derive(Debug)]
    struct Counter(AtomicUsize);

    #[derive(Debug, Clone)]
    struct DropCounted(Arc<Counter>);

    impl PartialEq for DropCounted {
        fn eq(&self, other: &Self) -> bool {
            Arc::ptr_eq(&self.0, &other.0)
        }
    }

    impl Drop for DropCounted {
        fn drop(&mut self) {
            self.0.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Payload for DropCounted {}

    #[test]
    fn test_open_returns_the_closed_value() {
        let boxed = Blackbox::close(Point(3, -4));
        assert!(boxed.is::<Point>());
        assert!(!boxed.is::<Label>());
        assert_eq!(boxed.open::<Point>(), Point(3, -4));
        assert_eq!(boxed.try_open::<Label>(), None);
        assert_eq!(boxed.describe(), "<point 3 -4>");
        assert_eq!(Blackbox::close(Label("x".into())).describe(), "<blackbox>");
    }

    #[test]
    #[should_panic(expected = "blackbox tag mismatch")]
    fn test_open_with_wrong_type_panics() {
        Blackbox::close(Label("x".into())).open::<Point>();
    }

    #[test]
    fn test_tags_are_stable_and_distinct() {
        assert_eq!(type_tag::<Point>(), type_tag::<Point>());
        assert_ne!(type_tag::<Point>(), type_tag::<Label>());
        assert_eq!(Blackbox::close(Point(0, 0)).tag(), type_tag::<Point>());
    }

    #[test]
    fn test_identity_and_equality() {
        let a = Blackbox::close(Point(1, 2));
        let b = a.clone();
        let c = Blackbox::close(Point(1, 2));
        assert!(a.same(&b));
        assert!(!a.same(&c));
        assert!(a.equals(&c));
        assert!(!a.equals(&Blackbox::close(Point(2, 1))));
        assert!(!a.equals(&Blackbox::close(Label("p".into()))));
    }

    #[test]
    fn test_payload_dropped_exactly_once() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let boxed = Blackbox::close(DropCounted(counter.clone()));
        let shared = boxed.clone();
        drop(boxed);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        drop(shared);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
