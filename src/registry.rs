//! Process-wide table of interpreter factories and the active selection.
//!
//! The compiled-in backends are registered when the table is first touched.
//! Names are kept sorted, which makes both the listing and the default
//! choice reproducible. The active interpreter is chosen at most once per
//! process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::adapter::{Scheme, SchemeError};
use crate::backends;

/// Backend used when no name is requested
pub const DEFAULT_SCHEME: &str = "arena";

/// Builds one interpreter adapter
#[derive(Clone)]
pub struct SchemeFactory {
    name: &'static str,
    make: fn() -> Arc<dyn Scheme>,
}

impl SchemeFactory {
    pub fn new(name: &'static str, make: fn() -> Arc<dyn Scheme>) -> Self {
        SchemeFactory { name, make }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn make_scheme(&self) -> Arc<dyn Scheme> {
        (self.make)()
    }
}

impl fmt::Debug for SchemeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemeFactory({})", self.name)
    }
}

static FACTORIES: LazyLock<RwLock<BTreeMap<&'static str, SchemeFactory>>> = LazyLock::new(|| {
    let factories = backends::builtin_factories()
        .into_iter()
        .map(|factory| (factory.name(), factory))
        .collect();
    RwLock::new(factories)
});

static ACTIVE: OnceLock<Arc<dyn Scheme>> = OnceLock::new();

/// Add a factory; a later registration under the same name replaces the earlier one
pub fn register_scheme_factory(factory: SchemeFactory) {
    debug!(name = factory.name(), "registering scheme factory");
    FACTORIES.write().insert(factory.name(), factory);
}

/// Registered names in sorted order
pub fn scheme_names() -> Vec<String> {
    FACTORIES.read().keys().map(|name| (*name).to_owned()).collect()
}

/// Build a fresh interpreter, or `None` for an unknown name
pub fn make_scheme(name: &str) -> Option<Arc<dyn Scheme>> {
    let factory = FACTORIES.read().get(name).cloned()?;
    Some(factory.make_scheme())
}

/// The default backend if registered, otherwise the first name in order
pub fn default_scheme_name() -> Option<String> {
    let factories = FACTORIES.read();
    if factories.contains_key(DEFAULT_SCHEME) {
        return Some(DEFAULT_SCHEME.to_owned());
    }
    factories.keys().next().map(|name| (*name).to_owned())
}

/// Choose the process-wide interpreter.
///
/// `None` picks [`default_scheme_name`]. Fails for an unknown name and when
/// an interpreter was already selected.
pub fn select_scheme(name: Option<&str>) -> Result<Arc<dyn Scheme>, SchemeError> {
    if let Some(active) = ACTIVE.get() {
        return Err(SchemeError::AlreadySelected {
            active: active.name().to_owned(),
        });
    }
    let name = match name {
        Some(name) => name.to_owned(),
        None => default_scheme_name().ok_or_else(|| SchemeError::UnknownBackend {
            name: DEFAULT_SCHEME.to_owned(),
            available: Vec::new(),
        })?,
    };
    let scheme = make_scheme(&name).ok_or_else(|| SchemeError::UnknownBackend {
        name: name.clone(),
        available: scheme_names(),
    })?;

    let mut fresh = false;
    let active = ACTIVE.get_or_init(|| {
        fresh = true;
        scheme
    });
    if !fresh {
        return Err(SchemeError::AlreadySelected {
            active: active.name().to_owned(),
        });
    }
    info!(scheme = %name, "scheme selected");
    Ok(active.clone())
}

/// The selected interpreter, if any
pub fn active_scheme() -> Option<Arc<dyn Scheme>> {
    ACTIVE.get().cloned()
}

/// The selected interpreter, selecting the default on first use.
///
/// # Panics
///
/// Panics when no backend is registered at all.
pub fn scheme() -> Arc<dyn Scheme> {
    if let Some(active) = ACTIVE.get() {
        return active.clone();
    }
    match select_scheme(None) {
        Ok(scheme) => scheme,
        // Lost a race against another selection
        Err(SchemeError::AlreadySelected { .. }) => ACTIVE.get().cloned().unwrap_or_else(|| {
            unreachable!("selection reported but no interpreter stored")
        }),
        Err(err) => panic!("cannot select a scheme backend: {err}"),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::backends::ArenaScheme;

    #[test]
    fn test_builtin_backends_are_registered_in_order() {
        let names = scheme_names();
        for expected in ["arena", "confined", "direct"] {
            assert!(names.contains(&expected.to_owned()), "missing {expected}");
        }
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_default_is_deterministic() {
        assert_eq!(default_scheme_name().as_deref(), Some(DEFAULT_SCHEME));
        assert_eq!(default_scheme_name(), default_scheme_name());
    }

    #[test]
    fn test_unknown_names_make_nothing() {
        assert!(make_scheme("does-not-exist").is_none());
        match select_scheme(Some("does-not-exist")) {
            Err(SchemeError::UnknownBackend { name, available }) => {
                assert_eq!(name, "does-not-exist");
                assert!(available.contains(&"arena".to_owned()));
            }
            Err(SchemeError::AlreadySelected { .. }) => {}
            other => panic!("unexpected selection result: {other:?}"),
        }
    }

    #[test]
    fn test_last_registration_wins() {
        fn first() -> Arc<dyn Scheme> {
            Arc::new(ArenaScheme::new())
        }
        fn second() -> Arc<dyn Scheme> {
            Arc::new(ArenaScheme::new())
        }
        register_scheme_factory(SchemeFactory::new("registry-test", first));
        register_scheme_factory(SchemeFactory::new("registry-test", second));
        let names = scheme_names();
        assert_eq!(names.iter().filter(|n| *n == "registry-test").count(), 1);
        let made = make_scheme("registry-test").unwrap();
        assert_eq!(made.name(), "arena");
    }
}
