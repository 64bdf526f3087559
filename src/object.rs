//! The application-facing value wrapper and the evaluation façade.
//!
//! [`Object`] wraps a [`Handle`] with lenient accessors: a mismatched kind
//! yields a neutral default instead of panicking. [`SchemeExt`] layers the
//! convenience operations applications use (evaluate text, call by name,
//! run protected menu actions) on top of any adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path as FsPath;

use tracing::{debug, warn};

use crate::adapter::{Scheme, SchemeError};
use crate::blackbox::Blackbox;
use crate::handle::Handle;
use crate::payload::{Command, Modification, Observer, Patch, Path, Tree, Url, Widget};

/// An interpreter value as seen by the application
#[derive(Clone, PartialEq)]
pub struct Object(Handle);

impl Object {
    pub fn new(handle: Handle) -> Self {
        Object(handle)
    }

    pub fn handle(&self) -> &Handle {
        &self.0
    }

    pub fn into_handle(self) -> Handle {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn is_list(&self) -> bool {
        self.0.is_list()
    }

    pub fn is_bool(&self) -> bool {
        self.0.is_bool()
    }

    pub fn is_int(&self) -> bool {
        self.0.is_int()
    }

    pub fn is_double(&self) -> bool {
        self.0.is_double()
    }

    pub fn is_string(&self) -> bool {
        self.0.is_string()
    }

    pub fn is_symbol(&self) -> bool {
        self.0.is_symbol()
    }

    pub fn is_tree(&self) -> bool {
        self.0.is_tree()
    }

    pub fn is_path(&self) -> bool {
        self.0.is_path()
    }

    pub fn is_url(&self) -> bool {
        self.0.is_url()
    }

    pub fn is_array_double(&self) -> bool {
        self.0.is_array_double()
    }

    pub fn is_widget(&self) -> bool {
        self.0.is_widget()
    }

    pub fn is_patch(&self) -> bool {
        self.0.is_patch()
    }

    pub fn is_modification(&self) -> bool {
        self.0.is_modification()
    }

    pub fn is_unspecified(&self) -> bool {
        self.0.is_unspecified()
    }

    pub fn cons(&self, cdr: &Object) -> Object {
        Object(Handle::cons(&self.0, &cdr.0))
    }

    pub fn car(&self) -> Object {
        Object(self.0.car())
    }

    pub fn cdr(&self) -> Object {
        Object(self.0.cdr())
    }

    pub fn caar(&self) -> Object {
        Object(self.0.caar())
    }

    pub fn cdar(&self) -> Object {
        Object(self.0.cdar())
    }

    pub fn cadr(&self) -> Object {
        Object(self.0.cadr())
    }

    pub fn cddr(&self) -> Object {
        Object(self.0.cddr())
    }

    pub fn caddr(&self) -> Object {
        Object(self.0.caddr())
    }

    pub fn cadddr(&self) -> Object {
        Object(self.0.cadddr())
    }

    pub fn as_bool(&self) -> bool {
        self.0.is_bool() && self.0.to_bool()
    }

    pub fn as_int(&self) -> i32 {
        if self.0.is_int() { self.0.to_int() } else { 0 }
    }

    pub fn as_long(&self) -> i64 {
        if self.0.is_int() { self.0.to_long() } else { 0 }
    }

    pub fn as_double(&self) -> f64 {
        if self.0.is_double() { self.0.to_double() } else { 0.0 }
    }

    pub fn as_string(&self) -> String {
        if self.0.is_string() {
            self.0.to_string_value()
        } else {
            String::new()
        }
    }

    pub fn as_symbol(&self) -> String {
        if self.0.is_symbol() {
            self.0.to_symbol()
        } else {
            String::new()
        }
    }

    pub fn as_tree(&self) -> Tree {
        if self.0.is_tree() {
            self.0.to_tree()
        } else {
            Tree::atom("")
        }
    }

    pub fn as_list_string(&self) -> Vec<String> {
        if self.0.is_list_string() {
            self.0.to_list_string()
        } else {
            Vec::new()
        }
    }

    pub fn as_list_tree(&self) -> Vec<Tree> {
        if self.0.is_list_tree() {
            self.0.to_list_tree()
        } else {
            Vec::new()
        }
    }

    pub fn as_path(&self) -> Path {
        if self.0.is_path() {
            self.0.to_path()
        } else {
            Path::new()
        }
    }

    pub fn as_url(&self) -> Url {
        if self.0.is_url() {
            self.0.to_url()
        } else {
            Url::default()
        }
    }

    /// Elements of a proper list.
    ///
    /// # Panics
    ///
    /// When the value is not a proper list.
    pub fn as_array_object(&self) -> Vec<Object> {
        assert!(self.0.is_list(), "list expected, got {}", self.0.type_name());
        self.0.to_vec_of(|item| Object(item.clone()))
    }

    /// # Panics
    ///
    /// When the value is not a list of numbers.
    pub fn as_array_double(&self) -> Vec<f64> {
        assert!(
            self.0.is_array_double(),
            "list of numbers expected, got {}",
            self.0.write()
        );
        self.0.to_array_double()
    }

    pub fn as_modification(&self) -> Modification {
        if self.0.is_modification() {
            self.0.to_modification()
        } else {
            Modification {
                kind: "assign".to_owned(),
                path: Path::new(),
                tree: Tree::atom(""),
            }
        }
    }

    pub fn as_patch(&self) -> Patch {
        if self.0.is_patch() {
            self.0.to_patch()
        } else {
            Patch::Compound(Vec::new())
        }
    }

    pub fn as_widget(&self) -> Option<Widget> {
        self.0.is_widget().then(|| self.0.to_widget())
    }

    pub fn as_command(&self) -> Option<Command> {
        self.0.is_command().then(|| self.0.to_command())
    }
}

impl From<Handle> for Object {
    fn from(handle: Handle) -> Self {
        Object(handle)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.0.write())
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.write())
    }
}

/// Host values that have an interpreter representation
pub trait IntoObject {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object;
}

impl IntoObject for Object {
    fn into_object<S: Scheme + ?Sized>(self, _scheme: &S) -> Object {
        self
    }
}

impl IntoObject for Handle {
    fn into_object<S: Scheme + ?Sized>(self, _scheme: &S) -> Object {
        Object(self)
    }
}

impl IntoObject for bool {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        Object(scheme.bool_to_value(self))
    }
}

impl IntoObject for i32 {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        Object(scheme.int_to_value(self))
    }
}

impl IntoObject for i64 {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        Object(scheme.long_to_value(self))
    }
}

impl IntoObject for f64 {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        Object(scheme.double_to_value(self))
    }
}

impl IntoObject for &str {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        Object(scheme.string_to_value(self))
    }
}

impl IntoObject for String {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        Object(scheme.string_to_value(&self))
    }
}

macro_rules! boxed_into_object {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoObject for $ty {
                fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
                    Object(scheme.blackbox_to_value(Blackbox::close(self)))
                }
            }
        )*
    };
}

boxed_into_object!(Tree, Url, Observer, Widget, Patch, Modification, Command);

/// Host sequences become proper lists, element by element
impl<T: IntoObject> IntoObject for Vec<T> {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        let items: Vec<Object> = self.into_iter().map(|item| item.into_object(scheme)).collect();
        items
            .iter()
            .rev()
            .fold(Object(scheme.null()), |tail, item| item.cons(&tail))
    }
}

/// Association list of `(key . value)` string pairs, in key order
impl IntoObject for BTreeMap<String, String> {
    fn into_object<S: Scheme + ?Sized>(self, scheme: &S) -> Object {
        let entries: Vec<Object> = self
            .into_iter()
            .map(|(key, value)| key.into_object(scheme).cons(&value.into_object(scheme)))
            .collect();
        entries.into_object(scheme)
    }
}

/// Editor transaction hooks wrapped around protected calls
pub trait EditorHooks {
    fn before_menu_action(&self);
    fn after_menu_action(&self);
    fn cancel_menu_action(&self);
}

/// Façade operations available on every adapter
pub trait SchemeExt: Scheme {
    fn object(&self, value: impl IntoObject) -> Object {
        value.into_object(self)
    }

    fn null_object(&self) -> Object {
        Object(self.null())
    }

    fn unspecified_object(&self) -> Object {
        Object(self.unspecified())
    }

    fn symbol_object(&self, name: &str) -> Object {
        Object(self.symbol_to_value(name))
    }

    fn eval(&self, text: &str) -> Result<Object, SchemeError> {
        self.eval_text(text).map(Object)
    }

    fn eval_object(&self, expr: &Object) -> Result<Object, SchemeError> {
        self.eval_value(expr.handle()).map(Object)
    }

    /// Evaluate `text` only if it applies nothing but side-effect free procedures
    fn eval_secure(&self, text: &str) -> Result<Object, SchemeError> {
        self.eval(&format!("(wrap-eval-secure (quote {text}))"))
    }

    fn eval_file(&self, path: &FsPath) -> Result<Object, SchemeError> {
        Scheme::eval_file(self, path).map(Object)
    }

    /// Evaluate a file for its effects; `false` when it failed or produced nothing
    fn exec_file(&self, path: &FsPath) -> bool {
        match SchemeExt::eval_file(self, path) {
            Ok(value) => !value.is_unspecified(),
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot execute file");
                false
            }
        }
    }

    /// Resolve `function` as an expression and apply it to `args`
    fn call(&self, function: &str, args: &[Object]) -> Result<Object, SchemeError> {
        let procedure = self.eval_text(function)?;
        let args: Vec<Handle> = args.iter().map(|arg| arg.handle().clone()).collect();
        Scheme::call(self, &procedure, &args).map(Object)
    }

    fn call_object(&self, function: &Object, args: &[Object]) -> Result<Object, SchemeError> {
        let args: Vec<Handle> = args.iter().map(|arg| arg.handle().clone()).collect();
        Scheme::call(self, function.handle(), &args).map(Object)
    }

    /// A zero-argument procedure running `text`
    fn scheme_cmd(&self, text: &str) -> Result<Object, SchemeError> {
        self.eval(&format!("(lambda () {text})"))
    }

    /// A zero-argument procedure evaluating the expression `body`
    fn scheme_cmd_object(&self, body: &Object) -> Result<Object, SchemeError> {
        let null = self.null_object();
        let lambda = self
            .symbol_object("lambda")
            .cons(&null.cons(&body.cons(&null)));
        self.eval_object(&lambda)
    }

    fn object_to_string(&self, value: &Object) -> Result<String, SchemeError> {
        Ok(SchemeExt::call(self, "object->string", std::slice::from_ref(value))?.as_string())
    }

    fn string_to_object(&self, text: &str) -> Result<Object, SchemeError> {
        let text = self.object(text);
        SchemeExt::call(self, "string->object", &[text])
    }

    /// Scheme-tree form of `tree`, through the interpreter's `tree->stree`
    fn tree_to_stree(&self, tree: &Tree) -> Result<Object, SchemeError> {
        let tree = self.object(tree.clone());
        SchemeExt::call(self, "tree->stree", &[tree])
    }

    fn stree_to_tree(&self, stree: &Object) -> Result<Tree, SchemeError> {
        Ok(SchemeExt::call(self, "stree->tree", std::slice::from_ref(stree))?.as_tree())
    }

    fn content_to_tree(&self, content: &Object) -> Tree {
        content.handle().to_content()
    }

    /// Run a menu action inside an editor transaction.
    ///
    /// The transaction is committed when `command` returns and cancelled
    /// when the interpreter reports an error, which is then returned.
    fn protected_call(&self, command: &Object, editor: &dyn EditorHooks) -> Result<Object, SchemeError> {
        editor.before_menu_action();
        match self.call_object(command, &[]) {
            Ok(value) => {
                editor.after_menu_action();
                Ok(value)
            }
            Err(err) => {
                debug!(%err, "menu action failed, cancelling");
                editor.cancel_menu_action();
                Err(err)
            }
        }
    }
}

impl<S: Scheme + ?Sized> SchemeExt for S {}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backends::ArenaScheme;

    #[derive(Default)]
    struct RecordingEditor {
        before: AtomicUsize,
        after: AtomicUsize,
        cancelled: AtomicUsize,
    }

    impl EditorHooks for RecordingEditor {
        fn before_menu_action(&self) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        fn after_menu_action(&self) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel_menu_action(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lenient_accessors_fall_back_to_defaults() {
        let scheme = ArenaScheme::new();
        let text = scheme.object("text");
        assert_eq!(text.as_int(), 0);
        assert_eq!(text.as_double(), 0.0);
        assert!(!text.as_bool());
        assert_eq!(text.as_symbol(), "");
        assert_eq!(text.as_tree(), Tree::atom(""));
        assert!(text.as_widget().is_none());
        assert!(text.as_patch().is_empty());
        // Strings count as urls
        assert_eq!(text.as_url(), Url::new("text"));
        assert_eq!(scheme.object(7).as_string(), "");
        assert!(scheme.object(7).as_list_string().is_empty());
    }

    #[test]
    #[should_panic(expected = "list expected")]
    fn test_array_object_asserts_on_non_lists() {
        let scheme = ArenaScheme::new();
        scheme.object(3).as_array_object();
    }

    #[test]
    #[should_panic(expected = "list of numbers expected")]
    fn test_array_double_asserts_on_mismatch() {
        let scheme = ArenaScheme::new();
        scheme.object(vec!["a".to_owned()]).as_array_double();
    }

    #[test]
    fn test_host_containers_become_lists() {
        let scheme = ArenaScheme::new();
        let nested = vec![vec![1.5, 2.0], vec![], vec![-3.25]];
        assert_eq!(scheme.object(nested.clone()).handle().to_array_array_double(), nested);

        let table = BTreeMap::from([
            ("b".to_owned(), "2".to_owned()),
            ("a".to_owned(), "1".to_owned()),
        ]);
        let list = scheme.object(table.clone());
        assert_eq!(list.to_string(), r#"(("a" . "1") ("b" . "2"))"#);
        assert_eq!(list.handle().to_table_string_string(), table);

        let urls = vec![Url::new("a.tm"), Url::new("b.tm")];
        assert_eq!(scheme.object(urls.clone()).handle().to_array_url(), urls);
    }

    #[test]
    fn test_call_by_name_and_scheme_cmd() {
        let scheme = ArenaScheme::new();
        let sum = SchemeExt::call(&scheme, "+", &[scheme.object(2), scheme.object(40)]).unwrap();
        assert_eq!(sum.as_int(), 42);

        scheme.eval("(define cmd-ran #f)").unwrap();
        let command = scheme.scheme_cmd("(set! cmd-ran #t) 5").unwrap();
        assert_eq!(scheme.call_object(&command, &[]).unwrap().as_int(), 5);
        assert!(scheme.eval("cmd-ran").unwrap().as_bool());

        let body = scheme.eval("'(* 6 7)").unwrap();
        let thunk = scheme.scheme_cmd_object(&body).unwrap();
        assert_eq!(scheme.call_object(&thunk, &[]).unwrap().as_int(), 42);
    }

    #[test]
    fn test_eval_secure_refuses_side_effects() {
        let scheme = ArenaScheme::new();
        assert_eq!(scheme.eval_secure("(+ 1 (* 2 3))").unwrap().as_int(), 7);
        let err = scheme.eval_secure("(set-car! x 1)").unwrap_err();
        assert!(err.to_string().contains("set-car!"), "{err}");
    }

    #[test]
    fn test_string_round_trip_through_the_interpreter() {
        let scheme = ArenaScheme::new();
        let value = scheme.string_to_object("(a \"b\" 3)").unwrap();
        assert!(value.is_list());
        assert_eq!(scheme.object_to_string(&value).unwrap(), "(a \"b\" 3)");
    }

    #[test]
    fn test_protected_call_commits_or_cancels() {
        let scheme = ArenaScheme::new();
        let editor = RecordingEditor::default();

        let ok = scheme.scheme_cmd("1").unwrap();
        assert!(scheme.protected_call(&ok, &editor).is_ok());
        let failing = scheme.scheme_cmd("(error \"menu failed\")").unwrap();
        let err = scheme.protected_call(&failing, &editor).unwrap_err();
        assert!(err.to_string().contains("menu failed"));

        assert_eq!(editor.before.load(Ordering::SeqCst), 2);
        assert_eq!(editor.after.load(Ordering::SeqCst), 1);
        assert_eq!(editor.cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exec_file_reports_success() {
        let scheme = ArenaScheme::new();
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.scm");
        std::fs::write(&good, "(define from-file 1) from-file").unwrap();
        let silent = dir.path().join("silent.scm");
        std::fs::write(&silent, "(define quiet 1)").unwrap();

        assert!(scheme.exec_file(&good));
        assert!(!scheme.exec_file(&silent));
        assert!(!scheme.exec_file(&dir.path().join("missing.scm")));
    }
}
