//! Host procedures that let interpreter code recognise and convert payloads.

use crate::adapter::{Scheme, SchemeError, host_procedure};
use crate::blackbox::Blackbox;
use crate::handle::Handle;
use crate::payload::{Tree, Url};

/// Install the payload predicates and conversions into `scheme`
pub fn install_glue(scheme: &dyn Scheme) {
    let predicates: [(&str, fn(&Handle) -> bool); 9] = [
        ("tree?", Handle::is_tree),
        ("url?", Handle::is_url),
        ("observer?", Handle::is_observer),
        ("widget?", Handle::is_widget),
        ("patch?", Handle::is_patch),
        ("modification?", Handle::is_modification),
        ("command?", Handle::is_command),
        ("blackbox?", Handle::is_blackbox),
        ("tm?", |value| value.is_string() || value.is_tree()),
    ];
    for (name, test) in predicates {
        scheme.install_procedure(
            name,
            host_procedure(move |scheme, args| Ok(scheme.bool_to_value(test(&args.car())))),
            1,
            0,
        );
    }

    scheme.install_procedure(
        "string->url",
        host_procedure(|scheme, args| {
            let first = args.car();
            let text = expect(&first, "string->url", "string", Handle::is_string)?;
            Ok(scheme.blackbox_to_value(Blackbox::close(Url::new(text.to_string_value()))))
        }),
        1,
        0,
    );
    scheme.install_procedure(
        "url->string",
        host_procedure(|scheme, args| {
            let first = args.car();
            let url = expect(&first, "url->string", "url", Handle::is_url)?;
            Ok(scheme.string_to_value(url.to_url().as_str()))
        }),
        1,
        0,
    );
    scheme.install_procedure(
        "tree->stree",
        host_procedure(|scheme, args| {
            let first = args.car();
            let tree = expect(&first, "tree->stree", "tree", Handle::is_tree)?;
            Ok(tree_to_stree(scheme, &tree.to_tree()))
        }),
        1,
        0,
    );
    scheme.install_procedure(
        "stree->tree",
        host_procedure(|scheme, args| {
            let tree = stree_to_tree(&args.car()).ok_or_else(|| {
                SchemeError::evaluation(format!("stree->tree: not a scheme tree: {}", args.car()))
            })?;
            Ok(scheme.blackbox_to_value(Blackbox::close(tree)))
        }),
        1,
        0,
    );
    scheme.install_procedure(
        "tree-label",
        host_procedure(|scheme, args| {
            let first = args.car();
            let tree = expect(&first, "tree-label", "tree", Handle::is_tree)?;
            Ok(scheme.symbol_to_value(tree.to_tree().label()))
        }),
        1,
        0,
    );
    scheme.install_procedure(
        "tree-arity",
        host_procedure(|scheme, args| {
            let first = args.car();
            let tree = expect(&first, "tree-arity", "tree", Handle::is_tree)?;
            let arity = i64::try_from(tree.to_tree().arity()).unwrap_or(i64::MAX);
            Ok(scheme.long_to_value(arity))
        }),
        1,
        0,
    );
}

fn expect<'a>(
    value: &'a Handle,
    procedure: &str,
    kind: &str,
    test: fn(&Handle) -> bool,
) -> Result<&'a Handle, SchemeError> {
    if test(value) {
        Ok(value)
    } else {
        Err(SchemeError::evaluation(format!(
            "{procedure}: expected {kind}, got {value}"
        )))
    }
}

/// Scheme-tree form: atoms become strings, compounds `(label child ...)`
pub fn tree_to_stree(scheme: &dyn Scheme, tree: &Tree) -> Handle {
    match tree {
        Tree::Atom(text) => scheme.string_to_value(text),
        Tree::Compound { label, children } => {
            let tail = children
                .iter()
                .rev()
                .fold(scheme.null(), |tail, child| Handle::cons(&tree_to_stree(scheme, child), &tail));
            Handle::cons(&scheme.symbol_to_value(label), &tail)
        }
    }
}

/// Inverse of [`tree_to_stree`]; also accepts numbers, symbols and boxed trees
pub fn stree_to_tree(value: &Handle) -> Option<Tree> {
    if value.is_string() {
        Some(Tree::Atom(value.to_string_value()))
    } else if value.is_symbol() {
        Some(Tree::Atom(value.to_symbol()))
    } else if value.is_int() || value.is_double() {
        Some(Tree::Atom(value.write()))
    } else if value.is_tree() {
        Some(value.to_tree())
    } else if value.is_pair() && value.car().is_symbol() && value.cdr().is_list() {
        let children = value
            .cdr()
            .to_vec_of(stree_to_tree)
            .into_iter()
            .collect::<Option<Vec<_>>>()?;
        Some(Tree::compound(value.car().to_symbol(), children))
    } else {
        None
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::backends::ArenaScheme;
    use crate::object::SchemeExt;

    fn glued() -> ArenaScheme {
        let scheme = ArenaScheme::new();
        install_glue(&scheme);
        scheme
    }

    fn sample() -> Tree {
        Tree::compound(
            "frac",
            vec![Tree::atom("1"), Tree::compound("sqrt", vec![Tree::atom("x")])],
        )
    }

    #[test]
    fn test_predicates_recognise_payloads() {
        let scheme = glued();
        scheme.eval("(define (check p x) (if (p x) 1 0))").unwrap();
        let tree = scheme.object(sample());
        let url = scheme.object(Url::new("doc.tm"));
        let cases = [
            ("tree?", tree.clone(), 1),
            ("tree?", url.clone(), 0),
            ("url?", url.clone(), 1),
            ("url?", scheme.object("plain.tm"), 1),
            ("tm?", scheme.object("text"), 1),
            ("tm?", tree.clone(), 1),
            ("tm?", scheme.object(1), 0),
            ("blackbox?", url, 1),
            ("widget?", tree, 0),
        ];
        for (predicate, value, expected) in cases {
            let check = scheme.eval("check").unwrap();
            let predicate_value = scheme.eval(predicate).unwrap();
            let result = scheme.call_object(&check, &[predicate_value, value]).unwrap();
            assert_eq!(result.as_int(), expected, "{predicate}");
        }
    }

    #[test]
    fn test_tree_and_stree_convert_both_ways() {
        let scheme = glued();
        let stree = scheme.tree_to_stree(&sample()).unwrap();
        assert_eq!(stree.to_string(), r#"(frac "1" (sqrt "x"))"#);
        assert_eq!(scheme.stree_to_tree(&stree).unwrap(), sample());

        let from_text = scheme.eval("(stree->tree '(concat \"a\" 2 b))").unwrap();
        assert_eq!(
            from_text.as_tree(),
            Tree::compound("concat", vec![Tree::atom("a"), Tree::atom("2"), Tree::atom("b")])
        );
    }

    #[test]
    fn test_tree_accessors_and_urls() {
        let scheme = glued();
        let tree = scheme.object(sample());
        let label = SchemeExt::call(&scheme, "tree-label", std::slice::from_ref(&tree)).unwrap();
        assert_eq!(label.as_symbol(), "frac");
        let arity = SchemeExt::call(&scheme, "tree-arity", &[tree]).unwrap();
        assert_eq!(arity.as_int(), 2);
        let round = scheme.eval("(url->string (string->url \"a/b.tm\"))").unwrap();
        assert_eq!(round.as_string(), "a/b.tm");
    }

    #[test]
    fn test_wrong_argument_kinds_are_evaluation_errors() {
        let scheme = glued();
        let err = scheme.eval("(tree-label 3)").unwrap_err();
        assert!(err.to_string().contains("tree-label: expected tree"), "{err}");
        for (call, message) in [
            ("(string->url 'a)", "string->url: expected string"),
            ("(url->string \"a\")", "url->string: expected url"),
            ("(tree->stree 1)", "tree->stree: expected tree"),
            ("(tree-arity '())", "tree-arity: expected tree"),
        ] {
            let err = scheme.eval(call).unwrap_err();
            assert!(err.to_string().contains(message), "{call}: {err}");
        }
        assert!(scheme.eval("(stree->tree (list 1 2))").is_err());
        assert!(scheme.eval("(+ 1 1)").is_ok());
    }
}
