//! Evaluator core, generic over the backend heap.
//!
//! Special forms are recognised by the symbol at the head of a form. Tail
//! positions (`if` branches, the last form of a body, closure application)
//! loop instead of recursing, so only genuinely nested evaluation counts
//! against [`MAX_EVAL_DEPTH`].

use std::sync::Arc;

use super::{Arity, Datum, Formals, Heap, Lambda, Primitive, Symbol};
use crate::reader::Sexpr;
use crate::{Error, MAX_EVAL_DEPTH};

const CONTEXT_MARKER: &str = "\n  Context: ";
const MAX_CONTEXT_CHARS: usize = 200;

/// Dispatch for `Primitive::Host` procedures.
///
/// Implemented by each adapter: it converts the native arguments to handles,
/// runs the host closure and converts the result back.
pub trait HostCalls<H: Heap> {
    fn call_host(&self, index: usize, args: Vec<H::Ref>) -> Result<H::Ref, Error>;
}

/// Host table with no procedures, used while bootstrapping
pub struct NoHost;

impl<H: Heap> HostCalls<H> for NoHost {
    fn call_host(&self, index: usize, _args: Vec<H::Ref>) -> Result<H::Ref, Error> {
        Err(Error::EvalError(format!(
            "No host procedure installed at index {index}"
        )))
    }
}

/// Result of one evaluation step: a final value, or a form to continue with
enum Step<H: Heap> {
    Value(H::Ref),
    Tail(H::Ref, H::Env),
}

#[derive(Debug, Clone, Copy)]
enum SpecialForm {
    Quote,
    If,
    Define,
    Set,
    Lambda,
    Begin,
    Let,
    LetStar,
    Cond,
    And,
    Or,
    When,
    Unless,
}

impl SpecialForm {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "quote" => SpecialForm::Quote,
            "if" => SpecialForm::If,
            "define" => SpecialForm::Define,
            "set!" => SpecialForm::Set,
            "lambda" => SpecialForm::Lambda,
            "begin" => SpecialForm::Begin,
            "let" => SpecialForm::Let,
            "let*" => SpecialForm::LetStar,
            "cond" => SpecialForm::Cond,
            "and" => SpecialForm::And,
            "or" => SpecialForm::Or,
            "when" => SpecialForm::When,
            "unless" => SpecialForm::Unless,
            _ => return None,
        })
    }
}

/// One evaluation session over a heap.
pub struct Machine<'a, H: Heap> {
    heap: &'a H,
    host: &'a dyn HostCalls<H>,
    depth: usize,
}

impl<'a, H: Heap> Machine<'a, H> {
    pub fn new(heap: &'a H, host: &'a dyn HostCalls<H>) -> Self {
        Machine {
            heap,
            host,
            depth: 0,
        }
    }

    pub fn heap(&self) -> &'a H {
        self.heap
    }

    /// Evaluate each form in the global environment, returning the last value
    pub fn eval_program(&mut self, forms: &[Sexpr]) -> Result<H::Ref, Error> {
        let env = self.heap.global_env();
        let mut result = self.heap.unspecified();
        for form in forms {
            let expr = self.heap.import(form);
            result = self.eval(&expr, &env)?;
        }
        Ok(result)
    }

    /// Evaluate an expression with depth tracking to prevent stack overflow
    pub fn eval(&mut self, expr: &H::Ref, env: &H::Env) -> Result<H::Ref, Error> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
            )));
        }
        self.depth += 1;
        let result = self.eval_loop(expr.clone(), env.clone());
        self.depth -= 1;
        result
    }

    /// Apply a procedure value to already evaluated arguments
    pub fn apply(&mut self, func: &H::Ref, args: Vec<H::Ref>) -> Result<H::Ref, Error> {
        match self.apply_step(func, args)? {
            Step::Value(value) => Ok(value),
            Step::Tail(expr, env) => self.eval(&expr, &env),
        }
    }

    /// Apply a procedure to the elements of a native argument list
    pub fn apply_list(&mut self, func: &H::Ref, args: &H::Ref) -> Result<H::Ref, Error> {
        let args = self
            .heap
            .list_to_vec(args)
            .ok_or_else(|| Error::TypeError("apply: arguments must be a proper list".into()))?;
        self.apply(func, args)
    }

    fn eval_loop(&mut self, mut expr: H::Ref, mut env: H::Env) -> Result<H::Ref, Error> {
        loop {
            match self.heap.view(&expr) {
                Datum::Sym(name) => {
                    return self
                        .heap
                        .lookup(&env, &name)
                        .ok_or_else(|| Error::UnboundVariable(name.to_string()));
                }
                Datum::Nil => {
                    return Err(Error::EvalError("Cannot evaluate empty list".to_owned()));
                }
                Datum::Pair(head, rest) => {
                    let step = self
                        .eval_form(head, rest, &env)
                        .map_err(|err| self.add_context(err, &expr))?;
                    match step {
                        Step::Value(value) => return Ok(value),
                        Step::Tail(next, next_env) => {
                            expr = next;
                            env = next_env;
                        }
                    }
                }
                // Self-evaluating
                _ => return Ok(expr),
            }
        }
    }

    /// Helper function to add expression context to errors, once
    fn add_context(&self, error: Error, expr: &H::Ref) -> Error {
        let annotate = |msg: String| {
            if msg.contains(CONTEXT_MARKER) {
                return msg;
            }
            let mut context = self.heap.to_written(expr);
            if context.chars().count() > MAX_CONTEXT_CHARS {
                context = context.chars().take(MAX_CONTEXT_CHARS).collect();
                context.push_str("...");
            }
            format!("{msg}{CONTEXT_MARKER}while evaluating: {context}")
        };
        match error {
            Error::EvalError(msg) => Error::EvalError(annotate(msg)),
            Error::TypeError(msg) => Error::TypeError(annotate(msg)),
            // Parse errors, unbound variables and arity errors carry their own context
            other => other,
        }
    }

    fn eval_form(&mut self, head: H::Ref, rest: H::Ref, env: &H::Env) -> Result<Step<H>, Error> {
        if let Datum::Sym(name) = self.heap.view(&head)
            && let Some(form) = SpecialForm::from_name(&name)
        {
            let args = self
                .heap
                .list_to_vec(&rest)
                .ok_or_else(|| Error::EvalError(format!("Malformed {name} form")))?;
            return self.eval_special(form, &args, &rest, env);
        }

        let func = self.eval(&head, env)?;
        let arg_exprs = self
            .heap
            .list_to_vec(&rest)
            .ok_or_else(|| Error::EvalError("Malformed procedure application".to_owned()))?;
        let args = self.eval_args(&arg_exprs, env)?;
        self.apply_step(&func, args)
    }

    fn eval_args(&mut self, exprs: &[H::Ref], env: &H::Env) -> Result<Vec<H::Ref>, Error> {
        exprs.iter().map(|expr| self.eval(expr, env)).collect()
    }

    fn apply_step(&mut self, func: &H::Ref, args: Vec<H::Ref>) -> Result<Step<H>, Error> {
        match self.heap.view(func) {
            Datum::Closure(lambda) => {
                let env = self.bind_arguments(&lambda, args)?;
                self.body_step(&lambda.body, env)
            }
            Datum::Primitive(Primitive::Builtin(builtin)) => {
                builtin
                    .arity()
                    .validate(args.len())
                    .map_err(|_| Error::arity_error_in(builtin.arity(), args.len(), builtin.name()))?;
                builtin.apply(self, args).map(Step::Value)
            }
            Datum::Primitive(Primitive::Host(index)) => {
                self.host.call_host(index, args).map(Step::Value)
            }
            _ => Err(Error::TypeError(format!(
                "Cannot apply non-procedure: {}",
                self.heap.to_written(func)
            ))),
        }
    }

    fn bind_arguments(
        &mut self,
        lambda: &Lambda<H::Ref, H::Env>,
        mut args: Vec<H::Ref>,
    ) -> Result<H::Env, Error> {
        let name = lambda.name.as_deref().unwrap_or("#<procedure>");
        let bindings = match lambda.formals.as_ref() {
            Formals::Fixed(params) => {
                if params.len() != args.len() {
                    return Err(Error::arity_error_in(
                        Arity::Exact(params.len()),
                        args.len(),
                        name,
                    ));
                }
                params.iter().cloned().zip(args).collect()
            }
            Formals::Variadic(params, rest) => {
                if args.len() < params.len() {
                    return Err(Error::arity_error_in(
                        Arity::AtLeast(params.len()),
                        args.len(),
                        name,
                    ));
                }
                let rest_args = args.split_off(params.len());
                let mut bindings: Vec<_> = params.iter().cloned().zip(args).collect();
                bindings.push((rest.clone(), self.heap.list(rest_args)));
                bindings
            }
        };
        Ok(self.heap.extend_env(&lambda.env, bindings))
    }

    /// Evaluate all body forms but the last; the last is returned as a tail step
    fn body_step(&mut self, body: &H::Ref, env: H::Env) -> Result<Step<H>, Error> {
        let forms = self
            .heap
            .list_to_vec(body)
            .ok_or_else(|| Error::EvalError("Malformed body".to_owned()))?;
        match forms.split_last() {
            None => Ok(Step::Value(self.heap.unspecified())),
            Some((last, init)) => {
                for form in init {
                    self.eval(form, &env)?;
                }
                Ok(Step::Tail(last.clone(), env))
            }
        }
    }

    fn cdr(&self, list: &H::Ref) -> H::Ref {
        match self.heap.view(list) {
            Datum::Pair(_, cdr) => cdr,
            _ => self.heap.nil(),
        }
    }

    fn symbol_name(&self, value: &H::Ref) -> Option<Symbol> {
        match self.heap.view(value) {
            Datum::Sym(name) => Some(name),
            _ => None,
        }
    }

    fn eval_special(
        &mut self,
        form: SpecialForm,
        args: &[H::Ref],
        rest: &H::Ref,
        env: &H::Env,
    ) -> Result<Step<H>, Error> {
        match form {
            SpecialForm::Quote => match args {
                [datum] => Ok(Step::Value(datum.clone())),
                _ => Err(Error::arity_error_in(1, args.len(), "quote")),
            },
            SpecialForm::If => match args {
                [test, then_expr] | [test, then_expr, _] => {
                    let condition = self.eval(test, env)?;
                    if self.heap.is_truthy(&condition) {
                        Ok(Step::Tail(then_expr.clone(), env.clone()))
                    } else if let [_, _, else_expr] = args {
                        Ok(Step::Tail(else_expr.clone(), env.clone()))
                    } else {
                        Ok(Step::Value(self.heap.unspecified()))
                    }
                }
                _ => Err(Error::arity_error_in(Arity::Range(2, 3), args.len(), "if")),
            },
            SpecialForm::Define => self.eval_define(args, rest, env),
            SpecialForm::Set => match args {
                [target, expr] => {
                    let name = self
                        .symbol_name(target)
                        .ok_or_else(|| Error::TypeError("set! requires a symbol".to_owned()))?;
                    let value = self.eval(expr, env)?;
                    if self.heap.assign(env, &name, value) {
                        Ok(Step::Value(self.heap.unspecified()))
                    } else {
                        Err(Error::UnboundVariable(name.to_string()))
                    }
                }
                _ => Err(Error::arity_error_in(2, args.len(), "set!")),
            },
            SpecialForm::Lambda => match args {
                [formals, _, ..] => {
                    let formals = self.parse_formals(formals)?;
                    let body = self.cdr(rest);
                    Ok(Step::Value(self.make_closure(formals, body, env, None)))
                }
                _ => Err(Error::arity_error_in(Arity::AtLeast(2), args.len(), "lambda")),
            },
            SpecialForm::Begin => self.body_step(rest, env.clone()),
            SpecialForm::Let => self.eval_let(args, rest, env),
            SpecialForm::LetStar => match args {
                [bindings, _, ..] => {
                    let mut scope = env.clone();
                    for (name, expr) in self.parse_bindings(bindings)? {
                        let value = match expr {
                            Some(expr) => self.eval(&expr, &scope)?,
                            None => self.heap.unspecified(),
                        };
                        scope = self.heap.extend_env(&scope, vec![(name, value)]);
                    }
                    let body = self.cdr(rest);
                    self.body_step(&body, scope)
                }
                _ => Err(Error::arity_error_in(Arity::AtLeast(2), args.len(), "let*")),
            },
            SpecialForm::Cond => self.eval_cond(args, env),
            SpecialForm::And => match args.split_last() {
                None => Ok(Step::Value(self.heap.boolean(true))),
                Some((last, init)) => {
                    for expr in init {
                        let value = self.eval(expr, env)?;
                        if !self.heap.is_truthy(&value) {
                            return Ok(Step::Value(value));
                        }
                    }
                    Ok(Step::Tail(last.clone(), env.clone()))
                }
            },
            SpecialForm::Or => match args.split_last() {
                None => Ok(Step::Value(self.heap.boolean(false))),
                Some((last, init)) => {
                    for expr in init {
                        let value = self.eval(expr, env)?;
                        if self.heap.is_truthy(&value) {
                            return Ok(Step::Value(value));
                        }
                    }
                    Ok(Step::Tail(last.clone(), env.clone()))
                }
            },
            SpecialForm::When | SpecialForm::Unless => match args {
                [test, ..] => {
                    let condition = self.eval(test, env)?;
                    let wanted = matches!(form, SpecialForm::When);
                    if self.heap.is_truthy(&condition) == wanted {
                        let body = self.cdr(rest);
                        self.body_step(&body, env.clone())
                    } else {
                        Ok(Step::Value(self.heap.unspecified()))
                    }
                }
                [] => Err(Error::arity_error_in(Arity::AtLeast(1), 0, "when")),
            },
        }
    }

    fn eval_define(
        &mut self,
        args: &[H::Ref],
        rest: &H::Ref,
        env: &H::Env,
    ) -> Result<Step<H>, Error> {
        let Some(target) = args.first() else {
            return Err(Error::arity_error_in(Arity::AtLeast(1), 0, "define"));
        };
        match self.heap.view(target) {
            Datum::Sym(name) => {
                let value = match args {
                    [_] => self.heap.unspecified(),
                    [_, expr] => self.eval(expr, env)?,
                    _ => return Err(Error::arity_error_in(Arity::Range(1, 2), args.len(), "define")),
                };
                self.heap.define(env, name, value);
                Ok(Step::Value(self.heap.unspecified()))
            }
            // (define (name . formals) body...)
            Datum::Pair(name, formals) => {
                let name = self
                    .symbol_name(&name)
                    .ok_or_else(|| Error::TypeError("define requires a symbol".to_owned()))?;
                if args.len() < 2 {
                    return Err(Error::EvalError(format!("define: {name} has no body")));
                }
                let formals = self.parse_formals(&formals)?;
                let body = self.cdr(rest);
                let closure = self.make_closure(formals, body, env, Some(name.clone()));
                self.heap.define(env, name, closure);
                Ok(Step::Value(self.heap.unspecified()))
            }
            _ => Err(Error::TypeError("define requires a symbol".to_owned())),
        }
    }

    fn eval_let(&mut self, args: &[H::Ref], rest: &H::Ref, env: &H::Env) -> Result<Step<H>, Error> {
        // Named let: (let loop ((var init) ...) body...)
        if let [name, bindings, _, ..] = args
            && let Some(name) = self.symbol_name(name)
        {
            let bindings = self.parse_bindings(bindings)?;
            let mut params = Vec::with_capacity(bindings.len());
            let mut values = Vec::with_capacity(bindings.len());
            for (param, expr) in bindings {
                params.push(param);
                values.push(match expr {
                    Some(expr) => self.eval(&expr, env)?,
                    None => self.heap.unspecified(),
                });
            }
            let scope = self.heap.extend_env(env, Vec::new());
            let body = self.cdr(&self.cdr(rest));
            let procedure =
                self.make_closure(Formals::Fixed(params), body, &scope, Some(name.clone()));
            self.heap.define(&scope, name, procedure.clone());
            return self.apply_step(&procedure, values);
        }
        match args {
            [bindings, _, ..] => {
                let mut values = Vec::new();
                for (name, expr) in self.parse_bindings(bindings)? {
                    let value = match expr {
                        Some(expr) => self.eval(&expr, env)?,
                        None => self.heap.unspecified(),
                    };
                    values.push((name, value));
                }
                let scope = self.heap.extend_env(env, values);
                let body = self.cdr(rest);
                self.body_step(&body, scope)
            }
            _ => Err(Error::arity_error_in(Arity::AtLeast(2), args.len(), "let")),
        }
    }

    fn eval_cond(&mut self, clauses: &[H::Ref], env: &H::Env) -> Result<Step<H>, Error> {
        for clause in clauses {
            let Datum::Pair(test, body) = self.heap.view(clause) else {
                return Err(Error::EvalError("cond clause must be a list".to_owned()));
            };
            let is_else = self.symbol_name(&test).is_some_and(|name| &*name == "else");
            let value = if is_else {
                self.heap.boolean(true)
            } else {
                self.eval(&test, env)?
            };
            if self.heap.is_truthy(&value) {
                return if matches!(self.heap.view(&body), Datum::Nil) {
                    Ok(Step::Value(value))
                } else {
                    self.body_step(&body, env.clone())
                };
            }
        }
        Ok(Step::Value(self.heap.unspecified()))
    }

    /// Parse `((name expr) ...)` binding lists; a bare `(name)` binds unspecified
    fn parse_bindings(&self, bindings: &H::Ref) -> Result<Vec<(Symbol, Option<H::Ref>)>, Error> {
        let items = self
            .heap
            .list_to_vec(bindings)
            .ok_or_else(|| Error::EvalError("let bindings must be a list".to_owned()))?;
        items
            .iter()
            .map(|binding| {
                let parts = self.heap.list_to_vec(binding).unwrap_or_default();
                match parts.as_slice() {
                    [name] | [name, _] => {
                        let name = self.symbol_name(name).ok_or_else(|| {
                            Error::TypeError("let binding name must be a symbol".to_owned())
                        })?;
                        Ok((name, parts.get(1).cloned()))
                    }
                    _ => Err(Error::EvalError(
                        "let binding must be (name expression)".to_owned(),
                    )),
                }
            })
            .collect()
    }

    fn parse_formals(&self, formals: &H::Ref) -> Result<Formals, Error> {
        let mut params: Vec<Symbol> = Vec::new();
        let mut cursor = formals.clone();
        loop {
            match self.heap.view(&cursor) {
                Datum::Nil => return Ok(Formals::Fixed(params)),
                Datum::Sym(rest) => return Ok(Formals::Variadic(params, rest)),
                Datum::Pair(head, tail) => {
                    let name = self.symbol_name(&head).ok_or_else(|| {
                        Error::TypeError("Lambda parameters must be symbols".to_owned())
                    })?;
                    if params.contains(&name) {
                        return Err(Error::EvalError(format!(
                            "Duplicate parameter name: {name}"
                        )));
                    }
                    params.push(name);
                    cursor = tail;
                }
                _ => {
                    return Err(Error::TypeError(
                        "Lambda parameters must be a list or a symbol".to_owned(),
                    ));
                }
            }
        }
    }

    fn make_closure(
        &self,
        formals: Formals,
        body: H::Ref,
        env: &H::Env,
        name: Option<Symbol>,
    ) -> H::Ref {
        self.heap.alloc(Datum::Closure(Lambda {
            formals: Arc::new(formals),
            body,
            env: env.clone(),
            name,
        }))
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::native::shared::SharedHeap;
    use crate::native::{PrintMode, install_builtins};
    use crate::reader::parse_program;

    /// Test result variants for evaluation tests
    #[derive(Debug)]
    enum EvalResult {
        /// Printed (`write`) form of the expected value
        Prints(&'static str),
        /// Error whose message contains this text
        ErrorContaining(&'static str),
        Unbound(&'static str),
        Arity,
    }
    use EvalResult::*;

    fn eval_text(heap: &SharedHeap, text: &str) -> Result<String, Error> {
        let forms = parse_program(text)?;
        let mut machine = Machine::new(heap, &NoHost);
        let value = machine.eval_program(&forms)?;
        let mut out = String::new();
        heap.write_to(&value, PrintMode::Write, &mut out);
        Ok(out)
    }

    /// Run each case in a fresh environment
    fn run_eval_tests(cases: Vec<(&str, EvalResult)>) {
        for (i, (input, expected)) in cases.into_iter().enumerate() {
            let heap = SharedHeap::new();
            install_builtins(&heap);
            let test_id = format!("Eval test #{} ({input})", i + 1);
            match (eval_text(&heap, input), expected) {
                (Ok(actual), Prints(expected)) => assert_eq!(actual, expected, "{test_id}"),
                (Err(err), ErrorContaining(text)) => {
                    assert!(err.to_string().contains(text), "{test_id}: got {err}")
                }
                (Err(Error::UnboundVariable(name)), Unbound(expected)) => {
                    assert_eq!(name, expected, "{test_id}")
                }
                (Err(Error::ArityError { .. }), Arity) => {}
                (actual, expected) => panic!("{test_id}: expected {expected:?}, got {actual:?}"),
            }
        }
    }

    #[test]
    fn test_special_forms() {
        run_eval_tests(vec![
            ("(quote (a b))", Prints("(a b)")),
            ("'x", Prints("x")),
            ("(if #f 1 2)", Prints("2")),
            ("(if '() 'yes 'no)", Prints("yes")),
            ("(if #f #f)", Prints("#<unspecified>")),
            ("(define x 10) (set! x (+ x 1)) x", Prints("11")),
            ("(set! nowhere 1)", Unbound("nowhere")),
            ("(define (sq x) (* x x)) (sq 7)", Prints("49")),
            ("((lambda args args) 1 2 3)", Prints("(1 2 3)")),
            ("((lambda (a . rest) rest) 1 2 3)", Prints("(2 3)")),
            ("((lambda (a b) a) 1)", Arity),
            ("(lambda (x x) x)", ErrorContaining("Duplicate parameter")),
            ("(begin 1 2 3)", Prints("3")),
            ("(let ((a 1) (b 2)) (+ a b))", Prints("3")),
            ("(let* ((a 1) (b (+ a 1))) b)", Prints("2")),
            ("(let loop ((i 0) (acc '())) (if (= i 3) acc (loop (+ i 1) (cons i acc))))", Prints("(2 1 0)")),
            ("(cond (#f 1) ((= 1 1) 2) (else 3))", Prints("2")),
            ("(cond (#f 1) (else 3))", Prints("3")),
            ("(cond ((assq 'b '((a 1) (b 2)))))", Prints("(b 2)")),
            ("(and 1 2 #f 3)", Prints("#f")),
            ("(and)", Prints("#t")),
            ("(or #f 2 3)", Prints("2")),
            ("(when (> 2 1) 'a 'b)", Prints("b")),
            ("(unless (> 2 1) 'a)", Prints("#<unspecified>")),
            ("()", ErrorContaining("Cannot evaluate empty list")),
            ("(1 2)", ErrorContaining("Cannot apply non-procedure")),
            ("undefined-thing", Unbound("undefined-thing")),
        ]);
    }

    #[test]
    fn test_closures_capture_environment() {
        run_eval_tests(vec![
            (
                "(define (make-counter)
                   (let ((n 0))
                     (lambda () (set! n (+ n 1)) n)))
                 (define c (make-counter))
                 (c) (c) (c)",
                Prints("3"),
            ),
            (
                "(define (adder k) (lambda (x) (+ x k)))
                 ((adder 5) 10)",
                Prints("15"),
            ),
        ]);
    }

    #[test]
    fn test_tail_calls_do_not_grow_depth() {
        let heap = SharedHeap::new();
        install_builtins(&heap);
        let result = eval_text(
            &heap,
            "(define (count-down n) (if (= n 0) 'done (count-down (- n 1))))
             (count-down 100000)",
        );
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_depth_limit() {
        // Runs on a thread with a generous stack so the limit is reached first
        let outcome = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let heap = SharedHeap::new();
                install_builtins(&heap);
                eval_text(
                    &heap,
                    "(define (deep n) (if (= n 0) 0 (+ 1 (deep (- n 1))))) (deep 100000)",
                )
            })
            .unwrap()
            .join()
            .unwrap();
        match outcome {
            Err(Error::EvalError(msg)) => assert!(msg.contains("depth limit"), "{msg}"),
            other => panic!("expected depth error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_context_is_added_once() {
        let heap = SharedHeap::new();
        install_builtins(&heap);
        let err = eval_text(&heap, "(define (f) (car 1)) (+ 1 (f))").unwrap_err();
        let msg = err.to_string();
        assert_eq!(msg.matches("Context:").count(), 1, "{msg}");
        assert!(msg.contains("(car 1)"), "{msg}");
    }
}
