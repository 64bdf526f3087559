//! Builtin procedures shared by every backend.
//!
//! The table is generated by [`builtins!`]: each entry names the Scheme
//! symbol and the arity, and [`Builtin::apply`] dispatches to the
//! implementing function. Arity is validated by the evaluator before
//! dispatch, so the implementations may index their arguments directly.

use super::{Arity, Datum, Heap, Machine};
use crate::Error;
use crate::reader::parse_datum;

macro_rules! builtins {
    ($($variant:ident => $name:literal, $arity:expr;)*) => {
        /// A procedure implemented natively by the evaluator
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Builtin {
            $($variant,)*
        }

        impl Builtin {
            pub const ALL: &'static [Builtin] = &[$(Builtin::$variant,)*];

            /// The Scheme name the builtin is bound to
            pub fn name(self) -> &'static str {
                match self {
                    $(Builtin::$variant => $name,)*
                }
            }

            pub fn arity(self) -> Arity {
                match self {
                    $(Builtin::$variant => $arity,)*
                }
            }
        }
    };
}

builtins! {
    Add => "+", Arity::AtLeast(0);
    Sub => "-", Arity::AtLeast(1);
    Mul => "*", Arity::AtLeast(0);
    Div => "/", Arity::AtLeast(1);
    Quotient => "quotient", Arity::Exact(2);
    Remainder => "remainder", Arity::Exact(2);
    Modulo => "modulo", Arity::Exact(2);
    Abs => "abs", Arity::Exact(1);
    Min => "min", Arity::AtLeast(1);
    Max => "max", Arity::AtLeast(1);
    NumEq => "=", Arity::AtLeast(1);
    Less => "<", Arity::AtLeast(1);
    Greater => ">", Arity::AtLeast(1);
    LessEq => "<=", Arity::AtLeast(1);
    GreaterEq => ">=", Arity::AtLeast(1);
    Not => "not", Arity::Exact(1);
    Eq => "eq?", Arity::Exact(2);
    Eqv => "eqv?", Arity::Exact(2);
    Equal => "equal?", Arity::Exact(2);
    Cons => "cons", Arity::Exact(2);
    Car => "car", Arity::Exact(1);
    Cdr => "cdr", Arity::Exact(1);
    SetCar => "set-car!", Arity::Exact(2);
    SetCdr => "set-cdr!", Arity::Exact(2);
    List => "list", Arity::AtLeast(0);
    Length => "length", Arity::Exact(1);
    Append => "append", Arity::AtLeast(0);
    Reverse => "reverse", Arity::Exact(1);
    ListRef => "list-ref", Arity::Exact(2);
    Memq => "memq", Arity::Exact(2);
    Member => "member", Arity::Exact(2);
    Assq => "assq", Arity::Exact(2);
    Assoc => "assoc", Arity::Exact(2);
    IsNull => "null?", Arity::Exact(1);
    IsPair => "pair?", Arity::Exact(1);
    IsList => "list?", Arity::Exact(1);
    IsBoolean => "boolean?", Arity::Exact(1);
    IsInteger => "integer?", Arity::Exact(1);
    IsNumber => "number?", Arity::Exact(1);
    IsReal => "real?", Arity::Exact(1);
    IsString => "string?", Arity::Exact(1);
    IsSymbol => "symbol?", Arity::Exact(1);
    IsProcedure => "procedure?", Arity::Exact(1);
    StringAppend => "string-append", Arity::AtLeast(0);
    StringLength => "string-length", Arity::Exact(1);
    StringEq => "string=?", Arity::AtLeast(1);
    Substring => "substring", Arity::Range(2, 3);
    NumberToString => "number->string", Arity::Exact(1);
    StringToNumber => "string->number", Arity::Exact(1);
    SymbolToString => "symbol->string", Arity::Exact(1);
    StringToSymbol => "string->symbol", Arity::Exact(1);
    Apply => "apply", Arity::AtLeast(1);
    Eval => "eval", Arity::Range(1, 2);
    RaiseError => "error", Arity::AtLeast(1);
    ObjectToString => "object->string", Arity::Exact(1);
    StringToObject => "string->object", Arity::Exact(1);
}

/// Numeric value used by the arithmetic builtins
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Real(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            // Precision loss above 2^53 is accepted for mixed arithmetic
            Number::Int(n) => n as f64,
            Number::Real(x) => x,
        }
    }
}

fn number<H: Heap>(heap: &H, value: &H::Ref, context: &str) -> Result<Number, Error> {
    match heap.view(value) {
        Datum::Int(n) => Ok(Number::Int(n)),
        Datum::Real(x) => Ok(Number::Real(x)),
        other => Err(Error::TypeError(format!(
            "{context}: expected a number, got {}",
            other.type_name()
        ))),
    }
}

fn integer<H: Heap>(heap: &H, value: &H::Ref, context: &str) -> Result<i64, Error> {
    match heap.view(value) {
        Datum::Int(n) => Ok(n),
        other => Err(Error::TypeError(format!(
            "{context}: expected an integer, got {}",
            other.type_name()
        ))),
    }
}

fn string<H: Heap>(heap: &H, value: &H::Ref, context: &str) -> Result<std::sync::Arc<str>, Error> {
    match heap.view(value) {
        Datum::Str(s) => Ok(s),
        other => Err(Error::TypeError(format!(
            "{context}: expected a string, got {}",
            other.type_name()
        ))),
    }
}

fn make_number<H: Heap>(heap: &H, n: Number) -> H::Ref {
    match n {
        Number::Int(n) => heap.integer(n),
        Number::Real(x) => heap.real(x),
    }
}

fn overflow(op: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {op}"))
}

fn arith(
    op: &str,
    a: Number,
    b: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    real_op: fn(f64, f64) -> f64,
) -> Result<Number, Error> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => int_op(x, y).map(Number::Int).ok_or_else(|| overflow(op)),
        _ => Ok(Number::Real(real_op(a.as_f64(), b.as_f64()))),
    }
}

fn divide(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (_, Number::Int(0)) => Err(Error::EvalError("Division by zero".to_owned())),
        (Number::Int(x), Number::Int(y)) if x.checked_rem(y) == Some(0) => {
            x.checked_div(y).map(Number::Int).ok_or_else(|| overflow("/"))
        }
        _ => Ok(Number::Real(a.as_f64() / b.as_f64())),
    }
}

fn compare(a: Number, b: Number) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

fn fold_numbers<H: Heap>(
    heap: &H,
    name: &str,
    args: &[H::Ref],
    identity: Number,
    step: impl Fn(Number, Number) -> Result<Number, Error>,
) -> Result<H::Ref, Error> {
    let mut acc = identity;
    for arg in args {
        acc = step(acc, number(heap, arg, name)?)?;
    }
    Ok(make_number(heap, acc))
}

fn compare_chain<H: Heap>(
    heap: &H,
    name: &str,
    args: &[H::Ref],
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<H::Ref, Error> {
    let numbers = args
        .iter()
        .map(|arg| number(heap, arg, name))
        .collect::<Result<Vec<_>, _>>()?;
    let holds = numbers
        .windows(2)
        .all(|pair| compare(pair[0], pair[1]).is_some_and(accept));
    Ok(heap.boolean(holds))
}

fn integer_division<H: Heap>(
    heap: &H,
    name: &str,
    args: &[H::Ref],
    op: fn(i64, i64) -> Option<i64>,
) -> Result<H::Ref, Error> {
    let a = integer(heap, &args[0], name)?;
    let b = integer(heap, &args[1], name)?;
    if b == 0 {
        return Err(Error::EvalError(format!("{name}: division by zero")));
    }
    op(a, b).map(|n| heap.integer(n)).ok_or_else(|| overflow(name))
}

fn pair_parts<H: Heap>(heap: &H, value: &H::Ref, name: &str) -> Result<(H::Ref, H::Ref), Error> {
    match heap.view(value) {
        Datum::Pair(car, cdr) => Ok((car, cdr)),
        other => Err(Error::TypeError(format!(
            "{name}: expected a pair, got {}",
            other.type_name()
        ))),
    }
}

fn proper_list<H: Heap>(heap: &H, value: &H::Ref, name: &str) -> Result<Vec<H::Ref>, Error> {
    heap.list_to_vec(value)
        .ok_or_else(|| Error::TypeError(format!("{name}: expected a proper list")))
}

/// Tail of `list` starting at the first element matching `item`, or `#f`
fn find_member<H: Heap>(
    heap: &H,
    item: &H::Ref,
    list: &H::Ref,
    same: fn(&H, &H::Ref, &H::Ref) -> bool,
    name: &str,
) -> Result<H::Ref, Error> {
    if !heap.is_list(list) {
        return Err(Error::TypeError(format!("{name}: expected a proper list")));
    }
    let mut cursor = list.clone();
    while let Datum::Pair(car, cdr) = heap.view(&cursor) {
        if same(heap, item, &car) {
            return Ok(cursor);
        }
        cursor = cdr;
    }
    Ok(heap.boolean(false))
}

/// First pair of an association list whose car matches `key`, or `#f`
fn find_association<H: Heap>(
    heap: &H,
    key: &H::Ref,
    alist: &H::Ref,
    same: fn(&H, &H::Ref, &H::Ref) -> bool,
    name: &str,
) -> Result<H::Ref, Error> {
    if !heap.is_list(alist) {
        return Err(Error::TypeError(format!("{name}: expected a proper list")));
    }
    let mut cursor = alist.clone();
    while let Datum::Pair(entry, cdr) = heap.view(&cursor) {
        if let Datum::Pair(entry_key, _) = heap.view(&entry)
            && same(heap, key, &entry_key)
        {
            return Ok(entry);
        }
        cursor = cdr;
    }
    Ok(heap.boolean(false))
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Number::Int(n));
    }
    match text {
        "+inf.0" => Some(Number::Real(f64::INFINITY)),
        "-inf.0" => Some(Number::Real(f64::NEG_INFINITY)),
        "+nan.0" | "-nan.0" => Some(Number::Real(f64::NAN)),
        _ if text.chars().any(|c| c.is_ascii_digit()) => text.parse().ok().map(Number::Real),
        _ => None,
    }
}

impl Builtin {
    /// Run the builtin; the caller has already validated the argument count
    pub fn apply<H: Heap>(self, m: &mut Machine<'_, H>, args: Vec<H::Ref>) -> Result<H::Ref, Error> {
        let heap = m.heap();
        let name = self.name();
        match self {
            Builtin::Add => fold_numbers(heap, name, &args, Number::Int(0), |a, b| {
                arith("+", a, b, i64::checked_add, |x, y| x + y)
            }),
            Builtin::Mul => fold_numbers(heap, name, &args, Number::Int(1), |a, b| {
                arith("*", a, b, i64::checked_mul, |x, y| x * y)
            }),
            Builtin::Sub => {
                let first = number(heap, &args[0], name)?;
                if args.len() == 1 {
                    let negated = arith("-", Number::Int(0), first, i64::checked_sub, |x, y| x - y)?;
                    return Ok(make_number(heap, negated));
                }
                fold_numbers(heap, name, &args[1..], first, |a, b| {
                    arith("-", a, b, i64::checked_sub, |x, y| x - y)
                })
            }
            Builtin::Div => {
                let first = number(heap, &args[0], name)?;
                if args.len() == 1 {
                    return Ok(make_number(heap, divide(Number::Int(1), first)?));
                }
                fold_numbers(heap, name, &args[1..], first, divide)
            }
            Builtin::Quotient => integer_division(heap, name, &args, i64::checked_div),
            Builtin::Remainder => integer_division(heap, name, &args, i64::checked_rem),
            Builtin::Modulo => integer_division(heap, name, &args, |a, b| {
                a.checked_rem(b).map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
            }),
            Builtin::Abs => match number(heap, &args[0], name)? {
                Number::Int(n) => n.checked_abs().map(|n| heap.integer(n)).ok_or_else(|| overflow(name)),
                Number::Real(x) => Ok(heap.real(x.abs())),
            },
            Builtin::Min | Builtin::Max => {
                let numbers = args
                    .iter()
                    .map(|arg| number(heap, arg, name))
                    .collect::<Result<Vec<_>, _>>()?;
                let inexact = numbers.iter().any(|n| matches!(n, Number::Real(_)));
                let wanted = if self == Builtin::Min {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
                let best = numbers.iter().copied().fold(numbers[0], |best, n| {
                    if compare(n, best) == Some(wanted) { n } else { best }
                });
                // Any inexact argument makes the result inexact
                let best = if inexact { Number::Real(best.as_f64()) } else { best };
                Ok(make_number(heap, best))
            }
            Builtin::NumEq => compare_chain(heap, name, &args, |o| o.is_eq()),
            Builtin::Less => compare_chain(heap, name, &args, |o| o.is_lt()),
            Builtin::Greater => compare_chain(heap, name, &args, |o| o.is_gt()),
            Builtin::LessEq => compare_chain(heap, name, &args, |o| o.is_le()),
            Builtin::GreaterEq => compare_chain(heap, name, &args, |o| o.is_ge()),
            Builtin::Not => Ok(heap.boolean(!heap.is_truthy(&args[0]))),
            Builtin::Eq | Builtin::Eqv => Ok(heap.boolean(heap.is_eqv(&args[0], &args[1]))),
            Builtin::Equal => Ok(heap.boolean(heap.is_equal(&args[0], &args[1]))),
            Builtin::Cons => Ok(heap.cons(args[0].clone(), args[1].clone())),
            Builtin::Car => pair_parts(heap, &args[0], name).map(|(car, _)| car),
            Builtin::Cdr => pair_parts(heap, &args[0], name).map(|(_, cdr)| cdr),
            Builtin::SetCar | Builtin::SetCdr => {
                let updated = if self == Builtin::SetCar {
                    heap.set_car(&args[0], args[1].clone())
                } else {
                    heap.set_cdr(&args[0], args[1].clone())
                };
                if updated {
                    Ok(heap.unspecified())
                } else {
                    Err(Error::TypeError(format!("{name}: expected a pair")))
                }
            }
            Builtin::List => Ok(heap.list(args)),
            Builtin::Length => {
                let items = proper_list(heap, &args[0], name)?;
                Ok(heap.integer(items.len() as i64))
            }
            Builtin::Append => {
                let Some((last, init)) = args.split_last() else {
                    return Ok(heap.nil());
                };
                let mut items = Vec::new();
                for list in init {
                    items.extend(proper_list(heap, list, name)?);
                }
                Ok(heap.list_with_tail(items, last.clone()))
            }
            Builtin::Reverse => {
                let mut items = proper_list(heap, &args[0], name)?;
                items.reverse();
                Ok(heap.list(items))
            }
            Builtin::ListRef => {
                let items = proper_list(heap, &args[0], name)?;
                let index = integer(heap, &args[1], name)?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| Error::EvalError(format!("{name}: index {index} out of range")))
            }
            Builtin::Memq => find_member(heap, &args[0], &args[1], H::is_eqv, "memq"),
            Builtin::Member => find_member(heap, &args[0], &args[1], H::is_equal, "member"),
            Builtin::Assq => find_association(heap, &args[0], &args[1], H::is_eqv, "assq"),
            Builtin::Assoc => find_association(heap, &args[0], &args[1], H::is_equal, "assoc"),
            Builtin::IsNull => Ok(heap.boolean(matches!(heap.view(&args[0]), Datum::Nil))),
            Builtin::IsPair => Ok(heap.boolean(matches!(heap.view(&args[0]), Datum::Pair(..)))),
            Builtin::IsList => Ok(heap.boolean(heap.is_list(&args[0]))),
            Builtin::IsBoolean => Ok(heap.boolean(matches!(heap.view(&args[0]), Datum::Bool(_)))),
            Builtin::IsInteger => {
                let is_integer = match heap.view(&args[0]) {
                    Datum::Int(_) => true,
                    Datum::Real(x) => x.is_finite() && x.fract() == 0.0,
                    _ => false,
                };
                Ok(heap.boolean(is_integer))
            }
            Builtin::IsNumber | Builtin::IsReal => Ok(heap.boolean(matches!(
                heap.view(&args[0]),
                Datum::Int(_) | Datum::Real(_)
            ))),
            Builtin::IsString => Ok(heap.boolean(matches!(heap.view(&args[0]), Datum::Str(_)))),
            Builtin::IsSymbol => Ok(heap.boolean(matches!(heap.view(&args[0]), Datum::Sym(_)))),
            Builtin::IsProcedure => Ok(heap.boolean(heap.view(&args[0]).is_procedure())),
            Builtin::StringAppend => {
                let mut out = String::new();
                for arg in &args {
                    out.push_str(&string(heap, arg, name)?);
                }
                Ok(heap.string(&out))
            }
            Builtin::StringLength => {
                let s = string(heap, &args[0], name)?;
                Ok(heap.integer(s.chars().count() as i64))
            }
            Builtin::StringEq => {
                let strings = args
                    .iter()
                    .map(|arg| string(heap, arg, name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(heap.boolean(strings.windows(2).all(|pair| pair[0] == pair[1])))
            }
            Builtin::Substring => {
                let s = string(heap, &args[0], name)?;
                let chars: Vec<char> = s.chars().collect();
                let start = integer(heap, &args[1], name)?;
                let end = match args.get(2) {
                    Some(end) => integer(heap, end, name)?,
                    None => chars.len() as i64,
                };
                if start < 0 || end < start || end > chars.len() as i64 {
                    return Err(Error::EvalError(format!(
                        "{name}: range {start}..{end} out of bounds for length {}",
                        chars.len()
                    )));
                }
                let slice: String = chars[start as usize..end as usize].iter().collect();
                Ok(heap.string(&slice))
            }
            Builtin::NumberToString => {
                number(heap, &args[0], name)?;
                Ok(heap.string(&heap.to_written(&args[0])))
            }
            Builtin::StringToNumber => {
                let s = string(heap, &args[0], name)?;
                Ok(match parse_number(s.trim()) {
                    Some(n) => make_number(heap, n),
                    None => heap.boolean(false),
                })
            }
            Builtin::SymbolToString => match heap.view(&args[0]) {
                Datum::Sym(s) => Ok(heap.string(&s)),
                other => Err(Error::TypeError(format!(
                    "{name}: expected a symbol, got {}",
                    other.type_name()
                ))),
            },
            Builtin::StringToSymbol => {
                let s = string(heap, &args[0], name)?;
                Ok(heap.symbol(&s))
            }
            Builtin::Apply => {
                let (func, rest) = args.split_first().ok_or_else(|| Error::arity_error_in(1, 0, name))?;
                let Some((list, spread)) = rest.split_last() else {
                    return m.apply(func, Vec::new());
                };
                let mut call_args = spread.to_vec();
                call_args.extend(proper_list(heap, list, name)?);
                m.apply(func, call_args)
            }
            Builtin::Eval => {
                // The optional environment argument is accepted and ignored
                let env = heap.global_env();
                m.eval(&args[0], &env)
            }
            Builtin::RaiseError => {
                let mut message = match heap.view(&args[0]) {
                    Datum::Str(s) => s.to_string(),
                    _ => heap.to_written(&args[0]),
                };
                for irritant in &args[1..] {
                    message.push(' ');
                    message.push_str(&heap.to_written(irritant));
                }
                Err(Error::EvalError(message))
            }
            Builtin::ObjectToString => Ok(heap.string(&heap.to_written(&args[0]))),
            Builtin::StringToObject => {
                let s = string(heap, &args[0], name)?;
                let datum = parse_datum(&s)?;
                Ok(heap.import(&datum))
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::native::shared::SharedHeap;
    use crate::native::{NoHost, install_builtins};
    use crate::reader::parse_program;

    fn eval_str(input: &str) -> Result<String, Error> {
        let heap = SharedHeap::new();
        install_builtins(&heap);
        let forms = parse_program(input)?;
        let value = Machine::new(&heap, &NoHost).eval_program(&forms)?;
        Ok(heap.to_written(&value))
    }

    fn check(cases: &[(&str, &str)]) {
        for (input, expected) in cases {
            assert_eq!(
                eval_str(input).unwrap(),
                *expected,
                "evaluating {input}"
            );
        }
    }

    fn check_errors(cases: &[(&str, &str)]) {
        for (input, fragment) in cases {
            let err = eval_str(input).unwrap_err().to_string();
            assert!(err.contains(fragment), "evaluating {input}: {err}");
        }
    }

    #[test]
    fn test_builtin_table_is_consistent() {
        let mut names: Vec<_> = Builtin::ALL.iter().map(|b| b.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Builtin::ALL.len(), "duplicate builtin names");
    }

    #[test]
    fn test_arithmetic() {
        check(&[
            ("(+)", "0"),
            ("(+ 1 2 3)", "6"),
            ("(+ 1 2.5)", "3.5"),
            ("(- 5)", "-5"),
            ("(- 10 3 2)", "5"),
            ("(* 2 3 4)", "24"),
            ("(/ 12 4)", "3"),
            ("(/ 1 2)", "0.5"),
            ("(quotient 17 5)", "3"),
            ("(remainder -7 2)", "-1"),
            ("(modulo -7 2)", "1"),
            ("(abs -4)", "4"),
            ("(min 3 1 2)", "1"),
            ("(max 1 2.0)", "2.0"),
            ("(< 1 2 3)", "#t"),
            ("(< 1 3 2)", "#f"),
            ("(= 2 2.0)", "#t"),
            ("(>= 3 3 1)", "#t"),
        ]);
        check_errors(&[
            ("(/ 1 0)", "Division by zero"),
            ("(quotient 1 0)", "division by zero"),
            ("(+ 9223372036854775807 1)", "overflow"),
            ("(+ 1 \"two\")", "expected a number"),
        ]);
    }

    #[test]
    fn test_lists() {
        check(&[
            ("(cons 1 2)", "(1 . 2)"),
            ("(car '(1 2))", "1"),
            ("(cdr '(1 2))", "(2)"),
            ("(list 1 2 3)", "(1 2 3)"),
            ("(length '(a b c))", "3"),
            ("(append '(1) '(2 3) '())", "(1 2 3)"),
            ("(append '(1) 2)", "(1 . 2)"),
            ("(reverse '(1 2 3))", "(3 2 1)"),
            ("(list-ref '(a b c) 1)", "b"),
            ("(memq 'c '(a b c d))", "(c d)"),
            ("(member \"b\" '(\"a\" \"b\"))", "(\"b\")"),
            ("(assq 'b '((a 1) (b 2)))", "(b 2)"),
            ("(assoc \"k\" '((\"k\" . 1)))", "(\"k\" . 1)"),
            ("(assq 'z '((a 1)))", "#f"),
            ("(define p (cons 1 2)) (set-car! p 9) p", "(9 . 2)"),
            ("(list? '(1 . 2))", "#f"),
            ("(define c (list 1 2 3)) (set-cdr! (cdr (cdr c)) c) (list? c)", "#f"),
            ("(define c (list 1)) (set-cdr! c c) (list? c)", "#f"),
        ]);
        check_errors(&[
            ("(car '())", "expected a pair"),
            ("(length 5)", "proper list"),
            ("(list-ref '(a) 3)", "out of range"),
            ("(define c (list 1 2)) (set-cdr! (cdr c) c) (length c)", "proper list"),
            ("(define c (list 'a)) (set-cdr! c c) (memq 'z c)", "memq: expected a proper list"),
            ("(define c (list '(a 1))) (set-cdr! c c) (assoc 'z c)", "assoc: expected a proper list"),
        ]);
    }

    #[test]
    fn test_strings_and_symbols() {
        check(&[
            ("(string-append \"ab\" \"cd\")", "\"abcd\""),
            ("(string-length \"héllo\")", "5"),
            ("(substring \"hello\" 1 3)", "\"el\""),
            ("(string=? \"a\" \"a\")", "#t"),
            ("(number->string 42)", "\"42\""),
            ("(string->number \"2.5\")", "2.5"),
            ("(string->number \"abc\")", "#f"),
            ("(symbol->string 'foo)", "\"foo\""),
            ("(string->symbol \"bar\")", "bar"),
            ("(object->string '(a \"b\" 1))", "\"(a \\\"b\\\" 1)\""),
            ("(string->object \"(1 2 x)\")", "(1 2 x)"),
        ]);
    }

    #[test]
    fn test_higher_order() {
        check(&[
            ("(apply + 1 2 '(3 4))", "10"),
            ("(apply list '())", "()"),
            ("(eval '(+ 1 2))", "3"),
            ("(procedure? car)", "#t"),
            ("(procedure? 'car)", "#f"),
            ("car", "#<primitive-procedure car>"),
        ]);
        check_errors(&[("(error \"bad thing:\" 'x 42)", "bad thing: x 42")]);
    }

    #[test]
    fn test_equivalence() {
        check(&[
            ("(eq? 'a 'a)", "#t"),
            ("(eqv? 1.5 1.5)", "#t"),
            ("(equal? '(1 (2 \"x\")) '(1 (2 \"x\")))", "#t"),
            ("(eq? '(1) '(1))", "#f"),
            ("(let ((x '(1))) (eq? x x))", "#t"),
        ]);
    }
}
