//! S-expression reader shared by every backend.
//!
//! The reader produces backend-neutral [`Sexpr`] trees. Each backend imports
//! them into its own heap before evaluation, so the same parser serves
//! arena cells and shared nodes alike.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{opt, recognize, value},
    error::ErrorKind,
    sequence::{pair, preceded},
};
use std::fmt;

use crate::MAX_PARSE_DEPTH;
use crate::{Error, ParseError, ParseErrorKind};

/// Characters allowed in symbols besides alphanumerics
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&:.~^@";

/// Check if a string is a valid symbol name
/// Valid: non-empty, not a lone dot, no leading digit, no sign-digit or dot-digit prefix
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() || name == "." {
                return false;
            }

            if matches!(first_char, '-' | '+' | '.')
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// A parsed datum, independent of any interpreter heap.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    Integer(i64),
    Real(f64),
    Bool(bool),
    Str(String),
    Symbol(String),
    /// A list; a `Some` tail makes it an improper (dotted) list
    List(Vec<Sexpr>, Option<Box<Sexpr>>),
}

impl Sexpr {
    pub fn symbol(name: impl Into<String>) -> Self {
        Sexpr::Symbol(name.into())
    }

    pub fn list(items: Vec<Sexpr>) -> Self {
        Sexpr::List(items, None)
    }

    pub fn nil() -> Self {
        Sexpr::List(Vec::new(), None)
    }

    /// Wrap a datum as `(quote datum)`
    pub fn quoted(self) -> Self {
        Sexpr::list(vec![Sexpr::symbol("quote"), self])
    }
}

impl From<i64> for Sexpr {
    fn from(n: i64) -> Self {
        Sexpr::Integer(n)
    }
}

impl From<f64> for Sexpr {
    fn from(x: f64) -> Self {
        Sexpr::Real(x)
    }
}

impl From<bool> for Sexpr {
    fn from(b: bool) -> Self {
        Sexpr::Bool(b)
    }
}

impl From<&str> for Sexpr {
    fn from(s: &str) -> Self {
        Sexpr::Str(s.to_owned())
    }
}

impl From<String> for Sexpr {
    fn from(s: String) -> Self {
        Sexpr::Str(s)
    }
}

/// Write a string literal with the escapes the reader understands
pub fn write_string_literal(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

/// Write a real so that it reads back as a real
pub fn write_real(f: &mut impl fmt::Write, x: f64) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 {
        write!(f, "{x:.1}")
    } else if x.is_nan() {
        f.write_str("+nan.0")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "+inf.0" } else { "-inf.0" })
    } else {
        write!(f, "{x}")
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexpr::Integer(n) => write!(f, "{n}"),
            Sexpr::Real(x) => write_real(f, *x),
            Sexpr::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Sexpr::Str(s) => write_string_literal(f, s),
            Sexpr::Symbol(s) => write!(f, "{s}"),
            Sexpr::List(items, tail) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                if let Some(tail) = tail {
                    write!(f, " . {tail}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn fail<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Error(nom::error::Error::new(input, kind)))
}

/// Turn a recoverable error into a failure once a construct has been committed to
fn committed<T>(result: IResult<&str, T>) -> IResult<&str, T> {
    result.map_err(|e| match e {
        nom::Err::Error(inner) => nom::Err::Failure(inner),
        other => other,
    })
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\'')
}

/// Ensure an atom is not immediately followed by more atom characters
fn at_delimiter(input: &str) -> bool {
    input.chars().next().is_none_or(is_delimiter)
}

/// Skip whitespace and `;` line comments
fn atmosphere(input: &str) -> IResult<&str, ()> {
    let mut rest = input;
    loop {
        let trimmed = rest.trim_start();
        match trimmed.strip_prefix(';') {
            Some(comment) => rest = comment.find('\n').map_or("", |i| &comment[i + 1..]),
            None => return Ok((trimmed, ())),
        }
    }
}

/// Parse a number: decimal or hexadecimal integer, or a real
fn parse_number(input: &str) -> IResult<&str, Sexpr> {
    let (rest, number) = alt((parse_hexadecimal, parse_decimal)).parse(input)?;
    if at_delimiter(rest) {
        Ok((rest, number))
    } else {
        fail(input, ErrorKind::Digit)
    }
}

/// Parse a decimal integer or real (`42`, `-7`, `1.5`, `.5`, `2e10`)
fn parse_decimal(input: &str) -> IResult<&str, Sexpr> {
    let (rest, text) = recognize((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)?;

    if text.contains(['.', 'e', 'E']) {
        match text.parse::<f64>() {
            Ok(x) => Ok((rest, Sexpr::Real(x))),
            Err(_) => fail(input, ErrorKind::Float),
        }
    } else {
        match text.parse::<i64>() {
            Ok(n) => Ok((rest, Sexpr::Integer(n))),
            // Overflow; symbol parsing rejects leading digits so this surfaces as an error
            Err(_) => fail(input, ErrorKind::Digit),
        }
    }
}

/// Parse a hexadecimal number (#x or #X prefix)
fn parse_hexadecimal(input: &str) -> IResult<&str, Sexpr> {
    let (input, _) = char('#').parse(input)?;
    let (input, _) = alt((char('x'), char('X'))).parse(input)?;
    let (input, hex_digits) = take_while1(|c: char| c.is_ascii_hexdigit()).parse(input)?;

    match i64::from_str_radix(hex_digits, 16) {
        Ok(n) => Ok((input, Sexpr::Integer(n))),
        Err(_) => fail(input, ErrorKind::HexDigit),
    }
}

/// Parse a boolean (#t, #f, #true, #false)
fn parse_bool(input: &str) -> IResult<&str, Sexpr> {
    let (rest, b) = alt((
        value(Sexpr::Bool(true), tag("#true")),
        value(Sexpr::Bool(false), tag("#false")),
        value(Sexpr::Bool(true), tag("#t")),
        value(Sexpr::Bool(false), tag("#f")),
    ))
    .parse(input)?;
    if at_delimiter(rest) {
        Ok((rest, b))
    } else {
        fail(input, ErrorKind::Tag)
    }
}

/// Parse a symbol (identifier)
fn parse_symbol(input: &str) -> IResult<&str, Sexpr> {
    let mut symbol_chars =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c));

    let (remaining, candidate) = symbol_chars.parse(input)?;

    if is_valid_symbol(candidate) && at_delimiter(remaining) {
        Ok((remaining, Sexpr::Symbol(candidate.into())))
    } else {
        fail(input, ErrorKind::Alpha)
    }
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Sexpr> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Sexpr::Str(chars))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    // Unknown or truncated escape sequence
                    Some(_) | None => return committed(fail(remaining, ErrorKind::Char)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            // Reached end of input without finding closing quote
            None => return committed(fail(remaining, ErrorKind::Eof)),
        }
    }
}

/// Parse a proper or dotted list
fn parse_list(input: &str, depth: usize) -> IResult<&str, Sexpr> {
    let (input, _) = char('(').parse(input)?;
    committed(parse_list_items(input, depth))
}

fn parse_list_items(mut input: &str, depth: usize) -> IResult<&str, Sexpr> {
    let mut items = Vec::new();

    loop {
        let (rest, _) = atmosphere(input)?;
        if let Some(rest) = rest.strip_prefix(')') {
            return Ok((rest, Sexpr::List(items, None)));
        }

        if let Some(after_dot) = rest.strip_prefix('.')
            && at_delimiter(after_dot)
        {
            if items.is_empty() {
                return fail(rest, ErrorKind::Char);
            }
            let (after_tail, tail) = parse_sexpr(after_dot, depth + 1)?;
            let (after_tail, _) = atmosphere(after_tail)?;
            let (after_tail, _) = char(')').parse(after_tail)?;
            return Ok((after_tail, Sexpr::List(items, Some(Box::new(tail)))));
        }

        if rest.is_empty() {
            return fail(rest, ErrorKind::Eof);
        }

        let (rest, item) = parse_sexpr(rest, depth + 1)?;
        items.push(item);
        input = rest;
    }
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, depth: usize) -> IResult<&str, Sexpr> {
    let (input, _) = char('\'').parse(input)?;
    let (input, expr) = committed(parse_sexpr(input, depth + 1))?;
    Ok((input, expr.quoted()))
}

/// Parse one S-expression, skipping leading atmosphere
fn parse_sexpr(input: &str, depth: usize) -> IResult<&str, Sexpr> {
    if depth >= MAX_PARSE_DEPTH {
        return fail(input, ErrorKind::TooLarge);
    }
    preceded(
        atmosphere,
        alt((
            |input| parse_quote(input, depth),
            |input| parse_list(input, depth),
            parse_number,
            parse_bool,
            parse_string,
            parse_symbol,
        )),
    )
    .parse(input)
}

/// Convert nom parsing errors to structured parse errors
fn to_parse_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> Error {
    let (code, remaining) = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => (e.code, e.input),
        nom::Err::Incomplete(_) => (ErrorKind::Eof, ""),
    };
    let position = input.len().saturating_sub(remaining.len());
    let trailing_blank = input[position..].trim().is_empty();

    let error = match code {
        ErrorKind::TooLarge => ParseError::with_context(
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
            input,
            position,
        ),
        _ if trailing_blank => ParseError::new(
            ParseErrorKind::Incomplete,
            "Unexpected end of input",
            None,
        ),
        ErrorKind::Char => ParseError::with_context(
            ParseErrorKind::InvalidSyntax,
            format!("Expected character at position {position}"),
            input,
            position,
        ),
        _ => {
            let near: String = input[position..].chars().take(10).collect();
            ParseError::with_context(
                ParseErrorKind::InvalidSyntax,
                format!("Invalid syntax near '{near}'"),
                input,
                position,
            )
        }
    };
    Error::ParseError(error)
}

/// Parse every top-level form in `input`.
pub fn parse_program(input: &str) -> Result<Vec<Sexpr>, Error> {
    let mut forms = Vec::new();
    let mut rest = input;
    loop {
        let (after, _) = atmosphere(rest).map_err(|e| to_parse_error(input, e))?;
        if after.is_empty() {
            return Ok(forms);
        }
        if after.starts_with(')') {
            return Err(Error::ParseError(ParseError::with_context(
                ParseErrorKind::InvalidSyntax,
                "Unbalanced closing parenthesis",
                input,
                input.len() - after.len(),
            )));
        }
        let (after, form) = parse_sexpr(after, 0).map_err(|e| to_parse_error(input, e))?;
        forms.push(form);
        rest = after;
    }
}

/// Parse exactly one datum; anything but atmosphere after it is an error.
pub fn parse_datum(input: &str) -> Result<Sexpr, Error> {
    let (rest, datum) = parse_sexpr(input, 0).map_err(|e| to_parse_error(input, e))?;
    let (rest, _) = atmosphere(rest).map_err(|e| to_parse_error(input, e))?;
    if rest.is_empty() {
        Ok(datum)
    } else {
        Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected remaining input: '{rest}'"),
            input,
            input.len() - rest.len(),
        )))
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    fn sym(name: &str) -> Sexpr {
        Sexpr::symbol(name)
    }

    fn list(items: Vec<Sexpr>) -> Sexpr {
        Sexpr::list(items)
    }

    /// Test result variants for parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Sexpr),
        SpecificError(ParseErrorKind),
        Error,
    }
    use ParseTestResult::*;

    fn success<T: Into<Sexpr>>(value: T) -> ParseTestResult {
        Success(value.into())
    }

    /// Run parse tests, checking that successful parses display back to an equivalent datum
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            let result = parse_datum(input);

            match (result, expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch");
                    let displayed = format!("{actual}");
                    let reparsed = parse_datum(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(reparsed, actual, "{test_id}: round-trip mismatch");
                }
                (Err(crate::Error::ParseError(e)), SpecificError(kind)) => {
                    assert_eq!(e.kind, *kind, "{test_id}: wrong error kind for '{input}'");
                }
                (Err(_), Error) => {}
                (actual, expected) => {
                    panic!("{test_id}: '{input}' expected {expected:?}, got {actual:?}")
                }
            }
        }
    }

    #[test]
    fn test_parse_atoms() {
        run_parse_tests(vec![
            ("42", success(42)),
            ("-7", success(-7)),
            ("+5", success(5)),
            ("#x1F", success(31)),
            ("1.5", success(1.5)),
            ("-0.25", success(-0.25)),
            (".5", success(0.5)),
            ("2e3", success(2000.0)),
            ("#t", success(true)),
            ("#false", success(false)),
            ("\"hi\\n\\\"there\\\"\"", success("hi\n\"there\"")),
            ("foo", Success(sym("foo"))),
            ("set-car!", Success(sym("set-car!"))),
            ("string->symbol", Success(sym("string->symbol"))),
            ("-", Success(sym("-"))),
            ("...", Success(sym("..."))),
            ("99999999999999999999", Error),
            ("12abc", Error),
            ("#tx", Error),
            ("\"unterminated", SpecificError(ParseErrorKind::Incomplete)),
            ("\"bad \\q escape\"", SpecificError(ParseErrorKind::InvalidSyntax)),
        ]);
    }

    #[test]
    fn test_parse_lists() {
        run_parse_tests(vec![
            ("()", Success(Sexpr::nil())),
            ("(1 2 3)", Success(list(vec![1.into(), 2.into(), 3.into()]))),
            (
                "(a . b)",
                Success(Sexpr::List(vec![sym("a")], Some(Box::new(sym("b"))))),
            ),
            (
                "(define (f . args) args)",
                Success(list(vec![
                    sym("define"),
                    Sexpr::List(vec![sym("f")], Some(Box::new(sym("args")))),
                    sym("args"),
                ])),
            ),
            ("'x", Success(sym("x").quoted())),
            (
                "'(1 \"two\")",
                Success(list(vec![1.into(), "two".into()]).quoted()),
            ),
            (
                "( + 1 ; comment\n 2 )",
                Success(list(vec![sym("+"), 1.into(), 2.into()])),
            ),
            ("(1 2", SpecificError(ParseErrorKind::Incomplete)),
            ("(. a)", Error),
            ("(a . b c)", Error),
            ("(1) 2", SpecificError(ParseErrorKind::TrailingContent)),
        ]);
    }

    #[test]
    fn test_parse_depth_limit() {
        let deep_ok = format!("{}{}", "(".repeat(MAX_PARSE_DEPTH - 1), ")".repeat(MAX_PARSE_DEPTH - 1));
        assert!(parse_datum(&deep_ok).is_ok());

        let too_deep = format!("{}{}", "(".repeat(MAX_PARSE_DEPTH + 1), ")".repeat(MAX_PARSE_DEPTH + 1));
        match parse_datum(&too_deep) {
            Err(crate::Error::ParseError(e)) => assert_eq!(e.kind, ParseErrorKind::TooDeeplyNested),
            other => panic!("expected depth error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_program() {
        let forms = parse_program("; header\n(define x 1)\n\n(+ x 2) ; trailing\n").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[1], list(vec![sym("+"), sym("x"), 2.into()]));

        assert!(parse_program("").unwrap().is_empty());
        assert!(parse_program("   ; only a comment").unwrap().is_empty());
        assert!(parse_program("(a))").is_err());
        assert!(parse_program("(a").is_err());
    }

    #[test]
    fn test_symbol_validation() {
        for name in ["a", "foo-bar", "->", "+", "...", "<=?", "a.b"] {
            assert!(is_valid_symbol(name), "{name} should be a symbol");
        }
        for name in ["", ".", "1a", "-1", "+2", ".5"] {
            assert!(!is_valid_symbol(name), "{name} should not be a symbol");
        }
    }

    #[test]
    fn test_display_reals() {
        assert_eq!(Sexpr::Real(2.0).to_string(), "2.0");
        assert_eq!(Sexpr::Real(0.5).to_string(), "0.5");
        assert_eq!(Sexpr::Str("a\"b".into()).to_string(), "\"a\\\"b\"");
    }
}
