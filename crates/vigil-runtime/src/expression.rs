#![forbid(unsafe_code)]

//! Compiled expressions.
//!
//! Vigil has no expression language. An [`Expression`] wraps an evaluation
//! closure together with the metadata the watch layer uses: whether it is
//! constant, whether it is a literal, whether it can be assigned to, and an
//! optional watch delegate that takes over registration entirely.
//!
//! [`Expression::parse_literal`] covers a closed set of literal forms:
//! numbers, single- or double-quoted strings, `true`, `false`, `null`, and
//! `undefined`.

use std::rc::Rc;

use vigil_core::{IntoEval, IntoOutcome, Map, Value};

use crate::error::ScopeError;
use crate::scope::{Listener, Registration, Scope};

/// Extra names visible to an evaluation, checked before the scope.
pub type Locals = Map;

type EvalFn = Rc<dyn Fn(&Scope, Option<&Locals>) -> Result<Value, Value>>;
type AssignFn = Rc<dyn Fn(&Scope, Value) -> Result<(), Value>>;

/// Custom registration for an expression: `(scope, expression, listener, deep)`.
pub type WatchDelegate =
    Rc<dyn Fn(&Scope, &Expression, Option<Listener>, bool) -> Result<Registration, ScopeError>>;

#[derive(Clone)]
pub struct Expression {
    eval: EvalFn,
    assign: Option<AssignFn>,
    delegate: Option<WatchDelegate>,
    constant: bool,
    literal: bool,
    source: Option<Rc<str>>,
}

impl Expression {
    /// Wrap an evaluation closure.
    pub fn new<F, R>(eval: F) -> Self
    where
        F: Fn(&Scope, Option<&Locals>) -> R + 'static,
        R: IntoEval,
    {
        Self {
            eval: Rc::new(move |scope: &Scope, locals: Option<&Locals>| {
                eval(scope, locals).into_eval()
            }),
            assign: None,
            delegate: None,
            constant: false,
            literal: false,
            source: None,
        }
    }

    /// Read `name` from the locals if present there, else from the scope.
    /// Assignable: writes go through [`Scope::set`].
    pub fn field(name: impl Into<String>) -> Self {
        let name: Rc<str> = Rc::from(name.into());
        let read = Rc::clone(&name);
        let write = Rc::clone(&name);
        Self::new(move |scope, locals| match locals.and_then(|l| l.get(&*read)) {
            Some(value) => value.clone(),
            None => scope.get(&read),
        })
        .with_assign(move |scope: &Scope, value: Value| scope.set(&*write, value))
        .with_source(name)
    }

    /// An expression that always yields `value` and deregisters its watch
    /// after the first firing.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let mut expression = Self::new(move |_, _| value.clone());
        expression.constant = true;
        expression
    }

    /// Parse one literal. Returns `None` for anything outside the literal
    /// table. The result is both constant and literal.
    #[must_use]
    pub fn parse_literal(text: &str) -> Option<Self> {
        let value = parse_literal_value(text.trim())?;
        let mut expression = Self::constant(value).with_source(text.trim());
        expression.literal = true;
        Some(expression)
    }

    #[must_use]
    pub fn with_assign<F, O>(mut self, assign: F) -> Self
    where
        F: Fn(&Scope, Value) -> O + 'static,
        O: IntoOutcome,
    {
        self.assign = Some(Rc::new(move |scope: &Scope, value: Value| {
            assign(scope, value).into_outcome()
        }));
        self
    }

    #[must_use]
    pub fn with_watch_delegate<F>(mut self, delegate: F) -> Self
    where
        F: Fn(&Scope, &Expression, Option<Listener>, bool) -> Result<Registration, ScopeError> + 'static,
    {
        self.delegate = Some(Rc::new(delegate));
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<Rc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Mark as constant: the watch fires once and removes itself.
    #[must_use]
    pub fn with_constant(mut self, constant: bool) -> Self {
        self.constant = constant;
        self
    }

    /// Mark as literal: watched structurally.
    #[must_use]
    pub fn with_literal(mut self, literal: bool) -> Self {
        self.literal = literal;
        self
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    #[must_use]
    pub fn is_assignable(&self) -> bool {
        self.assign.is_some()
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn watch_delegate(&self) -> Option<&WatchDelegate> {
        self.delegate.as_ref()
    }

    /// Evaluate against `scope`, with optional locals shadowing its fields.
    ///
    /// # Errors
    ///
    /// Whatever the evaluation closure fails with.
    pub fn evaluate(&self, scope: &Scope, locals: Option<&Locals>) -> Result<Value, Value> {
        (self.eval)(scope, locals)
    }

    /// Write `value` through the assignment path.
    ///
    /// # Errors
    ///
    /// [`ScopeError::NotAssignable`] without an assignment path, and
    /// [`ScopeError::Evaluation`] if the assignment fails.
    pub fn assign(&self, scope: &Scope, value: impl Into<Value>) -> Result<(), ScopeError> {
        let assign = self.assign.as_ref().ok_or(ScopeError::NotAssignable)?;
        assign(scope, value.into()).map_err(ScopeError::Evaluation)
    }
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .field("constant", &self.constant)
            .field("literal", &self.literal)
            .field("assignable", &self.assign.is_some())
            .field("delegate", &self.delegate.is_some())
            .finish()
    }
}

impl Scope {
    /// Evaluate `expression` against this scope.
    ///
    /// # Errors
    ///
    /// Whatever the expression fails with.
    pub fn eval_expression(&self, expression: &Expression, locals: Option<&Locals>) -> Result<Value, Value> {
        expression.evaluate(self, locals)
    }
}

fn parse_literal_value(text: &str) -> Option<Value> {
    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        "undefined" => return Some(Value::Undefined),
        _ => {}
    }
    let first = text.chars().next()?;
    if first == '"' || first == '\'' {
        return parse_quoted(text, first).map(Value::from);
    }
    parse_number(text).map(Value::from)
}

fn parse_number(text: &str) -> Option<f64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let starts_numeric = digits
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '.');
    let well_formed = digits
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !starts_numeric || !well_formed {
        return None;
    }
    text.parse::<f64>().ok()
}

fn parse_quoted(text: &str, quote: char) -> Option<String> {
    let body = text.strip_prefix(quote)?.strip_suffix(quote)?;
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            // Unescaped closing quote in the middle.
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return None;
                }
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code)?);
            }
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keywords() {
        let t = Expression::parse_literal("true").unwrap();
        let root = Scope::new_root();
        assert_eq!(t.evaluate(&root, None).unwrap(), Value::Bool(true));
        assert!(t.is_constant() && t.is_literal());
        assert!(
            Expression::parse_literal("undefined")
                .unwrap()
                .evaluate(&root, None)
                .unwrap()
                .is_undefined()
        );
    }

    #[test]
    fn parses_numbers() {
        let root = Scope::new_root();
        for (text, expected) in [("42", 42.0), ("-1.5", -1.5), ("4.2e1", 42.0), (".5", 0.5)] {
            let value = Expression::parse_literal(text).unwrap().evaluate(&root, None).unwrap();
            assert_eq!(value.as_number(), Some(expected), "{text}");
        }
    }

    #[test]
    fn parses_strings_with_escapes() {
        let root = Scope::new_root();
        let value = Expression::parse_literal(r#""a\nb""#).unwrap().evaluate(&root, None).unwrap();
        assert_eq!(value.as_str(), Some("a\nb"));
        let value = Expression::parse_literal(r"'Abc'").unwrap().evaluate(&root, None).unwrap();
        assert_eq!(value.as_str(), Some("Abc"));
    }

    #[test]
    fn rejects_non_literals() {
        for text in ["", "abc", "a + b", "'unterminated", "NaN", "inf", "1x", "'a'b'"] {
            assert!(Expression::parse_literal(text).is_none(), "{text}");
        }
    }

    #[test]
    fn field_reads_locals_first() {
        let root = Scope::new_root();
        root.set("a", 1);
        let expr = Expression::field("a");
        let mut locals = Locals::new();
        locals.insert("a".to_owned(), Value::from(2));
        assert_eq!(expr.evaluate(&root, None).unwrap(), Value::from(1));
        assert_eq!(expr.evaluate(&root, Some(&locals)).unwrap(), Value::from(2));
        assert_eq!(expr.source(), Some("a"));
    }

    #[test]
    fn field_is_assignable() {
        let root = Scope::new_root();
        let expr = Expression::field("a");
        expr.assign(&root, 5).unwrap();
        assert_eq!(root.get("a"), Value::from(5));
    }

    #[test]
    fn plain_expression_is_not_assignable() {
        let root = Scope::new_root();
        let expr = Expression::new(|_, _| Value::Null);
        assert!(matches!(expr.assign(&root, 1), Err(ScopeError::NotAssignable)));
    }
}
