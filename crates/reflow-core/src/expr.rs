//! Expression engine for state-variable definitions
//!
//! Definitions, inverse definitions and action steps are expressions loaded
//! from RON scripts. Dependencies are read through a [`Scope`] while the
//! expression runs, so only the branches actually taken are recorded as
//! dependencies.

use crate::{Error, Result, Value};
use serde::{Deserialize, Serialize};

/// An expression that can be evaluated to produce a Value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    // === Literals ===
    /// A literal value
    Literal(Value),

    // === Inputs ===
    /// Value of a named dependency
    Dep(String),
    /// Element of a list-valued dependency (0-based); only that element is read
    DepItem(String, Box<Expr>),
    /// Length of a list-valued dependency, without reading its elements
    DepLen(String),
    /// Argument passed to the current action
    Param(String),
    /// The value requested for the slot being inverted
    Desired,
    /// 0-based element index of the array slot being computed
    Index,
    /// Accumulator of the innermost `Iterate`
    Acc,

    // === Arithmetic ===
    /// Add two expressions
    Add(Box<Expr>, Box<Expr>),
    /// Subtract second from first
    Sub(Box<Expr>, Box<Expr>),
    /// Multiply two expressions
    Mul(Box<Expr>, Box<Expr>),
    /// Divide first by second
    Div(Box<Expr>, Box<Expr>),
    /// Modulo
    Mod(Box<Expr>, Box<Expr>),
    /// Negate a numeric value
    Neg(Box<Expr>),
    /// Absolute value
    Abs(Box<Expr>),
    /// Minimum of two values
    Min(Box<Expr>, Box<Expr>),
    /// Maximum of two values
    Max(Box<Expr>, Box<Expr>),
    /// Clamp value between min and max
    Clamp(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Floor (round down)
    Floor(Box<Expr>),
    /// Ceiling (round up)
    Ceil(Box<Expr>),
    /// Round to nearest integer
    Round(Box<Expr>),

    // === Comparison ===
    /// Equal
    Eq(Box<Expr>, Box<Expr>),
    /// Not equal
    Ne(Box<Expr>, Box<Expr>),
    /// Less than
    Lt(Box<Expr>, Box<Expr>),
    /// Less than or equal
    Le(Box<Expr>, Box<Expr>),
    /// Greater than
    Gt(Box<Expr>, Box<Expr>),
    /// Greater than or equal
    Ge(Box<Expr>, Box<Expr>),

    // === Logical ===
    /// Logical AND (all must be true)
    And(Vec<Expr>),
    /// Logical OR (at least one must be true)
    Or(Vec<Expr>),
    /// Logical NOT
    Not(Box<Expr>),

    // === Conditionals ===
    /// If-then-else; only the taken branch is evaluated
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// First value unless it is null or unresolved, else the second
    Coalesce(Box<Expr>, Box<Expr>),
    /// Whether the value is the unresolved sentinel
    IsUnresolved(Box<Expr>),

    // === Lists ===
    /// Build a list
    List(Vec<Expr>),
    /// Element of a list value (0-based)
    Get(Box<Expr>, Box<Expr>),
    /// Length of a list or string
    Len(Box<Expr>),
    /// Sum of a numeric list; integral when every element is an int
    Sum(Box<Expr>),

    // === String ===
    /// Concatenate strings
    Concat(Vec<Expr>),
    /// Format a string with values (`{0}`, `{1}`, ...)
    Format(String, Vec<Expr>),

    // === Budgeted iteration ===
    /// Repeat `step` (reading `Acc`) from `initial` until `done` holds
    ///
    /// Running out of steps yields `Value::Unresolved`.
    Iterate {
        initial: Box<Expr>,
        step: Box<Expr>,
        done: Box<Expr>,
        max_steps: Option<usize>,
    },
}

/// Where an expression reads its inputs from
pub trait Scope {
    /// Value of a named dependency
    fn dependency(&mut self, name: &str) -> Result<Value>;

    /// One element of a list-valued dependency
    fn dependency_item(&mut self, name: &str, index: usize) -> Result<Value> {
        let list = self.dependency(name)?;
        Ok(list_item(&list, index))
    }

    /// Length of a list-valued dependency
    fn dependency_len(&mut self, name: &str) -> Result<Value> {
        let list = self.dependency(name)?;
        Ok(match &list {
            Value::List(items) => Value::Int(items.len() as i64),
            Value::Unresolved => Value::Unresolved,
            other => return Err(Error::type_error("list", other)),
        })
    }

    /// Action argument
    fn param(&self, _name: &str) -> Value {
        Value::Null
    }

    /// Desired value while inverting
    fn desired(&self) -> Option<Value> {
        None
    }

    /// Element index while computing an array element
    fn array_index(&self) -> Option<usize> {
        None
    }

    /// Accumulator of the innermost iteration
    fn accumulator(&self) -> Option<Value> {
        None
    }

    /// Maximum steps any iteration may take
    fn iteration_budget(&self) -> usize {
        10_000
    }
}

/// Scope layered over another one while an `Iterate` runs
struct IterationScope<'s> {
    inner: &'s mut dyn Scope,
    acc: Value,
}

impl Scope for IterationScope<'_> {
    fn dependency(&mut self, name: &str) -> Result<Value> {
        self.inner.dependency(name)
    }

    fn dependency_item(&mut self, name: &str, index: usize) -> Result<Value> {
        self.inner.dependency_item(name, index)
    }

    fn dependency_len(&mut self, name: &str) -> Result<Value> {
        self.inner.dependency_len(name)
    }

    fn param(&self, name: &str) -> Value {
        self.inner.param(name)
    }

    fn desired(&self) -> Option<Value> {
        self.inner.desired()
    }

    fn array_index(&self) -> Option<usize> {
        self.inner.array_index()
    }

    fn accumulator(&self) -> Option<Value> {
        Some(self.acc.clone())
    }

    fn iteration_budget(&self) -> usize {
        self.inner.iteration_budget()
    }
}

impl Expr {
    /// Evaluate this expression in the given scope
    pub fn eval(&self, scope: &mut dyn Scope) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),

            Expr::Dep(name) => scope.dependency(name),
            Expr::DepItem(name, index) => {
                let vi = index.eval(scope)?;
                if vi.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                let i = vi
                    .as_index()
                    .ok_or_else(|| Error::type_error("index", &vi))?;
                scope.dependency_item(name, i)
            }
            Expr::DepLen(name) => scope.dependency_len(name),
            Expr::Param(name) => Ok(scope.param(name)),
            Expr::Desired => scope.desired().ok_or_else(|| {
                Error::EvaluationError("Desired is only available in inverse definitions".into())
            }),
            Expr::Index => scope
                .array_index()
                .map(Value::from)
                .ok_or_else(|| {
                    Error::EvaluationError("Index is only available in array elements".into())
                }),
            Expr::Acc => scope.accumulator().ok_or_else(|| {
                Error::EvaluationError("Acc is only available inside Iterate".into())
            }),

            // Arithmetic
            Expr::Add(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                numeric_op(&va, &vb, "+", i64::checked_add, |x, y| x + y)
            }
            Expr::Sub(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                numeric_op(&va, &vb, "-", i64::checked_sub, |x, y| x - y)
            }
            Expr::Mul(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                numeric_op(&va, &vb, "*", i64::checked_mul, |x, y| x * y)
            }
            Expr::Div(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                if va.is_unresolved() || vb.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                if as_number(&vb)? == 0.0 {
                    return Err(Error::DivisionByZero);
                }
                // Inexact int division leaves the integers
                if let (Value::Int(x), Value::Int(y)) = (&va, &vb) {
                    if x.checked_rem(*y).map_or(false, |r| r != 0) {
                        return Ok(Value::Float(*x as f64 / *y as f64));
                    }
                }
                numeric_op(&va, &vb, "/", i64::checked_div, |x, y| x / y)
            }
            Expr::Mod(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                if va.is_unresolved() || vb.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                if as_number(&vb)? == 0.0 {
                    return Err(Error::DivisionByZero);
                }
                numeric_op(&va, &vb, "%", i64::checked_rem, |x, y| x % y)
            }
            Expr::Neg(a) => unary_op(&a.eval(scope)?, "-", i64::checked_neg, |x| -x),
            Expr::Abs(a) => unary_op(&a.eval(scope)?, "abs", i64::checked_abs, f64::abs),
            Expr::Min(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                numeric_op(&va, &vb, "min", |x, y| Some(x.min(y)), f64::min)
            }
            Expr::Max(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                numeric_op(&va, &vb, "max", |x, y| Some(x.max(y)), f64::max)
            }
            Expr::Clamp(val, min, max) => {
                let v = val.eval(scope)?;
                let vmin = min.eval(scope)?;
                let vmax = max.eval(scope)?;
                if v.is_unresolved() || vmin.is_unresolved() || vmax.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                let (fv, fmin, fmax) = (as_number(&v)?, as_number(&vmin)?, as_number(&vmax)?);
                if fmin > fmax {
                    return Err(Error::EvaluationError(format!(
                        "Clamp bounds reversed: {} > {}",
                        fmin, fmax
                    )));
                }
                Ok(Value::Float(fv.clamp(fmin, fmax)))
            }
            Expr::Floor(a) => rounding_op(&a.eval(scope)?, f64::floor),
            Expr::Ceil(a) => rounding_op(&a.eval(scope)?, f64::ceil),
            Expr::Round(a) => rounding_op(&a.eval(scope)?, f64::round),

            // Comparison
            Expr::Eq(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                if va.is_unresolved() || vb.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                Ok(Value::Bool(va.same_as(&vb)))
            }
            Expr::Ne(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                if va.is_unresolved() || vb.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                Ok(Value::Bool(!va.same_as(&vb)))
            }
            Expr::Lt(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                compare_values(&va, &vb, |x, y| x < y)
            }
            Expr::Le(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                compare_values(&va, &vb, |x, y| x <= y)
            }
            Expr::Gt(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                compare_values(&va, &vb, |x, y| x > y)
            }
            Expr::Ge(a, b) => {
                let va = a.eval(scope)?;
                let vb = b.eval(scope)?;
                compare_values(&va, &vb, |x, y| x >= y)
            }

            // Logical
            Expr::And(exprs) => {
                for expr in exprs {
                    let v = expr.eval(scope)?;
                    if v.is_unresolved() {
                        return Ok(Value::Unresolved);
                    }
                    if !v.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(exprs) => {
                for expr in exprs {
                    let v = expr.eval(scope)?;
                    if v.is_unresolved() {
                        return Ok(Value::Unresolved);
                    }
                    if v.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Not(a) => {
                let va = a.eval(scope)?;
                if va.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                Ok(Value::Bool(!va.is_truthy()))
            }

            // Conditionals
            Expr::If(cond, then_expr, else_expr) => {
                let vc = cond.eval(scope)?;
                if vc.is_unresolved() {
                    Ok(Value::Unresolved)
                } else if vc.is_truthy() {
                    then_expr.eval(scope)
                } else {
                    else_expr.eval(scope)
                }
            }
            Expr::Coalesce(a, b) => {
                let va = a.eval(scope)?;
                if va.is_null() || va.is_unresolved() {
                    b.eval(scope)
                } else {
                    Ok(va)
                }
            }
            Expr::IsUnresolved(a) => Ok(Value::Bool(a.eval(scope)?.is_unresolved())),

            // Lists
            Expr::List(exprs) => {
                let mut items = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    items.push(expr.eval(scope)?);
                }
                Ok(Value::List(items))
            }
            Expr::Get(list, index) => {
                let vl = list.eval(scope)?;
                let vi = index.eval(scope)?;
                if vl.is_unresolved() || vi.is_unresolved() {
                    return Ok(Value::Unresolved);
                }
                let i = vi
                    .as_index()
                    .ok_or_else(|| Error::type_error("index", &vi))?;
                match &vl {
                    Value::List(_) => Ok(list_item(&vl, i)),
                    other => Err(Error::type_error("list", other)),
                }
            }
            Expr::Len(a) => match a.eval(scope)? {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Unresolved => Ok(Value::Unresolved),
                other => Err(Error::type_error("list", &other)),
            },
            Expr::Sum(a) => match a.eval(scope)? {
                Value::List(items) => {
                    let mut total = 0.0;
                    let mut ints = Some(0i64);
                    for item in &items {
                        if item.is_unresolved() {
                            return Ok(Value::Unresolved);
                        }
                        total += as_number(item)?;
                        ints = match (ints, item) {
                            (Some(acc), Value::Int(i)) => acc.checked_add(*i),
                            _ => None,
                        };
                    }
                    Ok(ints.map_or(Value::Float(total), Value::Int))
                }
                Value::Unresolved => Ok(Value::Unresolved),
                other => Err(Error::type_error("list", &other)),
            },

            // String
            Expr::Concat(exprs) => {
                let mut result = String::new();
                for expr in exprs {
                    match expr.eval(scope)? {
                        Value::Unresolved => return Ok(Value::Unresolved),
                        Value::String(s) => result.push_str(&s),
                        v => result.push_str(&v.to_string()),
                    }
                }
                Ok(Value::String(result))
            }
            Expr::Format(template, args) => {
                let mut result = template.clone();
                for (i, expr) in args.iter().enumerate() {
                    let v = expr.eval(scope)?;
                    if v.is_unresolved() {
                        return Ok(Value::Unresolved);
                    }
                    let text = match v {
                        Value::String(s) => s,
                        v => v.to_string(),
                    };
                    result = result.replace(&format!("{{{}}}", i), &text);
                }
                Ok(Value::String(result))
            }

            Expr::Iterate {
                initial,
                step,
                done,
                max_steps,
            } => {
                let budget = max_steps
                    .unwrap_or(usize::MAX)
                    .min(scope.iteration_budget());
                let acc = initial.eval(scope)?;
                let mut inner = IterationScope { inner: scope, acc };
                for _ in 0..budget {
                    if inner.acc.is_unresolved() {
                        return Ok(Value::Unresolved);
                    }
                    let finished = done.eval(&mut inner)?;
                    if finished.is_unresolved() {
                        return Ok(Value::Unresolved);
                    }
                    if finished.is_truthy() {
                        return Ok(inner.acc);
                    }
                    inner.acc = step.eval(&mut inner)?;
                }
                tracing::debug!(budget, "iteration budget exhausted");
                Ok(Value::Unresolved)
            }
        }
    }

    /// Names of every dependency this expression may read
    pub fn referenced_dependencies(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_dependencies(&mut names);
        names
    }

    fn collect_dependencies<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Dep(name) | Expr::DepLen(name) => names.push(name),
            Expr::DepItem(name, index) => {
                names.push(name);
                index.collect_dependencies(names);
            }
            Expr::Literal(_)
            | Expr::Param(_)
            | Expr::Desired
            | Expr::Index
            | Expr::Acc => {}
            Expr::Neg(a)
            | Expr::Abs(a)
            | Expr::Floor(a)
            | Expr::Ceil(a)
            | Expr::Round(a)
            | Expr::Not(a)
            | Expr::IsUnresolved(a)
            | Expr::Len(a)
            | Expr::Sum(a) => a.collect_dependencies(names),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Mod(a, b)
            | Expr::Min(a, b)
            | Expr::Max(a, b)
            | Expr::Eq(a, b)
            | Expr::Ne(a, b)
            | Expr::Lt(a, b)
            | Expr::Le(a, b)
            | Expr::Gt(a, b)
            | Expr::Ge(a, b)
            | Expr::Coalesce(a, b)
            | Expr::Get(a, b) => {
                a.collect_dependencies(names);
                b.collect_dependencies(names);
            }
            Expr::Clamp(a, b, c) | Expr::If(a, b, c) => {
                a.collect_dependencies(names);
                b.collect_dependencies(names);
                c.collect_dependencies(names);
            }
            Expr::And(exprs) | Expr::Or(exprs) | Expr::List(exprs) | Expr::Concat(exprs) => {
                for e in exprs {
                    e.collect_dependencies(names);
                }
            }
            Expr::Format(_, args) => {
                for e in args {
                    e.collect_dependencies(names);
                }
            }
            Expr::Iterate {
                initial,
                step,
                done,
                ..
            } => {
                initial.collect_dependencies(names);
                step.collect_dependencies(names);
                done.collect_dependencies(names);
            }
        }
    }

    /// Create a literal expression
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a dependency read
    pub fn dep(name: impl Into<String>) -> Self {
        Expr::Dep(name.into())
    }

    /// Create a parameter access expression
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    /// `a + b`
    pub fn add(a: Expr, b: Expr) -> Self {
        Expr::Add(Box::new(a), Box::new(b))
    }

    /// `a - b`
    pub fn sub(a: Expr, b: Expr) -> Self {
        Expr::Sub(Box::new(a), Box::new(b))
    }

    /// `a * b`
    pub fn mul(a: Expr, b: Expr) -> Self {
        Expr::Mul(Box::new(a), Box::new(b))
    }

    /// `if c { a } else { b }`
    pub fn if_else(c: Expr, a: Expr, b: Expr) -> Self {
        Expr::If(Box::new(c), Box::new(a), Box::new(b))
    }
}

pub(crate) fn list_item(list: &Value, index: usize) -> Value {
    match list {
        Value::List(items) => items.get(index).cloned().unwrap_or(Value::Unresolved),
        _ => Value::Unresolved,
    }
}

fn as_number(v: &Value) -> Result<f64> {
    v.as_float().ok_or_else(|| Error::type_error("number", v))
}

fn overflow(op: &str) -> Error {
    Error::EvaluationError(format!("integer overflow in {}", op))
}

/// Binary arithmetic: checked `int_op` when both sides are ints, float
/// arithmetic otherwise
fn numeric_op(
    a: &Value,
    b: &Value,
    name: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    if a.is_unresolved() || b.is_unresolved() {
        return Ok(Value::Unresolved);
    }
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return int_op(*x, *y).map(Value::Int).ok_or_else(|| overflow(name));
    }
    Ok(Value::Float(float_op(as_number(a)?, as_number(b)?)))
}

fn unary_op(
    a: &Value,
    name: &str,
    int_op: fn(i64) -> Option<i64>,
    float_op: fn(f64) -> f64,
) -> Result<Value> {
    match a {
        Value::Unresolved => Ok(Value::Unresolved),
        Value::Int(i) => int_op(*i).map(Value::Int).ok_or_else(|| overflow(name)),
        other => Ok(Value::Float(float_op(as_number(other)?))),
    }
}

/// Round to an int; ints pass through, out-of-range floats are errors
fn rounding_op(a: &Value, op: fn(f64) -> f64) -> Result<Value> {
    match a {
        Value::Unresolved => Ok(Value::Unresolved),
        Value::Int(i) => Ok(Value::Int(*i)),
        other => {
            let r = op(as_number(other)?);
            if r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64 {
                Ok(Value::Int(r as i64))
            } else {
                Err(Error::EvaluationError(format!("{} does not fit an int", r)))
            }
        }
    }
}

/// Helper to compare values
fn compare_values(a: &Value, b: &Value, cmp: fn(f64, f64) -> bool) -> Result<Value> {
    if a.is_unresolved() || b.is_unresolved() {
        return Ok(Value::Unresolved);
    }
    Ok(Value::Bool(cmp(as_number(a)?, as_number(b)?)))
}
