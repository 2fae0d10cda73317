//! Complex-valued expression evaluation on top of Rhai.
//!
//! Formula traces and the per-sample expression transform only need three
//! things from an expression component: compile text once, evaluate it many
//! times with named bindings, and report failures. This module wraps a Rhai
//! [`Engine`] with a registered `Complex` type so that arithmetic mixes
//! complex values, floats and integers freely.
//!
//! # Available names
//!
//! - constants `j` (imaginary unit) and `pi`
//! - `real(z)`, `imag(z)`, `abs(z)`, `arg(z)`, `conj(z)`, `db(z)`
//! - `sqrt(z)`, `exp(z)`, `ln(z)`, `log10(z)`, `sin(z)`, `cos(z)`, `tan(z)`
//! - `complex(re, im)`, `polar(magnitude, degrees)`
//!
//! # Safety Limits
//!
//! Evaluation is aborted after a configurable number of operations so that a
//! pathological expression cannot stall the event loop.
//!
//! # Example
//!
//! ```rust
//! use daq_traces::expression::{Bindings, ExpressionEngine};
//! use num_complex::Complex64;
//!
//! let engine = ExpressionEngine::new();
//! let expr = engine.compile("a * b + j").unwrap();
//! let mut bindings = Bindings::new();
//! bindings.set("a", Complex64::new(2.0, 0.0));
//! bindings.set("b", Complex64::new(3.0, 0.0));
//! let z = engine.evaluate(&expr, &mut bindings).unwrap();
//! assert_eq!(z, Complex64::new(6.0, 1.0));
//! ```

use num_complex::Complex64;
use once_cell::sync::Lazy;
use rhai::{Dynamic, Engine, Scope, AST};

use crate::error::{TraceError, TraceResult};

/// Default operation limit per evaluation.
pub const DEFAULT_OPERATION_LIMIT: u64 = 10_000;

static SHARED: Lazy<ExpressionEngine> = Lazy::new(ExpressionEngine::new);

/// Parsed expression ready for repeated evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    text: String,
    ast: AST,
}

impl CompiledExpression {
    /// Source text the expression was compiled from.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Named values visible to an expression.
#[derive(Debug, Clone)]
pub struct Bindings {
    scope: Scope<'static>,
}

impl Bindings {
    /// Bindings holding only the built-in constants.
    pub fn new() -> Self {
        let mut scope = Scope::new();
        scope.push("j", Complex64::i());
        scope.push("pi", std::f64::consts::PI);
        Self { scope }
    }

    /// Bind `name` to a complex value.
    pub fn set(&mut self, name: &str, value: Complex64) {
        self.scope.set_value(name.to_string(), value);
    }

    /// Bind `name` to a real value.
    pub fn set_real(&mut self, name: &str, value: f64) {
        self.scope.set_value(name.to_string(), value);
    }
}

impl Default for Bindings {
    fn default() -> Self {
        Self::new()
    }
}

/// Rhai engine configured for complex arithmetic.
pub struct ExpressionEngine {
    engine: Engine,
    strict: Engine,
}

impl ExpressionEngine {
    /// Engine with the default operation limit.
    pub fn new() -> Self {
        Self::with_operation_limit(DEFAULT_OPERATION_LIMIT)
    }

    /// Engine aborting evaluations after `limit` operations.
    pub fn with_operation_limit(limit: u64) -> Self {
        let mut engine = Engine::new();
        configure(&mut engine, limit);
        let mut strict = Engine::new();
        configure(&mut strict, limit);
        strict.set_strict_variables(true);
        Self { engine, strict }
    }

    /// Process-wide engine with default settings.
    pub fn shared() -> &'static ExpressionEngine {
        &SHARED
    }

    /// Parse `text` as a single expression.
    pub fn compile(&self, text: &str) -> TraceResult<CompiledExpression> {
        if text.trim().is_empty() {
            return Err(TraceError::Expression("Expression is empty".to_string()));
        }
        let scope = Bindings::new().scope;
        let ast = self
            .engine
            .compile_expression_with_scope(&scope, text)
            .map_err(|e| TraceError::Expression(e.to_string()))?;
        Ok(CompiledExpression {
            text: text.to_string(),
            ast,
        })
    }

    /// Parse `text` and require every variable in it to be one of `variables`
    /// (or a built-in constant).
    pub fn compile_for(
        &self,
        text: &str,
        variables: &[&str],
    ) -> TraceResult<CompiledExpression> {
        if text.trim().is_empty() {
            return Err(TraceError::Expression("Expression is empty".to_string()));
        }
        let mut bindings = Bindings::new();
        for name in variables {
            bindings.set(name, Complex64::new(0.0, 0.0));
        }
        let ast = self
            .strict
            .compile_expression_with_scope(&bindings.scope, text)
            .map_err(|e| TraceError::Expression(e.to_string()))?;
        Ok(CompiledExpression {
            text: text.to_string(),
            ast,
        })
    }

    /// Evaluate with the given bindings.
    pub fn evaluate(
        &self,
        expr: &CompiledExpression,
        bindings: &mut Bindings,
    ) -> TraceResult<Complex64> {
        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut bindings.scope, &expr.ast)
            .map_err(|e| TraceError::Expression(e.to_string()))?;
        to_complex(result)
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn to_complex(value: Dynamic) -> TraceResult<Complex64> {
    if value.is::<Complex64>() {
        return Ok(value.cast::<Complex64>());
    }
    if let Ok(f) = value.as_float() {
        return Ok(Complex64::new(f, 0.0));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Complex64::new(i as f64, 0.0));
    }
    Err(TraceError::Expression(format!(
        "Expression produced {} instead of a number",
        value.type_name()
    )))
}

macro_rules! register_arith {
    ($engine:expr, $op:literal, $f:expr) => {{
        let f: fn(Complex64, Complex64) -> Complex64 = $f;
        $engine.register_fn($op, move |a: Complex64, b: Complex64| f(a, b));
        $engine.register_fn($op, move |a: Complex64, b: f64| f(a, Complex64::new(b, 0.0)));
        $engine.register_fn($op, move |a: f64, b: Complex64| f(Complex64::new(a, 0.0), b));
        $engine.register_fn($op, move |a: Complex64, b: i64| {
            f(a, Complex64::new(b as f64, 0.0))
        });
        $engine.register_fn($op, move |a: i64, b: Complex64| {
            f(Complex64::new(a as f64, 0.0), b)
        });
    }};
}

fn configure(engine: &mut Engine, limit: u64) {
    engine.on_progress(move |count| {
        if count > limit {
            Some(format!("Safety limit exceeded: maximum {limit} operations").into())
        } else {
            None
        }
    });

    engine.register_type_with_name::<Complex64>("Complex");

    register_arith!(engine, "+", |a, b| a + b);
    register_arith!(engine, "-", |a, b| a - b);
    register_arith!(engine, "*", |a, b| a * b);
    register_arith!(engine, "/", |a, b| a / b);
    register_arith!(engine, "**", |a, b| a.powc(b));
    engine.register_fn("-", |a: Complex64| -a);
    engine.register_fn("==", |a: Complex64, b: Complex64| a == b);
    engine.register_fn("!=", |a: Complex64, b: Complex64| a != b);

    engine.register_fn("complex", |re: f64, im: f64| Complex64::new(re, im));
    engine.register_fn("polar", |mag: f64, deg: f64| {
        Complex64::from_polar(mag, deg.to_radians())
    });
    engine.register_fn("real", |z: Complex64| z.re);
    engine.register_fn("real", |x: f64| x);
    engine.register_fn("imag", |z: Complex64| z.im);
    engine.register_fn("imag", |_x: f64| 0.0_f64);
    engine.register_fn("abs", |z: Complex64| z.norm());
    engine.register_fn("arg", |z: Complex64| z.arg());
    engine.register_fn("conj", |z: Complex64| z.conj());
    engine.register_fn("db", |z: Complex64| 20.0 * z.norm().log10());
    engine.register_fn("db", |x: f64| 20.0 * x.abs().log10());
    engine.register_fn("sqrt", |z: Complex64| z.sqrt());
    engine.register_fn("exp", |z: Complex64| z.exp());
    engine.register_fn("ln", |z: Complex64| z.ln());
    engine.register_fn("log10", |z: Complex64| z.log10());
    engine.register_fn("sin", |z: Complex64| z.sin());
    engine.register_fn("cos", |z: Complex64| z.cos());
    engine.register_fn("tan", |z: Complex64| z.tan());
}
