//! QuickJS sandbox sessions.
//!
//! A [`SandboxSession`] owns one runtime and one context. Compiling a bundle
//! installs the console bindings and any host callbacks as globals, evaluates
//! the exports preamble, then evaluates the bundle. Bundles publish callable
//! entry points by assigning to the `__exports` object.

use std::fmt;
use std::rc::Rc;

use rquickjs::prelude::{Coerced, Rest};
use rquickjs::{CaughtError, CatchResultExt, Context, Ctx, Function, Object, Runtime, Value};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::codec::{from_js, to_js, ScriptValue};

/// Global object that bundles assign their exports to.
pub const EXPORTS_GLOBAL: &str = "__exports";

/// Evaluated before every bundle.
pub const PREAMBLE: &str = "var __exports = {};";

/// Tracing target for script console output.
const SCRIPT_TARGET: &str = "specgen::script";

/// Errors raised by sandbox sessions.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("script engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("compilation error: {0}")]
    Compile(ScriptException),

    #[error("{0}")]
    Invocation(ScriptException),

    #[error("invalid export name: {0:?}")]
    InvalidExport(String),

    #[error("{export} returned {kind}, expected a string")]
    UnexpectedResult { export: String, kind: &'static str },
}

/// An exception thrown inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptException {
    /// `Name: message` header.
    pub message: String,
    /// Stack frames, one per line.
    pub stack: Option<String>,
}

impl ScriptException {
    /// The header line followed by the stack frames.
    pub fn stack_trace(&self) -> String {
        match self.stack.as_deref().map(str::trim_end) {
            Some(stack) if !stack.is_empty() => format!("{}\n{}", self.message, stack),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Memory and stack limits applied to each runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxLimits {
    pub memory_bytes: Option<usize>,
    pub max_stack_bytes: Option<usize>,
}

type CallbackFn = dyn Fn(&[String]) -> JsonValue;

/// A host function exposed to scripts as a named global.
///
/// Arguments arrive coerced to strings; the returned JSON value is
/// materialized in the sandbox through the codec.
#[derive(Clone)]
pub struct HostCallback {
    name: String,
    func: Rc<CallbackFn>,
}

impl HostCallback {
    pub fn new(name: impl Into<String>, func: impl Fn(&[String]) -> JsonValue + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the host function directly.
    pub fn call(&self, args: &[String]) -> JsonValue {
        (self.func)(args)
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallback")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One runtime, one context, one global table.
pub struct SandboxSession {
    context: Context,
    runtime: Runtime,
}

impl SandboxSession {
    /// Create a session and evaluate `bundle` in it.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Compile`] when the preamble or bundle throws,
    /// and [`SandboxError::Engine`] when the engine cannot be set up.
    pub fn compile(
        bundle: &str,
        callbacks: &[HostCallback],
        limits: SandboxLimits,
    ) -> Result<Self, SandboxError> {
        let runtime = Runtime::new()?;
        if let Some(bytes) = limits.memory_bytes {
            runtime.set_memory_limit(bytes);
        }
        if let Some(bytes) = limits.max_stack_bytes {
            runtime.set_max_stack_size(bytes);
        }
        let context = Context::full(&runtime)?;

        context.with(|ctx| -> Result<(), SandboxError> {
            install_console(&ctx)?;
            for callback in callbacks {
                tracing::debug!(name = %callback.name, "installing host callback");
                install_callback(&ctx, callback)?;
            }
            eval_script(&ctx, PREAMBLE).map_err(SandboxError::Compile)?;
            eval_script(&ctx, bundle).map_err(SandboxError::Compile)?;
            Ok(())
        })?;

        Ok(Self { context, runtime })
    }

    /// Call `__exports.<export>` with `args` bound to `arg_0`, `arg_1`, ...
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Invocation`] when the call throws and
    /// [`SandboxError::InvalidExport`] when `export` is not an identifier.
    pub fn invoke(&self, export: &str, args: &[JsonValue]) -> Result<ScriptValue, SandboxError> {
        if !is_identifier(export) {
            return Err(SandboxError::InvalidExport(export.to_string()));
        }

        self.context.with(|ctx| -> Result<ScriptValue, SandboxError> {
            let globals = ctx.globals();
            let mut names = Vec::with_capacity(args.len());
            for (i, arg) in args.iter().enumerate() {
                let name = format!("arg_{i}");
                globals.set(name.as_str(), to_js(&ctx, arg)?)?;
                names.push(name);
            }

            let call = format!("{EXPORTS_GLOBAL}.{export}({});", names.join(", "));
            let value = eval_script(&ctx, &call).map_err(SandboxError::Invocation)?;
            Ok(from_js(&ctx, value)?)
        })
    }

    /// Like [`invoke`](Self::invoke), requiring a string result.
    pub fn invoke_string(&self, export: &str, args: &[JsonValue]) -> Result<String, SandboxError> {
        match self.invoke(export, args)? {
            ScriptValue::String(s) => Ok(s),
            other => Err(SandboxError::UnexpectedResult {
                export: export.to_string(),
                kind: other.kind(),
            }),
        }
    }

    /// Release the engine.
    pub fn dispose(self) {
        self.runtime.run_gc();
        tracing::debug!("sandbox session disposed");
    }
}

/// A sandbox loaded with a formatter bundle, reused across files.
pub struct FormatterSession {
    session: SandboxSession,
}

impl FormatterSession {
    /// Compile a formatter bundle.
    pub fn load(bundle: &str, limits: SandboxLimits) -> Result<Self, SandboxError> {
        Ok(Self {
            session: SandboxSession::compile(bundle, &[], limits)?,
        })
    }

    /// Format `source` with the bundle's `export` function.
    pub fn format(&self, export: &str, source: &str) -> Result<String, SandboxError> {
        self.session
            .invoke_string(export, &[JsonValue::String(source.to_string())])
    }

    pub fn dispose(self) {
        self.session.dispose();
    }
}

fn eval_script<'js>(ctx: &Ctx<'js>, source: &str) -> Result<Value<'js>, ScriptException> {
    ctx.eval::<Value, _>(source)
        .catch(ctx)
        .map_err(|caught| exception_from(ctx, caught))
}

fn exception_from<'js>(ctx: &Ctx<'js>, caught: CaughtError<'js>) -> ScriptException {
    match caught {
        CaughtError::Exception(exception) => {
            let name = exception
                .get::<_, Option<String>>("name")
                .ok()
                .flatten()
                .unwrap_or_else(|| "Error".to_string());
            let message = exception.message().unwrap_or_default();
            ScriptException {
                message: format!("{name}: {message}"),
                stack: exception.stack(),
            }
        }
        CaughtError::Value(value) => ScriptException {
            message: describe(ctx, value),
            stack: None,
        },
        CaughtError::Error(error) => ScriptException {
            message: error.to_string(),
            stack: None,
        },
    }
}

/// Text for a thrown non-Error value.
fn describe<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    match from_js(ctx, value) {
        Ok(ScriptValue::String(s)) => s,
        Ok(ScriptValue::Int(n)) => n.to_string(),
        Ok(ScriptValue::Opaque { json: Some(json), .. }) => json,
        Ok(ScriptValue::Opaque { kind, json: None }) => kind.to_string(),
        Err(e) => e.to_string(),
    }
}

fn install_console(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    console.set(
        "log",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::info!(target: SCRIPT_TARGET, "{}", join_args(&args));
        })?,
    )?;
    console.set(
        "warn",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::warn!(target: SCRIPT_TARGET, "{}", join_args(&args));
        })?,
    )?;
    console.set(
        "error",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::error!(target: SCRIPT_TARGET, "{}", join_args(&args));
        })?,
    )?;

    let globals = ctx.globals();
    globals.set("console", console)?;
    globals.set(
        "println",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            tracing::info!(target: SCRIPT_TARGET, "{}", join_args(&args));
        })?,
    )?;
    Ok(())
}

fn install_callback<'js>(ctx: &Ctx<'js>, callback: &HostCallback) -> rquickjs::Result<()> {
    let func = Rc::clone(&callback.func);
    let function = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Coerced<String>>| -> rquickjs::Result<Value<'js>> {
            let args: Vec<String> = args.0.into_iter().map(|arg| arg.0).collect();
            to_js(&ctx, &func(&args))
        },
    )?;
    ctx.globals().set(callback.name.as_str(), function)
}

fn join_args(args: &Rest<Coerced<String>>) -> String {
    args.0
        .iter()
        .map(|arg| arg.0.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True for a plain JavaScript identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
