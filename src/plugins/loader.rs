//! Execution scope builder.
//!
//! Runs provider source text inside a fresh QuickJS runtime as the body of a
//! function with exactly seven parameters. Nothing host-defined is installed
//! on the global object; the provider reaches the host only through the
//! bindings it is called with.

use parking_lot::Mutex;
use rquickjs::function::Rest;
use rquickjs::{async_with, AsyncContext, CatchResultExt, AsyncRuntime, Ctx, Function, Object, Persistent, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, SandboxConfig};
use crate::deps::{self, DependencyRegistry};
use crate::error::ScopeConstructionError;
use crate::js::{self, caught, freeze};

/// Parameter names of the provider body, in call order.
///
/// `require` and `__musicfree_require` receive the same function.
pub const SCOPE_PARAMETERS: [&str; 7] = [
    "require",
    "__musicfree_require",
    "module",
    "exports",
    "console",
    "env",
    "process",
];

/// Tracing target for provider `console` output.
pub const CONSOLE_TARGET: &str = "tunehost::provider";

/// Engine limits applied to every scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Heap limit in bytes
    pub memory_limit: usize,
    /// Stack limit in bytes
    pub max_stack_size: usize,
    /// Deadline for the top-level body and the job drain after it
    pub eval_timeout: Duration,
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            memory_limit: config.memory_limit_mb.saturating_mul(1024 * 1024),
            max_stack_size: config.max_stack_kb.saturating_mul(1024),
            eval_timeout: Duration::from_millis(config.eval_timeout_ms),
        }
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

/// Values exposed to providers through `env` and `process`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Host OS in Node.js vocabulary
    pub os: String,
    pub app_version: String,
    pub lang: String,
    pub user_variables: BTreeMap<String, String>,
}

impl HostEnvironment {
    pub fn from_config(config: &Config) -> Self {
        Self {
            os: node_platform(std::env::consts::OS).to_string(),
            app_version: config.app.version.clone(),
            lang: config.app.lang.clone(),
            user_variables: config.user_variables.clone(),
        }
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Map a Rust OS name onto `process.platform` spelling.
pub fn node_platform(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Result of running provider source text: the engine it ran in and its
/// module record.
///
/// Dropping this releases the runtime. Field order matters: the module
/// record is released before the context and runtime that own it.
pub struct ScriptModule {
    module: Persistent<Object<'static>>,
    context: AsyncContext,
    runtime: AsyncRuntime,
    path: String,
}

impl ScriptModule {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn context(&self) -> &AsyncContext {
        &self.context
    }

    /// The `module` record the provider body was called with.
    pub(crate) fn module_record(&self) -> Persistent<Object<'static>> {
        self.module.clone()
    }

    /// The evaluated `module.exports`, with functions rendered as their
    /// source text. Used to inspect obfuscated providers.
    pub async fn dump_exports(&self) -> Result<serde_json::Value, String> {
        let record = self.module_record();
        let context = &self.context;
        async_with!(context => |ctx| {
            dump_record(&ctx, record)
        })
        .await
    }

    /// Run promise jobs left queued once a call has settled.
    ///
    /// An engine future stops driving the job queue as soon as its own
    /// result is ready, so reactions it scheduled for other callers would
    /// otherwise wait for an unrelated wakeup.
    pub(crate) async fn run_pending_jobs(&self) {
        drain_jobs(&self.runtime, &self.path, None).await;
    }
}

impl std::fmt::Debug for ScriptModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptModule")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Builds execution scopes for provider scripts.
///
/// Shared by every load; holds only read-only state.
pub struct ScriptLoader {
    registry: Arc<DependencyRegistry>,
    environment: HostEnvironment,
    limits: SandboxLimits,
}

impl ScriptLoader {
    pub fn new(registry: Arc<DependencyRegistry>, environment: HostEnvironment) -> Self {
        Self {
            registry,
            environment,
            limits: SandboxLimits::default(),
        }
    }

    /// Set custom engine limits.
    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Loader with the standard dependency set and limits from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(DependencyRegistry::configured(&config.http, &config.sandbox)?);
        Ok(Self::new(registry, HostEnvironment::from_config(config))
            .with_limits(SandboxLimits::from(&config.sandbox)))
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }

    pub fn environment(&self) -> &HostEnvironment {
        &self.environment
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Run `source` as a provider body and return its module record.
    ///
    /// The initialization future handed to the provider is resolved once
    /// the top-level body has returned or thrown, and pending jobs are run
    /// before this returns, so continuations awaiting it have executed.
    pub async fn build(&self, source: &str, path: &str) -> Result<ScriptModule, ScopeConstructionError> {
        let engine_error = |err: rquickjs::Error| ScopeConstructionError::new(path, format!("engine setup failed: {err}"));

        let runtime = AsyncRuntime::new().map_err(engine_error)?;
        runtime.set_memory_limit(self.limits.memory_limit).await;
        runtime.set_max_stack_size(self.limits.max_stack_size).await;

        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        {
            let deadline = Arc::clone(&deadline);
            runtime
                .set_interrupt_handler(Some(Box::new(move || {
                    deadline.lock().is_some_and(|at| Instant::now() >= at)
                })))
                .await;
        }
        let context = AsyncContext::full(&runtime).await.map_err(engine_error)?;

        tracing::debug!(plugin_path = %path, source_len = source.len(), "Building execution scope");

        *deadline.lock() = Some(Instant::now() + self.limits.eval_timeout);
        let registry = Arc::clone(&self.registry);
        let environment = self.environment.clone();
        let body = source.to_string();
        let diag_path = path.to_string();
        let evaluated = async_with!(context => |ctx| {
            run_body(&ctx, &body, &diag_path, registry, &environment)
        })
        .await;

        drain_jobs(&runtime, path, Some(&deadline)).await;
        *deadline.lock() = None;

        let module = evaluated.map_err(|message| ScopeConstructionError::new(path, message))?;
        Ok(ScriptModule {
            module,
            context,
            runtime,
            path: path.to_string(),
        })
    }
}

impl std::fmt::Debug for ScriptLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLoader")
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Run pending promise jobs until the queue is empty or the deadline passes.
async fn drain_jobs(runtime: &AsyncRuntime, path: &str, deadline: Option<&Mutex<Option<Instant>>>) {
    loop {
        match runtime.execute_pending_job().await {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => {
                tracing::debug!(plugin_path = %path, "Provider job threw");
            }
        }
        let Some(deadline) = deadline else {
            continue;
        };
        if deadline.lock().is_some_and(|at| Instant::now() >= at) {
            tracing::warn!(plugin_path = %path, "Load deadline reached with jobs still pending");
            break;
        }
    }
}

/// Objects deeper than this are serialized as plain JSON.
const DUMP_DEPTH: usize = 2;

fn dump_record<'js>(ctx: &Ctx<'js>, record: Persistent<Object<'static>>) -> Result<serde_json::Value, String> {
    let record = record.restore(ctx).map_err(|err| err.to_string())?;
    let exports: Value = caught(ctx, record.get("exports"))?;
    caught(ctx, dump_value(ctx, exports, 0))
}

fn dump_value<'js>(ctx: &Ctx<'js>, value: Value<'js>, depth: usize) -> rquickjs::Result<serde_json::Value> {
    if value.is_function() {
        return Ok(serde_json::Value::String(js::describe(ctx, value)));
    }
    if !value.is_array() && depth < DUMP_DEPTH {
        if let Some(object) = value.as_object() {
            let mut map = serde_json::Map::new();
            for key in object.keys::<String>() {
                let key = key?;
                let field: Value = object.get(key.as_str())?;
                map.insert(key, dump_value(ctx, field, depth + 1)?);
            }
            return Ok(serde_json::Value::Object(map));
        }
    }
    match js::js_to_json(ctx, value.clone()).catch(ctx) {
        Ok(json) => Ok(json),
        Err(_) => Ok(serde_json::Value::String(js::describe(ctx, value))),
    }
}

/// Compile and call the provider body; resolve the init future either way.
fn run_body<'js>(
    ctx: &Ctx<'js>,
    source: &str,
    path: &str,
    registry: Arc<DependencyRegistry>,
    environment: &HostEnvironment,
) -> Result<Persistent<Object<'static>>, String> {
    let (init, resolve_init) = caught(ctx, init_signal(ctx))?;
    let module = caught(ctx, module_record(ctx))?;

    let outcome = compile_body(ctx, source).and_then(|body| {
        let require = deps::require_function(ctx, registry, path)?;
        let exports: Value = module.get("exports")?;
        let console = console_object(ctx, path)?;
        let env = env_object(ctx, environment)?;
        let process = process_object(ctx, environment, env.clone(), init)?;
        body.call::<_, Value>((
            require.clone(),
            require,
            module.clone(),
            exports,
            console,
            env,
            process,
        ))
    });
    let outcome = caught(ctx, outcome);

    // Resolved regardless of how the body finished.
    caught(ctx, resolve_init.call::<_, Value>(()))?;

    outcome?;
    Ok(Persistent::save(ctx, module))
}

/// `Function(...params, "'use strict';\n" + source)`
fn compile_body<'js>(ctx: &Ctx<'js>, source: &str) -> rquickjs::Result<Function<'js>> {
    let function_ctor: Function = ctx.globals().get("Function")?;
    let mut args: Vec<String> = SCOPE_PARAMETERS.iter().map(|name| name.to_string()).collect();
    args.push(format!("'use strict';\n{source}"));
    function_ctor.call((Rest(args),))
}

fn module_record<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    let module = Object::new(ctx.clone())?;
    module.set("exports", Object::new(ctx.clone())?)?;
    module.set("loaded", false)?;
    Ok(module)
}

const INIT_SIGNAL_GLUE: &str = r#"
(function () {
    let resolve;
    const promise = new Promise((done) => { resolve = () => done(); });
    return { promise, resolve };
})()
"#;

/// A pending promise and the function that resolves it.
fn init_signal<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<(Value<'js>, Function<'js>)> {
    let signal: Object = ctx.eval(INIT_SIGNAL_GLUE)?;
    Ok((signal.get("promise")?, signal.get("resolve")?))
}

fn env_object<'js>(ctx: &Ctx<'js>, environment: &HostEnvironment) -> rquickjs::Result<Object<'js>> {
    let env = Object::new(ctx.clone())?;
    let variables = environment.user_variables.clone();
    env.set(
        "getUserVariables",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<Object<'js>> {
            let out = Object::new(ctx)?;
            for (key, value) in &variables {
                out.set(key.as_str(), value.as_str())?;
            }
            Ok(out)
        })?,
    )?;
    env.set("os", environment.os.as_str())?;
    env.set("appVersion", environment.app_version.as_str())?;
    env.set("lang", environment.lang.as_str())?;
    freeze(ctx, &env)?;
    Ok(env)
}

fn process_object<'js>(
    ctx: &Ctx<'js>,
    environment: &HostEnvironment,
    env: Object<'js>,
    init: Value<'js>,
) -> rquickjs::Result<Object<'js>> {
    let process = Object::new(ctx.clone())?;
    process.set("platform", environment.os.as_str())?;
    process.set("version", environment.app_version.as_str())?;
    process.set("env", env)?;
    process.set("ensurePluginInitialized", init)?;
    freeze(ctx, &process)?;
    Ok(process)
}

#[derive(Clone, Copy)]
enum ConsoleLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

fn console_object<'js>(ctx: &Ctx<'js>, path: &str) -> rquickjs::Result<Object<'js>> {
    let console = Object::new(ctx.clone())?;
    for (name, level) in [
        ("log", ConsoleLevel::Info),
        ("info", ConsoleLevel::Info),
        ("debug", ConsoleLevel::Debug),
        ("trace", ConsoleLevel::Trace),
        ("warn", ConsoleLevel::Warn),
        ("error", ConsoleLevel::Error),
    ] {
        let path: Arc<str> = Arc::from(path);
        console.set(
            name,
            Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
                let line = args
                    .0
                    .into_iter()
                    .map(|value| js::describe(&ctx, value))
                    .collect::<Vec<_>>()
                    .join(" ");
                emit(level, &path, &line);
            })?,
        )?;
    }
    Ok(console)
}

fn emit(level: ConsoleLevel, path: &str, line: &str) {
    match level {
        ConsoleLevel::Trace => tracing::trace!(target: CONSOLE_TARGET, plugin_path = %path, "{line}"),
        ConsoleLevel::Debug => tracing::debug!(target: CONSOLE_TARGET, plugin_path = %path, "{line}"),
        ConsoleLevel::Info => tracing::info!(target: CONSOLE_TARGET, plugin_path = %path, "{line}"),
        ConsoleLevel::Warn => tracing::warn!(target: CONSOLE_TARGET, plugin_path = %path, "{line}"),
        ConsoleLevel::Error => tracing::error!(target: CONSOLE_TARGET, plugin_path = %path, "{line}"),
    }
}
