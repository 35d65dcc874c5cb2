//! Evaluation sandbox - executes page modules in isolated V8 contexts.
//!
//! Each render gets a fresh `JsRuntime` (one V8 isolate), so no bindings,
//! globals, or module state can bleed between renders. Isolates are not
//! `Send`, so every render runs on a blocking thread with a current-thread
//! Tokio runtime driving the module event loop; concurrent renders map to
//! concurrent isolates.
//!
//! The context exposes only what page modules need:
//! - `h()` / `Fragment` element-tree helpers (see `bootstrap.js`)
//! - console.log/warn/error (captured, re-emitted through `tracing`)
//! - module loading from the source directory only
//! - no fs, net, env, or other system access
//!
//! A per-render deadline is enforced by a watchdog thread that terminates
//! the isolate; a terminated context is dropped, never reused.

use crate::cache::ModuleCache;
use crate::error::RenderError;
use crate::loader::GatewayLoader;
use anyhow::{anyhow, Error};
use deno_core::{op2, v8, JsRuntime, ModuleSpecifier, OpState, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Captured console output from the sandboxed context
#[derive(Debug, Default, Clone)]
struct ConsoleOutput {
    logs: Vec<String>,
    warns: Vec<String>,
    errors: Vec<String>,
}

#[op2(fast)]
fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

deno_core::extension!(
    gateway_runtime,
    ops = [op_console_log, op_console_warn, op_console_error],
    esm_entry_point = "ext:gateway_runtime/bootstrap.js",
    esm = ["ext:gateway_runtime/bootstrap.js" = "src/bootstrap.js"],
);

/// One page-module execution: everything the sandbox needs to run a render
/// in isolation from the gateway that requested it.
pub(crate) struct ExecuteRequest {
    /// Canonicalized source root, the only readable directory.
    pub(crate) source_dir: PathBuf,
    /// Canonicalized entry module path, already verified under `source_dir`.
    pub(crate) entry: PathBuf,
    /// Caller-supplied page path, used in error context only.
    pub(crate) page_path: String,
    /// Validated props, injected as the render function's sole argument.
    pub(crate) props: serde_json::Value,
    pub(crate) cache: Arc<ModuleCache>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_heap_size: Option<usize>,
}

/// Tagged result from `__gateway_dispatch__` (see bootstrap.js).
#[derive(Debug, Deserialize)]
struct DispatchOutcome {
    phase: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tree: Option<serde_json::Value>,
}

/// Execute a page module and return its element tree as JSON.
///
/// Load-phase failures (parse errors, missing imports, missing render
/// export) surface as [`RenderError::Compile`]; throws from the render
/// function itself as [`RenderError::Runtime`]; a fired deadline as
/// [`RenderError::Timeout`].
pub(crate) async fn execute_page(request: ExecuteRequest) -> Result<serde_json::Value, RenderError> {
    let page_path = request.page_path.clone();
    tokio::task::spawn_blocking(move || run_isolated(request))
        .await
        .map_err(|e| RenderError::Runtime {
            path: page_path,
            message: format!("render worker failed: {e}"),
        })?
}

fn run_isolated(request: ExecuteRequest) -> Result<serde_json::Value, RenderError> {
    let local_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| RenderError::Runtime {
            path: request.page_path.clone(),
            message: format!("failed to start isolate event loop: {e}"),
        })?;
    local_runtime.block_on(run_in_context(request))
}

async fn run_in_context(request: ExecuteRequest) -> Result<serde_json::Value, RenderError> {
    let runtime_error = |message: String| RenderError::Runtime {
        path: request.page_path.clone(),
        message,
    };

    let mut runtime = new_context(&request).map_err(|e| runtime_error(e.to_string()))?;

    let watchdog = request
        .timeout
        .map(|deadline| Watchdog::arm(runtime.v8_isolate().thread_safe_handle(), deadline));

    let result = dispatch(&mut runtime, &request).await;

    let timed_out = watchdog.is_some_and(Watchdog::disarm);

    drain_console(&mut runtime, &request.page_path);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if timed_out && is_termination_error(&e) => {
            // The isolate was terminated mid-execution; it is dropped here
            // and never returned to any pool.
            return Err(RenderError::Timeout {
                ms: request.timeout.map_or(0, |t| t.as_millis() as u64),
            });
        }
        Err(e) => return Err(runtime_error(e.to_string())),
    };

    match outcome.phase.as_str() {
        "ok" => outcome
            .tree
            .ok_or_else(|| runtime_error("render returned no element tree".to_string())),
        "load" => Err(RenderError::Compile {
            path: request.page_path.clone(),
            detail: outcome.message.unwrap_or_else(|| "unknown load failure".to_string()),
        }),
        "render" => Err(RenderError::Runtime {
            path: request.page_path.clone(),
            message: outcome.message.unwrap_or_else(|| "unknown throw".to_string()),
        }),
        other => Err(runtime_error(format!("unexpected dispatch phase `{other}`"))),
    }
}

/// Build a fresh evaluation context for one render.
fn new_context(request: &ExecuteRequest) -> Result<JsRuntime, Error> {
    let loader = GatewayLoader::new(request.source_dir.clone(), Arc::clone(&request.cache));

    let create_params = request
        .max_heap_size
        .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(loader)),
        extensions: vec![gateway_runtime::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    if request.max_heap_size.is_some() {
        let isolate_handle = runtime.v8_isolate().thread_safe_handle();
        runtime.add_near_heap_limit_callback(move |current, initial| {
            tracing::warn!(
                current_mb = current / (1024 * 1024),
                initial_mb = initial / (1024 * 1024),
                "evaluation context near heap limit, terminating"
            );
            isolate_handle.terminate_execution();
            // Grant enough slack for the termination to unwind instead of
            // tripping V8's fatal OOM handler.
            current * 2
        });
    }

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());

    Ok(runtime)
}

async fn dispatch(
    runtime: &mut JsRuntime,
    request: &ExecuteRequest,
) -> Result<DispatchOutcome, Error> {
    let specifier = ModuleSpecifier::from_file_path(&request.entry)
        .map_err(|_| anyhow!("failed to build module specifier for '{}'", request.entry.display()))?;

    // Props are embedded as a JS object literal. JSON is a syntactic subset
    // of JS expressions, and dangerous keys were already rejected upstream.
    let props_json = serde_json::to_string(&request.props)?;
    let code = format!(r#"globalThis.__gateway_dispatch__("{specifier}", {props_json})"#);

    let dispatched = runtime.execute_script("<gateway>", code)?;

    // Drive dynamic import resolution and the dispatch promise to completion
    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await?;

    let payload = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, &dispatched);

        if let Ok(promise) = v8::Local::<v8::Promise>::try_from(local) {
            match promise.state() {
                v8::PromiseState::Fulfilled => {
                    let result = promise.result(scope);
                    if result.is_string() {
                        result.to_rust_string_lossy(scope)
                    } else {
                        return Err(anyhow!("dispatch must resolve to a string"));
                    }
                }
                v8::PromiseState::Rejected => {
                    let exception = promise.result(scope);
                    return Err(anyhow!(
                        "dispatch rejected: {}",
                        exception.to_rust_string_lossy(scope)
                    ));
                }
                v8::PromiseState::Pending => {
                    return Err(anyhow!("render left an unresolved promise"));
                }
            }
        } else if local.is_string() {
            local.to_rust_string_lossy(scope)
        } else {
            return Err(anyhow!("dispatch must return a string"));
        }
    };

    let outcome: DispatchOutcome = serde_json::from_str(&payload)
        .map_err(|e| anyhow!("malformed dispatch payload: {e}"))?;
    Ok(outcome)
}

/// A fired watchdog alone does not prove the error came from termination:
/// a genuine failure can land in the race window just before the deadline
/// fires. Require the V8 termination signature as well before reporting
/// `Timeout`. Termination surfaces either as a "terminated" execution error
/// or as the dispatch promise left pending.
fn is_termination_error(error: &Error) -> bool {
    let message = error.to_string();
    message.contains("terminated") || message.contains("unresolved promise")
}

/// Re-emit captured console output through the host's log subscriber.
fn drain_console(runtime: &mut JsRuntime, page_path: &str) {
    let output = runtime.op_state().borrow().borrow::<ConsoleOutput>().clone();
    for line in &output.logs {
        tracing::debug!(page = page_path, "[page console] {line}");
    }
    for line in &output.warns {
        tracing::warn!(page = page_path, "[page console] {line}");
    }
    for line in &output.errors {
        tracing::warn!(page = page_path, "[page console] {line}");
    }
}

/// Deadline enforcement for one render.
///
/// A plain OS thread, not a task: the isolate may be stuck in synchronous JS
/// with the local event loop blocked, so the termination signal must come
/// from outside it.
struct Watchdog {
    cancel: mpsc::Sender<()>,
    fired: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

impl Watchdog {
    fn arm(isolate: v8::IsolateHandle, deadline: Duration) -> Self {
        let (cancel, armed) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);

        let thread = std::thread::spawn(move || {
            // Ok(()) = disarmed in time; Disconnected = render path dropped
            // the sender, nothing left to terminate.
            if matches!(armed.recv_timeout(deadline), Err(mpsc::RecvTimeoutError::Timeout)) {
                fired_flag.store(true, Ordering::SeqCst);
                isolate.terminate_execution();
            }
        });

        Self {
            cancel,
            fired,
            thread,
        }
    }

    /// Stop the watchdog; returns whether it already fired.
    fn disarm(self) -> bool {
        let _ = self.cancel.send(());
        let _ = self.thread.join();
        self.fired.load(Ordering::SeqCst)
    }
}
