//! Boundaries: the isolated contexts user code runs in.
//!
//! [`JsBoundary`] gives every boundary its own OS thread. Each execute
//! request gets a brand new script realm on that thread, so nothing a
//! previous run left behind (globals, markup, banners) survives. The realm
//! exposes no host objects beyond a console shim, a minimal `document`, and
//! throwing stubs for every network and storage global.
//!
//! [`MockBoundary`] answers from a tokio task with scripted behaviour and
//! keeps every postbox it was handed so tests can inspect traffic.

use boa_engine::object::builtins::JsArray;
use boa_engine::{Context, JsResult, JsString, JsValue, NativeFunction, Source};
use parking_lot::Mutex;
use serde::Deserialize;
use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use codementor_core::config::SandboxSettings;
use codementor_core::{ConsoleLevel, Error, ExecutionRequest, Result};

use crate::policy::{ContentPolicy, ErrorBanner};
use crate::protocol::{BoundaryId, Envelope, ErrorPayload, Message, Postbox, RequestId};

// =============================================================================
// Launcher Trait
// =============================================================================

/// Starts boundaries for a container.
pub trait BoundaryLauncher: Send + Sync {
    /// Launch a boundary that posts everything through `postbox`.
    fn launch(&self, postbox: Postbox, policy: &ContentPolicy) -> Result<BoundaryHandle>;
}

/// Host-side end of a running boundary.
///
/// Dropping the handle closes the boundary's inbox. A boundary busy with a
/// long computation is not interrupted; it exits after the current run and
/// anything it posts meanwhile is ignored by the host.
#[derive(Debug)]
pub struct BoundaryHandle {
    id: BoundaryId,
    inbox: mpsc::UnboundedSender<Envelope>,
}

impl BoundaryHandle {
    pub fn new(id: BoundaryId, inbox: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { id, inbox }
    }

    pub fn id(&self) -> BoundaryId {
        self.id
    }

    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.inbox
            .send(envelope)
            .map_err(|_| Error::boundary(format!("{} is no longer running", self.id)))
    }
}

// =============================================================================
// Script Engine Boundary
// =============================================================================

/// Limits applied inside every realm.
#[derive(Debug, Clone)]
pub struct BoundaryLimits {
    /// Wall-clock budget for one run, checked when the run returns.
    pub script_budget: Duration,
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

impl Default for BoundaryLimits {
    fn default() -> Self {
        Self::from(&SandboxSettings::default())
    }
}

impl From<&SandboxSettings> for BoundaryLimits {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            script_budget: Duration::from_millis(settings.script_budget_ms),
            loop_iteration_limit: settings.engine_loop_limit,
            recursion_limit: settings.engine_recursion_limit,
        }
    }
}

/// Boundary backed by an embedded script engine on a dedicated thread.
#[derive(Debug, Clone, Default)]
pub struct JsBoundary {
    limits: BoundaryLimits,
}

impl JsBoundary {
    pub fn new(limits: BoundaryLimits) -> Self {
        Self { limits }
    }
}

impl BoundaryLauncher for JsBoundary {
    fn launch(&self, postbox: Postbox, policy: &ContentPolicy) -> Result<BoundaryHandle> {
        let id = postbox.source();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            postbox,
            policy: policy.clone(),
            limits: self.limits.clone(),
        };

        std::thread::Builder::new()
            .name(format!("sandbox-{}", id.0.simple()))
            .spawn(move || worker.run(rx))
            .map_err(|e| Error::boundary(format!("failed to start boundary thread: {}", e)))?;

        tracing::debug!(boundary = %id, "Script boundary launched");
        Ok(BoundaryHandle::new(id, tx))
    }
}

/// Page scaffolding evaluated in every fresh realm. Evaluates to the run
/// function `(html, js) -> JSON outcome`.
const HARNESS: &str = r##"
(function (hostConsole, blocked) {
  var stringify = JSON.stringify;
  var MAX_TIMER_CALLBACKS = 10000;

  var console = {};
  ["log", "error", "warn", "info"].forEach(function (level) {
    console[level] = function () {
      var parts = [level];
      for (var i = 0; i < arguments.length; i++) {
        parts.push(String(arguments[i]));
      }
      hostConsole.apply(null, parts);
    };
  });
  console.debug = console.log;

  var app = { id: "app", innerHTML: "" };
  Object.defineProperty(app, "textContent", {
    get: function () { return String(this.innerHTML).replace(/<[^>]*>/g, ""); },
    set: function (value) {
      this.innerHTML = String(value).replace(/&/g, "&amp;").replace(/</g, "&lt;").replace(/>/g, "&gt;");
    }
  });
  function policyError(name) {
    return function () { throw new Error(name + " is blocked by the sandbox content policy"); };
  }

  var document = {
    title: "",
    body: app,
    getElementById: function (id) { return id === "app" ? app : null; },
    querySelector: function (selector) { return selector === "#app" ? app : null; },
    write: policyError("document.write"),
    writeln: policyError("document.writeln")
  };

  var timers = [];
  var nextTimer = 1;
  var clock = 0;
  function schedule(fn, delay, repeat, extra) {
    if (typeof fn !== "function") {
      throw new TypeError("Timer callbacks must be functions");
    }
    var wait = Math.max(0, Number(delay) || 0);
    var id = nextTimer++;
    timers.push({ id: id, fn: fn, at: clock + wait, every: repeat ? Math.max(1, wait) : 0, args: extra });
    return id;
  }
  function clearTimer(id) {
    timers = timers.filter(function (t) { return t.id !== id; });
  }
  function drainTimers() {
    var fired = 0;
    while (timers.length > 0) {
      if (fired++ >= MAX_TIMER_CALLBACKS) {
        console.warn("Stopped timers after " + MAX_TIMER_CALLBACKS + " callbacks");
        timers = [];
        return;
      }
      timers.sort(function (a, b) { return a.at - b.at || a.id - b.id; });
      var timer = timers.shift();
      clock = timer.at;
      if (timer.every) {
        timer.at = clock + timer.every;
        timers.push(timer);
      }
      timer.fn.apply(null, timer.args);
    }
  }

  globalThis.console = console;
  globalThis.document = document;
  globalThis.window = globalThis;
  globalThis.self = globalThis;
  globalThis.parent = globalThis;
  globalThis.top = globalThis;
  globalThis.opener = null;
  globalThis.setTimeout = function (fn, delay) { return schedule(fn, delay, false, Array.prototype.slice.call(arguments, 2)); };
  globalThis.setInterval = function (fn, delay) { return schedule(fn, delay, true, Array.prototype.slice.call(arguments, 2)); };
  globalThis.clearTimeout = clearTimer;
  globalThis.clearInterval = clearTimer;
  globalThis.alert = function () {};
  globalThis.confirm = function () { return false; };
  globalThis.prompt = function () { return null; };
  blocked.forEach(function (name) {
    Object.defineProperty(globalThis, name, { get: policyError(name), configurable: false });
  });

  var compile = Function;
  return function run(html, js) {
    app.innerHTML = html;
    var outcome = { ok: true };
    try {
      if (js) {
        compile(js)();
      }
      drainTimers();
    } catch (err) {
      var isError = err instanceof Error;
      outcome = {
        ok: false,
        message: isError ? String(err.message) : String(err),
        stack: isError && err.stack ? String(err.stack) : null,
        line: isError && typeof err.lineNumber === "number" ? err.lineNumber : null,
        column: isError && typeof err.columnNumber === "number" ? err.columnNumber : null
      };
    }
    outcome.app = String(app.innerHTML);
    return stringify(outcome);
  };
})
"##;

#[derive(Debug, Deserialize)]
struct HarnessOutcome {
    ok: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stack: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
    #[serde(default)]
    app: String,
}

/// What the console shim needs while a run is in flight.
struct RunScope {
    postbox: Postbox,
    request: RequestId,
}

thread_local! {
    static RUN_SCOPE: RefCell<Option<RunScope>> = const { RefCell::new(None) };
}

/// Native side of `console.*`: trace locally, then forward to the host.
fn host_console(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(arg.to_string(context)?.to_std_string_escaped());
    }
    if parts.is_empty() {
        return Ok(JsValue::undefined());
    }
    let level = parts.remove(0).parse().unwrap_or(ConsoleLevel::Log);

    tracing::debug!(level = level.as_str(), text = %parts.join(" "), "Boundary console");
    RUN_SCOPE.with(|scope| {
        if let Some(scope) = scope.borrow().as_ref() {
            let _ = scope.postbox.post(Envelope::console(scope.request, level, parts));
        }
    });
    Ok(JsValue::undefined())
}

struct Worker {
    postbox: Postbox,
    policy: ContentPolicy,
    limits: BoundaryLimits,
}

impl Worker {
    fn run(self, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
        let id = self.postbox.source();
        while let Some(envelope) = inbox.blocking_recv() {
            match envelope.message {
                Message::Execute(request) => {
                    let reply = self.execute(envelope.id, &request);
                    if self.postbox.post(reply).is_err() {
                        break;
                    }
                }
                other => {
                    tracing::warn!(boundary = %id, kind = other.kind(), "Boundary ignored unexpected message");
                }
            }
        }
        tracing::debug!(boundary = %id, "Script boundary stopped");
    }

    fn execute(&self, request_id: RequestId, request: &ExecutionRequest) -> Envelope {
        RUN_SCOPE.with(|scope| {
            *scope.borrow_mut() = Some(RunScope {
                postbox: self.postbox.clone(),
                request: request_id,
            });
        });

        let started = Instant::now();
        let outcome = self.run_in_fresh_realm(request);
        let elapsed = started.elapsed();

        RUN_SCOPE.with(|scope| *scope.borrow_mut() = None);

        let outcome = match outcome {
            Ok(outcome) if outcome.ok && elapsed > self.limits.script_budget => HarnessOutcome {
                ok: false,
                message: Some(format!(
                    "Script execution timeout ({} ms)",
                    self.limits.script_budget.as_millis()
                )),
                stack: None,
                line: None,
                column: None,
                app: outcome.app,
            },
            Ok(outcome) => outcome,
            // Engine limits and harness failures cannot be caught in script.
            Err(message) => HarnessOutcome {
                ok: false,
                message: Some(message),
                stack: None,
                line: None,
                column: None,
                app: request.html.clone(),
            },
        };

        tracing::debug!(
            request = request_id,
            ok = outcome.ok,
            elapsed_ms = elapsed.as_millis() as u64,
            "Boundary run finished"
        );

        if outcome.ok {
            let document = self.policy.render_document(&request.css, &outcome.app, None);
            return Envelope::result(request_id, document);
        }

        let message = outcome
            .message
            .unwrap_or_else(|| "Unknown error".to_string());
        let location = outcome.line.map(|line| (line, outcome.column.unwrap_or(0)));
        let banner = ErrorBanner::new(message.clone(), location);
        let document = self
            .policy
            .render_document(&request.css, &outcome.app, Some(&banner));

        Envelope::error(
            request_id,
            ErrorPayload {
                message,
                stack: outcome.stack,
                filename: None,
                lineno: outcome.line,
                colno: outcome.column,
                document: Some(document),
            },
        )
    }

    fn run_in_fresh_realm(&self, request: &ExecutionRequest) -> std::result::Result<HarnessOutcome, String> {
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(self.limits.loop_iteration_limit);
        context
            .runtime_limits_mut()
            .set_recursion_limit(self.limits.recursion_limit);

        let host = NativeFunction::from_fn_ptr(host_console).to_js_function(context.realm());
        let blocked = self
            .policy
            .blocked_globals()
            .iter()
            .map(|name| JsValue::from(JsString::from(*name)))
            .collect::<Vec<_>>();
        let blocked = JsArray::from_iter(blocked, &mut context);

        let factory = context
            .eval(Source::from_bytes(HARNESS))
            .map_err(|e| format!("sandbox harness failed to load: {}", e))?;
        let factory = factory
            .as_callable()
            .ok_or_else(|| "sandbox harness is not callable".to_string())?
            .clone();
        let run = factory
            .call(&JsValue::undefined(), &[host.into(), blocked.into()], &mut context)
            .map_err(|e| format!("sandbox harness failed to start: {}", e))?;
        let run = run
            .as_callable()
            .ok_or_else(|| "sandbox harness returned no runner".to_string())?
            .clone();

        let args = [
            JsValue::from(JsString::from(request.html.as_str())),
            JsValue::from(JsString::from(request.js.as_str())),
        ];
        let raw = run
            .call(&JsValue::undefined(), &args, &mut context)
            .map_err(|e| e.to_string())?;
        let raw = raw
            .to_string(&mut context)
            .map_err(|e| e.to_string())?
            .to_std_string_escaped();

        serde_json::from_str(&raw).map_err(|e| format!("malformed harness outcome: {}", e))
    }
}

// =============================================================================
// Mock Boundary (for testing without a script engine)
// =============================================================================

/// Scripted response of a [`MockBoundary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Emit the scripted console lines, then succeed.
    Succeed,
    /// Emit the scripted console lines, then fail with this message.
    Fail(String),
    /// Never answer.
    Silent,
}

/// In-process boundary for unit testing.
pub struct MockBoundary {
    behavior: MockBehavior,
    console: Vec<(ConsoleLevel, Vec<String>)>,
    postboxes: Arc<Mutex<Vec<Postbox>>>,
    received: Arc<Mutex<Vec<Envelope>>>,
}

impl MockBoundary {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            console: Vec::new(),
            postboxes: Default::default(),
            received: Default::default(),
        }
    }

    /// Console line emitted before the terminal message of every run.
    pub fn with_console(mut self, level: ConsoleLevel, parts: &[&str]) -> Self {
        self.console
            .push((level, parts.iter().map(|p| p.to_string()).collect()));
        self
    }

    /// Number of boundaries launched so far.
    pub fn launches(&self) -> usize {
        self.postboxes.lock().len()
    }

    /// Postbox handed to the `index`-th launch.
    pub fn postbox(&self, index: usize) -> Option<Postbox> {
        self.postboxes.lock().get(index).cloned()
    }

    /// Every envelope any launched boundary received.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().clone()
    }
}

impl Default for MockBoundary {
    fn default() -> Self {
        Self::new(MockBehavior::Succeed)
    }
}

impl BoundaryLauncher for MockBoundary {
    fn launch(&self, postbox: Postbox, policy: &ContentPolicy) -> Result<BoundaryHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::boundary("mock boundary requires a tokio runtime"))?;
        let id = postbox.source();
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        self.postboxes.lock().push(postbox.clone());

        let behavior = self.behavior.clone();
        let console = self.console.clone();
        let received = self.received.clone();
        let policy = policy.clone();

        runtime.spawn(async move {
            while let Some(envelope) = rx.recv().await {
                received.lock().push(envelope.clone());
                let Message::Execute(request) = envelope.message else {
                    continue;
                };
                if behavior == MockBehavior::Silent {
                    continue;
                }
                for (level, parts) in &console {
                    let _ = postbox.post(Envelope::console(envelope.id, *level, parts.clone()));
                }
                let reply = match &behavior {
                    MockBehavior::Fail(message) => {
                        let banner = ErrorBanner::new(message.clone(), None);
                        Envelope::error(
                            envelope.id,
                            ErrorPayload {
                                document: Some(policy.render_document(
                                    &request.css,
                                    &request.html,
                                    Some(&banner),
                                )),
                                ..ErrorPayload::message(message.clone())
                            },
                        )
                    }
                    _ => Envelope::result(
                        envelope.id,
                        policy.render_document(&request.css, &request.html, None),
                    ),
                };
                let _ = postbox.post(reply);
            }
        });

        Ok(BoundaryHandle::new(id, tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Posted;

    fn worker(limits: BoundaryLimits) -> (Worker, mpsc::UnboundedReceiver<Posted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            postbox: Postbox::new(BoundaryId::new(), tx),
            policy: ContentPolicy::default(),
            limits,
        };
        (worker, rx)
    }

    fn console_lines(rx: &mut mpsc::UnboundedReceiver<Posted>) -> Vec<(ConsoleLevel, Vec<String>)> {
        let mut lines = Vec::new();
        while let Ok(posted) = rx.try_recv() {
            if let Message::Console(payload) = posted.envelope.message {
                lines.push((payload.level, payload.data));
            }
        }
        lines
    }

    fn run(js: &str) -> (Envelope, Vec<(ConsoleLevel, Vec<String>)>) {
        let (worker, mut rx) = worker(BoundaryLimits::default());
        let reply = worker.execute(1, &ExecutionRequest::new("<h1>Hi</h1>", "h1 { color: red; }", js));
        (reply, console_lines(&mut rx))
    }

    #[test]
    fn test_console_log_is_forwarded() {
        let (reply, lines) = run("console.log('x')");
        assert_eq!(lines, vec![(ConsoleLevel::Log, vec!["x".to_string()])]);
        match reply.message {
            Message::Result(payload) => {
                assert!(payload.document.contains("<div id=\"app\"><h1>Hi</h1></div>"));
                assert!(payload.document.contains("h1 { color: red; }"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_console_arguments_are_stringified_independently() {
        let (_, lines) = run("console.warn('a', 1, {}, null); console.info(); console.error('e')");
        assert_eq!(
            lines,
            vec![
                (ConsoleLevel::Warn, vec!["a".into(), "1".into(), "[object Object]".into(), "null".into()]),
                (ConsoleLevel::Info, vec![]),
                (ConsoleLevel::Error, vec!["e".into()]),
            ]
        );
    }

    #[test]
    fn test_thrown_error_becomes_banner_and_error_reply() {
        let (reply, _) = run("throw new Error('boom')");
        match reply.message {
            Message::Error(payload) => {
                assert_eq!(payload.message, "boom");
                let document = payload.document.unwrap();
                assert!(document.contains("class=\"error-message\""));
                assert!(document.contains("boom"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_each_run_gets_a_fresh_realm() {
        let (worker, _rx) = worker(BoundaryLimits::default());
        let first = worker.execute(1, &ExecutionRequest::new("", "", "globalThis.leak = 1;"));
        assert!(matches!(first.message, Message::Result(_)));
        let second = worker.execute(
            2,
            &ExecutionRequest::new("", "", "if (typeof leak !== 'undefined') { throw new Error('leaked'); }"),
        );
        assert!(matches!(second.message, Message::Result(_)), "{:?}", second);
    }

    #[test]
    fn test_network_and_storage_are_blocked() {
        for js in ["fetch('/api')", "localStorage.getItem('k')", "new WebSocket('wss://x')"] {
            let (reply, _) = run(js);
            match reply.message {
                Message::Error(payload) => assert!(payload.message.contains("blocked"), "{}", payload.message),
                other => panic!("{} was not blocked: {:?}", js, other),
            }
        }
    }

    #[test]
    fn test_host_references_point_back_at_the_realm() {
        let (reply, _) = run("if (window.parent !== window || window.top !== window) { throw new Error('escaped'); }");
        assert!(matches!(reply.message, Message::Result(_)));
    }

    #[test]
    fn test_engine_loop_limit_stops_runaway_code() {
        let (worker, _rx) = worker(BoundaryLimits {
            loop_iteration_limit: 1_000,
            ..Default::default()
        });
        let reply = worker.execute(1, &ExecutionRequest::new("", "", "while (true) {}"));
        assert!(matches!(reply.message, Message::Error(_)));
    }

    #[test]
    fn test_document_shim_updates_rendered_markup() {
        let (reply, _) = run("document.getElementById('app').textContent = 'a<b';");
        match reply.message {
            Message::Result(payload) => assert!(payload.document.contains("<div id=\"app\">a&lt;b</div>")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_query_selector_finds_app_container() {
        let (reply, _) = run("document.querySelector('#app').innerHTML = '<p>found</p>';");
        match reply.message {
            Message::Result(payload) => assert!(payload.document.contains("<div id=\"app\"><p>found</p></div>")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_over_script_budget_is_reported() {
        let (worker, _rx) = worker(BoundaryLimits {
            script_budget: Duration::ZERO,
            ..Default::default()
        });
        let reply = worker.execute(1, &ExecutionRequest::new("", "", "let s = 0; for (let i = 0; i < 1000; i++) { s += i; }"));
        match reply.message {
            Message::Error(payload) => assert!(payload.message.contains("Script execution timeout"), "{}", payload.message),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timers_run_after_the_script() {
        let (_, lines) = run(
            "setTimeout(() => console.log('later'), 10); const t = setInterval(() => { console.log('tick'); clearInterval(t); }, 5); console.log('now');",
        );
        let texts: Vec<String> = lines.into_iter().map(|(_, parts)| parts.join(" ")).collect();
        assert_eq!(texts, vec!["now", "tick", "later"]);
    }

    #[tokio::test]
    async fn test_launched_boundary_answers_over_channels() {
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let postbox = Postbox::new(BoundaryId::new(), host_tx);
        let source = postbox.source();
        let handle = JsBoundary::default()
            .launch(postbox, &ContentPolicy::default())
            .unwrap();
        assert_eq!(handle.id(), source);

        handle
            .send(Envelope::execute(9, ExecutionRequest::new("", "", "console.log('hi')")))
            .unwrap();

        let first = host_rx.recv().await.unwrap();
        assert_eq!(first.source, source);
        assert!(matches!(first.envelope.message, Message::Console(_)));
        let second = host_rx.recv().await.unwrap();
        assert_eq!(second.envelope.id, 9);
        assert!(matches!(second.envelope.message, Message::Result(_)));
    }
}
