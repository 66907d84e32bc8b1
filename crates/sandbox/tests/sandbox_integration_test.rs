//! Sandbox integration tests.
//!
//! Runs the full pipeline against real script engine boundaries:
//! Playground → SandboxContainer → JsBoundary thread → fresh realm.

use std::sync::Arc;
use std::time::Duration;

use codementor_core::config::SandboxSettings;
use codementor_core::{ConsoleLevel, Error, ExecutionRequest, ExecutionResult};
use codementor_sandbox::{
    harden_loops, BoundaryLimits, ContainerConfig, ContainerState, JsBoundary, Playground,
    SandboxContainer,
};

// =============================================================================
// Helpers
// =============================================================================

fn js_container(timeout: Duration) -> SandboxContainer {
    SandboxContainer::new(
        Arc::new(JsBoundary::new(BoundaryLimits::default())),
        ContainerConfig {
            execution_timeout: timeout,
        },
    )
}

fn settings(harden_loops: bool) -> SandboxSettings {
    SandboxSettings {
        harden_loops,
        max_loop_iterations: 1_000,
        ..Default::default()
    }
}

// =============================================================================
// 1. Console relay
// =============================================================================

#[tokio::test]
async fn test_console_log_resolves_with_single_event() {
    let container = js_container(Duration::from_secs(10));
    container.create().unwrap();
    let mut events = container.subscribe();

    container
        .execute("<h1>Hi</h1>", "", "console.log('x')")
        .await
        .unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.level, ConsoleLevel::Log);
    assert_eq!(event.parts, vec!["x"]);
    assert!(events.try_recv().is_err(), "exactly one console event");
    assert!(container.rendered().unwrap().contains("<h1>Hi</h1>"));
}

#[tokio::test]
async fn test_console_events_keep_emission_order() {
    let container = js_container(Duration::from_secs(10));
    container.create().unwrap();
    let mut events = container.subscribe();

    container
        .execute("", "", "for (let i = 0; i < 5; i++) { console.info('line', i); }")
        .await
        .unwrap();

    let mut texts = Vec::new();
    while let Ok(event) = events.try_recv() {
        texts.push(event.text());
    }
    assert_eq!(texts, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
}

// =============================================================================
// 2. Errors and timeouts
// =============================================================================

#[tokio::test]
async fn test_thrown_error_rejects_with_message() {
    let container = js_container(Duration::from_secs(10));
    container.create().unwrap();

    let err = container
        .execute("", "", "throw new Error('boom')")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Runtime { ref message, .. } if message == "boom"));

    let document = container.rendered().unwrap();
    assert!(document.contains("error-message"));
    assert!(document.contains("boom"));
}

#[tokio::test]
async fn test_runaway_script_times_out_and_next_run_is_not_blocked() {
    let container = js_container(Duration::from_millis(100));
    container.create().unwrap();
    let first = container.boundary_id();

    let err = container.execute("", "", "while (true) {}").await.unwrap_err();
    assert!(matches!(err, Error::ExecutionTimeout(_)));
    assert_eq!(container.state(), ContainerState::Created);
    assert_ne!(container.boundary_id(), first, "stuck boundary was retired");

    container.execute("<p>ok</p>", "", "").await.unwrap();
    assert!(container.rendered().unwrap().contains("<p>ok</p>"));
}

#[tokio::test]
async fn test_realm_state_does_not_survive_between_runs() {
    let container = js_container(Duration::from_secs(10));
    container.create().unwrap();

    container
        .execute("", "", "globalThis.counter = 41;")
        .await
        .unwrap();
    container
        .execute("", "", "if (typeof counter !== 'undefined') { throw new Error('state leaked'); }")
        .await
        .unwrap();
}

// =============================================================================
// 3. Playground pipeline
// =============================================================================

#[tokio::test]
async fn test_hardened_infinite_loop_reports_iteration_limit() {
    let playground = Playground::new(&settings(true));
    let report = playground
        .run(&ExecutionRequest::new("", "", "let n = 0; while (true) { n++; }"))
        .await
        .unwrap();

    match report.result {
        ExecutionResult::RuntimeError { message, .. } => {
            assert!(message.contains("Infinite loop detected"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(report.warnings.iter().any(|(_, w)| w.contains("while (true)")));
}

#[tokio::test]
async fn test_hardened_loops_compute_the_same_result() {
    let playground = Playground::new(&settings(true));
    let js = "let sum = 0; for (let i = 0; i < 10; i++) { sum += i; } console.log(sum);";
    let report = playground.run(&ExecutionRequest::new("", "", js)).await.unwrap();

    assert!(report.result.is_success());
    assert_eq!(report.console[0].parts, vec!["45"]);
}

#[tokio::test]
async fn test_dom_shim_output_reaches_rendered_document() {
    let playground = Playground::new(&settings(true));
    let js = "document.getElementById('app').innerHTML = '<ul>' + [1, 2].map(n => '<li>' + n + '</li>').join('') + '</ul>';";
    let report = playground
        .run(&ExecutionRequest::new("<p>before</p>", "li { color: blue; }", js))
        .await
        .unwrap();

    let document = report.document.unwrap();
    assert!(document.contains("<div id=\"app\"><ul><li>1</li><li>2</li></ul></div>"));
    assert!(document.contains("li { color: blue; }"));
    assert!(document.contains("Content-Security-Policy"));
}

#[tokio::test]
async fn test_unsafe_code_is_refused_before_execution() {
    let playground = Playground::new(&settings(true));
    let err = playground
        .run(&ExecutionRequest::new("<script>alert(1)</script>", "", "fetch('/steal')"))
        .await
        .unwrap_err();

    match err {
        Error::UnsafeCode(reasons) => assert!(reasons.len() >= 2),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(playground.container().state(), ContainerState::Uninitialized);
}

#[test]
fn test_harden_is_exported_for_callers() {
    let hardened = harden_loops("while (x) { step(); }", 10);
    assert!(hardened.starts_with("for (let __loopGuard_0"));
}
