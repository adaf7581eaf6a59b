//! End-to-end synthesis: a request with no matching tool drives the full
//! specification → tests → implementation → verification → registration
//! pipeline, then executes the new tool.

mod common;

use common::*;
use toolforge::events::{CancellationFlag, EventLog, ProgressStage as S, StageStatus as St};
use toolforge::store::CapabilityStore;
use toolforge::types::ToolStatus;

#[tokio::test]
async fn request_with_no_tool_synthesizes_then_executes() {
    let h = harness(
        MockOracle::new(vec![reverse_concept()]),
        MockSandbox::passing(Box::new(default_invoke)),
    );
    let events = EventLog::new();
    let cancel = CancellationFlag::new();

    let response = h
        .orchestrator
        .process_request("reverse 'hello'", Some("s1"), &events, &cancel)
        .await;

    assert!(response.success, "failed: {:?}", response.error);
    assert_eq!(response.result, Some(serde_json::json!("olleh")));
    assert!(response.synthesized);
    assert_eq!(response.strategy, "single");
    assert_eq!(response.tool_name.as_deref(), Some("reverse_string"));

    assert_stage_subsequence(
        &events.stages(),
        &[
            (S::Searching, St::InProgress),
            (S::NoToolFound, St::Complete),
            (S::EnteringSynthesisMode, St::InProgress),
            (S::Specification, St::Complete),
            (S::Tests, St::Complete),
            (S::Implementation, St::Complete),
            (S::Verification, St::Complete),
            (S::Registration, St::Complete),
            (S::Executing, St::InProgress),
            (S::ExecutionComplete, St::Complete),
        ],
    );

    let tool = h.store.get_tool("reverse_string").await.unwrap().unwrap();
    assert_eq!(tool.status, ToolStatus::Verified);
    assert_eq!(tool.revision, 0);
}

#[tokio::test]
async fn pipeline_stages_are_strictly_ordered() {
    let h = harness(
        MockOracle::new(vec![reverse_concept()]),
        MockSandbox::passing(Box::new(default_invoke)),
    );
    let events = EventLog::new();

    h.orchestrator
        .process_request("reverse 'abc'", Some("s1"), &events, &CancellationFlag::new())
        .await;

    let stages = events.stages();
    let first_index = |stage: S, status: St| {
        stages
            .iter()
            .position(|p| *p == (stage, status))
            .unwrap_or_else(|| panic!("{stage:?}/{status:?} never emitted"))
    };
    // Each stage starts only after the previous completed.
    assert!(first_index(S::Tests, St::InProgress) > first_index(S::Specification, St::Complete));
    assert!(first_index(S::Implementation, St::InProgress) > first_index(S::Tests, St::Complete));
    assert!(
        first_index(S::Verification, St::InProgress)
            > first_index(S::Implementation, St::Complete)
    );
    assert!(
        first_index(S::Registration, St::InProgress) > first_index(S::Verification, St::Complete)
    );
}

#[tokio::test]
async fn failed_verification_regenerates_exactly_once() {
    let h = harness(
        MockOracle::new(vec![reverse_concept()]),
        MockSandbox::passing(Box::new(default_invoke)).with_verify_script(vec![false, true]),
    );
    let events = EventLog::new();

    let response = h
        .orchestrator
        .process_request("reverse 'hello'", Some("s1"), &events, &CancellationFlag::new())
        .await;

    assert!(response.success);
    assert_eq!(
        h.oracle
            .implementation_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    assert_eq!(
        h.sandbox
            .verify_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    // The retried stages re-emit their events rather than skipping.
    assert_eq!(events.count(S::Implementation), 4); // 2x in_progress + 2x complete
    let tool = h.store.get_tool("reverse_string").await.unwrap().unwrap();
    assert_eq!(tool.status, ToolStatus::Verified);
}

#[tokio::test]
async fn two_verification_failures_register_experimental_not_a_loop() {
    let h = harness(
        MockOracle::new(vec![reverse_concept()]),
        MockSandbox::passing(Box::new(default_invoke)).with_verify_script(vec![false, false]),
    );
    let events = EventLog::new();

    let response = h
        .orchestrator
        .process_request("reverse 'hello'", Some("s1"), &events, &CancellationFlag::new())
        .await;

    // Registered experimental and still executed, but explicitly flagged.
    assert!(response.success);
    assert_eq!(
        h.oracle
            .implementation_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        2,
        "regeneration must not loop"
    );
    let tool = h.store.get_tool("reverse_string").await.unwrap().unwrap();
    assert_eq!(tool.status, ToolStatus::Experimental);
    assert!(events
        .events()
        .iter()
        .any(|e| e.stage == S::Registration && e.status == St::Warning));
}

#[tokio::test]
async fn creation_directive_forces_synthesis_without_search() {
    let h = harness(
        MockOracle::new(vec![reverse_concept()]),
        MockSandbox::passing(Box::new(default_invoke)),
    );
    // A matching tool exists, but the directive bypasses search entirely.
    preregister(&h.store, &h.oracle, &reverse_concept()).await;

    let events = EventLog::new();
    let response = h
        .orchestrator
        .process_request(
            "create a new function to reverse a string",
            Some("s1"),
            &events,
            &CancellationFlag::new(),
        )
        .await;

    assert!(response.success);
    assert_eq!(response.strategy, "force_synthesis");
    assert!(response.synthesized);
    assert_eq!(events.count(S::Searching), 0);
    assert_eq!(events.count(S::EnteringSynthesisMode), 1);
}

#[tokio::test]
async fn cancellation_aborts_at_stage_boundary() {
    let h = harness(
        MockOracle::new(vec![reverse_concept()]),
        MockSandbox::passing(Box::new(default_invoke)),
    );
    let events = EventLog::new();
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let response = h
        .orchestrator
        .process_request("reverse 'hello'", Some("s1"), &events, &cancel)
        .await;

    assert!(!response.success);
    assert!(response
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("cancelled"));
    // Nothing was registered and nothing executed.
    assert!(h.store.list_tools().await.unwrap().is_empty());
    assert_eq!(events.count(S::ExecutionComplete), 0);
}
