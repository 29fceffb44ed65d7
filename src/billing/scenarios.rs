//! End-to-end ledger scenarios against the recording backend

use std::sync::{Arc, Barrier};

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::BillingHandler;
use crate::service::{
    BillingService, CallOutcome, RecordingBillingService, ScriptedCall, ServiceEvent,
};
use crate::types::{BillingConfig, BillingServiceError, SessionHandle, SessionState, SessionType};

use ServiceEvent::{Begin, Pause, Resume, Stop};
use SessionType::{ActiveGuidance, FreeDrive};

fn setup() -> (Arc<RecordingBillingService>, BillingHandler) {
    let service = Arc::new(RecordingBillingService::new());
    let handler = BillingHandler::new(service.clone(), BillingConfig::default()).unwrap();
    (service, handler)
}

#[tokio::test]
async fn test_paused_guidance_and_stopped_free_drive() {
    let (service, handler) = setup();
    let a = SessionHandle::new();
    let b = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, a);
    handler.begin_billing_session(ActiveGuidance, b);
    handler.pause_billing_session(b);
    handler.stop_billing_session(a);
    handler.settle().await;

    assert_eq!(
        service.events(),
        vec![
            Begin(FreeDrive),
            Begin(ActiveGuidance),
            Pause(ActiveGuidance),
            Stop(FreeDrive),
        ]
    );
}

#[tokio::test]
async fn test_one_billing_session_for_two_handles() {
    let (service, handler) = setup();
    let a = SessionHandle::new();
    let b = SessionHandle::new();

    handler.begin_billing_session(ActiveGuidance, a);
    handler.begin_billing_session(ActiveGuidance, b);
    assert_eq!(service.session_status(ActiveGuidance), SessionState::Running);

    handler.stop_billing_session(a);
    assert_eq!(handler.session_state(a), SessionState::Stopped);
    assert_eq!(handler.session_state(b), SessionState::Running);
    assert_eq!(service.session_status(ActiveGuidance), SessionState::Running);

    handler.stop_billing_session(b);
    assert_eq!(handler.session_state(b), SessionState::Stopped);
    assert_eq!(service.session_status(ActiveGuidance), SessionState::Stopped);

    handler.settle().await;
    assert_eq!(service.events(), vec![Begin(ActiveGuidance), Stop(ActiveGuidance)]);
}

#[tokio::test]
async fn test_two_billing_sessions_for_two_handles_each() {
    let (service, handler) = setup();
    let guidance_1 = SessionHandle::new();
    let guidance_2 = SessionHandle::new();
    let free_1 = SessionHandle::new();
    let free_2 = SessionHandle::new();

    handler.begin_billing_session(ActiveGuidance, guidance_1);
    handler.begin_billing_session(ActiveGuidance, guidance_2);
    handler.begin_billing_session(FreeDrive, free_1);
    handler.begin_billing_session(FreeDrive, free_2);
    handler.stop_billing_session(guidance_1);
    handler.stop_billing_session(guidance_2);
    handler.stop_billing_session(free_2);
    handler.stop_billing_session(free_1);
    handler.settle().await;

    assert_eq!(
        service.events(),
        vec![
            Begin(ActiveGuidance),
            Begin(FreeDrive),
            Stop(ActiveGuidance),
            Stop(FreeDrive),
        ]
    );
}

#[tokio::test]
async fn test_complex_usecase() {
    let (service, handler) = setup();
    let guidance_1 = SessionHandle::new();
    let guidance_2 = SessionHandle::new();
    let free_1 = SessionHandle::new();
    let free_2 = SessionHandle::new();

    handler.begin_billing_session(ActiveGuidance, guidance_1);
    handler.begin_billing_session(FreeDrive, free_1);
    handler.begin_billing_session(ActiveGuidance, guidance_2);
    handler.begin_billing_session(FreeDrive, free_2);
    handler.pause_billing_session(free_1);
    handler.pause_billing_session(guidance_1);
    handler.resume_billing_session(guidance_1);
    handler.resume_billing_session(free_1);
    handler.pause_billing_session(free_1);
    handler.pause_billing_session(free_2);
    handler.resume_billing_session(free_1);
    handler.stop_billing_session(guidance_1);
    handler.stop_billing_session(guidance_2);
    handler.pause_billing_session(free_1);
    handler.pause_billing_session(free_2);
    handler.stop_billing_session(free_2);
    handler.stop_billing_session(free_1);
    handler.settle().await;

    assert_eq!(
        service.events(),
        vec![
            Begin(ActiveGuidance),
            Begin(FreeDrive),
            Pause(FreeDrive),
            Resume(FreeDrive),
            Stop(ActiveGuidance),
            Pause(FreeDrive),
            Stop(FreeDrive),
        ]
    );
}

#[tokio::test]
async fn test_pausing_while_sibling_stops_pauses_session() {
    let (service, handler) = setup();
    let free_1 = SessionHandle::new();
    let free_2 = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, free_1);
    handler.begin_billing_session(FreeDrive, free_2);
    handler.pause_billing_session(free_1);
    handler.stop_billing_session(free_2);
    handler.settle().await;

    assert_eq!(service.events(), vec![Begin(FreeDrive), Pause(FreeDrive)]);
    assert_eq!(handler.billing_status(FreeDrive), SessionState::Paused);
}

#[tokio::test]
async fn test_begin_with_paused_sibling_resumes() {
    let (service, handler) = setup();
    let free_1 = SessionHandle::new();
    let free_2 = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, free_1);
    handler.pause_billing_session(free_1);
    handler.begin_billing_session(FreeDrive, free_2);
    handler.settle().await;

    assert_eq!(
        service.events(),
        vec![Begin(FreeDrive), Pause(FreeDrive), Resume(FreeDrive)]
    );
    assert_eq!(handler.session_state(free_1), SessionState::Paused);
    assert_eq!(handler.session_state(free_2), SessionState::Running);
}

#[tokio::test]
async fn test_begin_with_paused_sibling_but_resume_failed() {
    let (service, handler) = setup();
    service.script(
        ScriptedCall::Resume,
        CallOutcome::Fail(BillingServiceError::ResumeFailed),
    );
    let free_1 = SessionHandle::new();
    let free_2 = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, free_1);
    handler.pause_billing_session(free_1);
    handler.begin_billing_session(FreeDrive, free_2);
    handler.settle().await;

    assert_eq!(
        service.events(),
        vec![
            Begin(FreeDrive),
            Pause(FreeDrive),
            Resume(FreeDrive),
            Begin(FreeDrive),
        ]
    );
    // The fresh session carries every handle of the type
    assert_eq!(handler.session_state(free_1), SessionState::Running);
    assert_eq!(handler.session_state(free_2), SessionState::Running);
    assert_eq!(service.session_status(FreeDrive), SessionState::Running);
}

#[tokio::test]
async fn test_resume_failed_issues_exactly_one_begin() {
    let (service, handler) = setup();
    service.script(
        ScriptedCall::Resume,
        CallOutcome::Fail(BillingServiceError::ResumeFailed),
    );
    let handle = SessionHandle::new();

    handler.begin_billing_session(ActiveGuidance, handle);
    handler.pause_billing_session(handle);
    handler.resume_billing_session(handle);
    handler.settle().await;

    assert_eq!(handler.session_state(handle), SessionState::Running);
    assert_eq!(handler.billing_status(ActiveGuidance), SessionState::Running);
    assert_eq!(
        service.events(),
        vec![
            Begin(ActiveGuidance),
            Pause(ActiveGuidance),
            Resume(ActiveGuidance),
            Begin(ActiveGuidance),
        ]
    );
}

#[tokio::test]
async fn test_two_sessions_with_resume_failed() {
    let (service, handler) = setup();
    service.script(
        ScriptedCall::Resume,
        CallOutcome::Fail(BillingServiceError::ResumeFailed),
    );
    let free_drive = SessionHandle::new();
    let guidance = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, free_drive);
    handler.begin_billing_session(ActiveGuidance, guidance);
    handler.pause_billing_session(guidance);
    handler.resume_billing_session(guidance);
    handler.settle().await;
    handler.stop_billing_session(guidance);
    handler.stop_billing_session(free_drive);
    handler.settle().await;

    assert_eq!(
        service.events(),
        vec![
            Begin(FreeDrive),
            Begin(ActiveGuidance),
            Pause(ActiveGuidance),
            Resume(ActiveGuidance),
            Begin(ActiveGuidance),
            Stop(ActiveGuidance),
            Stop(FreeDrive),
        ]
    );
}

#[tokio::test]
async fn test_resume_failure_after_stop_is_stale() {
    let (service, handler) = setup();
    service.script(ScriptedCall::Resume, CallOutcome::Hold);
    let handle = SessionHandle::new();

    handler.begin_billing_session(ActiveGuidance, handle);
    handler.pause_billing_session(handle);
    handler.resume_billing_session(handle);
    handler.stop_billing_session(handle);

    assert_eq!(service.release_held(Some(BillingServiceError::ResumeFailed)), 1);
    handler.settle().await;

    // Nobody wants the session anymore, so no compensation
    assert_eq!(
        service.events(),
        vec![
            Begin(ActiveGuidance),
            Pause(ActiveGuidance),
            Resume(ActiveGuidance),
            Stop(ActiveGuidance),
        ]
    );
    assert_eq!(handler.billing_status(ActiveGuidance), SessionState::Stopped);
}

#[tokio::test]
async fn test_begin_then_stop_before_completion() {
    let (service, handler) = setup();
    service.script(ScriptedCall::Begin, CallOutcome::Hold);
    let first = SessionHandle::new();

    handler.begin_billing_session(ActiveGuidance, first);
    assert_eq!(handler.session_state(first), SessionState::Running);
    handler.stop_billing_session(first);
    assert_eq!(handler.billing_status(ActiveGuidance), SessionState::Stopped);

    // A new trip begins before the first begin fails
    let second = SessionHandle::new();
    handler.begin_billing_session(ActiveGuidance, second);

    service.release_held(Some(BillingServiceError::Unknown));
    handler.settle().await;

    assert_eq!(handler.session_state(second), SessionState::Running);
    assert_eq!(
        service.events(),
        vec![
            Begin(ActiveGuidance),
            Stop(ActiveGuidance),
            Begin(ActiveGuidance),
        ]
    );
}

#[tokio::test]
async fn test_handle_joining_pending_begin_makes_no_call() {
    let (service, handler) = setup();
    service.script(ScriptedCall::Begin, CallOutcome::Hold);
    let a = SessionHandle::new();
    let b = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, a);
    handler.begin_billing_session(FreeDrive, b);
    assert_eq!(service.held_calls(), 1);

    service.release_held(None);
    handler.settle().await;

    assert_eq!(service.events(), vec![Begin(FreeDrive)]);
    assert_eq!(handler.active_handles(FreeDrive), 2);
}

#[tokio::test]
async fn test_late_begin_failure_drops_joined_handles() {
    let (service, handler) = setup();
    service.script(ScriptedCall::Begin, CallOutcome::Hold);
    let a = SessionHandle::new();
    let b = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, a);
    handler.begin_billing_session(FreeDrive, b);
    service.release_held(Some(BillingServiceError::Unknown));
    handler.settle().await;

    assert_eq!(handler.session_state(a), SessionState::Stopped);
    assert_eq!(handler.session_state(b), SessionState::Stopped);
    assert_eq!(handler.active_handles(FreeDrive), 0);

    // Stopping an orphaned handle issues nothing
    handler.stop_billing_session(a);
    handler.settle().await;
    assert_eq!(service.events(), vec![Begin(FreeDrive)]);
}

#[tokio::test]
async fn test_resume_failure_of_other_kind_drops_handles() {
    let (service, handler) = setup();
    service.script(
        ScriptedCall::Resume,
        CallOutcome::Fail(BillingServiceError::unavailable("offline")),
    );
    let handle = SessionHandle::new();

    handler.begin_billing_session(FreeDrive, handle);
    handler.pause_billing_session(handle);
    handler.resume_billing_session(handle);
    handler.settle().await;

    assert_eq!(handler.session_state(handle), SessionState::Stopped);
    assert_eq!(
        service.events(),
        vec![Begin(FreeDrive), Pause(FreeDrive), Resume(FreeDrive)]
    );
}

#[tokio::test]
async fn test_failed_compensation_drops_handles() {
    let (service, handler) = setup();
    service.script(
        ScriptedCall::Resume,
        CallOutcome::Fail(BillingServiceError::ResumeFailed),
    );
    // First begin succeeds, the compensating one fails
    service.script(ScriptedCall::Begin, CallOutcome::Succeed);
    service.script(
        ScriptedCall::Begin,
        CallOutcome::Fail(BillingServiceError::Unknown),
    );
    let handle = SessionHandle::new();

    handler.begin_billing_session(ActiveGuidance, handle);
    handler.pause_billing_session(handle);
    handler.resume_billing_session(handle);
    handler.settle().await;

    assert_eq!(handler.session_state(handle), SessionState::Stopped);
    assert_eq!(handler.service_sku_token(), "");
    assert_eq!(service.events().len(), 4);
}

#[tokio::test]
async fn test_force_new_session_per_leg() {
    let (service, handler) = setup();
    let handle = SessionHandle::new();
    let legs = 10;

    handler.begin_billing_session(ActiveGuidance, handle);
    for _ in 1..legs {
        handler.begin_new_billing_session_if_running(handle);
    }
    handler.stop_billing_session(handle);
    handler.settle().await;

    let mut expected = vec![Begin(ActiveGuidance); legs];
    expected.push(Stop(ActiveGuidance));
    assert_eq!(service.events(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_begins_share_one_session() {
    let (service, handler) = setup();
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<SessionHandle> = (0..threads).map(|_| SessionHandle::new()).collect();

    let workers: Vec<_> = handles
        .iter()
        .copied()
        .map(|handle| {
            let handler = handler.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                handler.begin_billing_session(ActiveGuidance, handle);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(handler.active_handles(ActiveGuidance), threads);

    let workers: Vec<_> = handles
        .iter()
        .copied()
        .map(|handle| {
            let handler = handler.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                handler.stop_billing_session(handle);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    handler.settle().await;

    assert_eq!(service.events(), vec![Begin(ActiveGuidance), Stop(ActiveGuidance)]);
    assert_eq!(handler.billing_status(ActiveGuidance), SessionState::Stopped);
}

/// Check a recorded call sequence is a valid walk of the billed session
/// state machine for every type
fn assert_valid_walk(events: &[ServiceEvent]) {
    let mut states = std::collections::HashMap::new();
    for event in events {
        let (session_type, from, to) = match *event {
            Begin(t) => (t, SessionState::Stopped, SessionState::Running),
            Pause(t) => (t, SessionState::Running, SessionState::Paused),
            Resume(t) => (t, SessionState::Paused, SessionState::Running),
            Stop(t) => (t, SessionState::Running, SessionState::Stopped),
        };
        let current = states.entry(session_type).or_insert(SessionState::Stopped);
        let valid = *current == from
            || matches!((*event, *current), (Stop(_), SessionState::Paused));
        assert!(valid, "{event:?} issued while {current} in {events:?}");
        *current = to;
    }
}

#[derive(Debug, Clone, Copy)]
enum WalkOp {
    Begin,
    Pause,
    Resume,
    Stop,
}

fn arb_walk_op() -> impl Strategy<Value = WalkOp> {
    prop_oneof![
        Just(WalkOp::Begin),
        Just(WalkOp::Pause),
        Just(WalkOp::Resume),
        Just(WalkOp::Stop),
    ]
}

/// Up to 40 steps over four handles, even ones guidance, odd ones free drive
fn arb_walk() -> impl Strategy<Value = Vec<(usize, WalkOp)>> {
    prop::collection::vec((0usize..4, arb_walk_op()), 0..40)
}

/// Replays a walk, stops every handle and returns the backend's calls
fn run_walk(steps: &[(usize, WalkOp)]) -> (Vec<ServiceEvent>, [SessionState; 4]) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let (service, handler) = setup();
        let handles: Vec<(SessionHandle, SessionType)> = (0..4)
            .map(|i| {
                let session_type = if i % 2 == 0 { ActiveGuidance } else { FreeDrive };
                (SessionHandle::new(), session_type)
            })
            .collect();

        for &(index, op) in steps {
            let (handle, session_type) = handles[index];
            match op {
                WalkOp::Begin => handler.begin_billing_session(session_type, handle),
                WalkOp::Pause => handler.pause_billing_session(handle),
                WalkOp::Resume => handler.resume_billing_session(handle),
                WalkOp::Stop => handler.stop_billing_session(handle),
            }
        }
        for (handle, _) in &handles {
            handler.stop_billing_session(*handle);
        }
        handler.settle().await;

        let states = [
            handler.billing_status(ActiveGuidance),
            handler.billing_status(FreeDrive),
            service.session_status(ActiveGuidance),
            service.session_status(FreeDrive),
        ];
        (service.events(), states)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_walks_never_double_begin(steps in arb_walk()) {
        let (events, states) = run_walk(&steps);
        assert_valid_walk(&events);
        prop_assert_eq!(states, [SessionState::Stopped; 4]);
    }
}
