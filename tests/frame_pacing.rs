use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use xr_frame_pacer::vr::simulated::{SimCall, SimFailure};
use xr_frame_pacer::vr::{Eye, SessionState, SimulatedRuntime, SwapchainDesc, XrSession};
use xr_frame_pacer::{SessionConfig, VrError, XrPlatform};

fn focused() -> (Arc<SimulatedRuntime>, XrPlatform, Arc<XrSession>) {
    let runtime = Arc::new(SimulatedRuntime::new());
    let platform =
        XrPlatform::initialize(runtime.clone(), SessionConfig::default()).expect("platform");
    let session = platform.create_session().expect("session");
    runtime.push_state(SessionState::Ready);
    runtime.push_state(SessionState::Focused);
    platform.poll_events().expect("poll");
    (runtime, platform, session)
}

#[test]
fn one_begin_and_one_end_leave_the_queue_empty() {
    let (runtime, _platform, session) = focused();
    runtime.set_should_render(false);
    session.begin_frame().expect("begin");
    assert_eq!(session.depth(), 1);
    session.end_frame().expect("end");
    assert_eq!(session.depth(), 0);
}

#[test]
fn queued_frames_retire_in_creation_order() {
    let (runtime, _platform, session) = focused();
    runtime.set_should_render(false);

    let begun: Vec<_> = (0..5)
        .map(|_| session.begin_frame().expect("begin").sequence)
        .collect();
    assert_eq!(session.depth(), 5);

    let retired: Vec<_> = (0..5)
        .map(|_| session.end_frame().expect("end"))
        .collect();
    assert_eq!(retired, begun);
    assert!(retired.windows(2).all(|pair| pair[0] < pair[1]));

    let display_times: Vec<_> = runtime
        .submissions()
        .iter()
        .map(|submission| submission.display_time)
        .collect();
    assert!(display_times.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn acquire_targets_the_newest_frame() {
    let (runtime, _platform, session) = focused();
    assert_eq!(
        session
            .create_eye_swapchain(SwapchainDesc::default())
            .expect("left"),
        Eye::Left
    );
    assert_eq!(
        session
            .create_eye_swapchain(SwapchainDesc::default())
            .expect("right"),
        Eye::Right
    );

    let first = session.begin_frame().expect("first");
    let second = session.begin_frame().expect("second");
    let newest = session.begin_frame().expect("newest");
    for eye in Eye::both() {
        session.acquire(eye).expect("acquire");
        session.present(eye).expect("present");
    }

    for older in [first, second] {
        assert!(matches!(
            session.end_frame(),
            Err(VrError::IncompleteFrame { sequence, .. }) if sequence == older.sequence
        ));
    }
    assert_eq!(session.end_frame().expect("newest"), newest.sequence);

    let submissions = runtime.submissions();
    assert_eq!(submissions.len(), 3);
    assert!(submissions[0].is_empty());
    assert!(submissions[1].is_empty());
    assert_eq!(submissions[2].views.len(), 2);
    assert_eq!(
        submissions[2].display_time,
        newest.timing.predicted_display_time
    );
}

#[test]
fn third_swapchain_fails_and_ready_resets_the_cursor() {
    let (runtime, platform, session) = focused();
    session
        .create_eye_swapchain(SwapchainDesc::default())
        .expect("left");
    session
        .create_eye_swapchain(SwapchainDesc::default())
        .expect("right");
    assert!(matches!(
        session.create_eye_swapchain(SwapchainDesc::default()),
        Err(VrError::EyeLimit(2))
    ));

    runtime.push_state(SessionState::Stopping);
    platform.poll_events().expect("poll");
    runtime.push_state(SessionState::Ready);
    platform.poll_events().expect("poll");

    assert_eq!(
        session
            .create_eye_swapchain(SwapchainDesc::default())
            .expect("left again"),
        Eye::Left
    );
    assert_eq!(runtime.live_swapchains(), 2);
}

#[test]
fn end_frame_on_an_empty_queue_is_rejected() {
    let (_runtime, _platform, session) = focused();
    assert!(matches!(session.end_frame(), Err(VrError::QueueEmpty)));
    assert!(session.is_running());
    assert_eq!(session.stats().frames_ended, 0);
}

#[test]
fn begin_and_end_on_separate_threads_stay_fifo() {
    let (runtime, _platform, session) = focused();
    runtime.set_should_render(false);
    let (tx, rx) = mpsc::channel();

    let producer_session = Arc::clone(&session);
    let producer = thread::spawn(move || {
        for _ in 0..20 {
            let ticket = producer_session.begin_frame().expect("begin");
            tx.send(ticket.sequence).expect("send ticket");
        }
    });

    let consumer_session = Arc::clone(&session);
    let consumer = thread::spawn(move || {
        let mut retired = Vec::new();
        for expected in rx {
            let sequence = consumer_session.end_frame().expect("end");
            assert_eq!(sequence, expected);
            retired.push(sequence);
        }
        retired
    });

    producer.join().expect("producer");
    let retired = consumer.join().expect("consumer");
    assert_eq!(retired.len(), 20);
    assert!(retired.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(session.depth(), 0);
}

#[test]
fn destroy_session_waits_for_the_queue_to_drain() {
    let (runtime, platform, session) = focused();
    runtime.set_should_render(false);
    session.begin_frame().expect("first");
    session.begin_frame().expect("second");
    assert_eq!(session.depth(), 2);

    let drainer_session = Arc::clone(&session);
    let drainer = thread::spawn(move || {
        for _ in 0..2 {
            thread::sleep(Duration::from_millis(40));
            drainer_session.end_frame().expect("end");
        }
    });

    let started = Instant::now();
    platform
        .destroy_session(Arc::clone(&session))
        .expect("destroy");
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(60), "returned after {waited:?}");
    assert_eq!(session.stats().frames_ended, 2);
    assert_eq!(runtime.submissions().len(), 2);
    assert_eq!(runtime.live_spaces(), 0);
    drainer.join().expect("drainer");
}

#[test]
fn failed_begin_leaves_frame_and_event_threads_live() {
    let (runtime, _platform, session) = focused();
    runtime.set_should_render(false);
    runtime.fail_next(SimCall::BeginFrame, SimFailure::Runtime("XR_ERROR_RUNTIME_FAILURE"));
    assert!(matches!(
        session.begin_frame(),
        Err(VrError::Runtime { call: "xrBeginFrame", .. })
    ));

    let (tx, rx) = mpsc::channel();
    let frame_session = Arc::clone(&session);
    thread::spawn(move || {
        let _ = tx.send(frame_session.begin_frame().map(|ticket| ticket.sequence));
    });
    rx.recv_timeout(Duration::from_secs(2))
        .expect("second begin returned")
        .expect("second begin");
    assert_eq!(session.depth(), 1);

    let (tx, rx) = mpsc::channel();
    let event_session = Arc::clone(&session);
    thread::spawn(move || {
        let _ = tx.send(event_session.handle_state_change(SessionState::Stopping));
    });
    rx.recv_timeout(Duration::from_secs(2))
        .expect("transition finished")
        .expect("stopping");
    assert_eq!(session.state(), SessionState::Stopping);
    assert_eq!(session.depth(), 0);
}

#[test]
fn failed_swapchain_creation_does_not_use_up_an_eye() {
    let (runtime, _platform, session) = focused();
    runtime.fail_next(
        SimCall::CreateSwapchain,
        SimFailure::Runtime("XR_ERROR_OUT_OF_MEMORY"),
    );
    assert!(matches!(
        session.create_eye_swapchain(SwapchainDesc::default()),
        Err(VrError::Runtime { call: "xrCreateSwapchain", .. })
    ));
    assert_eq!(runtime.live_swapchains(), 0);

    for expected in Eye::both() {
        assert_eq!(
            session
                .create_eye_swapchain(SwapchainDesc::default())
                .expect("create"),
            expected
        );
    }
    assert_eq!(runtime.live_swapchains(), 2);
}
