use super::*;
use crate::tests_support::{scheduler, ScriptedTransport};
use serde_json::json;
use shared::domain::{SessionId, SHOTS_PER_STRIP};
use tokio::time::Instant;

fn timings() -> CaptureTimings {
    CaptureTimings {
        countdown_ticks: 3,
        countdown_tick: Duration::from_secs(1),
        shot_settle: Duration::from_secs(2),
        finish_delay: Duration::from_secs(1),
    }
}

fn sequencer(
    transport: &Arc<ScriptedTransport>,
    policy: CapturePolicy,
) -> (CaptureSequencer, broadcast::Receiver<KioskEvent>) {
    let (events, rx) = broadcast::channel(128);
    let sequencer = CaptureSequencer::new(
        DeviceApi::new(transport.clone()),
        scheduler(),
        timings(),
        policy,
        events,
    );
    (sequencer, rx)
}

fn fresh_session() -> SessionState {
    let mut session = SessionState::new(1);
    session.begin(SessionId::new("s-1"));
    session
}

fn shot(path: &str) -> KioskResult<serde_json::Value> {
    Ok(json!({"status": "captured", "path": path}))
}

fn camera_fault() -> KioskResult<serde_json::Value> {
    Err(KioskError::Status {
        path: "/capture".to_string(),
        status: 500,
        message: "camera not ready".to_string(),
    })
}

#[tokio::test(start_paused = true)]
async fn four_successful_shots_finish_the_strip() {
    let transport = Arc::new(ScriptedTransport::new());
    for index in 1..=SHOTS_PER_STRIP {
        transport.reply("/capture", shot(&format!("captures/s-1_{index}.jpg")));
    }
    let (mut sequencer, mut rx) = sequencer(&transport, CapturePolicy::NoRetry);
    let mut session = fresh_session();

    let started = Instant::now();
    let outcome = sequencer
        .run(&mut session, &CancellationToken::new())
        .await
        .expect("capture");

    assert!(matches!(outcome, CaptureOutcome::Finished));
    assert_eq!(sequencer.state(), CaptureState::Finished);
    assert_eq!(
        session.photos(),
        &[
            "captures/s-1_1.jpg",
            "captures/s-1_2.jpg",
            "captures/s-1_3.jpg",
            "captures/s-1_4.jpg"
        ]
    );
    assert_eq!(transport.calls_to("/capture"), SHOTS_PER_STRIP);

    // 4 countdowns of 3s, 3 settle delays of 2s, 1s before review
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(19) && elapsed < Duration::from_millis(19_050));

    let mut ticks = Vec::new();
    let mut captured = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            KioskEvent::CountdownTick {
                shot_index,
                remaining,
            } => ticks.push((shot_index, remaining)),
            KioskEvent::ShotCaptured(shot) => captured.push(shot.index),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(&ticks[..4], &[(0, 3), (0, 2), (0, 1), (0, 0)]);
    assert_eq!(ticks.len(), 4 * SHOTS_PER_STRIP);
    assert_eq!(captured, vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn failed_shot_stalls_without_advancing_and_resumes_on_rerun() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply("/capture", shot("captures/a.jpg"));
    transport.reply("/capture", camera_fault());
    transport.reply("/capture", shot("captures/b.jpg"));
    let (mut sequencer, mut rx) = sequencer(&transport, CapturePolicy::NoRetry);
    let mut session = fresh_session();
    let token = CancellationToken::new();

    let outcome = sequencer.run(&mut session, &token).await.expect("capture");
    match outcome {
        CaptureOutcome::Stalled { shot_index, error } => {
            assert_eq!(shot_index, 1);
            assert!(matches!(error, KioskError::Status { status: 500, .. }));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(session.photos().len(), 1);
    assert_eq!(transport.calls_to("/capture"), 2);
    let mut stalled = false;
    while let Ok(event) = rx.try_recv() {
        if let KioskEvent::CaptureStalled { shot_index, .. } = event {
            assert_eq!(shot_index, 1);
            stalled = true;
        }
    }
    assert!(stalled);

    let outcome = sequencer.run(&mut session, &token).await.expect("resume");
    assert!(matches!(outcome, CaptureOutcome::Finished));
    assert_eq!(session.photos().len(), SHOTS_PER_STRIP);
    assert_eq!(transport.calls_to("/capture"), 5);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_repeats_the_same_shot() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply("/capture", camera_fault());
    transport.reply("/capture", shot("captures/a.jpg"));
    let (mut sequencer, _rx) =
        sequencer(&transport, CapturePolicy::RetryShot { max_attempts: 2 });
    let mut session = fresh_session();

    let outcome = sequencer
        .run(&mut session, &CancellationToken::new())
        .await
        .expect("capture");
    assert!(matches!(outcome, CaptureOutcome::Finished));
    assert_eq!(session.photos().len(), SHOTS_PER_STRIP);
    assert_eq!(transport.calls_to("/capture"), 5);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_gives_up_after_max_attempts() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.reply("/capture", camera_fault());
    let (mut sequencer, _rx) =
        sequencer(&transport, CapturePolicy::RetryShot { max_attempts: 3 });
    let mut session = fresh_session();

    let outcome = sequencer
        .run(&mut session, &CancellationToken::new())
        .await
        .expect("capture");
    assert!(matches!(
        outcome,
        CaptureOutcome::Stalled { shot_index: 0, .. }
    ));
    assert_eq!(transport.calls_to("/capture"), 3);
    assert!(session.photos().is_empty());
    assert_eq!(sequencer.state(), CaptureState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_countdown_stops_before_any_capture() {
    let transport = Arc::new(ScriptedTransport::healthy_device());
    let (mut sequencer, _rx) = sequencer(&transport, CapturePolicy::NoRetry);
    let mut session = fresh_session();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        trigger.cancel();
    });

    let err = sequencer
        .run(&mut session, &token)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, KioskError::Cancelled));
    assert_eq!(transport.calls_to("/capture"), 0);
    assert!(session.photos().is_empty());
    assert_eq!(sequencer.state(), CaptureState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_in_flight_capture_discards_the_result() {
    let transport = Arc::new(ScriptedTransport::healthy_device());
    transport.delay("/capture", Duration::from_secs(5));
    let (mut sequencer, _rx) = sequencer(&transport, CapturePolicy::NoRetry);
    let mut session = fresh_session();
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        trigger.cancel();
    });

    let err = sequencer
        .run(&mut session, &token)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, KioskError::Cancelled));
    assert_eq!(transport.calls_to("/capture"), 1);
    assert!(session.photos().is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_strip_never_takes_a_fifth_shot() {
    let transport = Arc::new(ScriptedTransport::healthy_device());
    let (mut sequencer, _rx) = sequencer(&transport, CapturePolicy::NoRetry);
    let mut session = fresh_session();
    for index in 0..SHOTS_PER_STRIP {
        session
            .append_photo(format!("captures/{index}.jpg"))
            .expect("append");
    }

    let outcome = sequencer
        .run(&mut session, &CancellationToken::new())
        .await
        .expect("capture");
    assert!(matches!(outcome, CaptureOutcome::Finished));
    assert_eq!(transport.calls_to("/capture"), 0);
    assert_eq!(session.photos().len(), SHOTS_PER_STRIP);
}
