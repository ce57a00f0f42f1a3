use std::{sync::Arc, time::Duration};

use config::Settings;
use giftkey_engine::{
    Backends, Engine, EngineDeps, FixedFocus, ProducerEvent, RawGift, RawLike,
    test_support::{ScriptedProducers, drain, drain_kinds, recv_until},
};
use giftkey_protocol::{
    ConnectionStatus, MappingSpec, MsgFromObserver, MsgToObserver, StackingMode,
    ipc::{ObserverRx, observer_channel},
};
use inject::{Call, MouseButton, RecordingBackend, Target};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

/// Engine wired to recording collaborators.
struct Harness {
    engine: Engine,
    rx: ObserverRx,
    backend: Arc<RecordingBackend>,
    producers: Arc<ScriptedProducers>,
}

fn harness_with(settings: Settings, focus: FixedFocus) -> Harness {
    let (tx, rx) = observer_channel();
    let backend = Arc::new(RecordingBackend::new());
    let producers = ScriptedProducers::new();
    let engine = Engine::new(
        EngineDeps {
            settings,
            backends: Backends::single(backend.clone()),
            focus: Arc::new(focus),
            producers: producers.clone(),
        },
        tx,
    );
    Harness {
        engine,
        rx,
        backend,
        producers,
    }
}

fn harness() -> Harness {
    harness_with(Settings::default(), FixedFocus::always_ok())
}

fn mapping(v: Value) -> MappingSpec {
    serde_json::from_value(v).unwrap()
}

fn gift(name: &str) -> RawGift {
    RawGift {
        gift_name: name.into(),
        unique_id: Some("viewer".into()),
        gift_type: 0,
        ..RawGift::default()
    }
}

fn streak(name: &str, count: i64, end: bool) -> RawGift {
    RawGift {
        gift_type: 1,
        repeat_count: Some(count),
        repeat_end: end,
        ..gift(name)
    }
}

fn key(k: &str) -> Target {
    Target::Key(k.into())
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn rose_three_times_holds_a_three_times_in_order() {
    let h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationSec": 1, "cooldownMs": 0}})));
    for _ in 0..3 {
        h.engine.on_gift(&gift("Rose")).await;
    }
    h.engine.idle().await.unwrap();

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 3);
    for c in &calls {
        assert_eq!(
            c.call,
            Call::Hold {
                target: key("a"),
                duration: ms(1000)
            }
        );
    }
    for pair in calls.windows(2) {
        assert!(pair[1].started >= pair[0].finished.unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn cooldown_drops_second_gift_within_window() {
    let h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 100, "cooldownMs": 1000}})));
    h.engine.on_gift(&gift("rose")).await;
    sleep(ms(500)).await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 1);

    sleep(ms(1000)).await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn paused_gifts_do_nothing_and_leave_cooldowns_untouched() {
    let mut h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "cooldownMs": 5000}})));
    h.engine
        .handle(MsgFromObserver::TogglePause { paused: true })
        .await;
    for _ in 0..3 {
        h.engine.on_gift(&gift("rose")).await;
    }
    h.engine.idle().await.unwrap();
    assert!(h.backend.calls().is_empty());
    assert!(h.engine.dispatcher().cooldowns().is_empty());
    assert!(drain_kinds(&mut h.rx).contains(&"pause-updated"));

    h.engine
        .handle(MsgFromObserver::TogglePause { paused: false })
        .await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn mapping_update_replaces_wholesale() {
    let mut h = harness();
    h.engine
        .handle(MsgFromObserver::UpdateMapping {
            mapping: mapping(json!({"rose": {"key": "a", "durationMs": 10}})),
        })
        .await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();

    h.engine
        .handle(MsgFromObserver::UpdateMapping {
            mapping: mapping(json!({"lion": {"key": "b", "durationMs": 10}})),
        })
        .await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.on_gift(&gift("Lion")).await;
    h.engine.idle().await.unwrap();

    let targets: Vec<Target> = h
        .backend
        .ops()
        .into_iter()
        .map(|c| match c {
            Call::Hold { target, .. } => target,
            other => panic!("unexpected call {other:?}"),
        })
        .collect();
    assert_eq!(targets, vec![key("a"), key("b")]);
    let updates = drain(&mut h.rx)
        .into_iter()
        .filter(|m| matches!(m, MsgToObserver::MappingUpdated { .. }))
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test(start_paused = true)]
async fn streak_ticks_dispatch_deltas() {
    let mut h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 50}})));
    for (count, end) in [(1, false), (3, false), (3, false), (7, false), (7, false), (7, true)] {
        h.engine.on_gift(&streak("Rose", count, end)).await;
    }
    h.engine.idle().await.unwrap();

    let incs: Vec<u32> = drain(&mut h.rx)
        .into_iter()
        .filter_map(|m| match m {
            MsgToObserver::Gift { count_inc, .. } => Some(count_inc),
            _ => None,
        })
        .collect();
    assert_eq!(incs, vec![1, 2, 4]);
    assert_eq!(
        h.backend.ops(),
        vec![
            Call::Hold {
                target: key("a"),
                duration: ms(50)
            },
            Call::Batch {
                target: key("a"),
                count: 2,
                spacing: ms(10)
            },
            Call::Batch {
                target: key("a"),
                count: 4,
                spacing: ms(10)
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn mouse_multi_count_runs_sequentially() {
    let h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "right_click", "durationMs": 100}})));
    h.engine.on_gift(&streak("rose", 3, true)).await;
    h.engine.idle().await.unwrap();
    let ops = h.backend.ops();
    assert_eq!(ops.len(), 3);
    assert!(ops.iter().all(|c| *c
        == Call::Hold {
            target: Target::Mouse(MouseButton::Right),
            duration: ms(100)
        }));
}

#[tokio::test(start_paused = true)]
async fn stack_window_slides_and_flushes_once() {
    let mut h = harness();
    h.engine.set_mapping(mapping(json!({"rose": {
        "key": "a", "durationMs": 100,
        "stacking": {"enabled": true, "windowMs": 2000, "mode": "batch"}
    }})));
    let t0 = Instant::now();
    h.engine.on_gift(&gift("rose")).await;
    sleep(ms(1000)).await;
    h.engine.on_gift(&gift("rose")).await;
    sleep(ms(900)).await;
    h.engine.on_gift(&gift("rose")).await;

    let done = recv_until(&mut h.rx, Duration::from_secs(10), |m| {
        matches!(m, MsgToObserver::GiftStackComplete { .. })
    })
    .await
    .unwrap();
    assert_eq!(
        done,
        MsgToObserver::GiftStackComplete {
            gift_name: "rose".into(),
            count: 3,
            mode: StackingMode::Batch
        }
    );
    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].started - t0, ms(3900));
    assert_eq!(
        calls[0].call,
        Call::Batch {
            target: key("a"),
            count: 3,
            spacing: ms(10)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn max_stack_flushes_immediately_with_full_total() {
    let h = harness();
    h.engine.set_mapping(mapping(json!({"lion": {
        "key": "d", "durationMs": 100,
        "stacking": {"enabled": true, "windowMs": 2000, "maxStack": 5}
    }})));
    let t0 = Instant::now();
    h.engine.on_gift(&streak("lion", 3, false)).await;
    h.engine.on_gift(&streak("lion", 7, true)).await;
    sleep(ms(1)).await;
    h.engine.idle().await.unwrap();

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].started - t0 < ms(10));
    assert_eq!(
        calls[0].call,
        Call::Hold {
            target: key("d"),
            duration: ms(700)
        }
    );
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabling_stacking_flushes_pending_stacks() {
    let mut h = harness();
    h.engine.set_mapping(mapping(json!({"rose": {
        "key": "a", "durationMs": 100,
        "stacking": {"enabled": true, "windowMs": 60000, "mode": "sequential"}
    }})));
    h.engine.on_gift(&gift("rose")).await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.engine.stacker().count("rose"), Some(2));

    h.engine
        .handle(MsgFromObserver::SetStackingMode { enabled: false })
        .await;
    sleep(ms(1)).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 2);
    assert!(!h.engine.stacker().is_active("rose"));
    let kinds = drain_kinds(&mut h.rx);
    assert!(kinds.contains(&"stacking-mode-updated"));
    assert!(kinds.contains(&"gift-stack-complete"));

    // With stacking off the same gift executes directly.
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn focus_mismatch_warns_and_skips() {
    let mut h = harness_with(Settings::default(), FixedFocus::window("Notepad", "notepad.exe"));
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a"}})));
    h.engine
        .handle(MsgFromObserver::SetTargetWindow {
            keyword: "Minecraft".into(),
        })
        .await;
    assert_eq!(h.backend.window_keyword(), "minecraft");
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert!(h.backend.calls().is_empty());

    let warning = recv_until(&mut h.rx, ms(100), |m| {
        matches!(m, MsgToObserver::FocusWarning { .. })
    })
    .await
    .unwrap();
    assert_eq!(
        warning,
        MsgToObserver::FocusWarning {
            expected: "minecraft".into(),
            active_title: Some("Notepad".into()),
            active_owner: Some("notepad.exe".into()),
        }
    );

    h.engine
        .handle(MsgFromObserver::SetTargetWindow {
            keyword: "notepad".into(),
        })
        .await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn injection_failures_do_not_stop_the_queue() {
    let h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 10, "cooldownMs": 1000}})));
    h.backend.set_failing(true);
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert!(h.engine.dispatcher().cooldowns().is_empty());

    h.backend.set_failing(false);
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].finished.is_some());
}

#[tokio::test(start_paused = true)]
async fn hung_injection_times_out_after_grace() {
    let settings = Settings {
        inject_grace: ms(1000),
        ..Settings::default()
    };
    let h = harness_with(settings, FixedFocus::always_ok());
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationSec": 1}})));
    h.backend.set_stall(Duration::from_secs(3600));
    let t0 = Instant::now();
    h.engine.on_gift(&gift("rose")).await;
    h.engine.on_gift(&gift("rose")).await;
    sleep(ms(2500)).await;

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].started - t0, ms(2000));
    assert!(calls[0].finished.is_none());
    // The timed-out hold is released when the queue moves on.
    assert_eq!(calls[0].released, Some(t0 + ms(2000)));
}

#[tokio::test(start_paused = true)]
async fn stack_windows_run_from_arrival_while_queue_is_busy() {
    let mut h = harness();
    h.engine.set_mapping(mapping(json!({
        "lion": {"key": "b", "durationSec": 5, "cooldownMs": 0},
        "rose": {
            "key": "a", "durationMs": 100, "cooldownMs": 0,
            "stacking": {"enabled": true, "mode": "batch", "windowMs": 2000}
        }
    })));
    h.engine.on_gift(&gift("lion")).await;
    sleep(ms(100)).await;
    h.engine.on_gift(&gift("rose")).await;
    sleep(ms(2400)).await;
    h.engine.on_gift(&gift("rose")).await;

    let mut completed = Vec::new();
    for _ in 0..2 {
        let done = recv_until(&mut h.rx, Duration::from_secs(10), |m| {
            matches!(m, MsgToObserver::GiftStackComplete { .. })
        })
        .await
        .unwrap();
        completed.push(done);
    }
    h.engine.idle().await.unwrap();

    let single = MsgToObserver::GiftStackComplete {
        gift_name: "rose".into(),
        count: 1,
        mode: StackingMode::Batch,
    };
    assert_eq!(completed, vec![single.clone(), single]);
    assert_eq!(
        h.backend.ops(),
        vec![
            Call::Hold {
                target: key("b"),
                duration: ms(5000)
            },
            Call::Hold {
                target: key("a"),
                duration: ms(100)
            },
            Call::Hold {
                target: key("a"),
                duration: ms(100)
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn queued_gift_rechecks_cooldown_before_running() {
    let h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 100, "cooldownMs": 1000}})));
    // Both arrive before either has run, so only the queued re-check can drop one.
    h.engine.on_gift(&gift("rose")).await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pausing_with_a_pending_stack_still_completes_it() {
    let mut h = harness();
    h.engine.set_mapping(mapping(json!({"rose": {
        "key": "a", "durationMs": 100,
        "stacking": {"enabled": true, "windowMs": 2000, "mode": "sequential"}
    }})));
    h.engine.on_gift(&gift("rose")).await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine
        .handle(MsgFromObserver::TogglePause { paused: true })
        .await;

    let done = recv_until(&mut h.rx, Duration::from_secs(5), |m| {
        matches!(m, MsgToObserver::GiftStackComplete { .. })
    })
    .await
    .unwrap();
    assert_eq!(
        done,
        MsgToObserver::GiftStackComplete {
            gift_name: "rose".into(),
            count: 2,
            mode: StackingMode::Sequential
        }
    );
    h.engine.idle().await.unwrap();
    assert!(h.backend.calls().is_empty());
    assert!(!h.engine.stacker().is_active("rose"));
    assert!(h.engine.dispatcher().cooldowns().is_empty());
}

#[tokio::test(start_paused = true)]
async fn oversized_observer_durations_saturate() {
    let h = harness();
    h.engine
        .handle(MsgFromObserver::UpdateMapping {
            mapping: mapping(json!({
                "rose": {"key": "a", "durationMs": 1e300, "cooldownMs": 1e25}
            })),
        })
        .await;
    let action = h.engine.session().mapping.get("rose").cloned().unwrap();
    assert_eq!(action.action.duration(), Duration::MAX);
    assert_eq!(action.cooldown, Duration::MAX);

    h.engine
        .handle(MsgFromObserver::LikeKey {
            key: "w".into(),
            duration_ms: Some(1e300),
        })
        .await;
    sleep(ms(1)).await;
    assert_eq!(
        h.backend.ops(),
        vec![Call::Hold {
            target: key("w"),
            duration: Duration::MAX
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn like_triggers_fire_on_threshold_crossings() {
    let mut h = harness();
    h.engine
        .handle(MsgFromObserver::UpdateLikeTriggers {
            triggers: serde_json::from_value(json!([
                {"threshold": 10, "key": "Space", "durationMs": 200}
            ]))
            .unwrap(),
        })
        .await;
    h.engine.on_like(&RawLike {
        like_count: Some(5),
        unique_id: None,
    });
    h.engine.on_like(&RawLike {
        like_count: Some(6),
        unique_id: None,
    });
    h.engine.on_like(&RawLike::default());
    h.engine.idle().await.unwrap();

    assert_eq!(
        h.backend.ops(),
        vec![Call::Hold {
            target: key("space"),
            duration: ms(200)
        }]
    );
    let totals: Vec<(u64, u64)> = drain(&mut h.rx)
        .into_iter()
        .filter_map(|m| match m {
            MsgToObserver::Like {
                like_count,
                total_likes,
            } => Some((like_count, total_likes)),
            _ => None,
        })
        .collect();
    assert_eq!(totals, vec![(5, 5), (6, 11), (1, 12)]);

    let reply = h.engine.handle(MsgFromObserver::ResetLikeCounts).await;
    assert_eq!(
        reply,
        Some(MsgToObserver::ResetSuccess {
            message: "Like counts reset successfully".into()
        })
    );
    assert_eq!(
        drain(&mut h.rx),
        vec![MsgToObserver::Like {
            like_count: 0,
            total_likes: 0
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn like_key_and_test_like_trigger() {
    let h = harness();
    h.engine
        .handle(MsgFromObserver::LikeKey {
            key: "W".into(),
            duration_ms: None,
        })
        .await;
    h.engine.idle().await.unwrap();
    assert_eq!(
        h.backend.ops(),
        vec![Call::Hold {
            target: key("w"),
            duration: ms(300)
        }]
    );

    let t0 = Instant::now();
    h.engine
        .handle(MsgFromObserver::TestLikeTrigger {
            trigger_key: Some(" e ".into()),
            target_likes: Some(100),
        })
        .await;
    sleep(ms(3001)).await;
    h.engine.idle().await.unwrap();
    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].started - t0, ms(3000));
    assert_eq!(
        calls[1].call,
        Call::Hold {
            target: key("e"),
            duration: ms(1000)
        }
    );

    // Incomplete requests are ignored.
    h.engine
        .handle(MsgFromObserver::TestLikeTrigger {
            trigger_key: Some("e".into()),
            target_likes: Some(0),
        })
        .await;
    sleep(ms(5000)).await;
    assert_eq!(h.backend.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_gift_runs_after_delay_through_full_path() {
    let mut h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 10}})));
    let t0 = Instant::now();
    h.engine
        .handle(MsgFromObserver::TestGift {
            gift_name: "ROSE".into(),
            delay_ms: 500,
        })
        .await;
    sleep(ms(600)).await;
    h.engine.idle().await.unwrap();
    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].started - t0, ms(500));
    // Simulated gifts are not broadcast as gift events.
    assert!(!drain_kinds(&mut h.rx).contains(&"gift"));
}

#[tokio::test(start_paused = true)]
async fn injection_mode_switch_and_unknown_mode() {
    let mut h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 100}})));
    h.engine
        .handle(MsgFromObserver::SetInjectionMode {
            mode: "nodesender_repeat".into(),
        })
        .await;
    h.engine
        .handle(MsgFromObserver::SetInjectionMode {
            mode: "telepathy".into(),
        })
        .await;
    h.engine.on_gift(&gift("rose")).await;
    h.engine.idle().await.unwrap();
    assert_eq!(
        h.backend.ops(),
        vec![Call::TapRepeat {
            target: key("a"),
            interval: ms(20),
            total: ms(100)
        }]
    );
    let modes = drain_kinds(&mut h.rx)
        .into_iter()
        .filter(|k| *k == "injection-mode-updated")
        .count();
    assert_eq!(modes, 1);
}

#[tokio::test(start_paused = true)]
async fn connect_flow_and_lifecycle_events() {
    let mut h = harness();
    let reply = h
        .engine
        .handle(MsgFromObserver::ConnectTiktok {
            username: "  ".into(),
        })
        .await;
    assert_eq!(
        reply,
        Some(MsgToObserver::ConnectionError {
            error: "Username is required".into()
        })
    );

    let reply = h
        .engine
        .handle(MsgFromObserver::ConnectTiktok {
            username: "streamer".into(),
        })
        .await;
    assert_eq!(
        reply,
        Some(MsgToObserver::ConnectionSuccess {
            username: "streamer".into()
        })
    );
    let snap = h.engine.connection().snapshot();
    assert_eq!(snap.status, ConnectionStatus::Connected);
    assert!(snap.is_live);
    let statuses: Vec<ConnectionStatus> = drain(&mut h.rx)
        .into_iter()
        .filter_map(|m| match m {
            MsgToObserver::ConnectionStatus { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );

    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 10}})));
    let sink = h.producers.last_sink().unwrap();
    assert!(sink.emit(ProducerEvent::Gift(gift("rose"))));
    assert!(sink.emit(ProducerEvent::StreamEnd));
    sleep(ms(1)).await;
    h.engine.idle().await.unwrap();
    assert_eq!(h.backend.calls().len(), 1);
    let kinds: Vec<&str> = drain_kinds(&mut h.rx)
        .into_iter()
        .filter(|k| *k != "mapping-updated")
        .collect();
    assert_eq!(kinds, vec!["gift", "stream-end", "connection-status"]);
    let snap = h.engine.connection().snapshot();
    assert_eq!(snap.status, ConnectionStatus::Connected);
    assert!(!snap.is_live);

    let reply = h.engine.handle(MsgFromObserver::GetConnectionStatus).await;
    assert!(matches!(
        reply,
        Some(MsgToObserver::ConnectionStatus { is_live: false, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_connect_reports_error_state() {
    let h = harness();
    h.producers.fail_next("user is offline");
    let reply = h
        .engine
        .handle(MsgFromObserver::ConnectTiktok {
            username: "ghost".into(),
        })
        .await;
    assert_eq!(reply, None);
    let snap = h.engine.connection().snapshot();
    assert_eq!(snap.status, ConnectionStatus::Error);
    assert_eq!(snap.error.as_deref(), Some("user is offline"));
    assert!(!snap.is_live);
}

#[tokio::test(start_paused = true)]
async fn reconnect_ignores_events_from_replaced_producer() {
    let h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 10}})));
    assert!(h.engine.connect("first").await);
    let old = h.producers.last_sink().unwrap();
    assert!(h.engine.connect("second").await);
    assert_eq!(h.producers.disconnects(), 1);
    assert_eq!(h.producers.usernames(), vec!["first", "second"]);

    old.emit(ProducerEvent::Gift(gift("rose")));
    old.emit(ProducerEvent::Disconnected);
    sleep(ms(1)).await;
    h.engine.idle().await.unwrap();
    assert!(h.backend.calls().is_empty());
    assert_eq!(
        h.engine.connection().snapshot().status,
        ConnectionStatus::Connected
    );

    h.engine.handle(MsgFromObserver::DisconnectTiktok).await;
    let snap = h.engine.connection().snapshot();
    assert_eq!(snap.status, ConnectionStatus::Disconnected);
    assert_eq!(snap.error, None);
    assert_eq!(h.producers.disconnects(), 2);
}

#[tokio::test(start_paused = true)]
async fn init_snapshot_and_catalog() {
    let h = harness();
    h.engine
        .set_mapping(mapping(json!({"rose": {"key": "a", "durationMs": 10}})));
    h.engine.on_gift(&RawGift {
        diamond_count: 1,
        gift_picture_url: Some("https://img/rose.png".into()),
        ..gift("Rose")
    })
    .await;
    h.engine.idle().await.unwrap();

    let MsgToObserver::Init {
        mapping,
        paused,
        total_likes,
        connection_status,
        stacking_enabled,
        ..
    } = h.engine.snapshot()
    else {
        panic!("expected init");
    };
    assert!(mapping.contains_key("rose"));
    assert!(!paused);
    assert_eq!(total_likes, 0);
    assert_eq!(connection_status, ConnectionStatus::Disconnected);
    assert!(stacking_enabled);

    let Some(MsgToObserver::GiftCatalog { gifts }) =
        h.engine.handle(MsgFromObserver::GetGiftCatalog).await
    else {
        panic!("expected catalog");
    };
    assert_eq!(gifts.len(), 1);
    assert_eq!(gifts[0].name, "Rose");
    assert_eq!(gifts[0].image_url.as_deref(), Some("https://img/rose.png"));
}
