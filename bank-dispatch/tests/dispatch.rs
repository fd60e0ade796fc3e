//! End-to-end dispatch behaviour through the public API

use std::time::Duration;

use bank_dispatch::testing::{HostEvent, TestRig};
use bank_dispatch::{
    assert_not_recorded, assert_recorded, count_recorded, Action, ActionId, BankCommand,
    BankConfig, BankId, Direction, Engine, EngineRuntime, PressOutcome, Response, RunSummary,
    Suppression,
};

const B1: BankId = BankId::new(1, 1);
const B2: BankId = BankId::new(1, 2);
const B3: BankId = BankId::new(2, 1);

fn add(engine: &mut Engine, bank: BankId, instance: &str, delay: u64) -> ActionId {
    engine.handle_command(BankCommand::AddAction {
        bank,
        direction: Direction::Press,
        instance_id: instance.into(),
        kind: "go".into(),
    });
    let id = engine
        .actions(bank, Direction::Press)
        .last()
        .expect("action was added")
        .id
        .clone();
    engine.handle_command(BankCommand::UpdateDelay {
        bank,
        direction: Direction::Press,
        id: id.clone(),
        delay,
    });
    id
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn relative_delays_accumulate() {
    let rig = TestRig::new();
    rig.instance("vmix", &["go"]);
    rig.banks.set(B1, BankConfig::default().relative(true));
    let mut engine = rig.ready_engine();
    let ids: Vec<_> = [100, 0, 200]
        .into_iter()
        .map(|delay| add(&mut engine, B1, "vmix", delay))
        .collect();
    rig.recorder.drain();

    engine.bank_pressed(B1, Direction::Press, None).unwrap();
    assert!(rig.recorder.drain_executed().is_empty());

    sleep_ms(150).await;
    engine.fire_expired();
    assert_eq!(rig.recorder.drain_executed(), ids[..2].to_vec());

    sleep_ms(100).await;
    engine.fire_expired();
    assert!(rig.recorder.drain_executed().is_empty());

    sleep_ms(100).await;
    engine.fire_expired();
    assert_eq!(rig.recorder.drain_executed(), vec![ids[2].clone()]);
}

#[tokio::test(start_paused = true)]
async fn absolute_zero_delays_run_synchronously() {
    let rig = TestRig::new();
    rig.instance("vmix", &["go"]);
    let mut engine = rig.ready_engine();
    let ids: Vec<_> = [100, 0, 200]
        .into_iter()
        .map(|delay| add(&mut engine, B1, "vmix", delay))
        .collect();
    rig.recorder.drain();

    let outcome = engine.bank_pressed(B1, Direction::Press, None).unwrap();
    assert_eq!(
        outcome,
        PressOutcome::Dispatched(RunSummary {
            immediate: 1,
            delayed: 2,
            skipped: 0,
            failed: 0
        })
    );
    assert_eq!(rig.recorder.drain_executed(), vec![ids[1].clone()]);

    sleep_ms(150).await;
    engine.fire_expired();
    sleep_ms(100).await;
    engine.fire_expired();
    assert_eq!(rig.recorder.drain_executed(), vec![ids[0].clone(), ids[2].clone()]);
}

#[test]
fn pruning_unsubscribes_exactly_once() {
    let rig = TestRig::new();
    rig.instance("vmix", &["go"]);
    rig.instance("atem", &["go"]);
    let mut engine = rig.ready_engine();
    let kept = add(&mut engine, B1, "vmix", 0);
    let gone = [add(&mut engine, B1, "atem", 0), add(&mut engine, B2, "atem", 50)];
    rig.recorder.drain();

    rig.registry.remove("atem");
    engine.remove_instance("atem");
    engine.remove_instance("atem");

    assert!(engine.actions_for_instance("atem").is_empty());
    assert_eq!(engine.actions_for_instance("vmix")[0].id, kept);
    let events = rig.recorder.drain();
    for id in &gone {
        assert_eq!(count_recorded!(events, HostEvent::Unsubscribed(u) if u == id), 1);
    }
    assert_not_recorded!(events, HostEvent::Unsubscribed(u) if *u == kept);
}

#[tokio::test(start_paused = true)]
async fn abort_all_redraws_each_bank_once() {
    let rig = TestRig::new();
    rig.instance("vmix", &["go"]);
    let mut engine = rig.ready_engine();
    for bank in [B1, B2, B3] {
        for delay in [100, 200, 300] {
            add(&mut engine, bank, "vmix", delay);
        }
        engine.bank_pressed(bank, Direction::Press, None).unwrap();
    }
    assert_eq!(engine.pending_timers(), 9);
    rig.recorder.drain();

    engine.abort_all();

    assert_eq!(engine.pending_timers(), 0);
    assert_eq!(engine.running_groups(), 0);
    let events = rig.recorder.drain();
    assert_eq!(count_recorded!(events, HostEvent::Invalidated(_)), 3);
    for bank in [B1, B2, B3] {
        assert!(!engine.is_running(bank));
    }

    sleep_ms(1_000).await;
    assert_eq!(engine.fire_expired(), 0);
}

#[test]
fn latch_sequence() {
    let rig = TestRig::new();
    rig.instance("vmix", &["go"]);
    rig.banks.set(B1, BankConfig::latching());
    let mut engine = rig.ready_engine();
    let down = add(&mut engine, B1, "vmix", 0);
    let up = {
        engine.handle_command(BankCommand::AddAction {
            bank: B1,
            direction: Direction::Release,
            instance_id: "vmix".into(),
            kind: "go".into(),
        });
        engine.actions(B1, Direction::Release)[0].id.clone()
    };
    rig.recorder.drain();

    engine.bank_pressed(B1, Direction::Press, Some("A")).unwrap();
    assert_eq!(rig.recorder.drain_executed(), vec![down]);

    assert_eq!(
        engine.bank_pressed(B1, Direction::Release, Some("A")).unwrap(),
        PressOutcome::Suppressed(Suppression::SkipNext)
    );
    assert_eq!(
        engine.bank_pressed(B1, Direction::Press, Some("A")).unwrap(),
        PressOutcome::Suppressed(Suppression::DuplicatePress)
    );
    assert!(rig.recorder.drain().is_empty());

    engine.bank_pressed(B1, Direction::Release, Some("A")).unwrap();
    let events = rig.recorder.drain();
    assert_recorded!(events, HostEvent::Indicated { pushed: false, .. });
    assert_recorded!(events, HostEvent::Executed { id, .. } if *id == up);
}

#[test]
fn status_notifies_on_change_only() {
    let rig = TestRig::new();
    let vmix = rig.instance("vmix", &["go"]);
    let mut engine = rig.ready_engine();
    add(&mut engine, B1, "vmix", 0);
    rig.recorder.drain();

    vmix.set_status(2);
    engine.instance_status_changed("vmix");
    assert_eq!(engine.bank_status(B1), Some(2));

    vmix.set_status(3);
    engine.instance_status_changed("vmix");
    engine.instance_status_changed("vmix");

    let events = rig.recorder.drain();
    assert_eq!(count_recorded!(events, HostEvent::StatusChanged { .. }), 2);
    assert_eq!(
        events.last(),
        Some(&HostEvent::StatusChanged {
            bank: B1,
            severity: 3
        })
    );
}

#[tokio::test]
async fn handle_drives_the_engine() {
    let rig = TestRig::new();
    rig.instance("vmix", &["go"]);
    let runtime = EngineRuntime::new(rig.engine());
    let handle = runtime.handle();
    let task = tokio::spawn(runtime.run());

    handle.instances_loaded(["vmix"]).unwrap();
    let response = handle
        .request(BankCommand::AddAction {
            bank: B1,
            direction: Direction::Press,
            instance_id: "vmix".into(),
            kind: "go".into(),
        })
        .await
        .unwrap();
    let id = response.actions().unwrap()[0].id.clone();

    handle.press(B1, Direction::Press, Some("sd")).unwrap();
    let defaults = handle
        .request(BankCommand::ActionDefaults {
            instance_id: "vmix".into(),
            kind: "go".into(),
        })
        .await
        .unwrap();
    assert!(matches!(defaults, Response::Defaults(Some(action)) if action.kind == "go"));

    let events = rig.recorder.drain();
    assert_recorded!(events, HostEvent::Executed { id: ran, device_id: Some(d), .. } if *ran == id && d == "sd");

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn named_groups_run_and_abort() {
    let rig = TestRig::new();
    rig.instance("vmix", &["go"]);
    let mut engine = rig.ready_engine();
    let actions = vec![
        Action::new("vmix", "go").with_delay(100),
        Action::new("vmix", "go").with_delay(100),
    ];

    engine
        .run_actions(&actions, "trigger:1".into(), true, None)
        .unwrap();
    assert_eq!(engine.pending_timers(), 2);
    assert!(engine.is_group_running(&"trigger:1".into()));

    sleep_ms(150).await;
    engine.fire_expired();
    assert_eq!(rig.recorder.drain_executed().len(), 1);

    engine.abort_all();
    sleep_ms(200).await;
    assert_eq!(engine.fire_expired(), 0);
    let events = rig.recorder.drain();
    assert_not_recorded!(events, HostEvent::Invalidated(_));
}
