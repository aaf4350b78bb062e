use std::sync::{Arc, Mutex};
use std::time::Duration;

use immergas_modbus::controller::Controller;
use immergas_modbus::device::{Device, DeviceKind, DeviceState};
use immergas_modbus::pdu_registry::{PduEntry, PduRegistry, PduType};
use immergas_modbus::rtu_client::RtuClient;
use immergas_modbus_mock::{Fault, MockLink, RegisterBank};

fn small_registry() -> Arc<PduRegistry> {
    Arc::new(
        PduRegistry::from_entries(vec![
            PduEntry::new(100, 100, PduType::Temp).with_scale(0.1),
            PduEntry::new(101, 101, PduType::Flag8),
            PduEntry::new(103, 103, PduType::U32),
            PduEntry::new(200, 200, PduType::U8),
        ])
        .expect("valid registry"),
    )
}

fn value_of(ctl: &Controller<MockLink>, idx: usize) -> Option<DeviceState> {
    ctl.devices()[idx].state().cloned()
}

#[tokio::test]
async fn poll_tick_dispatches_values() {
    let bank = RegisterBank::new(1)
        .with_registers(100, &[215, 1, 0, 0x0001, 0x0002])
        .with_registers(200, &[2]);
    let client = RtuClient::new(MockLink::new(bank));
    let mut ctl = Controller::new(client, small_registry()).with_debug_logs(true);
    let flow = ctl.register(Device::new(DeviceKind::Sensor, "1", 100));
    let burner = ctl.register(Device::new(DeviceKind::BinarySensor, "1.2", 101));
    let hours = ctl.register(Device::new(DeviceKind::Sensor, "1", 103));
    let mode = ctl.register(Device::new(
        DeviceKind::Select {
            options: vec!["off".into(), "summer".into(), "winter".into()],
        },
        "1",
        200,
    ));
    ctl.setup();
    ctl.update().await;

    match ctl.device(flow).and_then(Device::state) {
        Some(DeviceState::Value(v)) => assert!((v - 21.5).abs() < 1e-4, "got {v}"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(value_of(&ctl, burner.index()), Some(DeviceState::On(true)));
    assert_eq!(value_of(&ctl, hours.index()), Some(DeviceState::Value(65_538.0)));
    assert_eq!(
        value_of(&ctl, mode.index()),
        Some(DeviceState::Option("winter".into()))
    );
}

#[tokio::test]
async fn one_scan_per_slave_per_tick() {
    let client = RtuClient::new(MockLink::new(RegisterBank::new(1)));
    let mut ctl = Controller::new(client, small_registry());
    ctl.register(Device::new(DeviceKind::Sensor, "1", 100));
    ctl.register(Device::new(DeviceKind::Sensor, "1.1", 103));
    ctl.update().await;
    // registry plans three batches: 100..101, 103..104 and 200
    assert_eq!(ctl.client_mut().link().request_count(), 3);
}

#[tokio::test]
async fn invalid_addresses_are_skipped() {
    let client = RtuClient::new(MockLink::new(RegisterBank::new(1).with_registers(100, &[50])))
        .with_read_timeout(Duration::from_millis(20));
    let mut ctl = Controller::new(client, small_registry());
    for addr in ["0", "", "abc", ".5", "248"] {
        ctl.register(Device::new(DeviceKind::Sensor, addr, 100));
    }
    let good = ctl.register(Device::new(DeviceKind::Sensor, "1", 100));
    ctl.update().await;
    assert_eq!(ctl.client_mut().link().request_count(), 3);
    assert!(ctl.devices()[..5].iter().all(|d| d.state().is_none()));
    match ctl.device(good).and_then(Device::state) {
        Some(DeviceState::Value(v)) => assert!((v - 5.0).abs() < 1e-4),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn failed_batch_keeps_previous_value_and_scan_continues() {
    let bank = RegisterBank::new(1)
        .with_registers(100, &[300])
        .with_registers(200, &[1]);
    let client = RtuClient::new(MockLink::new(bank)).with_read_timeout(Duration::from_millis(20));
    let mut ctl = Controller::new(client, small_registry());
    let temp = ctl.register(Device::new(DeviceKind::Sensor, "1", 100));
    let mode = ctl.register(Device::new(
        DeviceKind::Select {
            options: vec!["a".into(), "b".into()],
        },
        "1",
        200,
    ));
    ctl.update().await;
    assert_eq!(value_of(&ctl, mode.index()), Some(DeviceState::Option("b".into())));

    // first batch of the next tick fails, second still arrives
    ctl.client_mut().link_mut().push_fault(Fault::Silence);
    if let Some(bank) = ctl.client_mut().link().bank(1) {
        let mut bank = bank.lock().unwrap();
        bank.set(100, 999);
        bank.set(200, 0);
    }
    ctl.update().await;
    match ctl.device(temp).and_then(Device::state) {
        Some(DeviceState::Value(v)) => assert!((v - 30.0).abs() < 1e-4, "got {v}"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(value_of(&ctl, mode.index()), Some(DeviceState::Option("a".into())));
}

#[tokio::test]
async fn devices_on_different_slaves_are_scanned_separately() {
    let one = Arc::new(Mutex::new(RegisterBank::new(1).with_registers(100, &[10])));
    let two = Arc::new(Mutex::new(RegisterBank::new(2).with_registers(100, &[20])));
    let link = MockLink::silent().with_bank(one).with_bank(two);
    let mut ctl = Controller::new(RtuClient::new(link), small_registry());
    let a = ctl.register(Device::new(DeviceKind::Number, "1", 100));
    let b = ctl.register(Device::new(DeviceKind::Number, "2", 100));
    ctl.update().await;
    assert_eq!(ctl.client_mut().link().request_count(), 6);
    match (
        ctl.device(a).and_then(Device::state),
        ctl.device(b).and_then(Device::state),
    ) {
        (Some(DeviceState::Value(x)), Some(DeviceState::Value(y))) => {
            assert!((x - 1.0).abs() < 1e-4);
            assert!((y - 2.0).abs() < 1e-4);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn listener_observes_polled_values() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let client = RtuClient::new(MockLink::new(RegisterBank::new(1).with_registers(101, &[1])));
    let mut ctl = Controller::new(client, small_registry());
    ctl.register(
        Device::new(DeviceKind::Switch, "1", 101)
            .with_listener(move |s| sink.lock().unwrap().push(s.clone())),
    );
    ctl.update().await;
    ctl.update().await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![DeviceState::On(true), DeviceState::On(true)]
    );
}

#[tokio::test(start_paused = true)]
async fn run_polls_on_interval() {
    let client = RtuClient::new(MockLink::new(RegisterBank::new(1)));
    let mut ctl = Controller::new(client, small_registry());
    ctl.register(Device::new(DeviceKind::Sensor, "1", 100));
    // ticks at 0 s, 15 s and 30 s, three batches each
    let run = ctl.run(Duration::from_secs(15));
    let _ = tokio::time::timeout(Duration::from_secs(31), run).await;
    assert_eq!(ctl.client_mut().link().request_count(), 9);
}
