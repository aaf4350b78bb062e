use std::sync::Arc;
use std::time::Duration;

use immergas_modbus::controller::Controller;
use immergas_modbus::device::{Device, DeviceCommand, DeviceHandle, DeviceKind, DeviceState};
use immergas_modbus::error::ModbusError;
use immergas_modbus::pdu_registry::{PduEntry, PduRegistry, PduType};
use immergas_modbus::rtu_client::RtuClient;
use immergas_modbus_mock::{Fault, LinkEvent, MockLink, RegisterBank};

fn controller(link: MockLink) -> Controller<MockLink> {
    let registry = Arc::new(PduRegistry::embedded().expect("embedded table"));
    let client = RtuClient::new(link).with_write_timeout(Duration::from_millis(30));
    Controller::new(client, registry)
}

fn written_frames(ctl: &mut Controller<MockLink>) -> Vec<Vec<u8>> {
    ctl.client_mut()
        .link()
        .events()
        .iter()
        .filter_map(|e| match e {
            LinkEvent::Write(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

fn register(ctl: &mut Controller<MockLink>, slave: u8, addr: u16) -> Option<u16> {
    let bank = ctl.client_mut().link().bank(slave)?;
    let value = bank.lock().unwrap().get(addr);
    value
}

#[tokio::test]
async fn write_setpoint_by_value() {
    let mut ctl = controller(MockLink::new(RegisterBank::new(1)));
    assert!(ctl.write_pdu_by_value(1, 3002, 55.5).await);
    assert_eq!(register(&mut ctl, 1, 3002), Some(555));
    let frames = written_frames(&mut ctl);
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0][..9], &[0x01, 0x10, 0x0B, 0xBA, 0x00, 0x01, 0x02, 0x02, 0x2B]);
}

#[tokio::test]
async fn write_float_spans_two_registers() {
    let mut ctl = controller(MockLink::new(RegisterBank::new(1)));
    assert!(ctl.write_pdu_by_value(1, 3010, 1.5).await);
    assert_eq!(register(&mut ctl, 1, 3010), Some(0x3FC0));
    assert_eq!(register(&mut ctl, 1, 3011), Some(0x0000));
}

#[tokio::test]
async fn unknown_pdu_is_rejected_without_bus_traffic() {
    let mut ctl = controller(MockLink::new(RegisterBank::new(1)));
    assert!(!ctl.write_pdu_by_value(1, 0x7FFF, 1.0).await);
    assert!(matches!(
        ctl.try_write_pdu_by_value(1, 0x7FFF, 1.0).await,
        Err(ModbusError::UnknownPdu(0x7FFF))
    ));
    assert_eq!(ctl.client_mut().link().request_count(), 0);
}

#[tokio::test]
async fn writable_flag_does_not_gate_writes() {
    let registry = PduRegistry::from_entries(vec![PduEntry::new(3002, 3002, PduType::U16)])
        .expect("valid registry");
    let client = RtuClient::new(MockLink::new(RegisterBank::new(1)));
    let mut ctl = Controller::new(client, Arc::new(registry));
    assert!(ctl.write_pdu_by_value(1, 3002, 42.0).await);
    assert_eq!(ctl.client_mut().link().request_count(), 1);
    assert_eq!(register(&mut ctl, 1, 3002), Some(42));
}

#[tokio::test]
async fn invalid_slave_is_rejected() {
    let mut ctl = controller(MockLink::new(RegisterBank::new(1)));
    for slave in [0u8, 248, 255] {
        assert!(matches!(
            ctl.try_write_pdu_by_value(slave, 3002, 20.0).await,
            Err(ModbusError::InvalidAddress(_))
        ));
    }
}

#[tokio::test]
async fn failed_write_returns_false() {
    let link = MockLink::new(RegisterBank::new(1)).with_fault(Fault::Silence);
    let mut ctl = controller(link);
    assert!(!ctl.write_pdu_by_value(1, 3002, 40.0).await);
}

#[tokio::test]
async fn number_publishes_optimistically() {
    let link = MockLink::new(RegisterBank::new(1)).with_fault(Fault::Silence);
    let mut ctl = controller(link);
    let h = ctl.register(Device::new(DeviceKind::Number, "1", 3003));
    let ok = ctl
        .control(h, DeviceCommand::SetNumber(48.0))
        .await
        .expect("command accepted");
    assert!(!ok);
    // state follows the command even though the slave never answered
    assert_eq!(
        ctl.device(h).and_then(Device::state),
        Some(&DeviceState::Value(48.0))
    );
}

#[tokio::test]
async fn switch_writes_one_and_zero() {
    let mut ctl = controller(MockLink::new(RegisterBank::new(1)));
    let h = ctl.register(Device::new(DeviceKind::Switch, "1", 3001));
    assert!(ctl.control(h, DeviceCommand::SetSwitch(true)).await.unwrap());
    assert_eq!(register(&mut ctl, 1, 3001), Some(1));
    // state arrives with the next poll, not from the command
    assert!(ctl.device(h).and_then(Device::state).is_none());
    assert!(ctl.control(h, DeviceCommand::SetSwitch(false)).await.unwrap());
    assert_eq!(register(&mut ctl, 1, 3001), Some(0));
    ctl.update().await;
    assert_eq!(ctl.device(h).and_then(Device::state), Some(&DeviceState::On(false)));
}

#[tokio::test]
async fn select_writes_option_index_without_local_publish() {
    let mut ctl = controller(MockLink::new(RegisterBank::new(1)));
    let options = vec!["standby".into(), "summer".into(), "winter".into()];
    let h = ctl.register(Device::new(DeviceKind::Select { options }, "1.3", 3000));
    assert!(ctl
        .control(h, DeviceCommand::SelectOption("winter".into()))
        .await
        .unwrap());
    assert_eq!(register(&mut ctl, 1, 3000), Some(2));
    assert!(ctl.device(h).and_then(Device::state).is_none());

    let unknown = ctl
        .control(h, DeviceCommand::SelectOption("eco".into()))
        .await;
    assert!(matches!(unknown, Err(ModbusError::Protocol(_))));
}

#[tokio::test]
async fn control_validation_order() {
    let mut ctl = controller(MockLink::new(RegisterBank::new(1)));
    // handle issued by a different controller
    let mut other = controller(MockLink::silent());
    let stranger: DeviceHandle = other.register(Device::new(DeviceKind::Number, "1", 3003));
    assert!(matches!(
        ctl.control(stranger, DeviceCommand::SetNumber(1.0)).await,
        Err(ModbusError::ControllerNotSet)
    ));

    // no pdu and a bad address: the missing pdu is reported first
    let unconfigured = ctl.register(Device::new(DeviceKind::Number, "0", 0));
    assert!(matches!(
        ctl.control(unconfigured, DeviceCommand::SetNumber(1.0)).await,
        Err(ModbusError::NoPduConfigured(_))
    ));

    let bad_addr = ctl.register(Device::new(DeviceKind::Switch, "abc", 3001));
    assert!(matches!(
        ctl.control(bad_addr, DeviceCommand::SetNumber(1.0)).await,
        Err(ModbusError::InvalidAddress(_))
    ));

    let sensor = ctl.register(Device::new(DeviceKind::Sensor, "1", 2000));
    assert!(matches!(
        ctl.control(sensor, DeviceCommand::SetNumber(1.0)).await,
        Err(ModbusError::Protocol(_))
    ));
    assert_eq!(ctl.client_mut().link().request_count(), 0);
}
