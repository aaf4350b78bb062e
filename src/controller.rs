//! Poll orchestration and write dispatch.
//!
//! A [`Controller`] owns one [`RtuClient`], the PDU table and an arena of
//! registered devices. `update` performs one poll tick; `control` turns a
//! device command into a register write.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::config as global_config;
use crate::device::{Device, DeviceCommand, DeviceHandle, DeviceKind, DeviceState};
use crate::error::ModbusError;
use crate::pdu_registry::PduRegistry;
use crate::planner::plan_batches;
use crate::rtu_client::{describe_error, RtuClient};
use crate::rtu_define::is_valid_slave_id;
use crate::transport::SerialLink;
use crate::value_codec::encode;

pub struct Controller<L> {
    client: RtuClient<L>,
    registry: Arc<PduRegistry>,
    devices: Vec<Device>,
    debug_logs: bool,
}

impl<L: SerialLink> Controller<L> {
    #[must_use]
    pub fn new(client: RtuClient<L>, registry: Arc<PduRegistry>) -> Self {
        Self {
            client,
            registry,
            devices: Vec::new(),
            debug_logs: false,
        }
    }

    /// Controller over the process-wide registry installed by
    /// [`crate::init_defaults`] or [`PduRegistry::set_global`].
    pub fn with_global_registry(client: RtuClient<L>) -> Result<Self, ModbusError> {
        let registry = PduRegistry::global()
            .ok_or_else(|| ModbusError::Registry("global pdu registry is not set".into()))?;
        Ok(Self::new(client, registry))
    }

    /// Log every decoded value at debug level.
    #[must_use]
    pub const fn with_debug_logs(mut self, enabled: bool) -> Self {
        self.debug_logs = enabled;
        self
    }

    /// Log the bus configuration once, before the first poll.
    pub fn setup(&self) {
        info!(
            devices = self.devices.len(),
            pdus = self.registry.len(),
            read_timeout_ms = self.client.read_timeout.as_millis() as u64,
            write_timeout_ms = self.client.write_timeout.as_millis() as u64,
            "immergas modbus controller ready"
        );
    }

    /// Add a device to the arena. No de-duplication is performed.
    pub fn register(&mut self, device: Device) -> DeviceHandle {
        debug!(device = %device.name, address = %device.address, pdu = device.pdu, "register");
        self.devices.push(device);
        DeviceHandle(self.devices.len() - 1)
    }

    #[must_use]
    pub fn device(&self, handle: DeviceHandle) -> Option<&Device> {
        self.devices.get(handle.0)
    }

    pub fn device_mut(&mut self, handle: DeviceHandle) -> Option<&mut Device> {
        self.devices.get_mut(handle.0)
    }

    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PduRegistry> {
        &self.registry
    }

    pub fn client_mut(&mut self) -> &mut RtuClient<L> {
        &mut self.client
    }

    // Slaves in order of first registration, each with its device indices.
    fn slave_groups(&self) -> Vec<(u8, Vec<usize>)> {
        let mut groups: Vec<(u8, Vec<usize>)> = Vec::new();
        for (idx, dev) in self.devices.iter().enumerate() {
            let slave = match dev.slave_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!(device = %dev.name, error = %e, "skipping device");
                    continue;
                }
            };
            match groups.iter_mut().find(|(id, _)| *id == slave) {
                Some((_, members)) => members.push(idx),
                None => groups.push((slave, vec![idx])),
            }
        }
        groups
    }

    /// One poll tick.
    ///
    /// Every slave referenced by a device is scanned once: the PDU table is
    /// split into contiguous read batches and each decoded value is offered
    /// to all devices of that slave. A failed batch is logged and skipped.
    pub async fn update(&mut self) {
        let registry = Arc::clone(&self.registry);
        for (slave, members) in self.slave_groups() {
            for batch in plan_batches(registry.entries()) {
                let regs = match self
                    .client
                    .execute_read(slave, batch.start_addr, batch.count)
                    .await
                {
                    Ok(regs) => regs,
                    Err(e) => {
                        warn!(
                            slave,
                            start = batch.start_addr,
                            count = batch.count,
                            error = %describe_error(&e),
                            "read batch failed"
                        );
                        continue;
                    }
                };
                for (entry, value) in batch.split(registry.entries(), &regs) {
                    if self.debug_logs {
                        debug!(slave, pdu = entry.pdu_id, value, "decoded");
                    }
                    for &idx in &members {
                        self.devices[idx].handle_update(entry.pdu_id, value);
                    }
                }
            }
        }
    }

    /// Poll forever, one tick per `period`. Ticks missed while a scan runs
    /// long are delayed, not bunched.
    pub async fn run(&mut self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.update().await;
        }
    }

    /// [`Controller::run`] with the configured poll interval.
    pub async fn run_default(&mut self) {
        self.run(global_config().poll_interval()).await;
    }

    /// Encode `value` for `pdu_id` and write it to `slave_id`.
    ///
    /// Returns `false` on any failure; the cause is logged.
    pub async fn write_pdu_by_value(&mut self, slave_id: u8, pdu_id: u16, value: f32) -> bool {
        match self.try_write_pdu_by_value(slave_id, pdu_id, value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    slave = slave_id,
                    pdu = pdu_id,
                    value,
                    error = %describe_error(&e),
                    "write failed"
                );
                false
            }
        }
    }

    pub async fn try_write_pdu_by_value(
        &mut self,
        slave_id: u8,
        pdu_id: u16,
        value: f32,
    ) -> Result<(), ModbusError> {
        if !is_valid_slave_id(slave_id) {
            return Err(ModbusError::InvalidAddress(slave_id.to_string()));
        }
        let entry = self
            .registry
            .get(pdu_id)
            .ok_or(ModbusError::UnknownPdu(pdu_id))?;
        let values = encode(entry, value);
        let reg_addr = entry.reg_addr;
        debug!(slave = slave_id, pdu = pdu_id, value, ?values, "write");
        self.client.execute_write(slave_id, reg_addr, &values).await
    }

    /// Apply a user command to a writable device.
    ///
    /// A number publishes the commanded state even when the bus write fails;
    /// switches and selects only change once the next poll reads them back.
    /// `Ok(bool)` reports whether the write succeeded.
    pub async fn control(
        &mut self,
        handle: DeviceHandle,
        command: DeviceCommand,
    ) -> Result<bool, ModbusError> {
        let dev = self
            .devices
            .get(handle.0)
            .ok_or(ModbusError::ControllerNotSet)
            .inspect_err(|e| warn!(handle = handle.0, error = %e, "control rejected"))?;
        let (slave, value, optimistic) = prepare_command(dev, command)
            .inspect_err(|e| warn!(device = %dev.name, error = %e, "control rejected"))?;
        let pdu = dev.pdu;
        let ok = self.write_pdu_by_value(slave, pdu, value).await;
        if let Some(state) = optimistic {
            self.devices[handle.0].publish(state);
        }
        Ok(ok)
    }
}

// Validate `command` against `dev` and produce the slave, the raw value to
// write and the state to publish afterwards.
fn prepare_command(
    dev: &Device,
    command: DeviceCommand,
) -> Result<(u8, f32, Option<DeviceState>), ModbusError> {
    if dev.pdu == 0 {
        return Err(ModbusError::NoPduConfigured(dev.name.clone()));
    }
    let slave = dev.slave_id()?;
    match (&dev.kind, command) {
        (DeviceKind::Number, DeviceCommand::SetNumber(v)) => {
            Ok((slave, v, Some(DeviceState::Value(v))))
        }
        (DeviceKind::Switch, DeviceCommand::SetSwitch(on)) => {
            let raw = if on { 1.0 } else { 0.0 };
            Ok((slave, raw, None))
        }
        (DeviceKind::Select { .. }, DeviceCommand::SelectOption(name)) => {
            let idx = dev.option_index(&name).ok_or_else(|| {
                ModbusError::Protocol(format!("unknown option '{name}' for {}", dev.name))
            })?;
            Ok((slave, idx as f32, None))
        }
        (kind, command) => Err(ModbusError::Protocol(format!(
            "{command:?} is not applicable to {kind:?} device {}",
            dev.name
        ))),
    }
}
