use std::time::Duration;

use crate::config::config as global_config;
use crate::error::ModbusError;
use crate::request::RtuRequest;
use crate::response::RtuResponse;
use crate::rtu_define::exception_name;
use crate::rtu_frame::ResponseBody;
use crate::transport::{hex_dump, send_and_collect, SerialLink};
use crate::value_codec::FromRegisters;

fn maybe_dump_rejected(label: &str, frame: &[u8], err: &ModbusError) {
    if global_config().dump_on_error {
        log::warn!("[RTU {label} rejected] {} ({err})", hex_dump(frame));
    }
}

/// Modbus RTU master for one serial bus.
///
/// `RtuClient` owns the serial link and runs one request/response
/// transaction at a time. Each transaction writes the request frame, waits
/// for the answer within its window and validates it; there is no retry at
/// this level.
///
/// The read and write windows differ on purpose: reads run on every poll tick
/// and must stay short, while a write gives the appliance time to persist the
/// new value before it answers.
pub struct RtuClient<L> {
    link: L,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub backoff: Duration,
}

impl<L: SerialLink> RtuClient<L> {
    /// Create a client over `link` with timeouts from the global config.
    #[must_use]
    pub fn new(link: L) -> Self {
        let cfg = global_config();
        Self {
            link,
            read_timeout: cfg.read_timeout(),
            write_timeout: cfg.write_timeout(),
            backoff: cfg.poll_backoff(),
        }
    }
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
    #[must_use]
    pub const fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Read `count` holding registers starting at `reg_addr` (function 0x03).
    pub async fn execute_read(
        &mut self,
        slave_id: u8,
        reg_addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        let req = RtuRequest::read(slave_id, reg_addr, count);
        let frame = req.build()?;
        let buf = send_and_collect(
            &mut self.link,
            &frame,
            self.read_timeout,
            self.backoff,
            req.expected_response_len(),
        )
        .await?;
        let response = RtuResponse::try_new(&buf, slave_id, req.function_code())
            .and_then(|r| r.registers(count))
            .inspect_err(|e| maybe_dump_rejected("read", &buf, e))?;
        Ok(response)
    }

    /// Read registers and decode them as a sequence of `T`.
    ///
    /// `count` is the number of `T` values; the register count is derived
    /// from `T::REGISTERS`.
    pub async fn read_as<T: FromRegisters>(
        &mut self,
        slave_id: u8,
        reg_addr: u16,
        count: u16,
    ) -> Result<Vec<T>, ModbusError> {
        let required = u16::try_from(T::REGISTERS)
            .ok()
            .and_then(|w| w.checked_mul(count))
            .ok_or_else(|| ModbusError::Protocol("requested count overflow".into()))?;
        let regs = self.execute_read(slave_id, reg_addr, required).await?;
        let mut out = Vec::with_capacity(usize::from(count));
        let mut idx = 0usize;
        while idx < regs.len() {
            let (v, used) = T::from_registers(&regs[idx..])?;
            out.push(v);
            idx += used;
        }
        Ok(out)
    }

    /// Write `values` to consecutive registers starting at `reg_addr`
    /// (function 0x10). Succeeds only when the slave echoes the same address
    /// and register count.
    pub async fn execute_write(
        &mut self,
        slave_id: u8,
        reg_addr: u16,
        values: &[u16],
    ) -> Result<(), ModbusError> {
        let req = RtuRequest::write(slave_id, reg_addr, values);
        let frame = req.build()?;
        let buf = send_and_collect(
            &mut self.link,
            &frame,
            self.write_timeout,
            self.backoff,
            req.expected_response_len(),
        )
        .await?;
        let response = RtuResponse::try_new(&buf, slave_id, req.function_code())
            .inspect_err(|e| maybe_dump_rejected("write", &buf, e))?;
        let count = req.register_count();
        match response.body {
            ResponseBody::Write {
                reg_addr: echo_addr,
                count: echo_count,
            } if echo_addr == reg_addr && echo_count == count => Ok(()),
            ResponseBody::Write {
                reg_addr: echo_addr,
                count: echo_count,
            } => Err(ModbusError::EchoMismatch {
                addr: reg_addr,
                count,
                echo_addr,
                echo_count,
            }),
            ResponseBody::Read { .. } => Err(ModbusError::Protocol(
                "read body in answer to a write".into(),
            )),
        }
    }
}

/// Human-readable description of a transaction error for log lines.
#[must_use]
pub fn describe_error(err: &ModbusError) -> String {
    match err {
        ModbusError::ExceptionResponse { code, .. } => match exception_name(*code) {
            Some(name) => format!("{err} ({name})"),
            None => err.to_string(),
        },
        other => other.to_string(),
    }
}
