use immergas_modbus::error::ModbusError;
use immergas_modbus::response::RtuResponse;
use immergas_modbus::rtu_define::FC_READ_HOLDING_REGISTERS;
use immergas_modbus::rtu_frame::{
    build_read_request, crc16, validate_response, ResponseBody,
};

#[test]
fn crc_reference_frame() {
    let frame = build_read_request(0x01, 0x07D0, 2).expect("build");
    assert_eq!(frame, vec![0x01, 0x03, 0x07, 0xD0, 0x00, 0x02, 0xC4, 0x86]);
    assert_eq!(crc16(&frame[..6]), 0x86C4);
}

#[test]
fn crc_of_empty_input_is_initial_value() {
    assert_eq!(crc16(&[]), 0xFFFF);
}

#[test]
fn end_to_end_read_scenario() {
    let response = [0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14, 0xDA, 0x3E];
    let parsed = RtuResponse::try_new(&response, 1, FC_READ_HOLDING_REGISTERS).expect("valid");
    assert_eq!(parsed.registers(2).expect("registers"), vec![10, 20]);
}

#[test]
fn any_single_bit_flip_is_rejected() {
    let good = [0x01u8, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14, 0xDA, 0x3E];
    for byte in 0..good.len() {
        for bit in 0..8 {
            let mut bad = good;
            bad[byte] ^= 1 << bit;
            assert!(
                validate_response(&bad, FC_READ_HOLDING_REGISTERS).is_err(),
                "flip of bit {bit} in byte {byte} accepted"
            );
        }
    }
}

#[test]
fn exception_response_is_rejected_with_code() {
    // 01 83 02 + crc
    let frame = [0x01, 0x83, 0x02, 0xC0, 0xF1];
    match validate_response(&frame, FC_READ_HOLDING_REGISTERS) {
        Err(ModbusError::ExceptionResponse { function, code }) => {
            assert_eq!(function, 0x03);
            assert_eq!(code, 0x02);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn short_frames_are_truncated() {
    for len in 0..5 {
        let frame = vec![0x01u8; len];
        assert!(matches!(
            validate_response(&frame, FC_READ_HOLDING_REGISTERS),
            Err(ModbusError::Truncated { .. })
        ));
    }
}

#[test]
fn write_echo_body() {
    // 01 10 00 64 00 01 + crc
    let frame = [0x01, 0x10, 0x00, 0x64, 0x00, 0x01, 0x40, 0x16];
    let body = validate_response(&frame, 0x10).expect("valid echo");
    assert_eq!(
        body,
        ResponseBody::Write {
            reg_addr: 100,
            count: 1
        }
    );
}
