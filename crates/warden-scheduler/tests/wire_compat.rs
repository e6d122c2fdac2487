// Status records already persisted by running clusters must keep decoding.
// These tests pin the 24-byte layout: [completion_ms, start_ms, scheduled_ms],
// big-endian i64, 0 = absent.

use chrono::DateTime;
use warden_scheduler::StatusRecord;

#[test]
fn decodes_known_record_bytes() {
    let bytes: [u8; 24] = [
        0x00, 0x00, 0x01, 0x8b, 0xcf, 0xe5, 0x68, 0x00, // completion 1700000000000
        0x00, 0x00, 0x01, 0x8b, 0xcf, 0xe5, 0x64, 0x18, // start      1699999999000
        0x00, 0x00, 0x01, 0x8b, 0xcf, 0xe5, 0x60, 0x30, // scheduled  1699999998000
    ];
    let record = StatusRecord::decode(&bytes);

    assert_eq!(
        record.last_actual_completion_time,
        DateTime::from_timestamp_millis(1_700_000_000_000)
    );
    assert_eq!(
        record.last_actual_start_time,
        DateTime::from_timestamp_millis(1_699_999_999_000)
    );
    assert_eq!(
        record.last_scheduled_time,
        DateTime::from_timestamp_millis(1_699_999_998_000)
    );
    assert_eq!(record.encode(), bytes);
}

#[test]
fn zero_fields_are_absent() {
    let mut bytes = [0u8; 24];
    bytes[16..24].copy_from_slice(&42i64.to_be_bytes());
    let record = StatusRecord::decode(&bytes);

    assert_eq!(record.last_actual_completion_time, None);
    assert_eq!(record.last_actual_start_time, None);
    assert_eq!(record.last_scheduled_time, DateTime::from_timestamp_millis(42));
}

#[test]
fn zero_and_eight_byte_buffers_decode() {
    assert!(StatusRecord::decode(&[]).is_empty());

    let record = StatusRecord::decode(&7i64.to_be_bytes());
    assert_eq!(record.last_actual_completion_time, DateTime::from_timestamp_millis(7));
    assert_eq!(record.last_actual_start_time, None);
    assert_eq!(record.last_scheduled_time, None);
}
