//! Decoders for the tracker's on-device data banks.
//!
//! Bank contents are decoded after retrieval and never during transfer;
//! the session layer hands over raw bytes. Record widths in banks 1 and 2
//! depend on the tracker's hardware version (the taller units grew floor
//! counters), so decoding needs the version byte from the info opcode.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

/// Hardware versions from this one up carry floor-count fields.
const FLOORS_HW_VERSION: u8 = 12;

#[derive(Error, Debug)]
pub enum DecodeError {
    /// The data ended in the middle of a record.
    #[error("bank data truncated at offset {offset}")]
    Truncated { offset: usize },

    /// A fixed-size bank arrived with the wrong length.
    #[error("unexpected bank length: expected {expected} bytes, got {actual}")]
    UnexpectedLength { expected: usize, actual: usize },
}

/// One per-minute accelerometer record (bank 0).
#[derive(Debug, Clone, PartialEq)]
pub struct MinuteActivity {
    /// Unix epoch seconds, anchor time plus one minute per record.
    pub timestamp: u32,
    /// Undocumented leading field, stored minus its 0x80 record marker.
    pub tag: u8,
    /// MET-derived activity score for the minute.
    pub active_score: f32,
    pub steps: u8,
}

/// One daily totals record (bank 1).
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub timestamp: u32,
    pub calories: u16,
    pub steps: u32,
    pub distance_km: f64,
    /// Zero on hardware without an altimeter.
    pub floors: f32,
}

/// One activity-session record (bank 2).
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub timestamp: u32,
    pub detail: ActivityDetail,
}

/// Body of an activity-session record, keyed by its flag byte.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityDetail {
    Summary {
        elapsed_secs: u16,
        steps: u32,
        distance_km: f64,
        floors: f32,
    },
    /// Flag bytes other than 1 are not understood; kept verbatim.
    Raw(Vec<u8>),
}

/// The fixed 64-byte settings block (bank 4).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfoBlock {
    /// Undecoded leading bytes.
    pub header: Vec<u8>,
    /// Greeting shown on the display.
    pub greeting: String,
    /// The three rotating chatter words.
    pub chatter: [String; 3],
}

/// One per-minute floor-count record (bank 6).
#[derive(Debug, Clone, PartialEq)]
pub struct FloorsSample {
    pub timestamp: u32,
    pub floors: f32,
}

/// A decoded data bank.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBank {
    MinuteActivity(Vec<MinuteActivity>),
    DailySummaries(Vec<DailySummary>),
    ActivityRecords(Vec<ActivityRecord>),
    DeviceInfo(DeviceInfoBlock),
    MinuteFloors(Vec<FloorsSample>),
    /// Banks without a known decoder come back untouched.
    Raw(Vec<u8>),
}

impl DecodedBank {
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedBank::MinuteActivity(_) => "minute activity",
            DecodedBank::DailySummaries(_) => "daily summaries",
            DecodedBank::ActivityRecords(_) => "activity records",
            DecodedBank::DeviceInfo(_) => "device info",
            DecodedBank::MinuteFloors(_) => "minute floors",
            DecodedBank::Raw(_) => "raw",
        }
    }
}

impl fmt::Display for DecodedBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedBank::MinuteActivity(records) => {
                for r in records {
                    writeln!(
                        f,
                        "{}: tag {} score {:.1} steps {}",
                        r.timestamp, r.tag, r.active_score, r.steps
                    )?;
                }
                Ok(())
            }
            DecodedBank::DailySummaries(records) => {
                for r in records {
                    writeln!(
                        f,
                        "{}: {} cal, {} steps, {:.3} km, {:.1} floors",
                        r.timestamp, r.calories, r.steps, r.distance_km, r.floors
                    )?;
                }
                Ok(())
            }
            DecodedBank::ActivityRecords(records) => {
                for r in records {
                    match &r.detail {
                        ActivityDetail::Summary {
                            elapsed_secs,
                            steps,
                            distance_km,
                            floors,
                        } => writeln!(
                            f,
                            "{}: {}s, {} steps, {:.3} km, {:.1} floors",
                            r.timestamp, elapsed_secs, steps, distance_km, floors
                        )?,
                        ActivityDetail::Raw(bytes) => {
                            writeln!(f, "{}: {} unrecognized bytes", r.timestamp, bytes.len())?
                        }
                    }
                }
                Ok(())
            }
            DecodedBank::DeviceInfo(block) => {
                writeln!(f, "Greeting: {}", block.greeting)?;
                write!(f, "Chatter: {}", block.chatter.join(", "))
            }
            DecodedBank::MinuteFloors(records) => {
                for r in records {
                    writeln!(f, "{}: {:.1} floors", r.timestamp, r.floors)?;
                }
                Ok(())
            }
            DecodedBank::Raw(bytes) => write!(f, "{} raw bytes", bytes.len()),
        }
    }
}

/// Decode one data bank by index.
pub fn decode_bank(
    index: u8,
    hardware_version: u8,
    data: &[u8],
) -> Result<DecodedBank, DecodeError> {
    match index {
        0 => decode_minute_activity(data).map(DecodedBank::MinuteActivity),
        1 => decode_daily_summaries(hardware_version, data).map(DecodedBank::DailySummaries),
        2 => decode_activity_records(hardware_version, data).map(DecodedBank::ActivityRecords),
        4 => decode_device_info(data).map(DecodedBank::DeviceInfo),
        6 => decode_minute_floors(data).map(DecodedBank::MinuteFloors),
        _ => Ok(DecodedBank::Raw(data.to_vec())),
    }
}

/// Bank 0: a big-endian epoch anchor (high bit of the first byte clear)
/// followed by 3-byte per-minute records (high bit set), one minute apart.
///
/// The anchors are big-endian precisely so the record marker can live in
/// the high bit of the first byte.
fn decode_minute_activity(data: &[u8]) -> Result<Vec<MinuteActivity>, DecodeError> {
    let mut records = Vec::new();
    let mut anchor = 0u32;
    let mut minute = 0u32;
    let mut i = 0;
    while i < data.len() {
        if data[i] & 0x80 == 0 {
            let end = i + 4;
            if end > data.len() {
                return Err(DecodeError::Truncated { offset: i });
            }
            anchor = BigEndian::read_u32(&data[i..end]);
            minute = 0;
            i = end;
        } else {
            let end = i + 3;
            if end > data.len() {
                return Err(DecodeError::Truncated { offset: i });
            }
            records.push(MinuteActivity {
                timestamp: anchor + 60 * minute,
                tag: data[i] - 0x80,
                active_score: (data[i + 1] as f32 - 10.0) / 10.0,
                steps: data[i + 2],
            });
            minute += 1;
            i = end;
        }
    }
    Ok(records)
}

fn daily_record_len(hardware_version: u8) -> usize {
    if hardware_version >= FLOORS_HW_VERSION {
        16
    } else {
        14
    }
}

/// Bank 1: fixed-width little-endian daily totals.
fn decode_daily_summaries(
    hardware_version: u8,
    data: &[u8],
) -> Result<Vec<DailySummary>, DecodeError> {
    let len = daily_record_len(hardware_version);
    let mut records = Vec::new();
    for (n, d) in data.chunks(len).enumerate() {
        if d.len() < len {
            return Err(DecodeError::Truncated { offset: n * len });
        }
        let floors = if len == 16 {
            LittleEndian::read_u16(&d[14..16]) as f32 / 10.0
        } else {
            0.0
        };
        records.push(DailySummary {
            timestamp: LittleEndian::read_u32(&d[0..4]),
            calories: LittleEndian::read_u16(&d[4..6]),
            steps: LittleEndian::read_u32(&d[6..10]),
            distance_km: LittleEndian::read_u32(&d[10..14]) as f64 / 1_000_000.0,
            floors,
        });
    }
    Ok(records)
}

fn activity_record_len(hardware_version: u8) -> usize {
    if hardware_version >= FLOORS_HW_VERSION {
        15
    } else {
        13
    }
}

/// Bank 2: fixed-width activity sessions, decoded only when the flag byte
/// marks the known summary layout.
fn decode_activity_records(
    hardware_version: u8,
    data: &[u8],
) -> Result<Vec<ActivityRecord>, DecodeError> {
    let len = activity_record_len(hardware_version);
    let mut records = Vec::new();
    for (n, d) in data.chunks(len).enumerate() {
        if d.len() < len {
            return Err(DecodeError::Truncated { offset: n * len });
        }
        let timestamp = LittleEndian::read_u32(&d[0..4]);
        let detail = if d[6] == 1 {
            let floors = if len == 15 {
                LittleEndian::read_u16(&d[13..15]) as f32 / 10.0
            } else {
                0.0
            };
            ActivityDetail::Summary {
                elapsed_secs: LittleEndian::read_u16(&d[4..6]),
                steps: LittleEndian::read_u24(&d[7..10]),
                distance_km: LittleEndian::read_u24(&d[10..13]) as f64 / 100_000.0,
                floors,
            }
        } else {
            ActivityDetail::Raw(d[4..].to_vec())
        };
        records.push(ActivityRecord { timestamp, detail });
    }
    Ok(records)
}

fn settings_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .to_string()
}

/// Bank 4: the fixed 64-byte settings block with greeting and chatter
/// strings at known offsets.
fn decode_device_info(data: &[u8]) -> Result<DeviceInfoBlock, DecodeError> {
    if data.len() != 64 {
        return Err(DecodeError::UnexpectedLength {
            expected: 64,
            actual: data.len(),
        });
    }
    Ok(DeviceInfoBlock {
        header: data[..24].to_vec(),
        greeting: settings_string(&data[24..32]),
        chatter: [
            settings_string(&data[34..42]),
            settings_string(&data[44..52]),
            settings_string(&data[54..62]),
        ],
    })
}

/// Bank 6: big-endian epoch anchors interleaved with 2-byte per-minute
/// floor records marked by a leading 0x80.
fn decode_minute_floors(data: &[u8]) -> Result<Vec<FloorsSample>, DecodeError> {
    let mut records = Vec::new();
    let mut tstamp = 0u32;
    let mut i = 0;
    while i < data.len() {
        if data[i] == 0x80 {
            let end = i + 2;
            if end > data.len() {
                return Err(DecodeError::Truncated { offset: i });
            }
            records.push(FloorsSample {
                timestamp: tstamp,
                floors: data[i + 1] as f32 / 10.0,
            });
            tstamp += 60;
            i = end;
        } else {
            let end = i + 4;
            if end > data.len() {
                return Err(DecodeError::Truncated { offset: i });
            }
            tstamp = BigEndian::read_u32(&data[i..end]);
            i = end;
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_activity_anchor_and_record() {
        let data = [0x00, 0x00, 0x00, 0x3C, 0x82, 0x14, 0x05];
        let decoded = decode_bank(0, 12, &data).unwrap();
        let DecodedBank::MinuteActivity(records) = decoded else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 60);
        assert_eq!(records[0].tag, 2);
        assert_eq!(records[0].active_score, 1.0);
        assert_eq!(records[0].steps, 5);
    }

    #[test]
    fn test_minute_activity_advances_one_minute_per_record() {
        let data = [
            0x00, 0x00, 0x01, 0x00, // anchor 256
            0x81, 0x0A, 0x00, // minute 0, score 0, no steps
            0x85, 0x1E, 0x64, // minute 1
            0x00, 0x00, 0x02, 0x00, // new anchor 512 resets the minute count
            0x81, 0x0A, 0x01,
        ];
        let DecodedBank::MinuteActivity(records) = decode_bank(0, 12, &data).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp, 256);
        assert_eq!(records[1].timestamp, 316);
        assert_eq!(records[1].tag, 5);
        assert_eq!(records[1].active_score, 2.0);
        assert_eq!(records[1].steps, 100);
        assert_eq!(records[2].timestamp, 512);
    }

    #[test]
    fn test_minute_activity_truncated_record_is_an_error() {
        let data = [0x00, 0x00, 0x00, 0x3C, 0x82, 0x14];
        let err = decode_bank(0, 12, &data).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { offset: 4 }));
    }

    #[test]
    fn test_daily_summary_with_floors() {
        let mut d = Vec::new();
        d.extend_from_slice(&1_300_000_000u32.to_le_bytes());
        d.extend_from_slice(&1842u16.to_le_bytes()); // calories
        d.extend_from_slice(&10_512u32.to_le_bytes()); // steps
        d.extend_from_slice(&7_654_321u32.to_le_bytes()); // distance, mm-ish
        d.extend_from_slice(&85u16.to_le_bytes()); // floors * 10
        let DecodedBank::DailySummaries(records) = decode_bank(1, 12, &d).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 1_300_000_000);
        assert_eq!(records[0].calories, 1842);
        assert_eq!(records[0].steps, 10_512);
        assert!((records[0].distance_km - 7.654_321).abs() < 1e-9);
        assert_eq!(records[0].floors, 8.5);
    }

    #[test]
    fn test_daily_summary_pre_altimeter_hardware() {
        // 14-byte records, no floors field.
        let mut d = Vec::new();
        d.extend_from_slice(&1_300_000_000u32.to_le_bytes());
        d.extend_from_slice(&100u16.to_le_bytes());
        d.extend_from_slice(&5u32.to_le_bytes());
        d.extend_from_slice(&1_000_000u32.to_le_bytes());
        let DecodedBank::DailySummaries(records) = decode_bank(1, 11, &d).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].floors, 0.0);
        assert_eq!(records[0].distance_km, 1.0);
    }

    #[test]
    fn test_daily_summary_future_hardware_assumed_to_keep_floors() {
        // Record widths are only confirmed for versions 12 and below;
        // anything newer is assumed to keep the altimeter layout. Revisit
        // if a version with a different width shows up.
        let mut d = vec![0u8; 14];
        d.extend_from_slice(&120u16.to_le_bytes());
        let DecodedBank::DailySummaries(records) = decode_bank(1, 13, &d).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].floors, 12.0);
    }

    #[test]
    fn test_daily_summary_partial_record_is_an_error() {
        let d = [0u8; 20]; // one full 16-byte record + 4 trailing bytes
        let err = decode_bank(1, 12, &d).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { offset: 16 }));
    }

    #[test]
    fn test_activity_record_summary_layout() {
        let mut d = Vec::new();
        d.extend_from_slice(&1_300_000_000u32.to_le_bytes());
        d.extend_from_slice(&1800u16.to_le_bytes()); // elapsed
        d.push(1); // flag: summary layout
        d.extend_from_slice(&[0x10, 0x27, 0x00]); // 10000 steps, u24 le
        d.extend_from_slice(&[0xA0, 0x86, 0x01]); // 100000 -> 1.0 km
        d.extend_from_slice(&25u16.to_le_bytes()); // floors * 10
        let DecodedBank::ActivityRecords(records) = decode_bank(2, 12, &d).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 1_300_000_000);
        match &records[0].detail {
            ActivityDetail::Summary {
                elapsed_secs,
                steps,
                distance_km,
                floors,
            } => {
                assert_eq!(*elapsed_secs, 1800);
                assert_eq!(*steps, 10_000);
                assert_eq!(*distance_km, 1.0);
                assert_eq!(*floors, 2.5);
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[test]
    fn test_activity_record_unknown_flag_kept_raw() {
        let mut d = Vec::new();
        d.extend_from_slice(&42u32.to_le_bytes());
        d.extend_from_slice(&[0xAA, 0xBB]);
        d.push(9); // unknown flag
        d.extend_from_slice(&[0; 6]);
        let DecodedBank::ActivityRecords(records) = decode_bank(2, 10, &d).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].detail,
            ActivityDetail::Raw(vec![0xAA, 0xBB, 9, 0, 0, 0, 0, 0, 0])
        );
    }

    #[test]
    fn test_device_info_strings() {
        let mut d = vec![0u8; 64];
        d[24..32].copy_from_slice(b"HI THERE");
        d[34..38].copy_from_slice(b"WALK");
        d[44..48].copy_from_slice(b"STEP");
        d[54..58].copy_from_slice(b"MOVE");
        let DecodedBank::DeviceInfo(block) = decode_bank(4, 12, &d).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(block.greeting, "HI THERE");
        assert_eq!(block.chatter, ["WALK", "STEP", "MOVE"]);
        assert_eq!(block.header.len(), 24);
    }

    #[test]
    fn test_device_info_rejects_wrong_length() {
        let err = decode_bank(4, 12, &[0u8; 63]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnexpectedLength {
                expected: 64,
                actual: 63
            }
        ));
    }

    #[test]
    fn test_minute_floors_records() {
        let data = [
            0x00, 0x00, 0x00, 0x78, // anchor 120, big-endian
            0x80, 30, // 3.0 floors
            0x80, 0, // 0 floors a minute later
        ];
        let DecodedBank::MinuteFloors(records) = decode_bank(6, 12, &data).unwrap() else {
            panic!("wrong bank kind");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, 120);
        assert_eq!(records[0].floors, 3.0);
        assert_eq!(records[1].timestamp, 180);
        assert_eq!(records[1].floors, 0.0);
    }

    #[test]
    fn test_unknown_bank_index_passes_through() {
        let decoded = decode_bank(3, 12, &[1, 2, 3]).unwrap();
        assert_eq!(decoded, DecodedBank::Raw(vec![1, 2, 3]));
        assert_eq!(decoded.kind(), "raw");
    }
}
