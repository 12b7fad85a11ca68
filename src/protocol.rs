use crate::error::DecodeError;
use crate::frame;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unframed byte written to nudge dozing slaves into taking a fresh reading.
pub const WAKE_BYTE: u8 = 0x00;

// https://en.wikipedia.org/wiki/RS-232 - one byte at 9600 8-N-1 takes ~1ms on the wire
pub const BAUD_RATE: u32 = 9600;

/// Lowest non-zero shunt current a slave can regulate to, in mA.
pub const MIN_SHUNT_CURRENT: u16 = 150;
/// Highest shunt current a slave can regulate to, in mA.
pub const MAX_SHUNT_CURRENT: u16 = 450;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Identify = b'?',
    Status = b'/',
    Summary = b's',
    ShuntUp = b'>',
    ShuntDown = b'<',
    ShuntOff = b'0',
}

impl Command {
    /// Unescaped payload addressed to `cell_id`.
    pub fn payload(self, cell_id: u16) -> [u8; 3] {
        let [lo, hi] = cell_id.to_le_bytes();
        [lo, hi, self as u8]
    }

    /// Complete byte-stuffed packet addressed to `cell_id`.
    pub fn request(self, cell_id: u16) -> Vec<u8> {
        frame::encode(&self.payload(cell_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V3,
    V4,
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(ProtocolVersion::V3),
            4 => Ok(ProtocolVersion::V4),
            other => Err(other),
        }
    }
}

impl ProtocolVersion {
    pub fn summary_kind(self) -> ReplyKind {
        match self {
            ProtocolVersion::V3 => ReplyKind::SummaryV3,
            ProtocolVersion::V4 => ReplyKind::SummaryV4,
        }
    }
}

/// Which record a reply carries. Determines the expected length on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Identify,
    Status,
    SummaryV3,
    SummaryV4,
}

impl ReplyKind {
    /// Logical reply length including the two CRC bytes.
    pub const fn len(self) -> usize {
        match self {
            ReplyKind::Identify => 17,
            ReplyKind::Status => 20,
            ReplyKind::SummaryV3 => 13,
            ReplyKind::SummaryV4 => 11,
        }
    }

    /// Length of the payload once the CRC has been stripped.
    pub const fn payload_len(self) -> usize {
        self.len() - frame::CRC_LENGTH
    }
}

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

fn u16_at(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

fn i16_at(buffer: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

fn validate_len(buffer: &[u8], kind: ReplyKind) -> Result<(), DecodeError> {
    if buffer.len() < kind.payload_len() {
        log::warn!(
            "Invalid reply size - required={} received={}",
            kind.payload_len(),
            buffer.len()
        );
        return Err(DecodeError::Length {
            expected: kind.payload_len(),
            actual: buffer.len(),
        });
    }
    Ok(())
}

/// Board capabilities reported by the identify reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    pub has_kelvin_connection: bool,
    pub is_resistor_shunt: bool,
    pub is_hard_switched_shunt: bool,
    pub has_temperature_sensor: bool,
    pub is_clean: bool,
}

impl Hardware {
    pub fn from_flags(flags: u8) -> Self {
        Self {
            has_kelvin_connection: read_bit!(flags, 0),
            is_resistor_shunt: read_bit!(flags, 1),
            is_hard_switched_shunt: read_bit!(flags, 2),
            has_temperature_sensor: read_bit!(flags, 3),
            is_clean: read_bit!(flags, 4),
        }
    }

    pub fn flags(&self) -> u8 {
        (self.has_kelvin_connection as u8)
            | (self.is_resistor_shunt as u8) << 1
            | (self.is_hard_switched_shunt as u8) << 2
            | (self.has_temperature_sensor as u8) << 3
            | (self.is_clean as u8) << 4
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub cell_id: u16,
    /// Raw version byte; not every value maps to a [`ProtocolVersion`].
    pub version: u8,
    pub hardware: Hardware,
    pub revision: u16,
    pub when_programmed: Option<DateTime<Utc>>,
}

impl Identity {
    fn decode(payload: &[u8]) -> Self {
        let programmed = u64::from_le_bytes([
            payload[7],
            payload[8],
            payload[9],
            payload[10],
            payload[11],
            payload[12],
            payload[13],
            payload[14],
        ]);
        Self {
            cell_id: u16_at(payload, 1),
            version: payload[3],
            hardware: Hardware::from_flags(payload[4]),
            revision: u16_at(payload, 5),
            when_programmed: i64::try_from(programmed)
                .ok()
                .filter(|secs| *secs > 0)
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub cell_id: u16,
    pub v_cell: u16,
    pub v_shunt: u16,
    pub i_shunt: u16,
    /// Hundredths of a degree Celsius.
    pub temperature: i16,
    pub min_current: u16,
    pub v_shunt_pot: u16,
    pub gain_pot: u8,
    pub has_rx: bool,
    pub software_addressing: bool,
    pub automatic: bool,
    pub is_shunt_forced_on: bool,
}

impl Status {
    fn decode(payload: &[u8]) -> Self {
        Self {
            cell_id: u16_at(payload, 1),
            v_cell: u16_at(payload, 3),
            v_shunt: u16_at(payload, 5),
            i_shunt: u16_at(payload, 7),
            temperature: i16_at(payload, 9),
            min_current: u16_at(payload, 11),
            v_shunt_pot: u16_at(payload, 13),
            gain_pot: payload[15],
            has_rx: read_bit!(payload[16], 0),
            software_addressing: read_bit!(payload[16], 1),
            automatic: read_bit!(payload[16], 2),
            is_shunt_forced_on: read_bit!(payload[16], 3),
        }
    }
}

/// Compact telemetry returned by reads and shunt commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub cell_id: u16,
    pub v_cell: u16,
    /// Only protocol version 3 reports the measured shunt current.
    pub i_shunt: Option<u16>,
    pub min_current: u16,
    pub temperature: i16,
}

impl Summary {
    fn decode_v3(payload: &[u8]) -> Self {
        Self {
            cell_id: u16_at(payload, 1),
            v_cell: u16_at(payload, 3),
            i_shunt: Some(u16_at(payload, 5)),
            min_current: u16_at(payload, 7),
            temperature: i16_at(payload, 9),
        }
    }

    fn decode_v4(payload: &[u8]) -> Self {
        Self {
            cell_id: u16_at(payload, 1),
            v_cell: u16_at(payload, 3),
            i_shunt: None,
            min_current: u16_at(payload, 5),
            temperature: i16_at(payload, 7),
        }
    }
}

/// A decoded reply record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Identify(Identity),
    Status(Status),
    Summary(Summary),
}

impl Reply {
    /// Decodes a CRC-checked payload (CRC bytes already stripped).
    pub fn decode(kind: ReplyKind, payload: &[u8]) -> Result<Self, DecodeError> {
        validate_len(payload, kind)?;
        let reply = match kind {
            ReplyKind::Identify => Reply::Identify(Identity::decode(payload)),
            ReplyKind::Status => Reply::Status(Status::decode(payload)),
            ReplyKind::SummaryV3 => Reply::Summary(Summary::decode_v3(payload)),
            ReplyKind::SummaryV4 => Reply::Summary(Summary::decode_v4(payload)),
        };
        log::trace!("decoded {kind:?}: {reply:?}");
        Ok(reply)
    }

    pub fn into_identity(self) -> Result<Identity, Error> {
        match self {
            Reply::Identify(identity) => Ok(identity),
            _ => Err(Error::UnexpectedReply(ReplyKind::Identify)),
        }
    }

    pub fn into_status(self) -> Result<Status, Error> {
        match self {
            Reply::Status(status) => Ok(status),
            _ => Err(Error::UnexpectedReply(ReplyKind::Status)),
        }
    }

    /// Either summary layout.
    pub fn into_summary(self) -> Result<Summary, Error> {
        match self {
            Reply::Summary(summary) => Ok(summary),
            _ => Err(Error::UnexpectedReply(ReplyKind::SummaryV4)),
        }
    }

    /// The address the responding slave put in its reply.
    pub fn cell_id(&self) -> u16 {
        match self {
            Reply::Identify(identity) => identity.cell_id,
            Reply::Status(status) => status.cell_id,
            Reply::Summary(summary) => summary.cell_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_payload_is_little_endian() {
        assert_eq!(Command::Summary.payload(0x3032), [0x32, 0x30, b's']);
    }

    #[test]
    fn request_is_framed() {
        let request = Command::Status.request(0x00FE);
        // the low address byte collides with the start marker and gets escaped
        assert_eq!(&request[..4], &[frame::START, frame::ESCAPE, 0xFE, 0x00]);
    }

    #[test]
    fn summary_lengths_follow_version() {
        assert_eq!(ProtocolVersion::V3.summary_kind().len(), 13);
        assert_eq!(ProtocolVersion::V4.summary_kind().len(), 11);
        assert_eq!(ProtocolVersion::try_from(5), Err(5));
    }

    #[test]
    fn decode_identify() {
        let mut payload = vec![0u8; ReplyKind::Identify.payload_len()];
        payload[1..3].copy_from_slice(&0x3035u16.to_le_bytes());
        payload[3] = 4;
        payload[4] = 0b0000_1010;
        payload[5..7].copy_from_slice(&17u16.to_le_bytes());
        payload[7..15].copy_from_slice(&1_300_000_000u64.to_le_bytes());
        let Reply::Identify(identity) = Reply::decode(ReplyKind::Identify, &payload).unwrap() else {
            panic!("not an identify reply");
        };
        assert_eq!(identity.cell_id, 0x3035);
        assert_eq!(identity.version, 4);
        assert!(identity.hardware.is_resistor_shunt);
        assert!(identity.hardware.has_temperature_sensor);
        assert!(!identity.hardware.has_kelvin_connection);
        assert_eq!(identity.revision, 17);
        assert_eq!(
            identity.when_programmed.map(|t| t.timestamp()),
            Some(1_300_000_000)
        );
    }

    #[test]
    fn hardware_flags_survive_encoding() {
        let hardware = Hardware {
            has_kelvin_connection: true,
            is_hard_switched_shunt: true,
            is_clean: true,
            ..Default::default()
        };
        assert_eq!(Hardware::from_flags(hardware.flags()), hardware);
    }

    #[test]
    fn decode_summaries() {
        let v3 = [0, 0x01, 0x00, 0x10, 0x0E, 0xC2, 0x01, 0x96, 0x00, 0xD0, 0x07];
        let Reply::Summary(summary) = Reply::decode(ReplyKind::SummaryV3, &v3).unwrap() else {
            panic!("not a summary");
        };
        assert_eq!(summary.cell_id, 1);
        assert_eq!(summary.v_cell, 3600);
        assert_eq!(summary.i_shunt, Some(450));
        assert_eq!(summary.min_current, 150);
        assert_eq!(summary.temperature, 2000);

        let v4 = [0, 0x02, 0x00, 0x10, 0x0E, 0x00, 0x00, 0x30, 0xF8];
        let Reply::Summary(summary) = Reply::decode(ReplyKind::SummaryV4, &v4).unwrap() else {
            panic!("not a summary");
        };
        assert_eq!(summary.cell_id, 2);
        assert_eq!(summary.i_shunt, None);
        assert_eq!(summary.min_current, 0);
        assert_eq!(summary.temperature, -2000);
    }

    #[test]
    fn decode_status_flags() {
        let mut payload = vec![0u8; ReplyKind::Status.payload_len()];
        payload[11..13].copy_from_slice(&300u16.to_le_bytes());
        payload[15] = 0x7F;
        payload[16] = 0b1001;
        let Reply::Status(status) = Reply::decode(ReplyKind::Status, &payload).unwrap() else {
            panic!("not a status");
        };
        assert_eq!(status.min_current, 300);
        assert_eq!(status.gain_pot, 0x7F);
        assert!(status.has_rx);
        assert!(!status.software_addressing);
        assert!(!status.automatic);
        assert!(status.is_shunt_forced_on);
    }

    #[test]
    fn short_payload_is_rejected() {
        assert_eq!(
            Reply::decode(ReplyKind::Status, &[0; 5]),
            Err(DecodeError::Length {
                expected: 18,
                actual: 5
            })
        );
    }

    #[test]
    fn typed_accessors_reject_other_records() {
        let payload = vec![0u8; ReplyKind::SummaryV4.payload_len()];
        let reply = Reply::decode(ReplyKind::SummaryV4, &payload).unwrap();
        assert!(matches!(
            reply.clone().into_status(),
            Err(Error::UnexpectedReply(ReplyKind::Status))
        ));
        assert!(matches!(
            reply.clone().into_identity(),
            Err(Error::UnexpectedReply(ReplyKind::Identify))
        ));
        assert_eq!(reply.into_summary().unwrap().v_cell, 0);
    }
}
