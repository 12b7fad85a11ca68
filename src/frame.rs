//! Byte-stuffed packet framing.
//!
//! ```text
//! [START] [payload, escaped] [CRC lo, escaped] [CRC hi, escaped]
//! ```
//!
//! Any literal `START` or `ESCAPE` byte is preceded by an `ESCAPE`. Escape bytes
//! are not part of the logical packet and are not covered by the CRC.

use crate::crc;
use crate::error::DecodeError;
use crate::transport::Transport;
use crate::Error;

pub const START: u8 = 0xFE;
pub const ESCAPE: u8 = 0xFF;
pub const CRC_LENGTH: usize = 2;

/// Consecutive read timeouts tolerated while waiting for one packet.
pub const READ_ATTEMPTS: usize = 5;

fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    if byte == START || byte == ESCAPE {
        out.push(ESCAPE);
    }
    out.push(byte);
}

/// Frames `payload` for the wire.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() * 2 + 5);
    out.push(START);
    let mut crc = crc::init();
    for &byte in payload {
        crc = crc::update(crc, &[byte]);
        push_escaped(&mut out, byte);
    }
    for byte in crc::finalize(crc).to_le_bytes() {
        push_escaped(&mut out, byte);
    }
    log::trace!("encode: {:02X?}", out);
    out
}

/// Incremental decoder for one packet of a known logical length.
#[derive(Debug)]
pub struct FrameDecoder {
    expected: usize,
    buffer: Vec<u8>,
    started: bool,
    escaped: bool,
}

impl FrameDecoder {
    /// `expected` counts logical bytes including the two CRC bytes.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            buffer: Vec::with_capacity(expected),
            started: false,
            escaped: false,
        }
    }

    /// Feeds one raw byte. Returns `true` once the packet is complete.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_complete() {
            return true;
        }
        if self.escaped {
            self.escaped = false;
            if self.started {
                self.buffer.push(byte);
            }
            return self.is_complete();
        }
        match byte {
            ESCAPE => self.escaped = true,
            START => {
                if self.started && !self.buffer.is_empty() {
                    log::debug!(
                        "Resync on start marker, dropping {:02X?}",
                        self.buffer
                    );
                }
                self.started = true;
                self.buffer.clear();
            }
            _ if self.started => self.buffer.push(byte),
            _ => log::trace!("Discarding {byte:02X} outside packet"),
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.started && self.buffer.len() >= self.expected
    }

    /// Fewest raw bytes that could still complete the packet.
    pub fn remaining(&self) -> usize {
        let missing = self.expected - self.buffer.len().min(self.expected);
        missing + usize::from(!self.started) + usize::from(self.escaped)
    }

    /// Validates the CRC and returns the payload without it.
    pub fn finish(self) -> Result<Vec<u8>, DecodeError> {
        if !self.started {
            return Err(DecodeError::Timeout);
        }
        if !self.is_complete() || self.expected < CRC_LENGTH {
            return Err(DecodeError::ShortRead {
                expected: self.expected,
                received: self.buffer.len(),
            });
        }
        let mut payload = self.buffer;
        let crc_offset = self.expected - CRC_LENGTH;
        let received = u16::from_le_bytes([payload[crc_offset], payload[crc_offset + 1]]);
        payload.truncate(crc_offset);
        let calculated = crc::checksum(&payload);
        if calculated != received {
            log::warn!(
                "Invalid CRC - calculated={calculated:04X} received={received:04X} payload={payload:02X?}"
            );
            return Err(DecodeError::CrcMismatch {
                calculated,
                received,
            });
        }
        Ok(payload)
    }
}

/// Decodes a packet of `expected` logical bytes from a complete raw buffer.
pub fn decode(raw: &[u8], expected: usize) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = FrameDecoder::new(expected);
    for &byte in raw {
        if decoder.push(byte) {
            break;
        }
    }
    decoder.finish()
}

/// Reads one packet of `expected` logical bytes from the transport.
///
/// Never asks the transport for more raw bytes than the packet can still
/// need, so bytes of whatever follows stay in the receive buffer.
pub fn read_packet<T: Transport + ?Sized>(
    transport: &mut T,
    expected: usize,
) -> Result<Vec<u8>, Error> {
    let mut decoder = FrameDecoder::new(expected);
    let mut rx_buffer = [0u8; 64];
    let mut timeouts = 0;
    while timeouts < READ_ATTEMPTS {
        let wanted = decoder.remaining().min(rx_buffer.len());
        let received = transport.read(&mut rx_buffer[..wanted])?;
        if received == 0 {
            timeouts += 1;
            continue;
        }
        timeouts = 0;
        log::trace!("read_packet: {:02X?}", &rx_buffer[..received]);
        for &byte in &rx_buffer[..received] {
            if decoder.push(byte) {
                return Ok(decoder.finish()?);
            }
        }
    }
    Err(decoder.finish().err().unwrap_or(DecodeError::Timeout).into())
}
