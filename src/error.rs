use crate::protocol::{Command, ReplyKind};

/// Why an inbound packet could not be recovered from the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("timed out waiting for a start marker")]
    Timeout,
    #[error("short read: received {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },
    #[error("CRC mismatch: calculated={calculated:#06X} received={received:#06X}")]
    CrcMismatch { calculated: u16, received: u16 },
    #[error("reply of {actual} bytes cannot hold a {expected} byte record")]
    Length { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("sent to cell {expected:#06X} but got a reply from {received:#06X}")]
    AddressMismatch { expected: u16, received: u16 },
    #[error("reply does not carry a {0:?} record")]
    UnexpectedReply(ReplyKind),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("cell {0:#06X} has no known protocol version")]
    UnknownVersion(u16),
    #[error("shunt current {0} mA is outside the permitted range")]
    ShuntCurrentRange(u16),
    #[error("cell {cell_id:#06X} reports {actual} mA after {commands} commands, wanted {target} mA")]
    ShuntNotConfirmed {
        cell_id: u16,
        target: u16,
        actual: u16,
        commands: usize,
    },
    #[error("cell {cell_id:#06X} failed {command:?} after {attempts} attempts: {source}")]
    Exhausted {
        cell_id: u16,
        command: Command,
        attempts: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("Cannot parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Bus level failures worth another attempt after a bus reset.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Decode(_) | Error::AddressMismatch { .. } | Error::Io(_)
        )
    }
}
