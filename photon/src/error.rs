use std::fmt;

/// Decode failures are always local to a single command or value; callers
/// drop the offending unit and keep going rather than aborting the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    UnknownTag(u8),
    Truncated,
    MalformedLength,
    NotAnEvent,
    NotAnOperationRequest,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownTag(tag) => write!(f, "unknown protocol16 tag {tag:#x}"),
            Error::Truncated => write!(f, "truncated buffer"),
            Error::MalformedLength => write!(f, "malformed length prefix"),
            Error::NotAnEvent => write!(f, "message is not event data"),
            Error::NotAnOperationRequest => write!(f, "message is not an operation request"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
