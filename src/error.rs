//! Error types for the SMB2 client engine

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the client engine.
///
/// Variants group into the classes the filesystem adapter cares about:
/// transport failures (`Io`, `Timeout`, `ConnectionClosed`) trigger a
/// caller-level reconnect, `Server` carries a well-formed failure status,
/// and everything else is fatal to the call that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Read timed out waiting for a response
    #[error("Operation timed out")]
    Timeout,

    /// The stream was closed by the peer
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed or oversized frame, bad header, signature mismatch
    #[error("Wire format error: {0}")]
    Wire(String),

    /// SPNEGO/NTLM handshake parse or logic failure
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Well-formed server response carrying a failure status
    #[error("Server error: {kind} ({status})")]
    Server { kind: ServerErrorKind, status: NtStatus },

    /// Cache or state-machine inconsistency; recoverable by invalidating
    /// and retrying once
    #[error("Protocol invariant violated: {0}")]
    Invariant(String),

    /// Invalid state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Build a `Server` error from a raw status word.
    pub fn server(status: NtStatus) -> Self {
        Error::Server {
            kind: ServerErrorKind::from_status(status),
            status,
        }
    }

    /// True for errors that indicate the transport itself failed and the
    /// connection should be re-established before retrying.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout | Error::ConnectionClosed
        )
    }
}

/// Fixed classification of server failure statuses, preserved for the
/// adapter layer's mapping to filesystem-style error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    NotFound,
    AccessDenied,
    NameCollision,
    SharingViolation,
    DiskFull,
    QuotaExceeded,
    EndOfFile,
    Unsupported,
    /// Catch-all I/O failure
    Io,
}

impl ServerErrorKind {
    pub fn from_status(status: NtStatus) -> Self {
        match status {
            NtStatus::ObjectNameNotFound
            | NtStatus::ObjectPathNotFound
            | NtStatus::NoSuchFile
            | NtStatus::BadNetworkName => Self::NotFound,
            NtStatus::AccessDenied | NtStatus::LogonFailure => Self::AccessDenied,
            NtStatus::ObjectNameCollision => Self::NameCollision,
            NtStatus::SharingViolation => Self::SharingViolation,
            NtStatus::DiskFull => Self::DiskFull,
            NtStatus::QuotaExceeded => Self::QuotaExceeded,
            NtStatus::EndOfFile => Self::EndOfFile,
            NtStatus::NotSupported | NtStatus::InvalidDeviceRequest => Self::Unsupported,
            _ => Self::Io,
        }
    }
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::NameCollision => "name collision",
            Self::SharingViolation => "sharing violation",
            Self::DiskFull => "disk full",
            Self::QuotaExceeded => "quota exceeded",
            Self::EndOfFile => "end of file",
            Self::Unsupported => "unsupported",
            Self::Io => "I/O error",
        };
        f.write_str(msg)
    }
}

/// SMB protocol status codes (subset of NTSTATUS)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtStatus {
    /// The operation completed successfully
    Success = 0x00000000,
    /// The operation is still in progress (async interim response)
    Pending = 0x00000103,
    /// No more files match the enumeration
    NoMoreFiles = 0x80000006,
    /// Authentication requires another round trip
    MoreProcessingRequired = 0xC0000016,
    /// Reached end of file
    EndOfFile = 0xC0000011,
    /// Access denied
    AccessDenied = 0xC0000022,
    /// The buffer is too small
    BufferTooSmall = 0xC0000023,
    /// The object name is not found
    ObjectNameNotFound = 0xC0000034,
    /// Cannot create a file that already exists
    ObjectNameCollision = 0xC0000035,
    /// The object path component was not found
    ObjectPathNotFound = 0xC000003A,
    /// No such file
    NoSuchFile = 0xC000000F,
    /// The parameter is incorrect
    InvalidParameter = 0xC000000D,
    /// The specified handle is invalid
    InvalidHandle = 0xC0000008,
    /// The file is in use with an incompatible share mode
    SharingViolation = 0xC0000043,
    /// Quota exceeded
    QuotaExceeded = 0xC0000044,
    /// The user name or password is incorrect
    LogonFailure = 0xC000006D,
    /// The disk is full
    DiskFull = 0xC000007F,
    /// The request timed out
    IoTimeout = 0xC00000B5,
    /// The request is not supported
    NotSupported = 0xC00000BB,
    /// Bad network name
    BadNetworkName = 0xC00000CC,
    /// The device does not recognize the request
    InvalidDeviceRequest = 0xC0000010,
    /// The session was deleted by the server
    UserSessionDeleted = 0xC0000203,
    /// The specified network name is no longer available
    NetworkNameDeleted = 0xC00000C9,
    /// Unrecognized failure status
    Unknown = 0xFFFFFFFF,
}

impl TryFrom<u32> for NtStatus {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(NtStatus::Success),
            0x00000103 => Ok(NtStatus::Pending),
            0x80000006 => Ok(NtStatus::NoMoreFiles),
            0xC0000016 => Ok(NtStatus::MoreProcessingRequired),
            0xC0000011 => Ok(NtStatus::EndOfFile),
            0xC0000022 => Ok(NtStatus::AccessDenied),
            0xC0000023 => Ok(NtStatus::BufferTooSmall),
            0xC0000034 => Ok(NtStatus::ObjectNameNotFound),
            0xC0000035 => Ok(NtStatus::ObjectNameCollision),
            0xC000003A => Ok(NtStatus::ObjectPathNotFound),
            0xC000000F => Ok(NtStatus::NoSuchFile),
            0xC000000D => Ok(NtStatus::InvalidParameter),
            0xC0000008 => Ok(NtStatus::InvalidHandle),
            0xC0000043 => Ok(NtStatus::SharingViolation),
            0xC0000044 => Ok(NtStatus::QuotaExceeded),
            0xC000006D => Ok(NtStatus::LogonFailure),
            0xC000007F => Ok(NtStatus::DiskFull),
            0xC00000B5 => Ok(NtStatus::IoTimeout),
            0xC00000BB => Ok(NtStatus::NotSupported),
            0xC00000CC => Ok(NtStatus::BadNetworkName),
            0xC0000010 => Ok(NtStatus::InvalidDeviceRequest),
            0xC0000203 => Ok(NtStatus::UserSessionDeleted),
            0xC00000C9 => Ok(NtStatus::NetworkNameDeleted),
            _ => Err(()),
        }
    }
}

impl NtStatus {
    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        (self as u32) & 0xC0000000 == 0xC0000000
    }

    /// Create from a raw u32, collapsing unrecognized values to `Unknown`
    pub fn from_u32(value: u32) -> Self {
        value.try_into().unwrap_or(NtStatus::Unknown)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", *self as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntstatus_classes() {
        assert!(NtStatus::Success.is_success());
        assert!(!NtStatus::Success.is_error());
        assert!(NtStatus::AccessDenied.is_error());
        assert!(!NtStatus::NoMoreFiles.is_error());
        assert!(!NtStatus::Pending.is_error());
    }

    #[test]
    fn test_ntstatus_from_u32() {
        assert_eq!(NtStatus::from_u32(0x00000000), NtStatus::Success);
        assert_eq!(NtStatus::from_u32(0xC0000022), NtStatus::AccessDenied);
        assert_eq!(NtStatus::from_u32(0x80000006), NtStatus::NoMoreFiles);
        assert_eq!(NtStatus::from_u32(0xDEADBEEF), NtStatus::Unknown);
    }

    #[test]
    fn test_server_error_classification() {
        assert_eq!(
            ServerErrorKind::from_status(NtStatus::ObjectNameNotFound),
            ServerErrorKind::NotFound
        );
        assert_eq!(
            ServerErrorKind::from_status(NtStatus::SharingViolation),
            ServerErrorKind::SharingViolation
        );
        assert_eq!(
            ServerErrorKind::from_status(NtStatus::NetworkNameDeleted),
            ServerErrorKind::Io
        );
    }

    #[test]
    fn test_transport_class() {
        assert!(Error::Timeout.is_transport());
        assert!(Error::ConnectionClosed.is_transport());
        assert!(!Error::server(NtStatus::AccessDenied).is_transport());
        assert!(!Error::Wire("bad tag".into()).is_transport());
    }
}
