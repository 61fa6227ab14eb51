//! SMB2/3 protocol constants

use bitflags::bitflags;

/// SMB2 magic as bytes
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB2 magic as u32 (little-endian read of the tag)
pub const SMB2_MAGIC_U32: u32 = 0x424D53FE;

/// SMB2 header size
pub const SMB2_HEADER_SIZE: usize = 64;

/// The byte range in the header that holds the 16-byte signature
pub const SIGNATURE_RANGE: std::ops::Range<usize> = 48..64;

/// Structure-size table for SMB2 message bodies.
///
/// Values follow MS-SMB2: sizes are declared including one byte of variable
/// data, so a request whose variable part is empty is one byte shorter than
/// its declared size and must carry a single zero pad byte on the wire.
pub mod structure_size {
    pub const NEGOTIATE_REQUEST: u16 = 36;
    pub const NEGOTIATE_RESPONSE: u16 = 65;
    pub const SESSION_SETUP_REQUEST: u16 = 25;
    pub const SESSION_SETUP_RESPONSE: u16 = 9;
    pub const LOGOFF_REQUEST: u16 = 4;
    pub const LOGOFF_RESPONSE: u16 = 4;
    pub const TREE_CONNECT_REQUEST: u16 = 9;
    pub const TREE_CONNECT_RESPONSE: u16 = 16;
    pub const TREE_DISCONNECT_REQUEST: u16 = 4;
    pub const TREE_DISCONNECT_RESPONSE: u16 = 4;
    pub const CREATE_REQUEST: u16 = 57;
    pub const CREATE_RESPONSE: u16 = 89;
    pub const CLOSE_REQUEST: u16 = 24;
    pub const CLOSE_RESPONSE: u16 = 60;
    pub const READ_REQUEST: u16 = 49;
    pub const READ_RESPONSE: u16 = 17;
    pub const WRITE_REQUEST: u16 = 49;
    pub const WRITE_RESPONSE: u16 = 17;
    pub const ECHO_REQUEST: u16 = 4;
    pub const ECHO_RESPONSE: u16 = 4;
    pub const QUERY_DIRECTORY_REQUEST: u16 = 33;
    pub const QUERY_DIRECTORY_RESPONSE: u16 = 9;
    /// Error responses share one fixed body layout
    pub const ERROR_RESPONSE: u16 = 9;
}

/// SMB2 Commands (opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Smb2Command {
    Negotiate = 0x00,
    SessionSetup = 0x01,
    Logoff = 0x02,
    TreeConnect = 0x03,
    TreeDisconnect = 0x04,
    Create = 0x05,
    Close = 0x06,
    Flush = 0x07,
    Read = 0x08,
    Write = 0x09,
    Lock = 0x0A,
    Ioctl = 0x0B,
    Cancel = 0x0C,
    Echo = 0x0D,
    QueryDirectory = 0x0E,
    Notify = 0x0F,
    GetInfo = 0x10,
    SetInfo = 0x11,
    Break = 0x12,
}

impl TryFrom<u16> for Smb2Command {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Negotiate),
            0x01 => Ok(Self::SessionSetup),
            0x02 => Ok(Self::Logoff),
            0x03 => Ok(Self::TreeConnect),
            0x04 => Ok(Self::TreeDisconnect),
            0x05 => Ok(Self::Create),
            0x06 => Ok(Self::Close),
            0x07 => Ok(Self::Flush),
            0x08 => Ok(Self::Read),
            0x09 => Ok(Self::Write),
            0x0A => Ok(Self::Lock),
            0x0B => Ok(Self::Ioctl),
            0x0C => Ok(Self::Cancel),
            0x0D => Ok(Self::Echo),
            0x0E => Ok(Self::QueryDirectory),
            0x0F => Ok(Self::Notify),
            0x10 => Ok(Self::GetInfo),
            0x11 => Ok(Self::SetInfo),
            0x12 => Ok(Self::Break),
            _ => Err(crate::Error::Wire(format!(
                "Invalid SMB2 command: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Command {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Declared body structure size for a request carrying this command.
    pub fn request_structure_size(self) -> Option<u16> {
        use structure_size::*;
        match self {
            Self::Negotiate => Some(NEGOTIATE_REQUEST),
            Self::SessionSetup => Some(SESSION_SETUP_REQUEST),
            Self::Logoff => Some(LOGOFF_REQUEST),
            Self::TreeConnect => Some(TREE_CONNECT_REQUEST),
            Self::TreeDisconnect => Some(TREE_DISCONNECT_REQUEST),
            Self::Create => Some(CREATE_REQUEST),
            Self::Close => Some(CLOSE_REQUEST),
            Self::Read => Some(READ_REQUEST),
            Self::Write => Some(WRITE_REQUEST),
            Self::Echo => Some(ECHO_REQUEST),
            Self::QueryDirectory => Some(QUERY_DIRECTORY_REQUEST),
            _ => None,
        }
    }

    /// Declared body structure size for a success response to this command.
    pub fn response_structure_size(self) -> Option<u16> {
        use structure_size::*;
        match self {
            Self::Negotiate => Some(NEGOTIATE_RESPONSE),
            Self::SessionSetup => Some(SESSION_SETUP_RESPONSE),
            Self::Logoff => Some(LOGOFF_RESPONSE),
            Self::TreeConnect => Some(TREE_CONNECT_RESPONSE),
            Self::TreeDisconnect => Some(TREE_DISCONNECT_RESPONSE),
            Self::Create => Some(CREATE_RESPONSE),
            Self::Close => Some(CLOSE_RESPONSE),
            Self::Read => Some(READ_RESPONSE),
            Self::Write => Some(WRITE_RESPONSE),
            Self::Echo => Some(ECHO_RESPONSE),
            Self::QueryDirectory => Some(QUERY_DIRECTORY_RESPONSE),
            _ => None,
        }
    }
}

bitflags! {
    /// SMB2 header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Smb2HeaderFlags: u32 {
        const RESPONSE = 0x00000001;
        const ASYNC_COMMAND = 0x00000002;
        const RELATED_OPERATIONS = 0x00000004;
        const SIGNED = 0x00000008;
        const DFS_OPERATIONS = 0x10000000;
        const REPLAY_OPERATION = 0x20000000;
    }
}

bitflags! {
    /// SMB2 negotiate security mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x0001;
        const SIGNING_REQUIRED = 0x0002;
    }
}

bitflags! {
    /// SMB2 capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Smb2Capabilities: u32 {
        const DFS = 0x00000001;
        const LEASING = 0x00000002;
        const LARGE_MTU = 0x00000004;
        const MULTI_CHANNEL = 0x00000008;
        const PERSISTENT_HANDLES = 0x00000010;
        const DIRECTORY_LEASING = 0x00000020;
        const ENCRYPTION = 0x00000040;
    }
}

bitflags! {
    /// SMB2 session flags (SessionSetup response)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u16 {
        const IS_GUEST = 0x0001;
        const IS_NULL = 0x0002;
        const ENCRYPT_DATA = 0x0004;
    }
}

impl SessionFlags {
    /// Guest and null sessions never carry a signing key.
    pub fn is_guest_or_anonymous(self) -> bool {
        self.intersects(Self::IS_GUEST | Self::IS_NULL)
    }
}

/// SMB2 dialect versions.
///
/// The client offers exactly these four, lowest to highest. 3.1.1 requires
/// negotiate contexts and preauth integrity, which this engine does not
/// speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum Smb2Dialect {
    Smb202 = 0x0202,
    Smb210 = 0x0210,
    Smb300 = 0x0300,
    Smb302 = 0x0302,
}

impl TryFrom<u16> for Smb2Dialect {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0202 => Ok(Self::Smb202),
            0x0210 => Ok(Self::Smb210),
            0x0300 => Ok(Self::Smb300),
            0x0302 => Ok(Self::Smb302),
            _ => Err(crate::Error::Wire(format!(
                "Unknown SMB2 dialect: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Dialect {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// All dialects the client offers, in negotiation order.
    pub fn all() -> [Smb2Dialect; 4] {
        [Self::Smb202, Self::Smb210, Self::Smb300, Self::Smb302]
    }

    /// 3.x dialects sign with AES-CMAC; earlier ones with HMAC-SHA256.
    pub fn is_smb3(self) -> bool {
        self >= Self::Smb300
    }
}

bitflags! {
    /// File attributes as defined in MS-FSCC
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u32 {
        const READONLY  = 0x00000001;
        const HIDDEN    = 0x00000002;
        const SYSTEM    = 0x00000004;
        const DIRECTORY = 0x00000010;
        const ARCHIVE   = 0x00000020;
        const NORMAL    = 0x00000080;
    }
}

bitflags! {
    /// File access rights (subset used for directory handles)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DesiredAccess: u32 {
        const FILE_READ_DATA       = 0x00000001;
        const FILE_READ_EA         = 0x00000008;
        const FILE_READ_ATTRIBUTES = 0x00000080;
        const READ_CONTROL         = 0x00020000;
        const SYNCHRONIZE          = 0x00100000;
    }
}

bitflags! {
    /// File share access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareAccess: u32 {
        const FILE_SHARE_READ   = 0x00000001;
        const FILE_SHARE_WRITE  = 0x00000002;
        const FILE_SHARE_DELETE = 0x00000004;
    }
}

bitflags! {
    /// File create options (subset)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u32 {
        const FILE_DIRECTORY_FILE     = 0x00000001;
        const FILE_NON_DIRECTORY_FILE = 0x00000040;
    }
}

/// Create disposition values (subset: the engine only opens existing objects)
pub mod create_disposition {
    pub const OPEN: u32 = 0x00000001;
}

/// Impersonation levels
pub mod impersonation_level {
    pub const IMPERSONATION: u32 = 0x00000002;
}

/// Query Directory request flags
pub mod query_directory_flags {
    /// Restart the enumeration from the beginning
    pub const RESTART_SCANS: u8 = 0x01;
    /// Return only a single entry
    pub const RETURN_SINGLE_ENTRY: u8 = 0x02;
}

/// File information classes used by Query Directory
pub mod file_information_class {
    pub const FILE_DIRECTORY_INFORMATION: u8 = 0x01;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smb2_magic() {
        assert_eq!(SMB2_MAGIC, [0xFE, b'S', b'M', b'B']);
        assert_eq!(SMB2_MAGIC_U32, 0x424D53FE);
    }

    #[test]
    fn test_dialect_order() {
        let all = Smb2Dialect::all();
        for pair in all.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(!Smb2Dialect::Smb210.is_smb3());
        assert!(Smb2Dialect::Smb300.is_smb3());
    }

    #[test]
    fn test_structure_size_table() {
        assert_eq!(
            Smb2Command::Negotiate.request_structure_size(),
            Some(structure_size::NEGOTIATE_REQUEST)
        );
        assert_eq!(
            Smb2Command::QueryDirectory.response_structure_size(),
            Some(structure_size::QUERY_DIRECTORY_RESPONSE)
        );
        assert_eq!(Smb2Command::Lock.request_structure_size(), None);
    }

    #[test]
    fn test_session_flags() {
        assert!(SessionFlags::IS_GUEST.is_guest_or_anonymous());
        assert!(SessionFlags::IS_NULL.is_guest_or_anonymous());
        assert!(!SessionFlags::empty().is_guest_or_anonymous());
    }
}
