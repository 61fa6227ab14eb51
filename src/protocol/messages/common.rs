//! Common types for SMB2 message bodies

use crate::error::Result;

/// Trait for SMB2 message bodies that can be parsed from and serialized to
/// bytes. Offsets inside a body are declared relative to the start of the
/// SMB2 header, 64 bytes before the body itself.
pub trait SmbMessage: Sized {
    /// Parse the body from bytes (header already stripped)
    fn parse(buf: &[u8]) -> Result<Self>;

    /// Serialize the body to bytes
    fn serialize(&self) -> Result<Vec<u8>>;
}

/// Apply the short-body padding rule: a request body whose variable part is
/// empty is one byte short of its declared structure size, and servers
/// reject it unless a zero byte brings it up to the declared size.
pub fn pad_to_structure_size(mut body: Vec<u8>, declared: u16) -> Vec<u8> {
    while body.len() < declared as usize {
        body.push(0);
    }
    body
}

/// File ID for SMB2 operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.persistent.to_le_bytes());
        out[8..].copy_from_slice(&self.volatile.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        Self {
            persistent: u64::from_le_bytes(bytes[..8].try_into().unwrap()),
            volatile: u64::from_le_bytes(bytes[8..].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_rule() {
        // Tree connect with empty path: 8 fixed bytes, declared size 9
        let padded = pad_to_structure_size(vec![9, 0, 0, 0, 0, 0, 0, 0], 9);
        assert_eq!(padded.len(), 9);
        assert_eq!(padded[8], 0);

        // Body already at or past the declared size is left alone
        let full = pad_to_structure_size(vec![0u8; 12], 9);
        assert_eq!(full.len(), 12);
    }

    #[test]
    fn test_file_id_roundtrip() {
        let id = FileId {
            persistent: 0x1122334455667788,
            volatile: 0x99AABBCCDDEEFF00,
        };
        assert_eq!(FileId::from_bytes(&id.to_bytes()), id);
    }
}
