//! SMB2 Tree Connect and Tree Disconnect messages

use super::common::{pad_to_structure_size, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::constants::structure_size;
use crate::protocol::reader::{string_to_utf16_le, utf16_le_to_string, ByteReader};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// SMB2 TreeConnect Request; `path` is the full UNC share path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConnectRequest {
    pub path: String,
}

impl TreeConnectRequest {
    pub fn new(server: &str, share: &str) -> Self {
        Self {
            path: format!("\\\\{}\\{}", server, share),
        }
    }
}

impl SmbMessage for TreeConnectRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::TREE_CONNECT_REQUEST {
            return Err(Error::Wire(format!(
                "invalid tree connect request structure size: {}",
                declared
            )));
        }
        let _flags = r.read_u16_le()?;
        let path_offset = r.read_u16_le()?;
        let path_length = r.read_u16_le()?;

        let path = if path_length > 0 && path_offset as usize >= 64 {
            utf16_le_to_string(r.slice_at(path_offset as usize - 64, path_length as usize)?)
        } else {
            String::new()
        };

        Ok(Self { path })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let path_bytes = string_to_utf16_le(&self.path);
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::TREE_CONNECT_REQUEST)?;
        buf.write_u16::<LittleEndian>(0)?; // flags
        let path_offset = if path_bytes.is_empty() { 0u16 } else { 64 + 8 };
        buf.write_u16::<LittleEndian>(path_offset)?;
        buf.write_u16::<LittleEndian>(path_bytes.len() as u16)?;
        buf.write_all(&path_bytes)?;
        Ok(pad_to_structure_size(
            buf,
            structure_size::TREE_CONNECT_REQUEST,
        ))
    }
}

/// Share types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShareType {
    Disk = 0x01,
    Pipe = 0x02,
    Print = 0x03,
}

impl TryFrom<u8> for ShareType {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Disk),
            0x02 => Ok(Self::Pipe),
            0x03 => Ok(Self::Print),
            _ => Err(Error::Wire(format!("invalid share type: {}", value))),
        }
    }
}

/// SMB2 TreeConnect Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConnectResponse {
    pub share_type: ShareType,
    pub share_flags: u32,
    pub capabilities: u32,
    pub maximal_access: u32,
}

impl SmbMessage for TreeConnectResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::TREE_CONNECT_RESPONSE {
            return Err(Error::Wire(format!(
                "invalid tree connect response structure size: {}",
                declared
            )));
        }
        let share_type = ShareType::try_from(r.read_u8()?)?;
        let _reserved = r.read_u8()?;
        let share_flags = r.read_u32_le()?;
        let capabilities = r.read_u32_le()?;
        let maximal_access = r.read_u32_le()?;

        Ok(Self {
            share_type,
            share_flags,
            capabilities,
            maximal_access,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::TREE_CONNECT_RESPONSE)?;
        buf.write_u8(self.share_type as u8)?;
        buf.write_u8(0)?; // reserved
        buf.write_u32::<LittleEndian>(self.share_flags)?;
        buf.write_u32::<LittleEndian>(self.capabilities)?;
        buf.write_u32::<LittleEndian>(self.maximal_access)?;
        Ok(buf)
    }
}

/// SMB2 TreeDisconnect Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeDisconnectRequest;

impl SmbMessage for TreeDisconnectRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::TREE_DISCONNECT_REQUEST {
            return Err(Error::Wire(format!(
                "invalid tree disconnect structure size: {}",
                declared
            )));
        }
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::TREE_DISCONNECT_REQUEST)?;
        buf.write_u16::<LittleEndian>(0)?; // reserved
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_connect_roundtrip() {
        let req = TreeConnectRequest::new("fileserver", "IPC$");
        assert_eq!(req.path, "\\\\fileserver\\IPC$");
        let bytes = req.serialize().unwrap();
        let parsed = TreeConnectRequest::parse(&bytes).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_empty_path_gets_pad_byte() {
        let req = TreeConnectRequest {
            path: String::new(),
        };
        let bytes = req.serialize().unwrap();
        // 8 fixed bytes + 1 zero pad to reach the declared structure size
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[8], 0);
    }

    #[test]
    fn test_tree_connect_response_roundtrip() {
        let resp = TreeConnectResponse {
            share_type: ShareType::Disk,
            share_flags: 0x30,
            capabilities: 0,
            maximal_access: 0x001F01FF,
        };
        let bytes = resp.serialize().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(TreeConnectResponse::parse(&bytes).unwrap(), resp);
    }

    #[test]
    fn test_invalid_share_type() {
        let resp = TreeConnectResponse {
            share_type: ShareType::Pipe,
            share_flags: 0,
            capabilities: 0,
            maximal_access: 0,
        };
        let mut bytes = resp.serialize().unwrap();
        bytes[2] = 0x7F;
        assert!(TreeConnectResponse::parse(&bytes).is_err());
    }
}
