//! SMB2 Negotiate messages

use super::common::SmbMessage;
use crate::error::{Error, Result};
use crate::protocol::constants::{
    structure_size, SecurityMode, Smb2Capabilities, Smb2Dialect,
};
use crate::protocol::reader::ByteReader;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use uuid::Uuid;

/// SMB2 Negotiate Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateRequest {
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub client_guid: Uuid,
    pub dialects: Vec<Smb2Dialect>,
}

impl NegotiateRequest {
    pub fn new(dialects: Vec<Smb2Dialect>, client_guid: Uuid) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::DFS | Smb2Capabilities::LARGE_MTU,
            client_guid,
            dialects,
        }
    }
}

impl SmbMessage for NegotiateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::NEGOTIATE_REQUEST {
            return Err(Error::Wire(format!(
                "invalid negotiate request structure size: {}",
                declared
            )));
        }
        let dialect_count = r.read_u16_le()?;
        let security_mode = SecurityMode::from_bits_retain(r.read_u16_le()?);
        let _reserved = r.read_u16_le()?;
        let capabilities = Smb2Capabilities::from_bits_retain(r.read_u32_le()?);
        let mut guid = [0u8; 16];
        guid.copy_from_slice(r.take(16)?);
        let _client_start_time = r.read_u64_le()?;

        let mut dialects = Vec::with_capacity(dialect_count as usize);
        for _ in 0..dialect_count {
            dialects.push(Smb2Dialect::try_from(r.read_u16_le()?)?);
        }

        Ok(Self {
            security_mode,
            capabilities,
            client_guid: Uuid::from_bytes(guid),
            dialects,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::NEGOTIATE_REQUEST)?;
        buf.write_u16::<LittleEndian>(self.dialects.len() as u16)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(0)?; // reserved
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_all(self.client_guid.as_bytes())?;
        buf.write_u64::<LittleEndian>(0)?; // client start time
        for dialect in &self.dialects {
            buf.write_u16::<LittleEndian>(dialect.to_u16())?;
        }
        Ok(buf)
    }
}

/// SMB2 Negotiate Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateResponse {
    pub security_mode: SecurityMode,
    pub dialect: Smb2Dialect,
    pub server_guid: Uuid,
    pub capabilities: Smb2Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    /// Server clock in Windows FILETIME (100ns ticks since 1601)
    pub system_time: u64,
    pub server_start_time: u64,
    pub security_blob: Vec<u8>,
}

impl NegotiateResponse {
    pub fn signing_required(&self) -> bool {
        self.security_mode.contains(SecurityMode::SIGNING_REQUIRED)
    }
}

impl SmbMessage for NegotiateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::NEGOTIATE_RESPONSE {
            return Err(Error::Wire(format!(
                "invalid negotiate response structure size: {}",
                declared
            )));
        }
        let security_mode = SecurityMode::from_bits_retain(r.read_u16_le()?);
        let dialect = Smb2Dialect::try_from(r.read_u16_le()?)?;
        let _context_count = r.read_u16_le()?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(r.take(16)?);
        let capabilities = Smb2Capabilities::from_bits_retain(r.read_u32_le()?);
        let max_transact_size = r.read_u32_le()?;
        let max_read_size = r.read_u32_le()?;
        let max_write_size = r.read_u32_le()?;
        let system_time = r.read_u64_le()?;
        let server_start_time = r.read_u64_le()?;
        let blob_offset = r.read_u16_le()?;
        let blob_length = r.read_u16_le()?;
        let _context_offset = r.read_u32_le()?;

        let security_blob = if blob_length > 0 && blob_offset as usize >= 64 {
            r.slice_at(blob_offset as usize - 64, blob_length as usize)?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            security_mode,
            dialect,
            server_guid: Uuid::from_bytes(guid),
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            server_start_time,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::NEGOTIATE_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(self.dialect.to_u16())?;
        buf.write_u16::<LittleEndian>(0)?; // negotiate context count
        buf.write_all(self.server_guid.as_bytes())?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u32::<LittleEndian>(self.max_transact_size)?;
        buf.write_u32::<LittleEndian>(self.max_read_size)?;
        buf.write_u32::<LittleEndian>(self.max_write_size)?;
        buf.write_u64::<LittleEndian>(self.system_time)?;
        buf.write_u64::<LittleEndian>(self.server_start_time)?;
        let blob_offset = if self.security_blob.is_empty() {
            0u16
        } else {
            64 + 64 // header + fixed response body
        };
        buf.write_u16::<LittleEndian>(blob_offset)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?; // negotiate context offset
        buf.write_all(&self.security_blob)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_request_roundtrip() {
        let req = NegotiateRequest::new(Smb2Dialect::all().to_vec(), Uuid::new_v4());
        let bytes = req.serialize().unwrap();
        // 36-byte fixed part (structure size counts one dialect byte) + 4 dialects
        assert_eq!(bytes.len(), 36 + 8);
        let parsed = NegotiateRequest::parse(&bytes).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_negotiate_response_roundtrip() {
        let resp = NegotiateResponse {
            security_mode: SecurityMode::SIGNING_ENABLED | SecurityMode::SIGNING_REQUIRED,
            dialect: Smb2Dialect::Smb302,
            server_guid: Uuid::new_v4(),
            capabilities: Smb2Capabilities::DFS,
            max_transact_size: 1 << 20,
            max_read_size: 1 << 20,
            max_write_size: 1 << 20,
            system_time: 132_537_600_000_000_000,
            server_start_time: 0,
            security_blob: vec![0xAA; 16],
        };
        let bytes = resp.serialize().unwrap();
        let parsed = NegotiateResponse::parse(&bytes).unwrap();
        assert_eq!(parsed, resp);
        assert!(parsed.signing_required());
    }

    #[test]
    fn test_blob_bounds_checked() {
        let resp = NegotiateResponse {
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialect: Smb2Dialect::Smb210,
            server_guid: Uuid::nil(),
            capabilities: Smb2Capabilities::empty(),
            max_transact_size: 0,
            max_read_size: 0,
            max_write_size: 0,
            system_time: 0,
            server_start_time: 0,
            security_blob: vec![1, 2, 3, 4],
        };
        let mut bytes = resp.serialize().unwrap();
        // Inflate the declared blob length past the end of the buffer
        bytes[58] = 0xFF;
        assert!(NegotiateResponse::parse(&bytes).is_err());
    }
}
