//! SMB2 Session Setup and Logoff messages

use super::common::SmbMessage;
use crate::error::{Error, Result};
use crate::protocol::constants::{structure_size, SecurityMode, SessionFlags};
use crate::protocol::reader::ByteReader;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// SMB2 SessionSetup Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetupRequest {
    pub security_mode: SecurityMode,
    /// Prior session id, passed as a continuation hint when re-establishing
    /// a session after reconnect
    pub previous_session_id: u64,
    pub security_blob: Vec<u8>,
}

impl SessionSetupRequest {
    pub fn new(security_blob: Vec<u8>, previous_session_id: u64) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            previous_session_id,
            security_blob,
        }
    }
}

impl SmbMessage for SessionSetupRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::SESSION_SETUP_REQUEST {
            return Err(Error::Wire(format!(
                "invalid session setup request structure size: {}",
                declared
            )));
        }
        let _flags = r.read_u8()?;
        let security_mode = SecurityMode::from_bits_retain(r.read_u8()? as u16);
        let _capabilities = r.read_u32_le()?;
        let _channel = r.read_u32_le()?;
        let blob_offset = r.read_u16_le()?;
        let blob_length = r.read_u16_le()?;
        let previous_session_id = r.read_u64_le()?;

        let security_blob = if blob_length > 0 && blob_offset as usize >= 64 {
            r.slice_at(blob_offset as usize - 64, blob_length as usize)?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            security_mode,
            previous_session_id,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::SESSION_SETUP_REQUEST)?;
        buf.write_u8(0)?; // flags
        buf.write_u8(self.security_mode.bits() as u8)?;
        buf.write_u32::<LittleEndian>(0)?; // capabilities
        buf.write_u32::<LittleEndian>(0)?; // channel
        let blob_offset = if self.security_blob.is_empty() {
            0u16
        } else {
            64 + 24 // header + fixed request body
        };
        buf.write_u16::<LittleEndian>(blob_offset)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u64::<LittleEndian>(self.previous_session_id)?;
        buf.write_all(&self.security_blob)?;
        Ok(buf)
    }
}

/// SMB2 SessionSetup Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetupResponse {
    pub session_flags: SessionFlags,
    pub security_blob: Vec<u8>,
}

impl SmbMessage for SessionSetupResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::SESSION_SETUP_RESPONSE {
            return Err(Error::Wire(format!(
                "invalid session setup response structure size: {}",
                declared
            )));
        }
        let session_flags = SessionFlags::from_bits_retain(r.read_u16_le()?);
        let blob_offset = r.read_u16_le()?;
        let blob_length = r.read_u16_le()?;

        let security_blob = if blob_length > 0 && blob_offset as usize >= 64 {
            r.slice_at(blob_offset as usize - 64, blob_length as usize)?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            session_flags,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::SESSION_SETUP_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.session_flags.bits())?;
        let blob_offset = if self.security_blob.is_empty() {
            0u16
        } else {
            64 + 8
        };
        buf.write_u16::<LittleEndian>(blob_offset)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_all(&self.security_blob)?;
        Ok(buf)
    }
}

/// SMB2 Logoff Request (the 4-byte fixed body is all there is)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoffRequest;

impl SmbMessage for LogoffRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::LOGOFF_REQUEST {
            return Err(Error::Wire(format!(
                "invalid logoff structure size: {}",
                declared
            )));
        }
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::LOGOFF_REQUEST)?;
        buf.write_u16::<LittleEndian>(0)?; // reserved
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_setup_request_roundtrip() {
        let req = SessionSetupRequest::new(vec![0x60, 0x10, 0x06], 0x1234);
        let bytes = req.serialize().unwrap();
        let parsed = SessionSetupRequest::parse(&bytes).unwrap();
        assert_eq!(parsed.security_blob, req.security_blob);
        assert_eq!(parsed.previous_session_id, 0x1234);
    }

    #[test]
    fn test_session_setup_response_roundtrip() {
        let resp = SessionSetupResponse {
            session_flags: SessionFlags::IS_GUEST,
            security_blob: vec![0xA1, 0x05],
        };
        let bytes = resp.serialize().unwrap();
        let parsed = SessionSetupResponse::parse(&bytes).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_blob_extending_past_buffer_rejected() {
        let resp = SessionSetupResponse {
            session_flags: SessionFlags::empty(),
            security_blob: vec![1, 2, 3],
        };
        let mut bytes = resp.serialize().unwrap();
        bytes[6] = 0x40; // declared blob length 64, only 3 present
        assert!(SessionSetupResponse::parse(&bytes).is_err());
    }

    #[test]
    fn test_logoff_roundtrip() {
        let bytes = LogoffRequest.serialize().unwrap();
        assert_eq!(bytes.len(), 4);
        assert!(LogoffRequest::parse(&bytes).is_ok());
    }
}
