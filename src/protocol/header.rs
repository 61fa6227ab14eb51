//! SMB2 fixed header encode/decode and message validation

use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{
    Smb2Command, Smb2HeaderFlags, structure_size, SMB2_HEADER_SIZE, SMB2_MAGIC_U32,
};
use crate::protocol::reader::ByteReader;
use byteorder::{LittleEndian, WriteBytesExt};

/// SMB2 Header (64 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub credit_charge: u16,
    pub status: u32,
    pub command: Smb2Command,
    pub credits: u16,
    pub flags: Smb2HeaderFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    /// Build a request header. `credit_request` rides in the credits field;
    /// the signed flag is set here and the signature itself is filled in by
    /// the signing pass just before transmission.
    pub fn request(
        command: Smb2Command,
        message_id: u64,
        tree_id: u32,
        session_id: u64,
        credit_request: u16,
        signed: bool,
    ) -> Self {
        let mut flags = Smb2HeaderFlags::empty();
        if signed {
            flags |= Smb2HeaderFlags::SIGNED;
        }
        Self {
            credit_charge: 1,
            status: 0,
            command,
            credits: credit_request,
            flags,
            next_command: 0,
            message_id,
            tree_id,
            session_id,
            signature: [0; 16],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let protocol_id = r.read_u32_le()?;
        if protocol_id != SMB2_MAGIC_U32 {
            return Err(Error::Wire(format!(
                "invalid protocol ID: 0x{:08x}",
                protocol_id
            )));
        }

        let header_size = r.read_u16_le()?;
        if header_size as usize != SMB2_HEADER_SIZE {
            return Err(Error::Wire(format!(
                "invalid header structure size: {}",
                header_size
            )));
        }

        let credit_charge = r.read_u16_le()?;
        let status = r.read_u32_le()?;
        let command = Smb2Command::try_from(r.read_u16_le()?)?;
        let credits = r.read_u16_le()?;
        let flags = Smb2HeaderFlags::from_bits_retain(r.read_u32_le()?);
        let next_command = r.read_u32_le()?;
        let message_id = r.read_u64_le()?;
        // Async responses carry an 8-byte AsyncId where sync ones have
        // Reserved + TreeId; the engine never needs the AsyncId value.
        let _reserved = r.read_u32_le()?;
        let tree_id = r.read_u32_le()?;
        let session_id = r.read_u64_le()?;

        let mut signature = [0u8; 16];
        signature.copy_from_slice(r.take(16)?);

        Ok(Self {
            credit_charge,
            status,
            command,
            credits,
            flags,
            next_command,
            message_id,
            tree_id,
            session_id,
            signature,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SMB2_HEADER_SIZE);
        buf.write_u32::<LittleEndian>(SMB2_MAGIC_U32)?;
        buf.write_u16::<LittleEndian>(SMB2_HEADER_SIZE as u16)?;
        buf.write_u16::<LittleEndian>(self.credit_charge)?;
        buf.write_u32::<LittleEndian>(self.status)?;
        buf.write_u16::<LittleEndian>(self.command.to_u16())?;
        buf.write_u16::<LittleEndian>(self.credits)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.write_u32::<LittleEndian>(self.next_command)?;
        buf.write_u64::<LittleEndian>(self.message_id)?;
        buf.write_u32::<LittleEndian>(0)?; // reserved
        buf.write_u32::<LittleEndian>(self.tree_id)?;
        buf.write_u64::<LittleEndian>(self.session_id)?;
        buf.extend_from_slice(&self.signature);
        Ok(buf)
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::RESPONSE)
    }

    pub fn is_async(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::ASYNC_COMMAND)
    }

    pub fn is_signed(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::SIGNED)
    }

    pub fn nt_status(&self) -> NtStatus {
        NtStatus::from_u32(self.status)
    }
}

/// A decoded message: validated header plus the raw body bytes after it.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub header: Smb2Header,
    pub body: Vec<u8>,
}

impl ParsedMessage {
    /// Decode a full message (header + body) and validate its structure.
    ///
    /// Checks the protocol tag, the fixed header size, and — for commands in
    /// the structure-size table — that the body's declared structure size
    /// matches the expected request/response value. Error-status responses
    /// are validated against the common error-body layout instead.
    pub fn decode_and_validate(raw: &[u8]) -> Result<Self> {
        if raw.len() < SMB2_HEADER_SIZE {
            return Err(Error::Wire(format!(
                "message shorter than header: {} bytes",
                raw.len()
            )));
        }
        let header = Smb2Header::parse(raw)?;
        let body = raw[SMB2_HEADER_SIZE..].to_vec();

        let status = header.nt_status();
        let expected = if header.is_response()
            && status.is_error()
            && status != NtStatus::MoreProcessingRequired
        {
            Some(structure_size::ERROR_RESPONSE)
        } else if header.is_response() {
            header.command.response_structure_size()
        } else {
            header.command.request_structure_size()
        };

        if let Some(expected) = expected {
            if body.len() < 2 {
                return Err(Error::Wire("body too short for structure size".into()));
            }
            let declared = u16::from_le_bytes([body[0], body[1]]);
            if declared != expected {
                return Err(Error::Wire(format!(
                    "structure size mismatch for {:?}: declared {}, expected {}",
                    header.command, declared, expected
                )));
            }
            // The declared size counts one variable byte; a shorter body
            // than that cannot hold the fixed fields.
            if body.len() + 1 < expected as usize {
                return Err(Error::Wire(format!(
                    "body of {} bytes cannot hold {}-byte structure",
                    body.len(),
                    expected
                )));
            }
        }

        Ok(Self { header, body })
    }
}
