//! SMB2 Create and Close messages.
//!
//! The engine itself only opens existing directories for enumeration; the
//! filesystem adapter builds richer create requests through the generic
//! request path.

use super::common::{pad_to_structure_size, FileId, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::constants::{
    create_disposition, impersonation_level, structure_size, CreateOptions, DesiredAccess,
    FileAttributes, ShareAccess,
};
use crate::protocol::reader::{string_to_utf16_le, utf16_le_to_string, ByteReader};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// SMB2 Create Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub desired_access: DesiredAccess,
    pub file_attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub create_disposition: u32,
    pub create_options: CreateOptions,
    /// Share-relative path; empty opens the share root
    pub name: String,
}

impl CreateRequest {
    /// Open an existing directory for enumeration.
    pub fn open_directory(name: &str) -> Self {
        Self {
            desired_access: DesiredAccess::FILE_READ_DATA
                | DesiredAccess::FILE_READ_ATTRIBUTES
                | DesiredAccess::SYNCHRONIZE,
            file_attributes: FileAttributes::empty(),
            share_access: ShareAccess::FILE_SHARE_READ | ShareAccess::FILE_SHARE_WRITE,
            create_disposition: create_disposition::OPEN,
            create_options: CreateOptions::FILE_DIRECTORY_FILE,
            name: name.to_string(),
        }
    }
}

impl SmbMessage for CreateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::CREATE_REQUEST {
            return Err(Error::Wire(format!(
                "invalid create request structure size: {}",
                declared
            )));
        }
        let _security_flags = r.read_u8()?;
        let _oplock_level = r.read_u8()?;
        let _impersonation = r.read_u32_le()?;
        let _create_flags = r.read_u64_le()?;
        let _reserved = r.read_u64_le()?;
        let desired_access = DesiredAccess::from_bits_retain(r.read_u32_le()?);
        let file_attributes = FileAttributes::from_bits_retain(r.read_u32_le()?);
        let share_access = ShareAccess::from_bits_retain(r.read_u32_le()?);
        let create_disposition = r.read_u32_le()?;
        let create_options = CreateOptions::from_bits_retain(r.read_u32_le()?);
        let name_offset = r.read_u16_le()?;
        let name_length = r.read_u16_le()?;
        let _contexts_offset = r.read_u32_le()?;
        let _contexts_length = r.read_u32_le()?;

        let name = if name_length > 0 && name_offset as usize >= 64 {
            utf16_le_to_string(r.slice_at(name_offset as usize - 64, name_length as usize)?)
        } else {
            String::new()
        };

        Ok(Self {
            desired_access,
            file_attributes,
            share_access,
            create_disposition,
            create_options,
            name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name_bytes = string_to_utf16_le(&self.name);
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::CREATE_REQUEST)?;
        buf.write_u8(0)?; // security flags
        buf.write_u8(0)?; // oplock level: none
        buf.write_u32::<LittleEndian>(impersonation_level::IMPERSONATION)?;
        buf.write_u64::<LittleEndian>(0)?; // create flags
        buf.write_u64::<LittleEndian>(0)?; // reserved
        buf.write_u32::<LittleEndian>(self.desired_access.bits())?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(self.share_access.bits())?;
        buf.write_u32::<LittleEndian>(self.create_disposition)?;
        buf.write_u32::<LittleEndian>(self.create_options.bits())?;
        // The name offset always points at the end of the fixed body, even
        // when the name is empty (the pad byte sits there).
        buf.write_u16::<LittleEndian>(64 + 56)?;
        buf.write_u16::<LittleEndian>(name_bytes.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?; // create contexts offset
        buf.write_u32::<LittleEndian>(0)?; // create contexts length
        buf.write_all(&name_bytes)?;
        Ok(pad_to_structure_size(buf, structure_size::CREATE_REQUEST))
    }
}

/// SMB2 Create Response (fields the engine consumes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResponse {
    pub create_action: u32,
    pub file_attributes: FileAttributes,
    pub end_of_file: u64,
    pub file_id: FileId,
}

impl SmbMessage for CreateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::CREATE_RESPONSE {
            return Err(Error::Wire(format!(
                "invalid create response structure size: {}",
                declared
            )));
        }
        let _oplock_level = r.read_u8()?;
        let _response_flags = r.read_u8()?;
        let create_action = r.read_u32_le()?;
        let _creation_time = r.read_u64_le()?;
        let _last_access_time = r.read_u64_le()?;
        let _last_write_time = r.read_u64_le()?;
        let _change_time = r.read_u64_le()?;
        let _allocation_size = r.read_u64_le()?;
        let end_of_file = r.read_u64_le()?;
        let file_attributes = FileAttributes::from_bits_retain(r.read_u32_le()?);
        let _reserved2 = r.read_u32_le()?;
        let mut id = [0u8; 16];
        id.copy_from_slice(r.take(16)?);
        // create contexts ignored

        Ok(Self {
            create_action,
            file_attributes,
            end_of_file,
            file_id: FileId::from_bytes(&id),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::CREATE_RESPONSE)?;
        buf.write_u8(0)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.create_action)?;
        for _ in 0..4 {
            buf.write_u64::<LittleEndian>(0)?; // timestamps
        }
        buf.write_u64::<LittleEndian>(0)?; // allocation size
        buf.write_u64::<LittleEndian>(self.end_of_file)?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(0)?; // reserved
        buf.write_all(&self.file_id.to_bytes())?;
        buf.write_u32::<LittleEndian>(0)?; // contexts offset
        buf.write_u32::<LittleEndian>(0)?; // contexts length
        Ok(buf)
    }
}

/// SMB2 Close Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseRequest {
    pub file_id: FileId,
}

impl SmbMessage for CloseRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::CLOSE_REQUEST {
            return Err(Error::Wire(format!(
                "invalid close request structure size: {}",
                declared
            )));
        }
        let _flags = r.read_u16_le()?;
        let _reserved = r.read_u32_le()?;
        let mut id = [0u8; 16];
        id.copy_from_slice(r.take(16)?);
        Ok(Self {
            file_id: FileId::from_bytes(&id),
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::CLOSE_REQUEST)?;
        buf.write_u16::<LittleEndian>(0)?; // flags
        buf.write_u32::<LittleEndian>(0)?; // reserved
        buf.write_all(&self.file_id.to_bytes())?;
        Ok(buf)
    }
}
