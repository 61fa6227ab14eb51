//! SMB2 Query Directory messages and directory-entry decoding

use super::common::{pad_to_structure_size, FileId, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::constants::{
    file_information_class, structure_size, FileAttributes,
};
use crate::protocol::reader::{string_to_utf16_le, utf16_le_to_string, ByteReader};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// SMB2 QUERY_DIRECTORY Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDirectoryRequest {
    pub information_class: u8,
    pub flags: u8,
    pub file_id: FileId,
    /// Search pattern; "*" matches everything
    pub pattern: String,
    pub output_buffer_length: u32,
}

impl QueryDirectoryRequest {
    pub fn new(file_id: FileId, flags: u8, output_buffer_length: u32) -> Self {
        Self {
            information_class: file_information_class::FILE_DIRECTORY_INFORMATION,
            flags,
            file_id,
            pattern: "*".to_string(),
            output_buffer_length,
        }
    }
}

impl SmbMessage for QueryDirectoryRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::QUERY_DIRECTORY_REQUEST {
            return Err(Error::Wire(format!(
                "invalid query directory request structure size: {}",
                declared
            )));
        }
        let information_class = r.read_u8()?;
        let flags = r.read_u8()?;
        let _file_index = r.read_u32_le()?;
        let mut id = [0u8; 16];
        id.copy_from_slice(r.take(16)?);
        let name_offset = r.read_u16_le()?;
        let name_length = r.read_u16_le()?;
        let output_buffer_length = r.read_u32_le()?;

        let pattern = if name_length > 0 && name_offset as usize >= 64 {
            utf16_le_to_string(r.slice_at(name_offset as usize - 64, name_length as usize)?)
        } else {
            String::new()
        };

        Ok(Self {
            information_class,
            flags,
            file_id: FileId::from_bytes(&id),
            pattern,
            output_buffer_length,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let pattern_bytes = string_to_utf16_le(&self.pattern);
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::QUERY_DIRECTORY_REQUEST)?;
        buf.write_u8(self.information_class)?;
        buf.write_u8(self.flags)?;
        buf.write_u32::<LittleEndian>(0)?; // file index
        buf.write_all(&self.file_id.to_bytes())?;
        let name_offset = if pattern_bytes.is_empty() {
            0u16
        } else {
            64 + 32
        };
        buf.write_u16::<LittleEndian>(name_offset)?;
        buf.write_u16::<LittleEndian>(pattern_bytes.len() as u16)?;
        buf.write_u32::<LittleEndian>(self.output_buffer_length)?;
        buf.write_all(&pattern_bytes)?;
        Ok(pad_to_structure_size(
            buf,
            structure_size::QUERY_DIRECTORY_REQUEST,
        ))
    }
}

/// SMB2 QUERY_DIRECTORY Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDirectoryResponse {
    pub output_buffer: Vec<u8>,
}

impl SmbMessage for QueryDirectoryResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::QUERY_DIRECTORY_RESPONSE {
            return Err(Error::Wire(format!(
                "invalid query directory response structure size: {}",
                declared
            )));
        }
        let buffer_offset = r.read_u16_le()?;
        let buffer_length = r.read_u32_le()?;

        let output_buffer = if buffer_length > 0 && buffer_offset as usize >= 64 {
            r.slice_at(buffer_offset as usize - 64, buffer_length as usize)?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self { output_buffer })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::QUERY_DIRECTORY_RESPONSE)?;
        let buffer_offset = if self.output_buffer.is_empty() {
            0u16
        } else {
            64 + 8
        };
        buf.write_u16::<LittleEndian>(buffer_offset)?;
        buf.write_u32::<LittleEndian>(self.output_buffer.len() as u32)?;
        buf.write_all(&self.output_buffer)?;
        Ok(buf)
    }
}

/// One decoded `FileDirectoryInformation` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub file_index: u32,
    pub creation_time: u64,
    pub last_write_time: u64,
    pub end_of_file: u64,
    pub attributes: FileAttributes,
    pub name: String,
}

impl DirectoryEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    /// The synthetic entries the cache never stores.
    pub fn is_dot_entry(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    /// Fixed-size prefix of `FileDirectoryInformation`
    const FIXED_SIZE: usize = 64;

    /// Serialize one entry with the given chain offset (0 terminates).
    pub fn to_bytes(&self, next_entry_offset: u32) -> Vec<u8> {
        let name_bytes = string_to_utf16_le(&self.name);
        let mut buf = Vec::with_capacity(Self::FIXED_SIZE + name_bytes.len());
        buf.extend_from_slice(&next_entry_offset.to_le_bytes());
        buf.extend_from_slice(&self.file_index.to_le_bytes());
        buf.extend_from_slice(&self.creation_time.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // last access time
        buf.extend_from_slice(&self.last_write_time.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes()); // change time
        buf.extend_from_slice(&self.end_of_file.to_le_bytes());
        buf.extend_from_slice(&self.end_of_file.to_le_bytes()); // allocation size
        buf.extend_from_slice(&self.attributes.bits().to_le_bytes());
        buf.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&name_bytes);
        buf
    }
}

/// Decode the `NextEntryOffset` chain of a Query Directory output buffer.
///
/// A truncated fixed header, a name running past the buffer, or a
/// `NextEntryOffset` that does not advance (or overflows) is a wire error;
/// callers treat that as grounds to invalidate any cached enumeration
/// state.
pub fn parse_entries(buffer: &[u8]) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    let mut base = 0usize;

    if buffer.is_empty() {
        return Ok(entries);
    }

    loop {
        let r = ByteReader::new(buffer);
        let fixed = r.slice_at(base, DirectoryEntry::FIXED_SIZE).map_err(|_| {
            Error::Wire(format!(
                "truncated directory entry header at offset {}",
                base
            ))
        })?;
        let mut fr = ByteReader::new(fixed);
        let next_entry_offset = fr.read_u32_le()?;
        let file_index = fr.read_u32_le()?;
        let creation_time = fr.read_u64_le()?;
        let _last_access_time = fr.read_u64_le()?;
        let last_write_time = fr.read_u64_le()?;
        let _change_time = fr.read_u64_le()?;
        let end_of_file = fr.read_u64_le()?;
        let _allocation_size = fr.read_u64_le()?;
        let attributes = FileAttributes::from_bits_retain(fr.read_u32_le()?);
        let name_length = fr.read_u32_le()? as usize;

        let name_bytes = r
            .slice_at(base + DirectoryEntry::FIXED_SIZE, name_length)
            .map_err(|_| {
                Error::Wire(format!(
                    "directory entry name at offset {} overruns buffer",
                    base
                ))
            })?;

        entries.push(DirectoryEntry {
            file_index,
            creation_time,
            last_write_time,
            end_of_file,
            attributes,
            name: utf16_le_to_string(name_bytes),
        });

        if next_entry_offset == 0 {
            break;
        }
        let next = base
            .checked_add(next_entry_offset as usize)
            .ok_or_else(|| Error::Wire("NextEntryOffset overflow".into()))?;
        if next <= base || next >= buffer.len() {
            return Err(Error::Wire(format!(
                "NextEntryOffset {} at {} leaves the buffer",
                next_entry_offset, base
            )));
        }
        base = next;
    }

    Ok(entries)
}

/// Chain a list of entries into one output buffer, 8-byte aligning each
/// link the way servers do.
pub fn encode_entries(entries: &[DirectoryEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let body = entry.to_bytes(0);
        let is_last = i + 1 == entries.len();
        let padded_len = if is_last {
            body.len()
        } else {
            (body.len() + 7) & !7
        };
        let mut chunk = entry.to_bytes(if is_last { 0 } else { padded_len as u32 });
        chunk.resize(padded_len, 0);
        buf.extend_from_slice(&chunk);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> DirectoryEntry {
        DirectoryEntry {
            file_index: 0,
            creation_time: 1,
            last_write_time: 2,
            end_of_file: 3,
            attributes: FileAttributes::NORMAL,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let req = QueryDirectoryRequest::new(
            FileId {
                persistent: 1,
                volatile: 2,
            },
            0x01,
            65536,
        );
        let bytes = req.serialize().unwrap();
        let parsed = QueryDirectoryRequest::parse(&bytes).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_entry_chain_roundtrip() {
        let input = vec![entry("alpha"), entry("beta"), entry("a-much-longer-name.txt")];
        let buffer = encode_entries(&input);
        let output = parse_entries(&buffer).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_truncated_header_is_error() {
        let buffer = encode_entries(&[entry("alpha")]);
        assert!(parse_entries(&buffer[..40]).is_err());
    }

    #[test]
    fn test_bad_next_offset_is_error() {
        let mut buffer = encode_entries(&[entry("alpha"), entry("beta")]);
        // Point the first link past the end of the buffer
        let overrun = buffer.len() as u32 + 64;
        buffer[0..4].copy_from_slice(&overrun.to_le_bytes());
        assert!(parse_entries(&buffer).is_err());
    }

    #[test]
    fn test_name_overrun_is_error() {
        let mut buffer = encode_entries(&[entry("alpha")]);
        // Inflate the declared name length
        buffer[60..64].copy_from_slice(&0xFFFFu32.to_le_bytes());
        assert!(parse_entries(&buffer).is_err());
    }

    #[test]
    fn test_empty_buffer_is_no_entries() {
        assert!(parse_entries(&[]).unwrap().is_empty());
    }
}
