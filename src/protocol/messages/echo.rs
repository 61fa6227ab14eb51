//! SMB2 Echo (keep-alive) messages

use super::common::SmbMessage;
use crate::error::{Error, Result};
use crate::protocol::constants::structure_size;
use crate::protocol::reader::ByteReader;
use byteorder::{LittleEndian, WriteBytesExt};

/// SMB2 Echo Request; the response body is identical
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRequest;

impl SmbMessage for EchoRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let declared = r.read_u16_le()?;
        if declared != structure_size::ECHO_REQUEST {
            return Err(Error::Wire(format!(
                "invalid echo structure size: {}",
                declared
            )));
        }
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(structure_size::ECHO_REQUEST)?;
        buf.write_u16::<LittleEndian>(0)?; // reserved
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_roundtrip() {
        let bytes = EchoRequest.serialize().unwrap();
        assert_eq!(bytes, vec![4, 0, 0, 0]);
        assert!(EchoRequest::parse(&bytes).is_ok());
    }
}
