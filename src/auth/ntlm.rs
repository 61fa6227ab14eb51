//! NTLM message encoding and parsing ([MS-NLMP]).
//!
//! Only the client side of NTLMv2 is implemented: the NEGOTIATE and
//! AUTHENTICATE messages are built here, the CHALLENGE message is parsed.
//! The SPNEGO wrapping lives in `auth::spnego` and the hash/key math in
//! `auth::ntlm_crypto`.

use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

use crate::error::{Error, Result};
use crate::protocol::reader::{string_to_utf16_le, ByteReader};

/// NTLM signature - "NTLMSSP\0"
pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const MESSAGE_TYPE_NEGOTIATE: u32 = 1;
const MESSAGE_TYPE_CHALLENGE: u32 = 2;
const MESSAGE_TYPE_AUTHENTICATE: u32 = 3;

/// Minimum AUTHENTICATE message size on the wire. Length-field arithmetic
/// downstream assumes the message never shrinks below this.
pub const MIN_AUTHENTICATE_SIZE: usize = 256;

bitflags! {
    /// NTLM negotiation flags (subset the client uses)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmFlags: u32 {
        const NEGOTIATE_UNICODE           = 0x00000001;
        const REQUEST_TARGET              = 0x00000004;
        const NEGOTIATE_SIGN              = 0x00000010;
        const NEGOTIATE_NTLM              = 0x00000200;
        const NEGOTIATE_ANONYMOUS         = 0x00000800;
        const NEGOTIATE_ALWAYS_SIGN       = 0x00008000;
        const NEGOTIATE_EXTENDED_SECURITY = 0x00080000;
        const NEGOTIATE_TARGET_INFO       = 0x00800000;
        const NEGOTIATE_128               = 0x20000000;
        const NEGOTIATE_KEY_EXCHANGE      = 0x40000000;
    }
}

impl NtlmFlags {
    /// The fixed flag set every negotiate message carries.
    pub fn client_defaults() -> Self {
        Self::NEGOTIATE_UNICODE
            | Self::NEGOTIATE_EXTENDED_SECURITY
            | Self::NEGOTIATE_SIGN
            | Self::NEGOTIATE_ALWAYS_SIGN
            | Self::NEGOTIATE_TARGET_INFO
            | Self::NEGOTIATE_KEY_EXCHANGE
            | Self::NEGOTIATE_128
    }
}

/// AV pair ids used from the challenge's target info
mod av_id {
    pub const EOL: u16 = 0x0000;
    pub const TIMESTAMP: u16 = 0x0007;
    pub const FLAGS: u16 = 0x0006;
}

/// MsvAvFlags bit marking "the AV list is covered by a MIC"
const AV_FLAG_MIC_PRESENT: u32 = 0x00000002;

/// Security buffer descriptor: length, max length, offset from the start
/// of the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SecurityBuffer {
    length: u16,
    offset: u32,
}

impl SecurityBuffer {
    fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        let length = r.read_u16_le()?;
        let _max_length = r.read_u16_le()?;
        let offset = r.read_u32_le()?;
        Ok(Self { length, offset })
    }

    fn write(buf: &mut Vec<u8>, data_len: usize, offset: usize) -> Result<()> {
        buf.write_u16::<LittleEndian>(data_len as u16)?;
        buf.write_u16::<LittleEndian>(data_len as u16)?;
        buf.write_u32::<LittleEndian>(offset as u32)?;
        Ok(())
    }

    fn extract<'a>(&self, message: &'a [u8]) -> Result<&'a [u8]> {
        ByteReader::new(message)
            .slice_at(self.offset as usize, self.length as usize)
            .map_err(|_| Error::Auth("security buffer extends beyond message".into()))
    }
}

/// Build the NTLM NEGOTIATE message. Domain and workstation buffers are
/// left empty; servers take the names from the authenticate leg.
pub fn encode_negotiate() -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32);
    buf.write_all(NTLMSSP_SIGNATURE)?;
    buf.write_u32::<LittleEndian>(MESSAGE_TYPE_NEGOTIATE)?;
    buf.write_u32::<LittleEndian>(NtlmFlags::client_defaults().bits())?;
    SecurityBuffer::write(&mut buf, 0, 32)?; // domain
    SecurityBuffer::write(&mut buf, 0, 32)?; // workstation
    Ok(buf)
}

/// Parsed NTLM CHALLENGE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub flags: NtlmFlags,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl ChallengeMessage {
    /// Minimum size of the fixed part
    pub const MIN_SIZE: usize = 48;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(Error::Auth(format!(
                "NTLM challenge message too short: {} bytes",
                data.len()
            )));
        }

        let mut r = ByteReader::new(data);
        let signature = r.take(8)?;
        if signature != NTLMSSP_SIGNATURE {
            return Err(Error::Auth("invalid NTLMSSP signature".into()));
        }
        let message_type = r.read_u32_le()?;
        if message_type != MESSAGE_TYPE_CHALLENGE {
            return Err(Error::Auth(format!(
                "expected challenge message, got type {}",
                message_type
            )));
        }

        let _target_name = SecurityBuffer::parse(&mut r)?;
        let flags = NtlmFlags::from_bits_retain(r.read_u32_le()?);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(r.take(8)?);
        let _reserved = r.read_u64_le()?;
        let target_info_buf = SecurityBuffer::parse(&mut r)?;

        let target_info = if target_info_buf.length > 0 {
            target_info_buf.extract(data)?.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// The server timestamp from the MsvAvTimestamp pair, if present.
    pub fn timestamp(&self) -> Option<u64> {
        let mut r = ByteReader::new(&self.target_info);
        loop {
            let id = r.read_u16_le().ok()?;
            let len = r.read_u16_le().ok()? as usize;
            if id == av_id::EOL {
                return None;
            }
            let value = r.take(len).ok()?;
            if id == av_id::TIMESTAMP && len == 8 {
                return Some(u64::from_le_bytes(value.try_into().unwrap()));
            }
        }
    }

    /// Encode a challenge message; the server-side counterpart of `parse`,
    /// used by the handshake tests and the mock server.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(MESSAGE_TYPE_CHALLENGE)?;
        SecurityBuffer::write(&mut buf, 0, Self::MIN_SIZE)?; // target name
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.write_all(&self.server_challenge)?;
        buf.write_u64::<LittleEndian>(0)?; // reserved
        SecurityBuffer::write(&mut buf, self.target_info.len(), Self::MIN_SIZE)?;
        buf.write_all(&self.target_info)?;
        Ok(buf)
    }
}

/// Serialize one AV pair
pub fn encode_av_pair(id: u16, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + value.len());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buf.extend_from_slice(value);
    buf
}

/// Assemble the NTLMv2 `temp` blob hashed into the proof: response
/// version, server timestamp, client challenge, an injected MsvAvFlags
/// pair announcing the MIC ahead of the server's own AV list, and a
/// trailing zero word.
pub fn build_temp(
    timestamp: u64,
    client_challenge: &[u8; 8],
    target_info: &[u8],
    announce_mic: bool,
) -> Vec<u8> {
    let mut temp = Vec::with_capacity(28 + target_info.len() + 12);
    temp.extend_from_slice(&[0x01, 0x01]); // Responserversion, HiResponserversion
    temp.extend_from_slice(&[0u8; 6]);
    temp.extend_from_slice(&timestamp.to_le_bytes());
    temp.extend_from_slice(client_challenge);
    temp.extend_from_slice(&[0u8; 4]);
    if announce_mic {
        temp.extend_from_slice(&encode_av_pair(
            av_id::FLAGS,
            &AV_FLAG_MIC_PRESENT.to_le_bytes(),
        ));
    }
    temp.extend_from_slice(target_info);
    temp.extend_from_slice(&[0u8; 4]);
    temp
}

/// NTLM AUTHENTICATE message builder
#[derive(Debug, Clone)]
pub struct AuthenticateMessage {
    pub flags: NtlmFlags,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub username: String,
    pub workstation: String,
    pub encrypted_session_key: Vec<u8>,
    /// Extra alignment byte after the LM/NT stubs of an anonymous logon
    pub anonymous_pad: bool,
}

impl AuthenticateMessage {
    /// Fixed part: signature, type, six security buffers, flags, version,
    /// MIC
    const FIXED_SIZE: usize = 88;
    /// Offset of the 16-byte MIC field within the message
    pub const MIC_OFFSET: usize = 72;

    /// Serialize with a zeroed MIC field; the caller computes the MIC over
    /// the result and patches it in at [`Self::MIC_OFFSET`].
    pub fn serialize_with_zero_mic(&self) -> Result<Vec<u8>> {
        let domain = string_to_utf16_le(&self.domain);
        let user = string_to_utf16_le(&self.username);
        let workstation = string_to_utf16_le(&self.workstation);

        let mut buf = Vec::with_capacity(MIN_AUTHENTICATE_SIZE);
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(MESSAGE_TYPE_AUTHENTICATE)?;

        let mut offset = Self::FIXED_SIZE;
        let pad = usize::from(self.anonymous_pad);

        SecurityBuffer::write(&mut buf, self.lm_response.len(), offset)?;
        offset += self.lm_response.len() + pad;
        SecurityBuffer::write(&mut buf, self.nt_response.len(), offset)?;
        offset += self.nt_response.len();
        SecurityBuffer::write(&mut buf, domain.len(), offset)?;
        offset += domain.len();
        SecurityBuffer::write(&mut buf, user.len(), offset)?;
        offset += user.len();
        SecurityBuffer::write(&mut buf, workstation.len(), offset)?;
        offset += workstation.len();
        SecurityBuffer::write(&mut buf, self.encrypted_session_key.len(), offset)?;

        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.write_all(&[0u8; 8])?; // version
        buf.write_all(&[0u8; 16])?; // MIC, patched in later

        debug_assert_eq!(buf.len(), Self::FIXED_SIZE);

        buf.write_all(&self.lm_response)?;
        if self.anonymous_pad {
            buf.write_u8(0)?;
        }
        buf.write_all(&self.nt_response)?;
        buf.write_all(&domain)?;
        buf.write_all(&user)?;
        buf.write_all(&workstation)?;
        buf.write_all(&self.encrypted_session_key)?;

        // Downstream length arithmetic relies on a floor size
        while buf.len() < MIN_AUTHENTICATE_SIZE {
            buf.push(0);
        }
        Ok(buf)
    }

    /// Write the MIC into an already-serialized message.
    pub fn patch_mic(message: &mut [u8], mic: &[u8; 16]) {
        message[Self::MIC_OFFSET..Self::MIC_OFFSET + 16].copy_from_slice(mic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_layout() {
        let msg = encode_negotiate().unwrap();
        assert_eq!(msg.len(), 32);
        assert_eq!(&msg[..8], NTLMSSP_SIGNATURE);
        assert_eq!(u32::from_le_bytes(msg[8..12].try_into().unwrap()), 1);
        let flags = NtlmFlags::from_bits_retain(u32::from_le_bytes(msg[12..16].try_into().unwrap()));
        assert!(flags.contains(NtlmFlags::NEGOTIATE_UNICODE));
        assert!(flags.contains(NtlmFlags::NEGOTIATE_KEY_EXCHANGE));
        assert!(flags.contains(NtlmFlags::NEGOTIATE_128));
    }

    fn sample_challenge() -> ChallengeMessage {
        let mut target_info = Vec::new();
        target_info.extend_from_slice(&encode_av_pair(0x0002, &string_to_utf16_le("DOMAIN")));
        target_info.extend_from_slice(&encode_av_pair(
            av_id::TIMESTAMP,
            &0x01D9_8765_4321_0000u64.to_le_bytes(),
        ));
        target_info.extend_from_slice(&encode_av_pair(av_id::EOL, &[]));
        ChallengeMessage {
            flags: NtlmFlags::client_defaults(),
            server_challenge: [1, 2, 3, 4, 5, 6, 7, 8],
            target_info,
        }
    }

    #[test]
    fn test_challenge_roundtrip_and_timestamp() {
        let challenge = sample_challenge();
        let bytes = challenge.encode().unwrap();
        let parsed = ChallengeMessage::parse(&bytes).unwrap();
        assert_eq!(parsed, challenge);
        assert_eq!(parsed.timestamp(), Some(0x01D9_8765_4321_0000));
    }

    #[test]
    fn test_challenge_truncations_rejected() {
        let bytes = sample_challenge().encode().unwrap();
        for cut in 0..bytes.len() {
            // The parser must fail or succeed without ever reading past the
            // truncated buffer; truncations inside the fixed part and the
            // target info must fail.
            if cut < ChallengeMessage::MIN_SIZE {
                assert!(ChallengeMessage::parse(&bytes[..cut]).is_err());
            } else if cut < bytes.len() {
                assert!(
                    ChallengeMessage::parse(&bytes[..cut]).is_err(),
                    "truncation at {} parsed",
                    cut
                );
            }
        }
    }

    #[test]
    fn test_bad_signature_rejected() {
        let mut bytes = sample_challenge().encode().unwrap();
        bytes[0] = b'X';
        assert!(ChallengeMessage::parse(&bytes).is_err());
    }

    #[test]
    fn test_temp_blob_layout() {
        let client_challenge = [9u8; 8];
        let target_info = encode_av_pair(av_id::EOL, &[]);
        let temp = build_temp(0x1122334455667788, &client_challenge, &target_info, true);

        assert_eq!(&temp[..2], &[0x01, 0x01]);
        assert_eq!(&temp[8..16], &0x1122334455667788u64.to_le_bytes());
        assert_eq!(&temp[16..24], &client_challenge);
        // Injected MsvAvFlags pair follows the zero word
        assert_eq!(&temp[28..32], &[0x06, 0x00, 0x04, 0x00]);
        assert_eq!(&temp[temp.len() - 4..], &[0u8; 4]);

        let without_mic = build_temp(0, &client_challenge, &target_info, false);
        assert_eq!(without_mic.len(), temp.len() - 8);
    }

    #[test]
    fn test_authenticate_floor_size_and_mic_patch() {
        let msg = AuthenticateMessage {
            flags: NtlmFlags::client_defaults(),
            lm_response: vec![0u8; 24],
            nt_response: vec![0u8; 48],
            domain: "D".into(),
            username: "u".into(),
            workstation: "WS".into(),
            encrypted_session_key: vec![0u8; 16],
            anonymous_pad: false,
        };
        let mut bytes = msg.serialize_with_zero_mic().unwrap();
        assert!(bytes.len() >= MIN_AUTHENTICATE_SIZE);
        assert_eq!(
            &bytes[AuthenticateMessage::MIC_OFFSET..AuthenticateMessage::MIC_OFFSET + 16],
            &[0u8; 16]
        );

        let mic = [0xABu8; 16];
        AuthenticateMessage::patch_mic(&mut bytes, &mic);
        assert_eq!(
            &bytes[AuthenticateMessage::MIC_OFFSET..AuthenticateMessage::MIC_OFFSET + 16],
            &mic
        );
    }

    #[test]
    fn test_anonymous_stub_alignment() {
        let msg = AuthenticateMessage {
            flags: NtlmFlags::client_defaults() | NtlmFlags::NEGOTIATE_ANONYMOUS,
            lm_response: vec![0u8],
            nt_response: Vec::new(),
            domain: String::new(),
            username: String::new(),
            workstation: String::new(),
            encrypted_session_key: Vec::new(),
            anonymous_pad: true,
        };
        let bytes = msg.serialize_with_zero_mic().unwrap();
        // NT response offset lands on the 2-aligned byte after the stub+pad
        let nt_offset = u32::from_le_bytes(bytes[24..28].try_into().unwrap());
        assert_eq!(nt_offset as usize, AuthenticateMessage::FIXED_SIZE + 2);
        assert_eq!(nt_offset % 2, 0);
    }
}
