//! SPNEGO token encoding and parsing (RFC 4178 over X.690 DER).
//!
//! The handshake only ever negotiates NTLMSSP, so the tokens here are the
//! two concrete shapes the protocol produces: a GSS-API initial token
//! wrapping `negTokenInit`, and `negTokenResp` in both directions. Lengths
//! use the short form below 128 and the two-byte long form `0x82 hi lo`
//! otherwise; nothing in the handshake can exceed 16 bits.

use crate::error::{Error, Result};
use crate::protocol::reader::ByteReader;

/// SPNEGO OID 1.3.6.1.5.5.2, pre-encoded
pub const OID_SPNEGO: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x02];

/// NTLMSSP OID 1.3.6.1.4.1.311.2.2.10, pre-encoded
pub const OID_NTLMSSP: &[u8] = &[
    0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0A,
];

const TAG_OID: u8 = 0x06;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_ENUMERATED: u8 = 0x0A;
const TAG_SEQUENCE: u8 = 0x30;
/// GSS-API InitialContextToken ([APPLICATION 0])
const TAG_GSS_APPLICATION: u8 = 0x60;
const TAG_CONTEXT_0: u8 = 0xA0;
const TAG_CONTEXT_1: u8 = 0xA1;
const TAG_CONTEXT_2: u8 = 0xA2;
const TAG_CONTEXT_3: u8 = 0xA3;

/// negState accept-incomplete, the only state the two-step handshake emits
const NEG_STATE_ACCEPT_INCOMPLETE: u8 = 0x01;

/// Append an X.690 length: one byte below 128, else `0x82 hi lo`.
pub fn write_length(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    if len < 0x80 {
        buf.push(len as u8);
    } else if len <= 0xFFFF {
        buf.push(0x82);
        buf.push((len >> 8) as u8);
        buf.push((len & 0xFF) as u8);
    } else {
        return Err(Error::Auth(format!("DER length {} out of range", len)));
    }
    Ok(())
}

/// Read an X.690 length in the two forms `write_length` produces.
pub fn read_length(r: &mut ByteReader<'_>) -> Result<usize> {
    let first = r.read_u8()?;
    if first < 0x80 {
        return Ok(first as usize);
    }
    match first {
        0x81 => Ok(r.read_u8()? as usize),
        0x82 => {
            let hi = r.read_u8()? as usize;
            let lo = r.read_u8()? as usize;
            Ok((hi << 8) | lo)
        }
        _ => Err(Error::Auth(format!(
            "unsupported DER length form 0x{:02x}",
            first
        ))),
    }
}

fn write_tlv(buf: &mut Vec<u8>, tag: u8, contents: &[u8]) -> Result<()> {
    buf.push(tag);
    write_length(buf, contents.len())?;
    buf.extend_from_slice(contents);
    Ok(())
}

/// Expect `tag` next and return its contents; a declared length past the
/// end of the buffer is a hard failure.
fn expect_tlv<'a>(r: &mut ByteReader<'a>, tag: u8) -> Result<&'a [u8]> {
    let actual = r.read_u8()?;
    if actual != tag {
        return Err(Error::Auth(format!(
            "expected DER tag 0x{:02x}, found 0x{:02x}",
            tag, actual
        )));
    }
    let len = read_length(r)?;
    r.take(len)
        .map_err(|_| Error::Auth(format!("DER length {} exceeds remaining buffer", len)))
}

/// Output of the step-0 encoder: the full token plus the encoded mechTypes
/// SEQUENCE, retained verbatim for the step-1 integrity tag.
#[derive(Debug, Clone)]
pub struct InitTokenParts {
    pub token: Vec<u8>,
    pub mech_list: Vec<u8>,
}

/// Build the GSS-API initial token wrapping `negTokenInit` with NTLMSSP as
/// the only offered mechanism and `ntlm_negotiate` as the mechToken.
pub fn encode_neg_token_init(ntlm_negotiate: &[u8]) -> Result<InitTokenParts> {
    // mechTypes ::= SEQUENCE OF MechType
    let mut mech_list = Vec::new();
    let mut oid = Vec::new();
    write_tlv(&mut oid, TAG_OID, OID_NTLMSSP)?;
    write_tlv(&mut mech_list, TAG_SEQUENCE, &oid)?;

    // NegTokenInit ::= SEQUENCE { mechTypes [0], mechToken [2] }
    let mut inner = Vec::new();
    write_tlv(&mut inner, TAG_CONTEXT_0, &mech_list)?;
    let mut mech_token = Vec::new();
    write_tlv(&mut mech_token, TAG_OCTET_STRING, ntlm_negotiate)?;
    write_tlv(&mut inner, TAG_CONTEXT_2, &mech_token)?;

    let mut neg_token_init = Vec::new();
    write_tlv(&mut neg_token_init, TAG_SEQUENCE, &inner)?;

    // NegotiationToken ::= CHOICE { negTokenInit [0] ... }
    let mut choice = Vec::new();
    write_tlv(&mut choice, TAG_CONTEXT_0, &neg_token_init)?;

    // InitialContextToken ::= [APPLICATION 0] { thisMech, innerContextToken }
    let mut gss_body = Vec::new();
    write_tlv(&mut gss_body, TAG_OID, OID_SPNEGO)?;
    gss_body.extend_from_slice(&choice);

    let mut token = Vec::new();
    write_tlv(&mut token, TAG_GSS_APPLICATION, &gss_body)?;

    Ok(InitTokenParts { token, mech_list })
}

/// Parse the server's `negTokenResp` carrying the NTLM challenge.
///
/// Shape: `[1] SEQUENCE { negState accept-incomplete, supportedMech =
/// NTLMSSP, responseToken OCTET STRING }`. Any tag, length or value
/// mismatch aborts the handshake.
pub fn parse_neg_token_resp(token: &[u8]) -> Result<Vec<u8>> {
    let mut r = ByteReader::new(token);
    let seq_outer = expect_tlv(&mut r, TAG_CONTEXT_1)?;
    let mut r = ByteReader::new(seq_outer);
    let seq = expect_tlv(&mut r, TAG_SEQUENCE)?;
    let mut r = ByteReader::new(seq);

    let neg_state = expect_tlv(&mut r, TAG_CONTEXT_0)?;
    let mut sr = ByteReader::new(neg_state);
    let state_val = expect_tlv(&mut sr, TAG_ENUMERATED)?;
    if state_val != [NEG_STATE_ACCEPT_INCOMPLETE] {
        return Err(Error::Auth(format!(
            "unexpected negState {:02x?}",
            state_val
        )));
    }

    let supported_mech = expect_tlv(&mut r, TAG_CONTEXT_1)?;
    let mut mr = ByteReader::new(supported_mech);
    let mech_oid = expect_tlv(&mut mr, TAG_OID)?;
    if mech_oid != OID_NTLMSSP {
        return Err(Error::Auth("server selected a non-NTLMSSP mechanism".into()));
    }

    let response_token = expect_tlv(&mut r, TAG_CONTEXT_2)?;
    let mut tr = ByteReader::new(response_token);
    let challenge = expect_tlv(&mut tr, TAG_OCTET_STRING)?;
    Ok(challenge.to_vec())
}

/// Build the client's final `negTokenResp`: the NTLM AUTHENTICATE message
/// plus the mechListMIC (absent for anonymous logons), with no outer
/// GSS-API wrapper.
pub fn encode_neg_token_resp(
    ntlm_authenticate: &[u8],
    mech_list_mic: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut inner = Vec::new();

    let mut response_token = Vec::new();
    write_tlv(&mut response_token, TAG_OCTET_STRING, ntlm_authenticate)?;
    write_tlv(&mut inner, TAG_CONTEXT_2, &response_token)?;

    if let Some(mech_list_mic) = mech_list_mic {
        let mut mic = Vec::new();
        write_tlv(&mut mic, TAG_OCTET_STRING, mech_list_mic)?;
        write_tlv(&mut inner, TAG_CONTEXT_3, &mic)?;
    }

    let mut seq = Vec::new();
    write_tlv(&mut seq, TAG_SEQUENCE, &inner)?;

    let mut token = Vec::new();
    write_tlv(&mut token, TAG_CONTEXT_1, &seq)?;
    Ok(token)
}

/// Encode a valid server challenge token. Test/server-side counterpart of
/// [`parse_neg_token_resp`].
pub fn encode_challenge_token(ntlm_challenge: &[u8]) -> Result<Vec<u8>> {
    let mut inner = Vec::new();

    let mut state = Vec::new();
    write_tlv(&mut state, TAG_ENUMERATED, &[NEG_STATE_ACCEPT_INCOMPLETE])?;
    write_tlv(&mut inner, TAG_CONTEXT_0, &state)?;

    let mut mech = Vec::new();
    write_tlv(&mut mech, TAG_OID, OID_NTLMSSP)?;
    write_tlv(&mut inner, TAG_CONTEXT_1, &mech)?;

    let mut response_token = Vec::new();
    write_tlv(&mut response_token, TAG_OCTET_STRING, ntlm_challenge)?;
    write_tlv(&mut inner, TAG_CONTEXT_2, &response_token)?;

    let mut seq = Vec::new();
    write_tlv(&mut seq, TAG_SEQUENCE, &inner)?;

    let mut token = Vec::new();
    write_tlv(&mut token, TAG_CONTEXT_1, &seq)?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_roundtrip() {
        for len in [0usize, 1, 127, 128, 65535] {
            let mut buf = Vec::new();
            write_length(&mut buf, len).unwrap();
            let mut r = ByteReader::new(&buf);
            assert_eq!(read_length(&mut r).unwrap(), len, "length {}", len);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn test_length_out_of_range() {
        let mut buf = Vec::new();
        assert!(write_length(&mut buf, 0x1_0000).is_err());
    }

    #[test]
    fn test_init_token_shape() {
        let parts = encode_neg_token_init(b"NTLMSSP\x00fake").unwrap();
        assert_eq!(parts.token[0], 0x60);

        // Exactly one NTLMSSP OID inside the token
        let count = parts
            .token
            .windows(OID_NTLMSSP.len())
            .filter(|w| *w == OID_NTLMSSP)
            .count();
        assert_eq!(count, 1);

        // The retained mechList is the SEQUENCE wrapping that OID
        assert_eq!(parts.mech_list[0], TAG_SEQUENCE);
        assert!(parts
            .mech_list
            .windows(OID_NTLMSSP.len())
            .any(|w| w == OID_NTLMSSP));
    }

    #[test]
    fn test_challenge_roundtrip() {
        let challenge = b"NTLMSSP\x00\x02\x00\x00\x00challenge-data";
        let token = encode_challenge_token(challenge).unwrap();
        let parsed = parse_neg_token_resp(&token).unwrap();
        assert_eq!(parsed, challenge);
    }

    #[test]
    fn test_challenge_truncations_never_overread() {
        let token = encode_challenge_token(&[0xAB; 300]).unwrap();
        for cut in 0..token.len() {
            // Every truncation must fail cleanly, never panic
            assert!(parse_neg_token_resp(&token[..cut]).is_err(), "cut {}", cut);
        }
    }

    #[test]
    fn test_wrong_mech_rejected() {
        let challenge = b"x";
        let mut token = encode_challenge_token(challenge).unwrap();
        // Corrupt one byte of the embedded NTLMSSP OID
        let pos = token
            .windows(OID_NTLMSSP.len())
            .position(|w| w == OID_NTLMSSP)
            .unwrap();
        token[pos + 3] ^= 0xFF;
        assert!(parse_neg_token_resp(&token).is_err());
    }

    #[test]
    fn test_final_token_is_bare_neg_token_resp() {
        let token = encode_neg_token_resp(b"auth", Some(&b"0123456789abcdef"[..])).unwrap();
        assert_eq!(token[0], TAG_CONTEXT_1);
        // No GSS-API application wrapper on the final leg
        assert_ne!(token[0], 0x60);

        let without_mic = encode_neg_token_resp(b"auth", None).unwrap();
        assert!(without_mic.len() < token.len());
        assert!(!without_mic.contains(&TAG_CONTEXT_3));
    }
}
