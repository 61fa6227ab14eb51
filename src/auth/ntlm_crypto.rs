//! NTLMv2 cryptographic functions ([MS-NLMP])
//!
//! Everything here is a pure function over byte buffers; the handshake
//! state machine in `auth::ntlm` decides what to feed it.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};

use crate::protocol::reader::string_to_utf16_le;

type HmacMd5 = Hmac<Md5>;

/// Magic constants for the GSS signing/sealing key derivation. The trailing
/// NUL is part of the hashed string.
const CLIENT_SIGN_MAGIC: &[u8] = b"session key to client-to-server signing key magic constant\0";
const CLIENT_SEAL_MAGIC: &[u8] = b"session key to client-to-server sealing key magic constant\0";

pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// NTLM hash: MD4 of the UTF-16LE password
pub fn ntlm_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(string_to_utf16_le(password));
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// NTOWFv2: HMAC-MD5 keyed by the NTLM hash over
/// UTF-16LE(uppercase(username) + domain). The domain keeps its case.
pub fn ntowf_v2(username: &str, domain: &str, hash: &[u8; 16]) -> [u8; 16] {
    let user_domain = format!("{}{}", username.to_uppercase(), domain);
    hmac_md5(hash, &string_to_utf16_le(&user_domain))
}

/// NTProofStr: HMAC-MD5(NTOWFv2, serverChallenge || temp)
pub fn nt_proof(ntowf: &[u8; 16], server_challenge: &[u8; 8], temp: &[u8]) -> [u8; 16] {
    let mut data = Vec::with_capacity(8 + temp.len());
    data.extend_from_slice(server_challenge);
    data.extend_from_slice(temp);
    hmac_md5(ntowf, &data)
}

/// SessionBaseKey: HMAC-MD5(NTOWFv2, NTProofStr)
pub fn session_base_key(ntowf: &[u8; 16], proof: &[u8; 16]) -> [u8; 16] {
    hmac_md5(ntowf, proof)
}

/// LMv2 response: HMAC-MD5(NTOWFv2, serverChallenge || clientChallenge)
/// followed by the client challenge
pub fn lmv2_response(
    ntowf: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(server_challenge);
    data.extend_from_slice(client_challenge);
    let mut response = hmac_md5(ntowf, &data).to_vec();
    response.extend_from_slice(client_challenge);
    response
}

/// RC4 a buffer with a 16-byte key (used for the encrypted session key and
/// for sealing the mechListMIC checksum)
pub fn rc4_transform(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut cipher = Rc4::<U16>::new(key.into());
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    out
}

/// GSS client-to-server signing key: MD5(exportedSessionKey || magic)
pub fn client_sign_key(exported_session_key: &[u8; 16]) -> [u8; 16] {
    derive_gss_key(exported_session_key, CLIENT_SIGN_MAGIC)
}

/// GSS client-to-server sealing key: MD5(exportedSessionKey || magic)
pub fn client_seal_key(exported_session_key: &[u8; 16]) -> [u8; 16] {
    derive_gss_key(exported_session_key, CLIENT_SEAL_MAGIC)
}

fn derive_gss_key(key: &[u8; 16], magic: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(magic);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// NTLMSSP message signature over the SPNEGO mechTypes list: version 1,
/// then RC4(sealKey, HMAC-MD5(signKey, seqNum || data)[..8]), then the
/// sequence number. Sequence 0 for the handshake's single signed blob.
pub fn mech_list_mic(
    sign_key: &[u8; 16],
    seal_key: &[u8; 16],
    seq_num: u32,
    mech_list: &[u8],
) -> [u8; 16] {
    let mut data = Vec::with_capacity(4 + mech_list.len());
    data.extend_from_slice(&seq_num.to_le_bytes());
    data.extend_from_slice(mech_list);
    let checksum = hmac_md5(sign_key, &data);
    let sealed = rc4_transform(seal_key, &checksum[..8]);

    let mut out = [0u8; 16];
    out[..4].copy_from_slice(&1u32.to_le_bytes());
    out[4..12].copy_from_slice(&sealed);
    out[12..].copy_from_slice(&seq_num.to_le_bytes());
    out
}

/// Handshake MIC: HMAC-MD5 over the three NTLM messages with the MIC field
/// in the authenticate message zeroed
pub fn handshake_mic(
    exported_session_key: &[u8; 16],
    negotiate: &[u8],
    challenge: &[u8],
    authenticate_zero_mic: &[u8],
) -> [u8; 16] {
    let mut data =
        Vec::with_capacity(negotiate.len() + challenge.len() + authenticate_zero_mic.len());
    data.extend_from_slice(negotiate);
    data.extend_from_slice(challenge);
    data.extend_from_slice(authenticate_zero_mic);
    hmac_md5(exported_session_key, &data)
}

/// Current time in Windows FILETIME (100ns ticks since 1601-01-01)
pub fn windows_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    const WINDOWS_EPOCH_DIFF: u64 = 116_444_736_000_000_000;

    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs() * 10_000_000 + u64::from(duration.subsec_nanos()) / 100 + WINDOWS_EPOCH_DIFF
}

#[cfg(test)]
mod tests {
    use super::*;

    // Inputs in the style of the [MS-NLMP] 4.2.4 worked example
    const USER: &str = "User";
    const DOMAIN: &str = "Domain";
    const PASSWORD: &str = "Password";
    const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF];
    const CLIENT_CHALLENGE: [u8; 8] = [0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA];

    #[test]
    fn test_ntlm_hash_reference() {
        // MD4("Password" in UTF-16LE), the [MS-NLMP] NTOWFv1 vector
        let expected = [
            0xA4, 0xF4, 0x9C, 0x40, 0x65, 0x10, 0xBD, 0xCA, 0xB6, 0x82, 0x4E, 0xE7, 0xC3, 0x0F,
            0xD8, 0x52,
        ];
        assert_eq!(ntlm_hash(PASSWORD), expected);
    }

    #[test]
    fn test_ntowf_v2_reference() {
        // [MS-NLMP] 4.2.4.1.1 NTOWFv2 vector for User/Domain/Password
        let expected = [
            0x0C, 0x86, 0x8A, 0x40, 0x3B, 0xFD, 0x7A, 0x93, 0xA3, 0x00, 0x1E, 0xF2, 0x2E, 0xF0,
            0x2E, 0x3F,
        ];
        assert_eq!(ntowf_v2(USER, DOMAIN, &ntlm_hash(PASSWORD)), expected);
    }

    #[test]
    fn test_proof_and_session_key_are_stable() {
        let ntowf = ntowf_v2(USER, DOMAIN, &ntlm_hash(PASSWORD));
        let temp = [0x01, 0x01, 0x00, 0x00];
        let proof = nt_proof(&ntowf, &SERVER_CHALLENGE, &temp);
        let key = session_base_key(&ntowf, &proof);

        assert_eq!(proof, nt_proof(&ntowf, &SERVER_CHALLENGE, &temp));
        assert_eq!(key, session_base_key(&ntowf, &proof));
        assert_ne!(proof, key);
    }

    #[test]
    fn test_lmv2_layout() {
        let ntowf = ntowf_v2(USER, DOMAIN, &ntlm_hash(PASSWORD));
        let response = lmv2_response(&ntowf, &SERVER_CHALLENGE, &CLIENT_CHALLENGE);
        assert_eq!(response.len(), 24);
        assert_eq!(&response[16..], &CLIENT_CHALLENGE);
    }

    #[test]
    fn test_rc4_is_symmetric() {
        let key = [0x55u8; 16];
        let plain = b"exported session";
        let sealed = rc4_transform(&key, plain);
        assert_ne!(&sealed[..], plain);
        assert_eq!(rc4_transform(&key, &sealed), plain);
    }

    #[test]
    fn test_sign_seal_keys_differ() {
        let exported = [0x77u8; 16];
        assert_ne!(client_sign_key(&exported), client_seal_key(&exported));
    }

    #[test]
    fn test_mech_list_mic_shape() {
        let exported = [0x11u8; 16];
        let mic = mech_list_mic(
            &client_sign_key(&exported),
            &client_seal_key(&exported),
            0,
            b"\x30\x0c\x06\x0a\x2b\x06\x01\x04\x01\x82\x37\x02\x02\x0a",
        );
        assert_eq!(&mic[..4], &1u32.to_le_bytes());
        assert_eq!(&mic[12..], &0u32.to_le_bytes());
    }

    #[test]
    fn test_windows_timestamp_is_after_2020() {
        // 2020-01-01 in FILETIME
        assert!(windows_timestamp() > 132_223_104_000_000_000);
    }
}
