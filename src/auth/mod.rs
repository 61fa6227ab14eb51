//! SPNEGO/NTLMv2 authentication engine.
//!
//! The handshake is exactly two driven steps: step 0 emits the GSS-API
//! token carrying an NTLM NEGOTIATE message, step 1 consumes the server's
//! challenge token and emits the final `negTokenResp` with the NTLMv2
//! response. Anything past that is a terminal error; a failed handshake is
//! discarded and the caller starts a fresh one.

pub mod ntlm;
pub mod ntlm_crypto;
pub mod spnego;

use rand::RngCore;
use tracing::debug;

use crate::error::{Error, Result};

/// Identity used for session setup. The NTLMv2 hash is precomputed so the
/// password itself is never retained; reconnection re-authenticates from
/// the hash alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthIdentity {
    Anonymous,
    Credentials {
        username: String,
        domain: String,
        workstation: String,
        /// MD4 of the UTF-16LE password (NTOWFv1)
        nt_hash: [u8; 16],
    },
}

impl AuthIdentity {
    /// Build a credentialed identity, hashing the password immediately.
    pub fn password(username: &str, domain: &str, workstation: &str, password: &str) -> Self {
        Self::Credentials {
            username: username.to_string(),
            domain: domain.to_string(),
            workstation: workstation.to_string(),
            nt_hash: ntlm_crypto::ntlm_hash(password),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// Handshake state. The retained negotiate message and mechTypes bytes
/// feed the step-1 integrity tags.
#[derive(Debug)]
enum AuthStep {
    Initial,
    NegotiateSent {
        negotiate: Vec<u8>,
        mech_list: Vec<u8>,
    },
    Complete,
    Failed,
}

/// Drives one authentication handshake. Lives only for the duration of a
/// session setup exchange.
#[derive(Debug)]
pub struct Authenticator {
    identity: AuthIdentity,
    step: AuthStep,
    session_key: Option<[u8; 16]>,
}

impl Authenticator {
    pub fn new(identity: AuthIdentity) -> Self {
        Self {
            identity,
            step: AuthStep::Initial,
            session_key: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.step, AuthStep::Complete)
    }

    /// The exported session key, available once the handshake completes.
    /// All zeroes for an anonymous logon.
    pub fn session_key(&self) -> Option<&[u8; 16]> {
        self.session_key.as_ref()
    }

    /// Advance the handshake: produce the next token to send, consuming
    /// the server's token from the previous round (empty on the first
    /// call).
    pub fn step(&mut self, server_token: &[u8]) -> Result<Vec<u8>> {
        match std::mem::replace(&mut self.step, AuthStep::Failed) {
            AuthStep::Initial => {
                let negotiate = ntlm::encode_negotiate()?;
                let parts = spnego::encode_neg_token_init(&negotiate)?;
                debug!(token_len = parts.token.len(), "auth step 0: negotiate");
                self.step = AuthStep::NegotiateSent {
                    negotiate,
                    mech_list: parts.mech_list,
                };
                Ok(parts.token)
            }
            AuthStep::NegotiateSent {
                negotiate,
                mech_list,
            } => {
                // Any parse failure below leaves the state at Failed
                let token = self.respond_to_challenge(&negotiate, &mech_list, server_token)?;
                self.step = AuthStep::Complete;
                Ok(token)
            }
            AuthStep::Complete | AuthStep::Failed => Err(Error::Auth(
                "authentication handshake already finished".into(),
            )),
        }
    }

    fn respond_to_challenge(
        &mut self,
        negotiate: &[u8],
        mech_list: &[u8],
        server_token: &[u8],
    ) -> Result<Vec<u8>> {
        let challenge_bytes = spnego::parse_neg_token_resp(server_token)?;
        let challenge = ntlm::ChallengeMessage::parse(&challenge_bytes)?;
        debug!(
            target_info_len = challenge.target_info.len(),
            "auth step 1: challenge received"
        );

        if self.identity.is_anonymous() {
            // No proof material: zeroed session key, stub responses, no
            // integrity tags.
            self.session_key = Some([0u8; 16]);
            let auth = ntlm::AuthenticateMessage {
                flags: ntlm::NtlmFlags::client_defaults() | ntlm::NtlmFlags::NEGOTIATE_ANONYMOUS,
                lm_response: vec![0u8],
                nt_response: Vec::new(),
                domain: String::new(),
                username: String::new(),
                workstation: String::new(),
                encrypted_session_key: Vec::new(),
                anonymous_pad: true,
            };
            let auth_bytes = auth.serialize_with_zero_mic()?;
            return spnego::encode_neg_token_resp(&auth_bytes, None);
        }

        let (username, domain, workstation, nt_hash) = match &self.identity {
            AuthIdentity::Credentials {
                username,
                domain,
                workstation,
                nt_hash,
            } => (username.clone(), domain.clone(), workstation.clone(), *nt_hash),
            AuthIdentity::Anonymous => unreachable!(),
        };

        let ntowf = ntlm_crypto::ntowf_v2(&username, &domain, &nt_hash);

        let mut client_challenge = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut client_challenge);

        // Prefer the server's clock from the target info so the proof
        // matches what the DC will recompute
        let timestamp = challenge
            .timestamp()
            .unwrap_or_else(ntlm_crypto::windows_timestamp);

        let temp = ntlm::build_temp(timestamp, &client_challenge, &challenge.target_info, true);
        let proof = ntlm_crypto::nt_proof(&ntowf, &challenge.server_challenge, &temp);
        let session_base_key = ntlm_crypto::session_base_key(&ntowf, &proof);

        let mut nt_response = proof.to_vec();
        nt_response.extend_from_slice(&temp);
        let lm_response =
            ntlm_crypto::lmv2_response(&ntowf, &challenge.server_challenge, &client_challenge);

        let mut exported_session_key = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut exported_session_key);
        let encrypted_session_key =
            ntlm_crypto::rc4_transform(&session_base_key, &exported_session_key);

        let auth = ntlm::AuthenticateMessage {
            flags: ntlm::NtlmFlags::client_defaults(),
            lm_response,
            nt_response,
            domain,
            username,
            workstation,
            encrypted_session_key,
            anonymous_pad: false,
        };
        let mut auth_bytes = auth.serialize_with_zero_mic()?;
        let mic = ntlm_crypto::handshake_mic(
            &exported_session_key,
            negotiate,
            &challenge_bytes,
            &auth_bytes,
        );
        ntlm::AuthenticateMessage::patch_mic(&mut auth_bytes, &mic);

        let list_mic = ntlm_crypto::mech_list_mic(
            &ntlm_crypto::client_sign_key(&exported_session_key),
            &ntlm_crypto::client_seal_key(&exported_session_key),
            0,
            mech_list,
        );

        self.session_key = Some(exported_session_key);
        spnego::encode_neg_token_resp(&auth_bytes, Some(&list_mic[..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_challenge_token() -> Vec<u8> {
        let challenge = ntlm::ChallengeMessage {
            flags: ntlm::NtlmFlags::client_defaults(),
            server_challenge: [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF],
            target_info: {
                let mut info = Vec::new();
                info.extend_from_slice(&ntlm::encode_av_pair(
                    0x0007,
                    &0x01DA_0000_0000_0000u64.to_le_bytes(),
                ));
                info.extend_from_slice(&ntlm::encode_av_pair(0x0000, &[]));
                info
            },
        };
        spnego::encode_challenge_token(&challenge.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_two_step_handshake() {
        let mut auth = Authenticator::new(AuthIdentity::password("user", "DOM", "WS", "secret"));

        let step0 = auth.step(&[]).unwrap();
        assert_eq!(step0[0], 0x60);
        assert!(!auth.is_complete());

        let step1 = auth.step(&server_challenge_token()).unwrap();
        assert_eq!(step1[0], 0xA1);
        assert!(auth.is_complete());
        assert!(auth.session_key().is_some());
    }

    #[test]
    fn test_third_step_is_terminal() {
        let mut auth = Authenticator::new(AuthIdentity::password("u", "D", "W", "p"));
        auth.step(&[]).unwrap();
        auth.step(&server_challenge_token()).unwrap();
        assert!(auth.step(&[]).is_err());
    }

    #[test]
    fn test_malformed_challenge_fails_terminally() {
        let mut auth = Authenticator::new(AuthIdentity::password("u", "D", "W", "p"));
        auth.step(&[]).unwrap();
        assert!(auth.step(&[0xA1, 0x03, 0x30, 0x01, 0x00]).is_err());
        // The engine does not retry; a new handshake is required
        assert!(auth.step(&server_challenge_token()).is_err());
    }

    #[test]
    fn test_anonymous_skips_proof() {
        let mut auth = Authenticator::new(AuthIdentity::Anonymous);
        auth.step(&[]).unwrap();
        let final_token = auth.step(&server_challenge_token()).unwrap();
        assert!(auth.is_complete());
        assert_eq!(auth.session_key(), Some(&[0u8; 16]));
        // Stub responses keep the token small
        assert!(final_token.len() < 400);
    }

    #[test]
    fn test_fresh_handshakes_differ() {
        // Random client challenge and session key seed: two runs against
        // the same server challenge must not produce identical tokens
        let run = || {
            let mut auth =
                Authenticator::new(AuthIdentity::password("user", "DOM", "WS", "secret"));
            auth.step(&[]).unwrap();
            auth.step(&server_challenge_token()).unwrap()
        };
        assert_ne!(run(), run());
    }
}
