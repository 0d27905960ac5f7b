// ABOUTME: PKCE (RFC 7636) challenge and CSRF state generation for the authorization flow
// ABOUTME: S256 challenges over 64-character verifiers, random state tokens

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

use crate::{
    error::{AuthError, AuthResult},
    oauth::types::PkceChallenge,
};

const VERIFIER_LEN: usize = 64;
const VERIFIER_RANGE: std::ops::RangeInclusive<usize> = 43..=128;

/// Generate a fresh S256 PKCE challenge
pub fn generate_pkce_challenge() -> AuthResult<PkceChallenge> {
    let code_verifier = random_alphanumeric(VERIFIER_LEN);
    if !VERIFIER_RANGE.contains(&code_verifier.len()) {
        return Err(AuthError::Pkce(format!(
            "Invalid code verifier length: {}",
            code_verifier.len()
        )));
    }

    Ok(PkceChallenge {
        code_challenge: s256_challenge(&code_verifier),
        code_verifier,
        code_challenge_method: "S256".to_string(),
    })
}

/// Generate the opaque `state` parameter used for CSRF protection
pub fn generate_state() -> String {
    nanoid::nanoid!(32)
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
