use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::{CredentialError, CredentialResult};

/// Length of an arbiter token before encoding.
pub const TOKEN_BYTES: usize = 32;

/// A fresh random arbiter token, base64-encoded.
pub fn generate_arbiter_token() -> CredentialResult<String> {
    let mut raw = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut raw).map_err(|e| CredentialError::Token(e.to_string()))?;
    Ok(STANDARD.encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_32_bytes_of_base64() {
        let token = generate_arbiter_token().unwrap();
        assert_eq!(STANDARD.decode(&token).unwrap().len(), TOKEN_BYTES);
        assert_eq!(token.len(), 44);
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(generate_arbiter_token().unwrap(), generate_arbiter_token().unwrap());
    }
}
