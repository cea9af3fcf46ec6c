use super::Cipher;
use crate::error::CipherError;

/// Passes bytes through unchanged. Used for the handshake response frame,
/// which is sent with `cipher_enabled` forced off for exactly one message,
/// and in tests that don't care about wire-level confidentiality.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCipher;

impl Cipher for NullCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_bytes_through_unchanged() {
        let c = NullCipher;
        let data = b"unchanged".to_vec();
        assert_eq!(c.encrypt(&data).unwrap(), data);
        assert_eq!(c.decrypt(&data).unwrap(), data);
    }
}
