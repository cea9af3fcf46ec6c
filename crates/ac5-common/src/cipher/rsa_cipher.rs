//! RSA cipher used for the very first message of the auth handshake, before
//! any AES-CWC key exists. The client encrypts the key-material payload with
//! the server's public key; the server is the only side that ever calls
//! [`Cipher::decrypt`] in practice, but both directions are implemented so
//! the type satisfies the same [`Cipher`] contract as every other cipher in
//! the framer.

use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use super::Cipher;
use crate::error::CipherError;

/// RSA-OAEP decrypt / RSA padded-encrypt cipher.
///
/// The crate ecosystem has no RSA X9.31 padding implementation, so the
/// outbound direction (never exercised by the auth state machine described
/// here, since the handshake reply goes out under a [`NullCipher`] instead)
/// is implemented with the crate's PKCS#1 v1.5 scheme as a stand-in. See
/// DESIGN.md for the rationale.
///
/// [`NullCipher`]: super::NullCipher
#[derive(Clone)]
pub struct RsaCipher {
    private: Arc<RsaPrivateKey>,
    public: RsaPublicKey,
}

impl RsaCipher {
    pub fn new(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self {
            private: Arc::new(private),
            public,
        }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }
}

impl Cipher for RsaCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut rng = OsRng;
        self.public
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CipherError::Rsa(e.to_string()))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.private
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map_err(|e| CipherError::Rsa(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut OsRng, 1024).expect("key generation")
    }

    #[test]
    fn oaep_roundtrip_via_public_and_private_halves() {
        let cipher = RsaCipher::new(test_key());
        let mut rng = OsRng;
        let plaintext = b"0123456789ABCDEF";
        let ciphertext = cipher
            .public_key()
            .encrypt(&mut rng, Oaep::new::<Sha1>(), plaintext)
            .unwrap();
        let decrypted = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_rejects_garbage_ciphertext() {
        let cipher = RsaCipher::new(test_key());
        let garbage = vec![0u8; 128];
        assert!(cipher.decrypt(&garbage).is_err());
    }
}
