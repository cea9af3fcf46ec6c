//! Hand-rolled AES-CWC-128: AES-128 in counter mode plus a Carter-Wegman
//! polynomial MAC over GF(2^128), built directly on the `aes` crate's raw
//! block primitive the way the teacher builds AES-ECB on it. No crates.io
//! crate implements CWC mode, so this is assembled from scratch the same
//! way the teacher hand-rolls PKCS#7 padding around `Aes128`.
//!
//! Wire layout of a sealed message: `nonce(12) || ciphertext || tag(16)`.

use std::sync::atomic::{AtomicU64, Ordering};

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};

use super::Cipher;
use crate::error::CipherError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct AesCwc128 {
    cipher: Aes128,
    /// Per-direction message counter forming the low 8 bytes of each
    /// outbound nonce. Two directions of traffic each get their own
    /// `AesCwc128` instance and therefore their own counter.
    next_nonce: AtomicU64,
}

impl AesCwc128 {
    pub fn new(key: [u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(&key)),
            next_nonce: AtomicU64::new(0),
        }
    }

    fn keystream_block(&self, nonce: &[u8; NONCE_LEN], block_index: u32) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[..NONCE_LEN].copy_from_slice(nonce);
        block[NONCE_LEN..].copy_from_slice(&block_index.to_be_bytes());
        let mut ga = GenericArray::clone_from_slice(&block);
        self.cipher.encrypt_block(&mut ga);
        ga.into()
    }

    fn ctr_xor(&self, nonce: &[u8; NONCE_LEN], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (i, chunk) in data.chunks(16).enumerate() {
            // Block index 0 is reserved for the tag mask; the keystream
            // proper starts at 1.
            let ks = self.keystream_block(nonce, i as u32 + 1);
            for (o, &b) in chunk.iter().enumerate() {
                out.push(b ^ ks[o]);
            }
        }
        out
    }

    fn tag(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> [u8; 16] {
        let h = self.keystream_block_raw_encrypt(&[0u8; 16]);
        let mut len_block = [0u8; 16];
        len_block[8..].copy_from_slice(&((ciphertext.len() as u64) * 8).to_be_bytes());
        let hash = ghash(&h, ciphertext, &len_block);
        let mask = self.keystream_block(nonce, 0);
        let mut tag = [0u8; 16];
        for i in 0..16 {
            tag[i] = hash[i] ^ mask[i];
        }
        tag
    }

    fn keystream_block_raw_encrypt(&self, block: &[u8; 16]) -> [u8; 16] {
        let mut ga = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut ga);
        ga.into()
    }
}

/// GHASH-style Carter-Wegman polynomial MAC over GF(2^128), evaluated by
/// Horner's method with the bit-reflected multiplication NIST SP 800-38D
/// uses for GCM. `len_block` carries the bit length of the authenticated
/// data and is folded in as the final block, binding the tag to the exact
/// ciphertext length.
fn ghash(h: &[u8; 16], ciphertext: &[u8], len_block: &[u8; 16]) -> [u8; 16] {
    let mut acc = [0u8; 16];
    for chunk in ciphertext.chunks(16) {
        let mut block = [0u8; 16];
        block[..chunk.len()].copy_from_slice(chunk);
        xor_into(&mut acc, &block);
        acc = gf128_mul(&acc, h);
    }
    xor_into(&mut acc, len_block);
    gf128_mul(&acc, h)
}

fn xor_into(acc: &mut [u8; 16], block: &[u8; 16]) {
    for i in 0..16 {
        acc[i] ^= block[i];
    }
}

fn gf128_mul(x: &[u8; 16], y: &[u8; 16]) -> [u8; 16] {
    let mut z = [0u8; 16];
    let mut v = *y;
    for i in 0..128 {
        let byte = i / 8;
        let bit = 7 - (i % 8);
        if (x[byte] >> bit) & 1 == 1 {
            for k in 0..16 {
                z[k] ^= v[k];
            }
        }
        let lsb = v[15] & 1;
        for k in (1..16).rev() {
            v[k] = (v[k] >> 1) | ((v[k - 1] & 1) << 7);
        }
        v[0] >>= 1;
        if lsb == 1 {
            v[0] ^= 0xe1;
        }
    }
    z
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

impl Cipher for AesCwc128 {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let counter = self.next_nonce.fetch_add(1, Ordering::SeqCst);
        let mut nonce = [0u8; NONCE_LEN];
        nonce[NONCE_LEN - 8..].copy_from_slice(&counter.to_be_bytes());

        let ciphertext = self.ctr_xor(&nonce, plaintext);
        let tag = self.tag(&nonce, &ciphertext);

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let expected = self.tag(&nonce, ciphertext);
        if !ct_eq(&expected, tag) {
            return Err(CipherError::TagMismatch);
        }

        Ok(self.ctr_xor(&nonce, ciphertext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_arbitrary_length_plaintext() {
        let cipher = AesCwc128::new([0x42; 16]);
        for len in [0, 1, 15, 16, 17, 100] {
            let plaintext = vec![0xAB; len];
            let sealed = cipher.encrypt(&plaintext).unwrap();
            let opened = cipher.decrypt(&sealed).unwrap();
            assert_eq!(opened, plaintext, "length {len}");
        }
    }

    #[test]
    fn successive_messages_use_distinct_nonces() {
        let cipher = AesCwc128::new([0x11; 16]);
        let a = cipher.encrypt(b"same plaintext!!").unwrap();
        let b = cipher.encrypt(b"same plaintext!!").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_tag_check() {
        let cipher = AesCwc128::new([0x77; 16]);
        let mut sealed = cipher.encrypt(b"integrity matters").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(cipher.decrypt(&sealed), Err(CipherError::TagMismatch)));
    }

    #[test]
    fn truncated_input_is_rejected_before_touching_the_cipher() {
        let cipher = AesCwc128::new([0x01; 16]);
        assert!(matches!(cipher.decrypt(&[0u8; 10]), Err(CipherError::Truncated)));
    }
}
