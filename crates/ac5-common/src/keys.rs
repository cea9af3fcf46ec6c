//! RSA key-pair loading (§6 persisted state). Filesystem key loading is an
//! external collaborator per the system's scope, so this stays intentionally
//! small: read PEM if present, otherwise generate and persist a fresh
//! keypair, mirroring the teacher's `generate_rsa_keypair` but with PEM
//! persistence instead of an in-memory-only key. Shared by every service
//! that terminates an RSA-enciphered connection (login and auth both do).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};

const KEY_BITS: usize = 1024;

pub fn load_or_generate(private_key_path: &Path) -> Result<RsaPrivateKey> {
    if private_key_path.exists() {
        let pem = fs::read_to_string(private_key_path)
            .with_context(|| format!("reading private key at {}", private_key_path.display()))?;
        return RsaPrivateKey::from_pkcs1_pem(&pem)
            .with_context(|| format!("parsing private key at {}", private_key_path.display()));
    }

    let key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
        .context("generating a fresh RSA keypair for a new instance")?;
    if let Some(parent) = private_key_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .context("encoding the newly generated private key")?;
    fs::write(private_key_path, pem.as_bytes())
        .with_context(|| format!("writing private key to {}", private_key_path.display()))?;
    Ok(key)
}
