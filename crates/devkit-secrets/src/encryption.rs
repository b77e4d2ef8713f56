//! Secret value envelope: AES-256-GCM with a random nonce, base64 encoded
//! behind a version prefix.

use aes_gcm::aead::rand_core::RngCore as _;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::Aes256Gcm;
use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::types::SecretStoreEncryptionMode;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_BYTES: usize = 12;
const ENVELOPE_AAD: &[u8] = b"devkit-secret-store-v1";
const MACHINE_SEED_CONTEXT: &str = "devkit-secret-store-machine-key-v1";
const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];
const IDENTITY_VARIABLES: [&str; 4] = ["USER", "USERNAME", "HOME", "USERPROFILE"];
const MIN_KEY_CHARS: usize = 8;

/// Stable per-user seed used when no explicit store key is configured.
fn machine_seed() -> String {
    let platform = [
        MACHINE_SEED_CONTEXT.to_string(),
        format!("os={}", std::env::consts::OS),
        format!("arch={}", std::env::consts::ARCH),
    ];
    let identity = IDENTITY_VARIABLES.iter().filter_map(|variable| {
        let value = std::env::var(variable).ok()?;
        let value = value.trim();
        (!value.is_empty()).then(|| format!("{variable}={value}"))
    });
    let machine_id = MACHINE_ID_PATHS
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|raw| raw.trim().to_string())
        .find(|value| !value.is_empty())
        .map(|value| format!("machine_id={value}"));

    platform
        .into_iter()
        .chain(identity)
        .chain(machine_id)
        .collect::<Vec<_>>()
        .join("|")
}

/// AES-256-GCM keyed by the SHA-256 of the store key (or of the machine seed).
struct EnvelopeCipher(Aes256Gcm);

impl EnvelopeCipher {
    fn for_key(key: Option<&str>) -> Result<Self> {
        let seed = match key.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) if value.chars().count() < MIN_KEY_CHARS => {
                bail!("secret store key must be at least {MIN_KEY_CHARS} characters")
            }
            Some(value) => value.to_string(),
            None => machine_seed(),
        };
        let digest = Sha256::digest(seed.as_bytes());
        Aes256Gcm::new_from_slice(&digest)
            .map(Self)
            .map_err(|_| anyhow!("secret key material has invalid length"))
    }

    fn seal(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .0
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|_| anyhow!("secret payload encryption failed"))?;
        let sealed = [nonce.as_slice(), ciphertext.as_slice()].concat();
        Ok(format!("{ENVELOPE_PREFIX}{}", BASE64_STANDARD.encode(sealed)))
    }

    fn open(&self, envelope: &str) -> Result<String> {
        let encoded = envelope
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| anyhow!("secret payload prefix is invalid"))?;
        let sealed = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| anyhow!("secret payload encoding is invalid"))?;
        if sealed.len() <= NONCE_BYTES {
            bail!("secret payload is truncated");
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_BYTES);
        let plaintext = self
            .0
            .decrypt(
                nonce.into(),
                Payload {
                    msg: ciphertext,
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|_| anyhow!("secret payload integrity check failed"))?;
        String::from_utf8(plaintext).map_err(|_| anyhow!("secret payload is not valid UTF-8"))
    }
}

/// Encodes `value` for storage under `mode`.
pub fn encrypt_secret_value(
    value: &str,
    mode: SecretStoreEncryptionMode,
    key: Option<&str>,
) -> Result<String> {
    match mode {
        SecretStoreEncryptionMode::None => Ok(value.to_string()),
        SecretStoreEncryptionMode::Keyed => EnvelopeCipher::for_key(key)?.seal(value),
    }
}

/// Reverses [`encrypt_secret_value`]. Tampered or foreign payloads fail closed.
pub fn decrypt_secret_value(
    encoded: &str,
    mode: SecretStoreEncryptionMode,
    key: Option<&str>,
) -> Result<String> {
    match mode {
        SecretStoreEncryptionMode::None => Ok(encoded.to_string()),
        SecretStoreEncryptionMode::Keyed => EnvelopeCipher::for_key(key)?.open(encoded),
    }
}
