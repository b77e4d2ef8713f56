#![no_main]

use devkit_secrets::{decrypt_secret_value, encrypt_secret_value, SecretStoreEncryptionMode};
use libfuzzer_sys::fuzz_target;

const FUZZ_KEY: &str = "fuzz-secret-store-key";

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let _ = decrypt_secret_value(&raw, SecretStoreEncryptionMode::Keyed, Some(FUZZ_KEY));

    let sealed = encrypt_secret_value(&raw, SecretStoreEncryptionMode::Keyed, Some(FUZZ_KEY))
        .expect("encrypt arbitrary plaintext");
    let opened = decrypt_secret_value(&sealed, SecretStoreEncryptionMode::Keyed, Some(FUZZ_KEY))
        .expect("decrypt own envelope");
    assert_eq!(opened, raw);
});
