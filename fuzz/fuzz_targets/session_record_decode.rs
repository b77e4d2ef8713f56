#![no_main]

use devkit_auth::Session;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Some(session) = Session::from_persisted(&raw) else {
        return;
    };
    assert!(!session.organization_id().trim().is_empty());
    assert!(!session.credential().expose().trim().is_empty());

    let encoded = session
        .to_record()
        .encode()
        .expect("decoded session re-encodes");
    assert_eq!(Session::from_persisted(&encoded), Some(session));
});
