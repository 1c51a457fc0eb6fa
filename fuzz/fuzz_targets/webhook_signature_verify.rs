#![no_main]

use libfuzzer_sys::fuzz_target;
use tern_gateway::{sign_hmac_sha256, verify_hmac_sha256_signature};

const SECRET: &str = "fuzz-secret";
const TIMESTAMP: Option<&str> = Some("1700000000");

fuzz_target!(|data: &[u8]| {
    let (header, body) = data.split_at(data.len() / 2);
    let header = String::from_utf8_lossy(header);
    let _ = verify_hmac_sha256_signature(SECRET, TIMESTAMP, body, &header);

    if let Ok(signature) = sign_hmac_sha256(SECRET, TIMESTAMP, body) {
        assert!(verify_hmac_sha256_signature(SECRET, TIMESTAMP, body, &signature).is_ok());
    }
});
