#![no_main]

use libfuzzer_sys::fuzz_target;
use tempreg::bus::frame::{checksum, decode_response};

fuzz_target!(|data: &[u8]| {
    let _ = decode_response(data);

    // with a valid BCC appended the decoder must accept any non-empty body
    if !data.is_empty() {
        let mut framed = data.to_vec();
        framed.push(checksum(data));
        let response = decode_response(&framed);
        assert!(response.is_ok());
    }
});
