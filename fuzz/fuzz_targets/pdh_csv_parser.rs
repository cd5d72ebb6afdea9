#![no_main]

use libfuzzer_sys::fuzz_target;
use contend::normalize::normalize_text;
use contend::reader::read_stream;

fuzz_target!(|data: &[u8]| {
    // Decoder output is untrusted text; parsing and reading must never panic
    let text = String::from_utf8_lossy(data);
    if let Ok(stream) = normalize_text(&text) {
        let _ = read_stream(&stream, 15.0);
    }
});
