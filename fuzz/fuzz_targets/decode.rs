#![no_main]

use libfuzzer_sys::fuzz_target;
use dotreflect::assembly::{decode_stream, validate_body, Parser};

fuzz_target!(|data: &[u8]| {
    if let Ok(instructions) = decode_stream(&mut Parser::new(data)) {
        let _ = validate_body(&instructions);
    }
});
