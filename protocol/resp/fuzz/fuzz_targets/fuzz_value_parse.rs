#![no_main]

use libfuzzer_sys::fuzz_target;
use protocol_resp::{ParseError, ParseOptions, Value};

fuzz_target!(|data: &[u8]| {
    match Value::parse(data) {
        Ok((value, consumed)) => {
            assert!(consumed > 0);
            assert!(consumed <= data.len());

            // A complete value stays complete with trailing bytes appended.
            let mut extended = data[..consumed].to_vec();
            extended.extend_from_slice(b"+OK\r\n");
            let (again, again_consumed) = Value::parse(&extended).unwrap();
            assert_eq!(again, value);
            assert_eq!(again_consumed, consumed);
        }
        Err(ParseError::Incomplete) => {
            // Every strict prefix of an incomplete buffer is also incomplete.
            if !data.is_empty() {
                assert!(matches!(
                    Value::parse(&data[..data.len() - 1]),
                    Err(ParseError::Incomplete)
                ));
            }
        }
        Err(_) => {}
    }

    // Tight limits must never panic.
    let options = ParseOptions::new().max_bulk_string_len(16);
    let _ = Value::parse_with_options(data, &options);
});
