#![no_main]

use libfuzzer_sys::fuzz_target;
use protocol_resp::{Request, Value};

fuzz_target!(|data: &[u8]| {
    // Split the input into arguments on NUL bytes.
    let args: Vec<&[u8]> = data.split(|b| *b == 0).collect();
    let request = Request::new(&args);

    let mut buf = Vec::new();
    let written = request.encode(&mut buf);
    assert_eq!(written, buf.len());
    assert_eq!(written, request.encoded_len());

    // An encoded request is itself a valid RESP array of bulk strings.
    let (value, consumed) = Value::parse(&buf).unwrap();
    assert_eq!(consumed, buf.len());
    let Value::Array(items) = value else {
        panic!("request did not encode as an array");
    };
    assert_eq!(items.len(), args.len());
    for (item, arg) in items.iter().zip(&args) {
        assert_eq!(item, &Value::BulkString(arg.to_vec()));
    }
});
