#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(payload) = chartlock::wire::decode_payload(data) {
        let encoded = chartlock::wire::encode_payload(&payload).unwrap();
        assert_eq!(encoded, data);
    }
    let _ = chartlock::wire::FileHeader::decode(data);
});
