#![no_main]

use libfuzzer_sys::fuzz_target;
use adversarial_protocol::core::document;
use adversarial_protocol::protocol::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok(doc) = document::decode(data) {
        // Anything that decodes must re-encode to the same bytes
        if let Ok(encoded) = document::encode(&doc) {
            assert_eq!(encoded.as_slice(), data);
        }
    }

    if let Ok(msg) = Message::decode(data) {
        if let Ok(encoded) = msg.encode() {
            let _ = Message::decode(&encoded);
        }
    }
});
