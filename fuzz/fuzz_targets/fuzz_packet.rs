#![no_main]

use libfuzzer_sys::fuzz_target;
use adversarial_protocol::Packet;

fuzz_target!(|data: &[u8]| {
    // Packet parsing must reject garbage without panicking
    let _ = Packet::from_bytes(data);
});
