#![no_main]

use libfuzzer_sys::fuzz_target;
use logferry_core::plugin::Codec;
use logferry_pipeline::codec::JsonCodec;

fuzz_target!(|data: &[u8]| {
    let codec = JsonCodec::default();
    let _ = codec.decode_event(data);
});
