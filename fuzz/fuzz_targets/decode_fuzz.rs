//! Decoder fuzz target: feed arbitrary bytes to the type descriptor parser and
//! to message and stream decoding against the test fixture schema. Nothing
//! may panic; every call returns Ok or a CodecError.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fn codec() -> &'static datafus_codec::Codec {
    use std::sync::OnceLock;
    static CODEC: OnceLock<datafus_codec::Codec> = OnceLock::new();
    CODEC.get_or_init(|| {
        let text = include_str!("../../tests/fixtures/events.json");
        let entities = datafus_codec::loader::parse_events_json(text).expect("fixture schema");
        datafus_codec::Codec::new(datafus_codec::Schema::resolve(entities).expect("fixture schema"))
    })
}

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = datafus_codec::descriptor::parse(text);
    }
    let codec = codec();
    if let Ok(decoded) = codec.decode_message(data) {
        assert!(decoded.consumed <= data.len());
        let _ = codec.encode_message(&decoded.entity);
    }
    let _ = datafus_codec::decode_stream(codec, data);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
