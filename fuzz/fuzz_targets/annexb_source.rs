#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use nvdec_pipeline::source::AnnexBSource;
use nvdec_pipeline::source::PacketSource;

fuzz_target!(|data: &[u8]| {
    let Ok(mut source) = AnnexBSource::new(Bytes::copy_from_slice(data)) else {
        return;
    };

    let _ = source.descriptor().surface_format();
    while let Some(packet) = source.next_packet() {
        assert!(!packet.data.is_empty());
    }
});
