#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use nvdec_pipeline::source::IvfSource;
use nvdec_pipeline::source::PacketSource;

fuzz_target!(|data: &[u8]| {
    let Ok(mut source) = IvfSource::new(Bytes::copy_from_slice(data)) else {
        return;
    };

    let _ = source.descriptor();
    while source.next_packet().is_some() {}
});
