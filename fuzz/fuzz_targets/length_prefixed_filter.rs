#![no_main]

use libfuzzer_sys::fuzz_target;
use nvdec_pipeline::bitstream_utils::LengthPrefixedFilter;
use nvdec_pipeline::Codec;

// The first byte selects the codec, the next two the size of the configuration record. The rest
// is split into packets on 0xff bytes.
fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    let codec = if data[0] & 1 == 0 { Codec::H264 } else { Codec::Hevc };
    let record_size = usize::from(u16::from_be_bytes([data[1], data[2]])).min(data.len() - 3);
    let (record, packets) = data[3..].split_at(record_size);

    let Ok(Some(mut filter)) = LengthPrefixedFilter::for_codec(codec, Some(record)) else {
        return;
    };
    for packet in packets.split(|&b| b == 0xff) {
        let _ = filter.filter(packet);
    }
});
