// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Cursor;

use anyhow::anyhow;
use bytes::Bytes;
use matroska_demuxer::Frame;
use matroska_demuxer::MatroskaFile;
use matroska_demuxer::TrackType;

use nvdec_pipeline::bitstream_utils::LengthPrefixedFilter;
use nvdec_pipeline::source::AnnexBSource;
use nvdec_pipeline::source::Packet;
use nvdec_pipeline::source::PacketSource;
use nvdec_pipeline::ChromaFormat;
use nvdec_pipeline::Codec;
use nvdec_pipeline::StreamDescriptor;

pub const MAGIC: [u8; 4] = [0x1a, 0x45, 0xdf, 0xa3];

fn codec_from_id(codec_id: &str) -> Codec {
    match codec_id {
        "V_MPEG4/ISO/AVC" => Codec::H264,
        "V_MPEGH/ISO/HEVC" => Codec::Hevc,
        "V_AV1" => Codec::Av1,
        _ => Codec::Unsupported,
    }
}

/// Frames of the first video track of a Matroska file.
pub struct MkvSource {
    input: MatroskaFile<Cursor<Bytes>>,
    video_track: u64,
}

impl MkvSource {
    /// Opens `data` and returns the source along with the description of its video track and
    /// the filter its frames need to be turned into Annex B.
    pub fn new(
        data: Bytes,
    ) -> anyhow::Result<(Self, StreamDescriptor, Option<LengthPrefixedFilter>)> {
        let input = MatroskaFile::open(Cursor::new(data))?;
        let track = input
            .tracks()
            .iter()
            .find(|t| t.track_type() == TrackType::Video)
            .ok_or_else(|| anyhow!("no video track in input file"))?;

        let codec = codec_from_id(track.codec_id());
        let filter = LengthPrefixedFilter::for_codec(codec, track.codec_private())?;

        let (width, height) = track
            .video()
            .map(|v| (v.pixel_width().get() as u32, v.pixel_height().get() as u32))
            .unwrap_or_default();
        let mut descriptor = StreamDescriptor {
            codec,
            chroma_format: ChromaFormat::Yuv420,
            bit_depth: 8,
            width,
            height,
        };

        // The SPS of the configuration record gives the chroma format and bit depth of H.264
        // streams.
        if let Some(filter) = filter.as_ref().filter(|_| codec == Codec::H264) {
            match AnnexBSource::new(Bytes::copy_from_slice(filter.parameter_sets())) {
                Ok(source) => descriptor = source.descriptor(),
                Err(e) => log::warn!("failed to parse the avcC SPS: {:#}", e),
            }
        }

        let video_track = track.track_number().get();
        log::info!(
            "Matroska track {}: {} {:?}",
            video_track,
            track.codec_id(),
            descriptor
        );

        Ok((Self { input, video_track }, descriptor, filter))
    }
}

impl PacketSource for MkvSource {
    fn next_packet(&mut self) -> Option<Packet> {
        let mut frame = Frame::default();
        loop {
            match self.input.next_frame(&mut frame) {
                Ok(true) if frame.track == self.video_track => {
                    return Some(Packet {
                        data: Bytes::from(std::mem::take(&mut frame.data)),
                        timestamp: i64::try_from(frame.timestamp).ok(),
                    })
                }
                Ok(true) => (),
                Ok(false) => return None,
                Err(e) => {
                    log::error!("failed to demux Matroska frame: {}", e);
                    return None;
                }
            }
        }
    }
}
