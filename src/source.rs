// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Packet sources: split an elementary stream into packets suitable for the decoder parser and
//! describe it with a [`StreamDescriptor`].

use std::io::Cursor;
use std::path::Path;

use anyhow::anyhow;
use anyhow::Context;
use bytes::Bytes;

use crate::bitstream_utils::AccessUnitIterator;
use crate::bitstream_utils::IvfFileHeader;
use crate::bitstream_utils::IvfIterator;
use crate::bitstream_utils::LengthPrefixedFilter;
use crate::codec::h264::parser::Nalu;
use crate::codec::h264::parser::NaluType;
use crate::codec::h264::parser::Parser;
use crate::ChromaFormat;
use crate::Codec;
use crate::StreamDescriptor;

/// A unit of compressed data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub data: Bytes,
    /// Presentation timestamp in the clock of the stream, if known.
    pub timestamp: Option<i64>,
}

/// A stream of packets. `None` signals the end of the stream.
pub trait PacketSource {
    fn next_packet(&mut self) -> Option<Packet>;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn next_packet(&mut self) -> Option<Packet> {
        (**self).next_packet()
    }
}

/// Frames of an IVF file.
pub struct IvfSource {
    data: Bytes,
    header: IvfFileHeader,
    position: usize,
}

impl IvfSource {
    pub fn new(data: Bytes) -> anyhow::Result<Self> {
        let header = IvfFileHeader::parse(&data)?;
        let position = usize::from(header.header_size);

        Ok(Self {
            data,
            header,
            position,
        })
    }

    pub fn header(&self) -> &IvfFileHeader {
        &self.header
    }

    /// IVF does not record the chroma format and bit depth of the stream, so 4:2:0 8-bit is
    /// assumed. The decoder is configured from the sequence header regardless.
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            codec: self.header.codec(),
            chroma_format: ChromaFormat::Yuv420,
            bit_depth: 8,
            width: u32::from(self.header.width),
            height: u32::from(self.header.height),
        }
    }
}

impl PacketSource for IvfSource {
    fn next_packet(&mut self) -> Option<Packet> {
        let mut frames = IvfIterator::from_position(&self.data, self.position);
        let frame = frames.next()?;
        self.position = frames.position();

        Some(Packet {
            data: self.data.slice(frame.range),
            timestamp: i64::try_from(frame.timestamp).ok(),
        })
    }
}

/// Access units of an Annex B H.264 stream.
pub struct AnnexBSource {
    data: Bytes,
    position: usize,
    descriptor: StreamDescriptor,
}

impl AnnexBSource {
    /// Creates a source for `data`, described from its first sequence parameter set.
    pub fn new(data: Bytes) -> anyhow::Result<Self> {
        let mut parser = Parser::default();
        let mut cursor = Cursor::new(&data[..]);

        let sps = loop {
            let nalu = Nalu::next(&mut cursor).context("no SPS found in the stream")?;
            if nalu.header.type_ == NaluType::Sps {
                break parser.parse_sps(&nalu)?.clone();
            }
        };

        let visible = sps.visible_rectangle();
        let descriptor = StreamDescriptor {
            codec: Codec::H264,
            chroma_format: sps.chroma_format(),
            bit_depth: sps.bit_depth(),
            width: (visible.right - visible.left) as u32,
            height: (visible.bottom - visible.top) as u32,
        };
        log::debug!("H.264 stream: {:?}", descriptor);

        Ok(Self {
            data,
            position: 0,
            descriptor,
        })
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        self.descriptor
    }
}

impl PacketSource for AnnexBSource {
    fn next_packet(&mut self) -> Option<Packet> {
        let rest = self.data.slice(self.position..);
        let range = AccessUnitIterator::new(&rest).next_range()?;
        self.position += range.end;

        Some(Packet {
            data: rest.slice(range),
            timestamp: None,
        })
    }
}

/// Applies a [`LengthPrefixedFilter`] to the packets of another source. Packets the filter
/// rejects are dropped with a warning.
pub struct FilteredSource<S> {
    inner: S,
    filter: LengthPrefixedFilter,
}

impl<S: PacketSource> FilteredSource<S> {
    pub fn new(inner: S, filter: LengthPrefixedFilter) -> Self {
        Self { inner, filter }
    }
}

impl<S: PacketSource> PacketSource for FilteredSource<S> {
    fn next_packet(&mut self) -> Option<Packet> {
        loop {
            let packet = self.inner.next_packet()?;
            match self.filter.filter(&packet.data) {
                Ok(data) => {
                    return Some(Packet {
                        data,
                        timestamp: packet.timestamp,
                    })
                }
                Err(e) => log::warn!("dropping packet: {:#}", e),
            }
        }
    }
}

/// Opens the elementary stream at `path`, detecting IVF files from their signature and
/// treating anything else as Annex B H.264.
pub fn open(path: &Path) -> anyhow::Result<(StreamDescriptor, Box<dyn PacketSource>)> {
    let data = Bytes::from(
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
    );

    if data.starts_with(&IvfFileHeader::MAGIC) {
        let source = IvfSource::new(data)?;
        let descriptor = source.descriptor();
        if descriptor.codec == Codec::Unsupported {
            log::warn!(
                "unknown IVF fourcc {:?}",
                String::from_utf8_lossy(&source.header().codec)
            );
        }
        return Ok((descriptor, Box::new(source)));
    }

    let source = AnnexBSource::new(data)
        .map_err(|e| anyhow!("{} is neither IVF nor Annex B H.264: {:#}", path.display(), e))?;
    Ok((source.descriptor(), Box::new(source)))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::bitstream_utils::IvfFrameHeader;
    use crate::codec::h264::parser::tests::baseline_sps;
    use crate::codec::h264::parser::tests::SPS_1080P;

    struct VecSource(VecDeque<Packet>);

    impl PacketSource for VecSource {
        fn next_packet(&mut self) -> Option<Packet> {
            self.0.pop_front()
        }
    }

    fn annex_b_stream() -> Vec<u8> {
        let mut stream = SPS_1080P.to_vec();
        stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x68, 0xce]);
        stream.extend_from_slice(&[0x00, 0x00, 0x01, 0x65, 0x88]);
        stream.extend_from_slice(&[0x00, 0x00, 0x01, 0x41, 0x9a]);
        stream.extend_from_slice(&[0x00, 0x00, 0x01, 0x41, 0x9b]);
        stream
    }

    #[test]
    fn annex_b_source() {
        let stream = annex_b_stream();
        let mut source = AnnexBSource::new(Bytes::from(stream.clone())).unwrap();
        assert_eq!(
            source.descriptor(),
            StreamDescriptor {
                codec: Codec::H264,
                chroma_format: ChromaFormat::Yuv420,
                bit_depth: 8,
                width: 1920,
                height: 1080,
            }
        );

        let packets: Vec<_> = std::iter::from_fn(|| source.next_packet()).collect();
        assert_eq!(packets.len(), 3);
        assert_eq!(&packets[0].data[..], &stream[..SPS_1080P.len() + 11]);
        assert_eq!(&packets[2].data[..], &[0x00, 0x00, 0x01, 0x41, 0x9b]);
        assert!(packets.iter().all(|p| p.timestamp.is_none()));
    }

    #[test]
    fn annex_b_without_sps() {
        let stream = [0x00, 0x00, 0x01, 0x65, 0x88];
        assert!(AnnexBSource::new(Bytes::copy_from_slice(&stream)).is_err());
    }

    #[test]
    fn annex_b_with_oversized_sps() {
        let mut stream = baseline_sps(0x1000_0000, 14);
        stream.extend_from_slice(&[0x00, 0x00, 0x01, 0x65, 0x88]);
        assert!(AnnexBSource::new(Bytes::from(stream)).is_err());
    }

    #[test]
    fn ivf_source() {
        let mut file = Vec::new();
        IvfFileHeader {
            codec: IvfFileHeader::CODEC_AV1,
            width: 640,
            height: 480,
            ..Default::default()
        }
        .write_into(&mut file)
        .unwrap();
        for (timestamp, frame) in [(0u64, &[0x12u8, 0x00][..]), (40, &[0x32, 0x01, 0x02][..])] {
            IvfFrameHeader {
                frame_size: frame.len() as u32,
                timestamp,
            }
            .write_into(&mut file)
            .unwrap();
            file.extend_from_slice(frame);
        }

        let mut source = IvfSource::new(Bytes::from(file)).unwrap();
        assert_eq!(source.descriptor().codec, Codec::Av1);
        assert_eq!(source.descriptor().resolution(), (640, 480).into());

        let first = source.next_packet().unwrap();
        assert_eq!(&first.data[..], &[0x12, 0x00]);
        assert_eq!(first.timestamp, Some(0));
        let second = source.next_packet().unwrap();
        assert_eq!(second.timestamp, Some(40));
        assert!(source.next_packet().is_none());
    }

    #[test]
    fn filtered_source_drops_bad_packets() {
        let packets = [
            &[0u8, 0, 0, 1, 0x65][..],
            &[0, 0, 0, 7, 0x41][..],
            &[0, 0, 0, 1, 0x41][..],
        ];
        let inner = VecSource(
            packets
                .iter()
                .enumerate()
                .map(|(i, data)| Packet {
                    data: Bytes::copy_from_slice(data),
                    timestamp: Some(i as i64),
                })
                .collect(),
        );

        let mut source = FilteredSource::new(inner, LengthPrefixedFilter::new(4).unwrap());
        let first = source.next_packet().unwrap();
        assert_eq!(&first.data[..], &[0, 0, 0, 1, 0x65]);
        let second = source.next_packet().unwrap();
        assert_eq!(second.timestamp, Some(2));
        assert!(source.next_packet().is_none());
    }
}
