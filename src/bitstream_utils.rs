// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Container-level helpers: IVF framing, Annex B NAL unit and access unit iteration, and the
//! filter turning length-prefixed streams into Annex B.

use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::ops::Range;

use anyhow::anyhow;
use anyhow::Context;
use byteorder::BigEndian;
use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use crate::codec::h264::parser::Nalu as H264Nalu;
use crate::Codec;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// IVF file header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IvfFileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub header_size: u16,
    pub codec: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub framerate: u32,
    pub timescale: u32,
    pub frame_count: u32,
    pub unused: u32,
}

impl Default for IvfFileHeader {
    fn default() -> Self {
        Self {
            magic: Self::MAGIC,
            version: 0,
            header_size: Self::SIZE as u16,
            codec: Self::CODEC_AV1,
            width: 320,
            height: 240,
            framerate: 30,
            timescale: 1,
            frame_count: 0,
            unused: 0,
        }
    }
}

impl IvfFileHeader {
    pub const SIZE: usize = 32;
    pub const MAGIC: [u8; 4] = *b"DKIF";
    pub const CODEC_AV1: [u8; 4] = *b"AV01";
    pub const CODEC_H264: [u8; 4] = *b"H264";
    pub const CODEC_HEVC: [u8; 4] = *b"H265";

    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut r = Cursor::new(data);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).context("truncated IVF header")?;
        if magic != Self::MAGIC {
            return Err(anyhow!("not an IVF file, magic is {:02x?}", magic));
        }

        let version = r.read_u16::<LittleEndian>()?;
        let header_size = r.read_u16::<LittleEndian>()?;
        let mut codec = [0u8; 4];
        r.read_exact(&mut codec).context("truncated IVF header")?;

        let header = Self {
            magic,
            version,
            header_size,
            codec,
            width: r.read_u16::<LittleEndian>()?,
            height: r.read_u16::<LittleEndian>()?,
            framerate: r.read_u32::<LittleEndian>()?,
            timescale: r.read_u32::<LittleEndian>()?,
            frame_count: r.read_u32::<LittleEndian>()?,
            unused: r.read_u32::<LittleEndian>()?,
        };

        if usize::from(header.header_size) < Self::SIZE {
            return Err(anyhow!("invalid IVF header size {}", header.header_size));
        }

        Ok(header)
    }

    /// Codec identified by the fourcc of the header.
    pub fn codec(&self) -> Codec {
        match &self.codec {
            b"AV01" => Codec::Av1,
            b"H264" | b"AVC1" | b"avc1" => Codec::H264,
            b"H265" | b"HEVC" | b"hvc1" | b"hev1" => Codec::Hevc,
            _ => Codec::Unsupported,
        }
    }

    pub fn write_into(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u16::<LittleEndian>(self.header_size)?;
        writer.write_all(&self.codec)?;
        writer.write_u16::<LittleEndian>(self.width)?;
        writer.write_u16::<LittleEndian>(self.height)?;
        writer.write_u32::<LittleEndian>(self.framerate)?;
        writer.write_u32::<LittleEndian>(self.timescale)?;
        writer.write_u32::<LittleEndian>(self.frame_count)?;
        writer.write_u32::<LittleEndian>(self.unused)
    }
}

/// IVF frame header, preceding every frame of the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IvfFrameHeader {
    pub frame_size: u32,
    pub timestamp: u64,
}

impl IvfFrameHeader {
    pub const SIZE: usize = 12;

    pub fn parse(data: &[u8]) -> std::io::Result<Self> {
        let mut r = Cursor::new(data);
        Ok(Self {
            frame_size: r.read_u32::<LittleEndian>()?,
            timestamp: r.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_into(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.frame_size)?;
        writer.write_u64::<LittleEndian>(self.timestamp)
    }
}

/// A frame of an IVF file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IvfFrame<'a> {
    pub timestamp: u64,
    pub data: &'a [u8],
    /// Location of `data` in the file.
    pub range: Range<usize>,
}

/// Iterator over the frames of an IVF file. Stops at the first truncated frame.
pub struct IvfIterator<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> IvfIterator<'a> {
    /// Iterates over the frames of `data`, which starts with the file header.
    pub fn new(data: &'a [u8]) -> anyhow::Result<Self> {
        let header = IvfFileHeader::parse(data)?;
        Ok(Self::from_position(data, usize::from(header.header_size)))
    }

    /// Iterates over the frames of `data` starting at the frame header at `position`.
    pub fn from_position(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    /// Offset of the next frame header.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<'a> Iterator for IvfIterator<'a> {
    type Item = IvfFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = IvfFrameHeader::parse(self.data.get(self.position..)?).ok()?;
        let start = self.position + IvfFrameHeader::SIZE;
        let end = start.checked_add(header.frame_size as usize)?;
        let data = self.data.get(start..end)?;

        self.position = end;
        Some(IvfFrame {
            timestamp: header.timestamp,
            data,
            range: start..end,
        })
    }
}

/// Iterator over the NAL units of an Annex B H.264 stream.
pub struct NalIterator<'a>(Cursor<&'a [u8]>);

impl<'a> NalIterator<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self(Cursor::new(stream))
    }
}

impl<'a> Iterator for NalIterator<'a> {
    type Item = H264Nalu<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        H264Nalu::next(&mut self.0).ok()
    }
}

/// Iterator over the access units of an Annex B H.264 stream, each containing exactly one
/// primary coded picture along with the non-VCL units preceding it.
pub struct AccessUnitIterator<'a> {
    stream: &'a [u8],
    cursor: Cursor<&'a [u8]>,
}

impl<'a> AccessUnitIterator<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self {
            stream,
            cursor: Cursor::new(stream),
        }
    }

    /// Like `next`, but returns the location of the access unit in the stream.
    pub fn next_range(&mut self) -> Option<Range<usize>> {
        let mut range: Option<Range<usize>> = None;
        let mut has_picture = false;

        loop {
            let position = self.cursor.position();
            let Ok(nalu) = H264Nalu::next(&mut self.cursor) else {
                break;
            };
            let type_ = nalu.header.type_;

            let new_picture = type_.is_vcl() && nalu.first_mb_in_slice() == Some(0);
            if has_picture && (type_.starts_access_unit() || new_picture) {
                self.cursor.set_position(position);
                break;
            }

            has_picture |= type_.is_vcl();
            range = Some(match range {
                Some(r) => r.start..nalu.end_offset(),
                None => nalu.sc_offset()..nalu.end_offset(),
            });
        }

        range
    }
}

impl<'a> Iterator for AccessUnitIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.next_range()?;
        Some(&self.stream[range])
    }
}

/// Rewrites length-prefixed NAL units, as stored by MP4 and Matroska, into an Annex B stream.
///
/// The parameter sets of the codec configuration record are emitted in front of the first
/// packet.
#[derive(Clone, Debug)]
pub struct LengthPrefixedFilter {
    length_size: usize,
    parameter_sets: Bytes,
    parameter_sets_sent: bool,
}

impl LengthPrefixedFilter {
    /// Creates a filter for NAL units prefixed by a big-endian length of `length_size` bytes.
    pub fn new(length_size: usize) -> anyhow::Result<Self> {
        if !matches!(length_size, 1 | 2 | 4) {
            return Err(anyhow!("invalid NAL unit length size {}", length_size));
        }

        Ok(Self {
            length_size,
            parameter_sets: Bytes::new(),
            parameter_sets_sent: false,
        })
    }

    fn read_nal_units(
        r: &mut Cursor<&[u8]>,
        count: usize,
        out: &mut BytesMut,
    ) -> anyhow::Result<()> {
        for _ in 0..count {
            let len = usize::from(r.read_u16::<BigEndian>()?);
            let mut nalu = vec![0u8; len];
            r.read_exact(&mut nalu)
                .context("truncated parameter set in configuration record")?;
            out.put_slice(&START_CODE);
            out.put_slice(&nalu);
        }

        Ok(())
    }

    /// Creates a filter from an `AVCDecoderConfigurationRecord`.
    pub fn from_avcc(record: &[u8]) -> anyhow::Result<Self> {
        let mut r = Cursor::new(record);
        if r.read_u8()? != 1 {
            return Err(anyhow!("unsupported avcC version"));
        }
        // AVCProfileIndication, profile_compatibility, AVCLevelIndication
        r.set_position(4);
        let length_size = usize::from(r.read_u8()? & 0x3) + 1;

        let mut parameter_sets = BytesMut::new();
        let num_sps = usize::from(r.read_u8()? & 0x1f);
        Self::read_nal_units(&mut r, num_sps, &mut parameter_sets)?;
        let num_pps = usize::from(r.read_u8()?);
        Self::read_nal_units(&mut r, num_pps, &mut parameter_sets)?;

        Ok(Self {
            parameter_sets: parameter_sets.freeze(),
            ..Self::new(length_size)?
        })
    }

    /// Creates a filter from an `HEVCDecoderConfigurationRecord`.
    pub fn from_hvcc(record: &[u8]) -> anyhow::Result<Self> {
        let mut r = Cursor::new(record);
        if r.read_u8()? != 1 {
            return Err(anyhow!("unsupported hvcC version"));
        }
        // Profile, tier, level, and format fields up to lengthSizeMinusOne.
        r.set_position(21);
        let length_size = usize::from(r.read_u8()? & 0x3) + 1;

        let mut parameter_sets = BytesMut::new();
        let num_arrays = r.read_u8()?;
        for _ in 0..num_arrays {
            // array_completeness, NAL_unit_type
            r.read_u8()?;
            let num_nalus = usize::from(r.read_u16::<BigEndian>()?);
            Self::read_nal_units(&mut r, num_nalus, &mut parameter_sets)?;
        }

        Ok(Self {
            parameter_sets: parameter_sets.freeze(),
            ..Self::new(length_size)?
        })
    }

    /// Returns the filter a stream of `codec` needs, given the codec private data of its
    /// container. `None` means the packets can be handed to the decoder as they are.
    pub fn for_codec(codec: Codec, codec_private: Option<&[u8]>) -> anyhow::Result<Option<Self>> {
        match (codec, codec_private) {
            (Codec::H264, Some(record)) => Self::from_avcc(record).map(Some),
            (Codec::Hevc, Some(record)) => Self::from_hvcc(record).map(Some),
            // AV1 uses the same low-overhead OBU format in every container.
            _ => Ok(None),
        }
    }

    /// Parameter sets extracted from the configuration record, in Annex B format.
    pub fn parameter_sets(&self) -> &[u8] {
        &self.parameter_sets
    }

    /// Converts one packet to Annex B.
    pub fn filter(&mut self, packet: &[u8]) -> anyhow::Result<Bytes> {
        let mut out = BytesMut::with_capacity(packet.len() + self.parameter_sets.len() + 16);
        if !self.parameter_sets_sent {
            out.put_slice(&self.parameter_sets);
            self.parameter_sets_sent = true;
        }

        let mut r = Cursor::new(packet);
        while (r.position() as usize) < packet.len() {
            let len = r
                .read_uint::<BigEndian>(self.length_size)
                .context("truncated NAL unit length")? as usize;
            let start = r.position() as usize;
            let nalu = start
                .checked_add(len)
                .and_then(|end| packet.get(start..end))
                .ok_or_else(|| {
                    anyhow!(
                        "NAL unit of {} bytes overflows packet of {} bytes",
                        len,
                        packet.len()
                    )
                })?;

            out.put_slice(&START_CODE);
            out.put_slice(nalu);
            r.set_position((start + len) as u64);
        }

        Ok(out.freeze())
    }
}
