// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Just enough of an H.264 parser to split Annex B streams into access units and describe them
//! from their sequence parameter set. Everything else is left to the hardware parser.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::rc::Rc;

use anyhow::anyhow;
use enumn::N;

use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::nalu_reader::ReadResult;
use crate::ChromaFormat;
use crate::Rect;

const MAX_SPS_COUNT: usize = 32;

/// Profiles whose SPS carries the chroma format and bit depth fields, 7.3.2.1.1.
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

#[derive(N, Debug, PartialEq, Eq, Clone, Copy)]
pub enum NaluType {
    Unknown = 0,
    Slice = 1,
    SliceDpa = 2,
    SliceDpb = 3,
    SliceDpc = 4,
    SliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AuDelimiter = 9,
    SeqEnd = 10,
    StreamEnd = 11,
    FillerData = 12,
    SpsExt = 13,
    PrefixUnit = 14,
    SubsetSps = 15,
    DepthSps = 16,
    SliceAux = 19,
    SliceExt = 20,
    SliceDepth = 21,
}

impl NaluType {
    /// Whether this NAL unit carries coded picture data.
    pub fn is_vcl(self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SliceDpa
                | NaluType::SliceDpb
                | NaluType::SliceDpc
                | NaluType::SliceIdr
        )
    }

    /// Whether this NAL unit, when following picture data, starts a new access unit. See
    /// 7.4.1.2.3.
    pub fn starts_access_unit(self) -> bool {
        matches!(
            self,
            NaluType::AuDelimiter
                | NaluType::Sps
                | NaluType::Pps
                | NaluType::Sei
                | NaluType::PrefixUnit
                | NaluType::SubsetSps
                | NaluType::DepthSps
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaluHeader {
    pub ref_idc: u8,
    pub type_: NaluType,
}

impl NaluHeader {
    fn parse(byte: u8) -> anyhow::Result<Self> {
        if byte & 0x80 != 0 {
            return Err(anyhow!("forbidden_zero_bit is set"));
        }

        let type_ = NaluType::n(byte & 0x1f)
            .ok_or_else(|| anyhow!("reserved NAL unit type {}", byte & 0x1f))?;

        Ok(Self {
            ref_idc: (byte & 0x60) >> 5,
            type_,
        })
    }

    pub fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::SeqEnd | NaluType::StreamEnd)
    }
}

/// A NAL unit borrowed from an Annex B stream.
#[derive(Debug, Clone)]
pub struct Nalu<'a> {
    pub header: NaluHeader,
    stream: &'a [u8],
    /// Offset of the start code, including the leading zero byte of 4-byte start codes.
    sc_offset: usize,
    /// Offset of the NAL unit header.
    offset: usize,
    size: usize,
}

fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(3).position(|window| window == [0x00, 0x00, 0x01])
}

impl<'a> Nalu<'a> {
    /// Finds the next NAL unit in `cursor`, moving it past the returned unit.
    pub fn next(cursor: &mut Cursor<&'a [u8]>) -> anyhow::Result<Nalu<'a>> {
        let stream = *cursor.get_ref();
        let pos = usize::try_from(cursor.position())?;
        let remaining = stream.get(pos..).ok_or_else(|| anyhow!("cursor past the end"))?;

        let start = find_start_code(remaining).ok_or_else(|| anyhow!("no NAL unit found"))?;
        let mut sc_offset = pos + start;
        if sc_offset > 0 && stream[sc_offset - 1] == 0 {
            sc_offset -= 1;
        }

        let offset = pos + start + 3;
        let header_byte = *stream
            .get(offset)
            .ok_or_else(|| anyhow!("start code at the end of the stream"))?;
        let header = NaluHeader::parse(header_byte)?;

        let mut size = find_start_code(&stream[offset..]).unwrap_or(stream.len() - offset);
        // Zero bytes before the next start code belong to it or are trailing_zero_8bits.
        while size > 0 && stream[offset + size - 1] == 0 {
            size -= 1;
        }
        if header.is_end() {
            size = 1;
        }

        cursor.set_position(u64::try_from(offset + size.max(1))?);

        Ok(Nalu {
            header,
            stream,
            sc_offset,
            offset,
            size,
        })
    }

    /// The NAL unit including its start code.
    pub fn with_start_code(&self) -> &'a [u8] {
        &self.stream[self.sc_offset..self.offset + self.size]
    }

    pub fn sc_offset(&self) -> usize {
        self.sc_offset
    }

    pub fn end_offset(&self) -> usize {
        self.offset + self.size
    }

    /// Payload of the NAL unit, after its header byte.
    pub fn payload(&self) -> &'a [u8] {
        &self.stream[self.offset + 1..self.offset + self.size]
    }

    /// `first_mb_in_slice` of a slice NAL unit, or `None` for other units.
    pub fn first_mb_in_slice(&self) -> Option<u32> {
        if !self.header.type_.is_vcl() {
            return None;
        }

        NaluReader::new(self.payload()).read_ue().ok()
    }
}

impl<'a> AsRef<[u8]> for Nalu<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.stream[self.offset..self.offset + self.size]
    }
}

/// The fields of a sequence parameter set needed to describe a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sps {
    pub seq_parameter_set_id: u8,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub pic_width_in_mbs_minus1: u16,
    pub pic_height_in_map_units_minus1: u16,
    pub frame_mbs_only_flag: bool,
    pub frame_cropping_flag: bool,
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,
}

impl Sps {
    /// Coded width in pixels.
    pub fn width(&self) -> u32 {
        (u32::from(self.pic_width_in_mbs_minus1) + 1) * 16
    }

    /// Coded height in pixels, (7-18).
    pub fn height(&self) -> u32 {
        (u32::from(self.pic_height_in_map_units_minus1) + 1)
            * 16
            * (2 - u32::from(self.frame_mbs_only_flag))
    }

    pub fn chroma_format(&self) -> ChromaFormat {
        match self.chroma_format_idc {
            0 => ChromaFormat::Monochrome,
            1 => ChromaFormat::Yuv420,
            2 => ChromaFormat::Yuv422,
            3 => ChromaFormat::Yuv444,
            _ => ChromaFormat::Unsupported,
        }
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }

    /// CropUnitX and CropUnitY, (7-19) to (7-22).
    fn crop_unit_x_y(&self) -> (u32, u32) {
        let frame_mbs = 2 - u32::from(self.frame_mbs_only_flag);
        if self.chroma_format_idc == 0 || self.separate_colour_plane_flag {
            (1, frame_mbs)
        } else {
            let (sub_width_c, sub_height_c) = match self.chroma_format_idc {
                1 => (2, 2),
                2 => (2, 1),
                _ => (1, 1),
            };
            (sub_width_c, sub_height_c * frame_mbs)
        }
    }

    /// Visible part of the coded picture.
    pub fn visible_rectangle(&self) -> Rect {
        let (width, height) = (self.width() as i32, self.height() as i32);
        if !self.frame_cropping_flag {
            return Rect {
                left: 0,
                top: 0,
                right: width,
                bottom: height,
            };
        }

        // Offsets beyond the coded size are clamped to it.
        let (crop_unit_x, crop_unit_y) = self.crop_unit_x_y();
        let crop = |unit: u32, offset: u32, size: i32| {
            i32::try_from(unit.saturating_mul(offset)).map_or(size, |c| c.min(size))
        };
        Rect {
            left: crop(crop_unit_x, self.frame_crop_left_offset, width),
            top: crop(crop_unit_y, self.frame_crop_top_offset, height),
            right: width - crop(crop_unit_x, self.frame_crop_right_offset, width),
            bottom: height - crop(crop_unit_y, self.frame_crop_bottom_offset, height),
        }
    }
}

/// Keeps the sequence parameter sets seen so far.
#[derive(Debug, Default)]
pub struct Parser {
    active_spses: BTreeMap<u8, Rc<Sps>>,
}

impl Parser {
    fn skip_scaling_list(r: &mut NaluReader, size: usize) -> ReadResult<()> {
        // 7.3.2.1.1.1
        let mut last_scale = 8i32;
        let mut next_scale = 8i32;

        for j in 0..size {
            if next_scale != 0 {
                let delta_scale: i32 = r.read_se()?;
                next_scale = (last_scale + delta_scale + 256) % 256;
                if j == 0 && next_scale == 0 {
                    return Ok(());
                }
            }
            if next_scale != 0 {
                last_scale = next_scale;
            }
        }

        Ok(())
    }

    fn parse_sps_fields(r: &mut NaluReader) -> anyhow::Result<Sps> {
        let mut sps = Sps {
            profile_idc: r.read_bits(8)?,
            ..Default::default()
        };

        // constraint_set0_flag to constraint_set5_flag, reserved_zero_2bits.
        r.skip_bits(8)?;
        sps.level_idc = r.read_bits(8)?;
        sps.seq_parameter_set_id = r.read_ue_max(31)?;

        if HIGH_PROFILES.contains(&sps.profile_idc) {
            sps.chroma_format_idc = r.read_ue_max(3)?;
            if sps.chroma_format_idc == 3 {
                sps.separate_colour_plane_flag = r.read_bit()?;
            }

            sps.bit_depth_luma_minus8 = r.read_ue_max(6)?;
            sps.bit_depth_chroma_minus8 = r.read_ue_max(6)?;
            // qpprime_y_zero_transform_bypass_flag
            r.skip_bits(1)?;

            if r.read_bit()? {
                let num_lists = if sps.chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..num_lists {
                    if r.read_bit()? {
                        Self::skip_scaling_list(r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        } else {
            sps.chroma_format_idc = 1;
        }

        // log2_max_frame_num_minus4
        r.read_ue_max::<u32>(12)?;

        match r.read_ue_max::<u32>(2)? {
            0 => {
                // log2_max_pic_order_cnt_lsb_minus4
                r.read_ue_max::<u32>(12)?;
            }
            1 => {
                // delta_pic_order_always_zero_flag, offset_for_non_ref_pic,
                // offset_for_top_to_bottom_field
                r.skip_bits(1)?;
                r.read_se::<i32>()?;
                r.read_se::<i32>()?;
                let num_ref_frames_in_pic_order_cnt_cycle: u32 = r.read_ue_max(254)?;
                for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
                    r.read_se::<i32>()?;
                }
            }
            _ => (),
        }

        // max_num_ref_frames, gaps_in_frame_num_value_allowed_flag
        r.read_ue_max::<u32>(16)?;
        r.skip_bits(1)?;

        sps.pic_width_in_mbs_minus1 = r.read_ue_max(u32::from(u16::MAX))?;
        sps.pic_height_in_map_units_minus1 = r.read_ue_max(u32::from(u16::MAX))?;
        sps.frame_mbs_only_flag = r.read_bit()?;
        if !sps.frame_mbs_only_flag {
            // mb_adaptive_frame_field_flag
            r.skip_bits(1)?;
        }

        // direct_8x8_inference_flag
        r.skip_bits(1)?;
        sps.frame_cropping_flag = r.read_bit()?;
        if sps.frame_cropping_flag {
            sps.frame_crop_left_offset = r.read_ue()?;
            sps.frame_crop_right_offset = r.read_ue()?;
            sps.frame_crop_top_offset = r.read_ue()?;
            sps.frame_crop_bottom_offset = r.read_ue()?;

            let (crop_unit_x, crop_unit_y) = sps.crop_unit_x_y();

            sps.frame_crop_left_offset
                .checked_add(sps.frame_crop_right_offset)
                .and_then(|r| r.checked_mul(crop_unit_x))
                .and_then(|r| sps.width().checked_sub(r))
                .filter(|w| *w > 0)
                .ok_or_else(|| anyhow!("invalid frame crop width"))?;

            sps.frame_crop_top_offset
                .checked_add(sps.frame_crop_bottom_offset)
                .and_then(|r| r.checked_mul(crop_unit_y))
                .and_then(|r| sps.height().checked_sub(r))
                .filter(|h| *h > 0)
                .ok_or_else(|| anyhow!("invalid frame crop height"))?;
        }

        Ok(sps)
    }

    /// Parses the SPS in `nalu`, replacing any previous SPS with the same id.
    pub fn parse_sps(&mut self, nalu: &Nalu) -> anyhow::Result<&Rc<Sps>> {
        if nalu.header.type_ != NaluType::Sps {
            return Err(anyhow!(
                "invalid NALU type, expected {:?}, got {:?}",
                NaluType::Sps,
                nalu.header.type_
            ));
        }

        let mut r = NaluReader::new(nalu.payload());
        let sps = Self::parse_sps_fields(&mut r)?;
        let key = sps.seq_parameter_set_id;

        if !self.active_spses.contains_key(&key) && self.active_spses.len() >= MAX_SPS_COUNT {
            return Err(anyhow!("broken data: more than {} SPSs", MAX_SPS_COUNT));
        }

        self.active_spses.insert(key, Rc::new(sps));
        self.active_spses
            .get(&key)
            .ok_or_else(|| anyhow!("SPS {} vanished", key))
    }

    pub fn get_sps(&self, sps_id: u8) -> Option<&Rc<Sps>> {
        self.active_spses.get(&sps_id)
    }
}
