// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware-accelerated video decode pipeline.
//!
//! The crate feeds an elementary video stream to a stateful driver parser and turns the
//! callbacks it emits into decoded frames:
//!
//! * The [packet sources](source) split a stream into decoder-ready packets and describe it
//!   with a [`StreamDescriptor`].
//! * A [`Session`](decoder::session::Session) owns the hardware context, the driver parser and
//!   the decoder, and forwards packets to the parser.
//! * The [parser state machine](decoder::parser) receives the driver callbacks, negotiates the
//!   decoder when the stream format is known, submits pictures and extracts the displayed ones
//!   into host buffers handed to a [`FrameSink`](decoder::FrameSink).
//!
//! Hardware access goes through a [backend](backend), which makes the pipeline testable
//! without a GPU.

pub mod backend;
pub mod bitstream_utils;
pub mod codec;
pub mod decoder;
pub mod source;
pub mod utils;

use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Whether `self` is at least as large as `other` in both dimensions.
    pub fn can_contain(&self, other: Self) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    /// Number of 16x16 macroblocks covered by this resolution, truncating partial blocks.
    pub fn macroblock_count(&self) -> u32 {
        (self.width >> 4) * (self.height >> 4)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rectangle in picture coordinates, right and bottom being exclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Returns the size of the rectangle, or `None` if it is empty.
    pub fn resolution(&self) -> Option<Resolution> {
        if self.right > self.left && self.bottom > self.top {
            Some(Resolution::from((
                (self.right - self.left) as u32,
                (self.bottom - self.top) as u32,
            )))
        } else {
            None
        }
    }
}

/// Compressed formats the pipeline knows about. `Unsupported` stands for any codec we have no
/// hardware mapping for yet and is always rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    Hevc,
    Av1,
    Unsupported,
}

impl FromStr for Codec {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h264" | "H264" => Ok(Codec::H264),
            "h265" | "H265" | "hevc" | "HEVC" => Ok(Codec::Hevc),
            "av1" | "AV1" => Ok(Codec::Av1),
            _ => Err("unrecognized codec. Valid values: h264, hevc, av1"),
        }
    }
}

/// Chroma subsampling of a stream or a decoded surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChromaFormat {
    Monochrome,
    Yuv420,
    Yuv422,
    Yuv444,
    Unsupported,
}

impl FromStr for ChromaFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "400" | "mono" => Ok(ChromaFormat::Monochrome),
            "420" | "yuv420" => Ok(ChromaFormat::Yuv420),
            "422" | "yuv422" => Ok(ChromaFormat::Yuv422),
            "444" | "yuv444" => Ok(ChromaFormat::Yuv444),
            _ => Err("unrecognized chroma format. Valid values: 400, 420, 422, 444"),
        }
    }
}

/// Layout of the surfaces the decoder writes its output to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    /// 8-bit luma plane followed by an interleaved half-height chroma plane.
    Nv12,
    /// Same as `Nv12` with 16-bit samples.
    P016,
    /// Three full-size 8-bit planes.
    Yuv444,
    /// Three full-size 16-bit planes.
    Yuv444_16Bit,
}

impl SurfaceFormat {
    /// Output format the decoder should produce for a stream of `chroma_format` and
    /// `bit_depth`.
    ///
    /// 4:2:2 streams have no output format and are rejected before a decoder is created.
    pub fn for_stream(chroma_format: ChromaFormat, bit_depth: u8) -> Self {
        match (chroma_format, bit_depth > 8) {
            (ChromaFormat::Yuv444, false) => SurfaceFormat::Yuv444,
            (ChromaFormat::Yuv444, true) => SurfaceFormat::Yuv444_16Bit,
            (_, false) => SurfaceFormat::Nv12,
            (_, true) => SurfaceFormat::P016,
        }
    }

    /// Bit of this format in a driver-reported output format mask.
    pub fn mask_bit(self) -> u16 {
        1 << match self {
            SurfaceFormat::Nv12 => 0,
            SurfaceFormat::P016 => 1,
            SurfaceFormat::Yuv444 => 2,
            SurfaceFormat::Yuv444_16Bit => 3,
        }
    }
}

/// Description of a compressed stream, produced once when the stream is opened and used as
/// input for capability negotiation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub codec: Codec,
    pub chroma_format: ChromaFormat,
    /// Bits per sample, e.g. 8 or 10.
    pub bit_depth: u8,
    pub width: u32,
    pub height: u32,
}

impl StreamDescriptor {
    pub fn resolution(&self) -> Resolution {
        Resolution::from((self.width, self.height))
    }

    pub fn surface_format(&self) -> SurfaceFormat {
        SurfaceFormat::for_stream(self.chroma_format, self.bit_depth)
    }
}

/// Returns the number of bytes of a decoded surface of `height` rows of `pitch` bytes in
/// `chroma_format`.
///
/// 4:4:4 surfaces hold three full planes. All other formats are output semi-planar, with a
/// chroma plane of half the height rounded up.
pub fn decoded_frame_size(pitch: usize, height: usize, chroma_format: ChromaFormat) -> usize {
    match chroma_format {
        ChromaFormat::Yuv444 => pitch * height * 3,
        _ => pitch * (height + (height + 1) / 2),
    }
}
