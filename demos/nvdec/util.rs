// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::str::FromStr;

use argh::FromArgs;

use nvdec_pipeline::backend::DeinterlaceMode;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Md5Computation {
    Stream,
    Frame,
}

impl FromStr for Md5Computation {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Md5Computation::Stream),
            "frame" => Ok(Md5Computation::Frame),
            _ => Err("unrecognized MD5 computation option. Valid values: stream, frame"),
        }
    }
}

/// Hardware decoder using nvdec-pipeline
#[derive(Debug, FromArgs)]
pub struct Args {
    /// input file: IVF, Annex B H.264 or Matroska
    #[argh(positional)]
    pub input: PathBuf,

    /// output file to write the decoded frames to
    #[argh(option)]
    pub output: Option<PathBuf>,

    /// whether to display the MD5 of the decoded stream, and at which granularity (stream or
    /// frame)
    #[argh(option)]
    pub compute_md5: Option<Md5Computation>,

    /// ordinal of the device to decode on. Default: 0
    #[argh(option, default = "0")]
    pub device: u32,

    /// deinterlacing of interlaced streams (weave, bob or adaptive). Default: adaptive
    #[argh(option, default = "DeinterlaceMode::Adaptive")]
    pub deinterlace: DeinterlaceMode,

    /// number of decode surfaces to allocate on top of what the stream requires
    #[argh(option, default = "0")]
    pub extra_surfaces: u32,

    /// number of pictures the parser may delay display by. Default: 0
    #[argh(option, default = "0")]
    pub display_delay: u32,

    /// fail when the stream exceeds the decoder limits instead of trying anyway
    #[argh(switch)]
    pub strict: bool,
}
