// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw bindings to the CUDA driver and NVCUVID libraries, resolved at runtime.
//!
//! Only the entry points and structures used by the decoder are declared. Structure layouts
//! follow `cuviddec.h` and `nvcuvid.h` of the Video Codec SDK.

use std::ffi::c_void;
use std::os::raw::c_char;
use std::os::raw::c_int;
use std::os::raw::c_uint;
use std::os::raw::c_ulong;

use anyhow::anyhow;
use anyhow::Context;
use libloading::Library;

pub type CuResult = c_int;
pub type CuDevice = c_int;
pub type CuContext = *mut c_void;
pub type CuDevicePtr = u64;
pub type CuVideoDecoder = *mut c_void;
pub type CuVideoParser = *mut c_void;
pub type CuVideoTimestamp = i64;

pub const CUDA_VIDEO_CODEC_H264: c_int = 4;
pub const CUDA_VIDEO_CODEC_HEVC: c_int = 8;
pub const CUDA_VIDEO_CODEC_AV1: c_int = 11;

pub const CUDA_VIDEO_CHROMA_MONOCHROME: c_int = 0;
pub const CUDA_VIDEO_CHROMA_420: c_int = 1;
pub const CUDA_VIDEO_CHROMA_422: c_int = 2;
pub const CUDA_VIDEO_CHROMA_444: c_int = 3;

pub const CUDA_VIDEO_SURFACE_NV12: c_int = 0;
pub const CUDA_VIDEO_SURFACE_P016: c_int = 1;
pub const CUDA_VIDEO_SURFACE_YUV444: c_int = 2;
pub const CUDA_VIDEO_SURFACE_YUV444_16BIT: c_int = 3;

pub const CUDA_VIDEO_DEINTERLACE_WEAVE: c_int = 0;
pub const CUDA_VIDEO_DEINTERLACE_BOB: c_int = 1;
pub const CUDA_VIDEO_DEINTERLACE_ADAPTIVE: c_int = 2;

pub const CUVID_PKT_ENDOFSTREAM: c_ulong = 0x01;
pub const CUVID_PKT_TIMESTAMP: c_ulong = 0x02;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CuvidDecodeCaps {
    pub codec_type: c_int,
    pub chroma_format: c_int,
    pub bit_depth_minus8: c_uint,
    pub reserved1: [c_uint; 3],
    pub is_supported: u8,
    pub num_nvdecs: u8,
    pub output_format_mask: u16,
    pub max_width: c_uint,
    pub max_height: c_uint,
    pub max_mb_count: c_uint,
    pub min_width: u16,
    pub min_height: u16,
    pub is_histogram_supported: u8,
    pub counter_bit_depth: u8,
    pub max_histogram_bins: u16,
    pub reserved3: [c_uint; 10],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ShortRect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CuvidDecodeCreateInfo {
    pub width: c_ulong,
    pub height: c_ulong,
    pub num_decode_surfaces: c_ulong,
    pub codec_type: c_int,
    pub chroma_format: c_int,
    pub creation_flags: c_ulong,
    pub bit_depth_minus8: c_ulong,
    pub intra_decode_only: c_ulong,
    pub max_width: c_ulong,
    pub max_height: c_ulong,
    pub reserved1: c_ulong,
    pub display_area: ShortRect,
    pub output_format: c_int,
    pub deinterlace_mode: c_int,
    pub target_width: c_ulong,
    pub target_height: c_ulong,
    pub num_output_surfaces: c_ulong,
    pub vid_lock: *mut c_void,
    pub target_rect: ShortRect,
    pub enable_histogram: c_ulong,
    pub reserved2: [c_ulong; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameRate {
    pub numerator: c_uint,
    pub denominator: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct IntRect {
    pub left: c_int,
    pub top: c_int,
    pub right: c_int,
    pub bottom: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct AspectRatio {
    pub x: c_int,
    pub y: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct VideoSignalDescription {
    /// Packed `video_format:3`, `video_full_range_flag:1`, `reserved_zero_bits:4`.
    pub flags: u8,
    pub color_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CuVideoFormat {
    pub codec: c_int,
    pub frame_rate: FrameRate,
    pub progressive_sequence: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub min_num_decode_surfaces: u8,
    pub coded_width: c_uint,
    pub coded_height: c_uint,
    pub display_area: IntRect,
    pub chroma_format: c_int,
    pub bitrate: c_uint,
    pub display_aspect_ratio: AspectRatio,
    pub video_signal_description: VideoSignalDescription,
    pub seqhdr_data_length: c_uint,
}

/// Leading fields of `CUVIDPICPARAMS`. The structure is only ever accessed through pointers
/// handed out by the parser, so the codec-specific tail is not declared.
#[repr(C)]
#[derive(Debug)]
pub struct CuvidPicParamsHeader {
    pub pic_width_in_mbs: c_int,
    pub frame_height_in_mbs: c_int,
    pub curr_pic_idx: c_int,
    pub field_pic_flag: c_int,
    pub bottom_field_flag: c_int,
    pub second_field: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CuvidParserDispInfo {
    pub picture_index: c_int,
    pub progressive_frame: c_int,
    pub top_field_first: c_int,
    pub repeat_first_field: c_int,
    pub timestamp: CuVideoTimestamp,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CuSeiMessage {
    pub sei_message_type: u8,
    pub reserved: [u8; 3],
    pub sei_message_size: c_uint,
}

#[repr(C)]
#[derive(Debug)]
pub struct CuvidSeiMessageInfo {
    pub sei_data: *mut c_void,
    pub sei_message: *mut CuSeiMessage,
    pub sei_message_count: c_uint,
    pub pic_idx: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CuvidProcParams {
    pub progressive_frame: c_int,
    pub second_field: c_int,
    pub top_field_first: c_int,
    pub unpaired_field: c_int,
    pub reserved_flags: c_uint,
    pub reserved_zero: c_uint,
    pub raw_input_dptr: u64,
    pub raw_input_pitch: c_uint,
    pub raw_input_format: c_uint,
    pub raw_output_dptr: u64,
    pub raw_output_pitch: c_uint,
    pub reserved1: c_uint,
    pub output_stream: *mut c_void,
    pub reserved: [c_uint; 46],
    pub histogram_dptr: *mut u64,
    pub reserved2: [*mut c_void; 1],
}

impl Default for CuvidProcParams {
    fn default() -> Self {
        // SAFETY: all-zero is the documented initial state of this structure.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CuvidGetDecodeStatus {
    pub decode_status: c_int,
    pub reserved: [c_uint; 31],
    pub p_reserved: [*mut c_void; 8],
}

impl Default for CuvidGetDecodeStatus {
    fn default() -> Self {
        // SAFETY: plain integers and null pointers.
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CuvidSourceDataPacket {
    pub flags: c_ulong,
    pub payload_size: c_ulong,
    pub payload: *const u8,
    pub timestamp: CuVideoTimestamp,
}

pub type SequenceCallback = unsafe extern "C" fn(*mut c_void, *mut CuVideoFormat) -> c_int;
pub type DecodeCallback = unsafe extern "C" fn(*mut c_void, *mut CuvidPicParamsHeader) -> c_int;
pub type DisplayCallback = unsafe extern "C" fn(*mut c_void, *mut CuvidParserDispInfo) -> c_int;
pub type OperatingPointCallback = unsafe extern "C" fn(*mut c_void, *mut c_void) -> c_int;
pub type SeiCallback = unsafe extern "C" fn(*mut c_void, *mut CuvidSeiMessageInfo) -> c_int;

#[repr(C)]
#[derive(Debug)]
pub struct CuvidParserParams {
    pub codec_type: c_int,
    pub max_num_decode_surfaces: c_uint,
    pub clock_rate: c_uint,
    pub error_threshold: c_uint,
    pub max_display_delay: c_uint,
    /// Packed `bAnnexb:1`, `bMemoryOptimize:1`, `uReserved:30`.
    pub flags: c_uint,
    pub reserved1: [c_uint; 4],
    pub user_data: *mut c_void,
    pub sequence_callback: Option<SequenceCallback>,
    pub decode_picture: Option<DecodeCallback>,
    pub display_picture: Option<DisplayCallback>,
    pub get_operating_point: Option<OperatingPointCallback>,
    pub get_sei_msg: Option<SeiCallback>,
    pub reserved2: [*mut c_void; 5],
    pub ext_video_info: *mut c_void,
}

/// Name of the CUDA driver library on this platform.
pub fn cuda_library_name() -> &'static str {
    if cfg!(windows) {
        "nvcuda.dll"
    } else {
        "libcuda.so.1"
    }
}

/// Name of the NVCUVID library on this platform.
pub fn cuvid_library_name() -> &'static str {
    if cfg!(windows) {
        "nvcuvid.dll"
    } else {
        "libnvcuvid.so.1"
    }
}

fn open(name: &str) -> anyhow::Result<Library> {
    // SAFETY: the driver libraries have no initialization routines with preconditions.
    unsafe { Library::new(name) }.with_context(|| format!("failed to load {}", name))
}

fn symbol<T: Copy>(lib: &Library, name: &'static str) -> anyhow::Result<T> {
    let mut cname = name.as_bytes().to_vec();
    cname.push(0);
    // SAFETY: `T` is the function pointer type declared for `name` by the driver headers.
    let sym = unsafe { lib.get::<T>(&cname) }.map_err(|e| anyhow!("missing {}: {}", name, e))?;
    Ok(*sym)
}

/// Entry points of the CUDA driver library.
pub struct CudaLibrary {
    pub cu_init: unsafe extern "C" fn(c_uint) -> CuResult,
    pub cu_device_get_count: unsafe extern "C" fn(*mut c_int) -> CuResult,
    pub cu_device_get: unsafe extern "C" fn(*mut CuDevice, c_int) -> CuResult,
    pub cu_device_get_name: unsafe extern "C" fn(*mut c_char, c_int, CuDevice) -> CuResult,
    pub cu_ctx_create: unsafe extern "C" fn(*mut CuContext, c_uint, CuDevice) -> CuResult,
    pub cu_ctx_get_api_version: unsafe extern "C" fn(CuContext, *mut c_uint) -> CuResult,
    pub cu_ctx_push_current: unsafe extern "C" fn(CuContext) -> CuResult,
    pub cu_ctx_pop_current: unsafe extern "C" fn(*mut CuContext) -> CuResult,
    pub cu_ctx_destroy: unsafe extern "C" fn(CuContext) -> CuResult,
    pub cu_memcpy_dtoh: unsafe extern "C" fn(*mut c_void, CuDevicePtr, usize) -> CuResult,
    _lib: Library,
}

impl CudaLibrary {
    pub fn load() -> anyhow::Result<Self> {
        let lib = open(cuda_library_name())?;
        Ok(Self {
            cu_init: symbol(&lib, "cuInit")?,
            cu_device_get_count: symbol(&lib, "cuDeviceGetCount")?,
            cu_device_get: symbol(&lib, "cuDeviceGet")?,
            cu_device_get_name: symbol(&lib, "cuDeviceGetName")?,
            cu_ctx_create: symbol(&lib, "cuCtxCreate_v2")?,
            cu_ctx_get_api_version: symbol(&lib, "cuCtxGetApiVersion")?,
            cu_ctx_push_current: symbol(&lib, "cuCtxPushCurrent_v2")?,
            cu_ctx_pop_current: symbol(&lib, "cuCtxPopCurrent_v2")?,
            cu_ctx_destroy: symbol(&lib, "cuCtxDestroy_v2")?,
            cu_memcpy_dtoh: symbol(&lib, "cuMemcpyDtoH_v2")?,
            _lib: lib,
        })
    }
}

/// Entry points of the NVCUVID library.
pub struct CuvidLibrary {
    pub get_decoder_caps: unsafe extern "C" fn(*mut CuvidDecodeCaps) -> CuResult,
    pub create_decoder:
        unsafe extern "C" fn(*mut CuVideoDecoder, *mut CuvidDecodeCreateInfo) -> CuResult,
    pub destroy_decoder: unsafe extern "C" fn(CuVideoDecoder) -> CuResult,
    pub decode_picture:
        unsafe extern "C" fn(CuVideoDecoder, *mut CuvidPicParamsHeader) -> CuResult,
    pub get_decode_status:
        unsafe extern "C" fn(CuVideoDecoder, c_int, *mut CuvidGetDecodeStatus) -> CuResult,
    pub map_video_frame: unsafe extern "C" fn(
        CuVideoDecoder,
        c_int,
        *mut u64,
        *mut c_uint,
        *mut CuvidProcParams,
    ) -> CuResult,
    pub unmap_video_frame: unsafe extern "C" fn(CuVideoDecoder, u64) -> CuResult,
    pub create_video_parser:
        unsafe extern "C" fn(*mut CuVideoParser, *mut CuvidParserParams) -> CuResult,
    pub parse_video_data:
        unsafe extern "C" fn(CuVideoParser, *mut CuvidSourceDataPacket) -> CuResult,
    pub destroy_video_parser: unsafe extern "C" fn(CuVideoParser) -> CuResult,
    _lib: Library,
}

impl CuvidLibrary {
    pub fn load() -> anyhow::Result<Self> {
        let lib = open(cuvid_library_name())?;

        Ok(Self {
            get_decoder_caps: symbol(&lib, "cuvidGetDecoderCaps")?,
            create_decoder: symbol(&lib, "cuvidCreateDecoder")?,
            destroy_decoder: symbol(&lib, "cuvidDestroyDecoder")?,
            decode_picture: symbol(&lib, "cuvidDecodePicture")?,
            get_decode_status: symbol(&lib, "cuvidGetDecodeStatus")?,
            map_video_frame: symbol(&lib, "cuvidMapVideoFrame64")?,
            unmap_video_frame: symbol(&lib, "cuvidUnmapVideoFrame64")?,
            create_video_parser: symbol(&lib, "cuvidCreateVideoParser")?,
            parse_video_data: symbol(&lib, "cuvidParseVideoData")?,
            destroy_video_parser: symbol(&lib, "cuvidDestroyVideoParser")?,
            _lib: lib,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::*;

    #[test]
    fn fixed_size_layouts() {
        assert_eq!(size_of::<CuvidDecodeCaps>(), 88);
        assert_eq!(size_of::<CuvidParserDispInfo>(), 24);
        assert_eq!(size_of::<CuSeiMessage>(), 8);
        assert_eq!(size_of::<CuVideoFormat>(), 64);
    }

    #[cfg(all(target_os = "linux", target_pointer_width = "64"))]
    #[test]
    fn lp64_layouts() {
        assert_eq!(size_of::<CuvidSourceDataPacket>(), 32);
        assert_eq!(size_of::<CuvidDecodeCreateInfo>(), 176);
        assert_eq!(size_of::<CuvidParserParams>(), 136);
    }
}
