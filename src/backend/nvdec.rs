// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Backend driving NVIDIA hardware through the CUDA driver and NVCUVID libraries.
//!
//! Both libraries are loaded at runtime, so binaries built with this backend still start on
//! machines without an NVIDIA driver. [`NvdecBackend::load`] fails on those instead.

mod ffi;

use std::ffi::c_void;
use std::ffi::CStr;
use std::os::raw::c_int;
use std::os::raw::c_uint;
use std::os::raw::c_ulong;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::ptr;
use std::ptr::NonNull;
use std::sync::Arc;

use anyhow::anyhow;

use crate::backend::check_status;
use crate::backend::BackendResult;
use crate::backend::CapsQuery;
use crate::backend::ContextScheduling;
use crate::backend::DecodeStatus;
use crate::backend::DecoderBackend;
use crate::backend::DecoderCreateInfo;
use crate::backend::DeinterlaceMode;
use crate::backend::DeviceInfo;
use crate::backend::DisplayInfo;
use crate::backend::MappedFrame;
use crate::backend::ParserCallbacks;
use crate::backend::ParserParams;
use crate::backend::PictureParams;
use crate::backend::ProcParams;
use crate::backend::SeiMessage;
use crate::backend::SourcePacket;
use crate::backend::VideoFormat;
use crate::decoder::capabilities::DecodeCapabilities;
use crate::ChromaFormat;
use crate::Codec;
use crate::Rect;
use crate::Resolution;
use crate::SurfaceFormat;

const DEVICE_NAME_LEN: usize = 256;

fn codec_to_raw(codec: Codec) -> Option<c_int> {
    match codec {
        Codec::H264 => Some(ffi::CUDA_VIDEO_CODEC_H264),
        Codec::Hevc => Some(ffi::CUDA_VIDEO_CODEC_HEVC),
        Codec::Av1 => Some(ffi::CUDA_VIDEO_CODEC_AV1),
        Codec::Unsupported => None,
    }
}

fn codec_from_raw(codec: c_int) -> Codec {
    match codec {
        ffi::CUDA_VIDEO_CODEC_H264 => Codec::H264,
        ffi::CUDA_VIDEO_CODEC_HEVC => Codec::Hevc,
        ffi::CUDA_VIDEO_CODEC_AV1 => Codec::Av1,
        _ => Codec::Unsupported,
    }
}

fn chroma_to_raw(chroma_format: ChromaFormat) -> Option<c_int> {
    match chroma_format {
        ChromaFormat::Monochrome => Some(ffi::CUDA_VIDEO_CHROMA_MONOCHROME),
        ChromaFormat::Yuv420 => Some(ffi::CUDA_VIDEO_CHROMA_420),
        ChromaFormat::Yuv422 => Some(ffi::CUDA_VIDEO_CHROMA_422),
        ChromaFormat::Yuv444 => Some(ffi::CUDA_VIDEO_CHROMA_444),
        ChromaFormat::Unsupported => None,
    }
}

fn chroma_from_raw(chroma_format: c_int) -> ChromaFormat {
    match chroma_format {
        ffi::CUDA_VIDEO_CHROMA_MONOCHROME => ChromaFormat::Monochrome,
        ffi::CUDA_VIDEO_CHROMA_420 => ChromaFormat::Yuv420,
        ffi::CUDA_VIDEO_CHROMA_422 => ChromaFormat::Yuv422,
        ffi::CUDA_VIDEO_CHROMA_444 => ChromaFormat::Yuv444,
        _ => ChromaFormat::Unsupported,
    }
}

fn surface_format_to_raw(format: SurfaceFormat) -> c_int {
    match format {
        SurfaceFormat::Nv12 => ffi::CUDA_VIDEO_SURFACE_NV12,
        SurfaceFormat::P016 => ffi::CUDA_VIDEO_SURFACE_P016,
        SurfaceFormat::Yuv444 => ffi::CUDA_VIDEO_SURFACE_YUV444,
        SurfaceFormat::Yuv444_16Bit => ffi::CUDA_VIDEO_SURFACE_YUV444_16BIT,
    }
}

fn deinterlace_to_raw(mode: DeinterlaceMode) -> c_int {
    match mode {
        DeinterlaceMode::Weave => ffi::CUDA_VIDEO_DEINTERLACE_WEAVE,
        DeinterlaceMode::Bob => ffi::CUDA_VIDEO_DEINTERLACE_BOB,
        DeinterlaceMode::Adaptive => ffi::CUDA_VIDEO_DEINTERLACE_ADAPTIVE,
    }
}

fn short_rect(rect: &Rect) -> ffi::ShortRect {
    ffi::ShortRect {
        left: rect.left as i16,
        top: rect.top as i16,
        right: rect.right as i16,
        bottom: rect.bottom as i16,
    }
}

fn video_format_from_raw(format: &ffi::CuVideoFormat) -> VideoFormat {
    VideoFormat {
        codec: codec_from_raw(format.codec),
        chroma_format: chroma_from_raw(format.chroma_format),
        bit_depth: format.bit_depth_luma_minus8 + 8,
        coded_resolution: Resolution::from((format.coded_width, format.coded_height)),
        display_area: Rect {
            left: format.display_area.left,
            top: format.display_area.top,
            right: format.display_area.right,
            bottom: format.display_area.bottom,
        },
        frame_rate: (format.frame_rate.numerator, format.frame_rate.denominator),
        progressive: format.progressive_sequence != 0,
        min_num_decode_surfaces: u32::from(format.min_num_decode_surfaces),
    }
}

fn display_info_from_raw(info: &ffi::CuvidParserDispInfo) -> DisplayInfo {
    DisplayInfo {
        picture_index: info.picture_index as u32,
        progressive_frame: info.progressive_frame != 0,
        top_field_first: info.top_field_first != 0,
        repeat_first_field: info.repeat_first_field,
        timestamp: info.timestamp,
    }
}

/// Splits the concatenated SEI payloads of `data` according to `headers`. Messages that do not
/// fit in `data` are dropped along with the ones following them.
fn split_sei_messages(data: &[u8], headers: &[ffi::CuSeiMessage]) -> Vec<SeiMessage> {
    let mut messages = Vec::with_capacity(headers.len());
    let mut offset = 0usize;

    for header in headers {
        let size = header.sei_message_size as usize;
        let Some(payload) = data.get(offset..offset + size) else {
            log::warn!(
                "SEI message of type {} overflows its buffer, dropping the rest",
                header.sei_message_type
            );
            break;
        };
        messages.push(SeiMessage {
            payload_type: header.sei_message_type,
            payload: payload.to_vec(),
        });
        offset += size;
    }

    messages
}

/// Data handed to the driver parser as its user pointer.
struct CallbackBridge {
    callbacks: Arc<dyn ParserCallbacks<NvdecBackend>>,
}

/// # Safety
///
/// `user_data` must be null or the pointer registered by [`NvdecBackend::create_parser`], whose
/// parser has not been destroyed yet.
unsafe fn bridge_from_user_data<'a>(user_data: *mut c_void) -> Option<&'a CallbackBridge> {
    (user_data as *const CallbackBridge).as_ref()
}

/// Runs the body of a driver callback, turning a panic into a failure status as unwinding
/// through the driver is undefined behavior.
fn guarded<F: FnOnce() -> Option<c_int>>(callback: &'static str, body: F) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Some(ret)) => ret,
        Ok(None) => {
            log::error!("{} callback invoked with invalid arguments", callback);
            0
        }
        Err(_) => {
            log::error!("{} callback panicked", callback);
            0
        }
    }
}

unsafe extern "C" fn handle_sequence(
    user_data: *mut c_void,
    format: *mut ffi::CuVideoFormat,
) -> c_int {
    guarded("sequence", || {
        let bridge = bridge_from_user_data(user_data)?;
        let format = video_format_from_raw(format.as_ref()?);
        let surfaces = bridge.callbacks.on_sequence(&format);
        Some(c_int::try_from(surfaces).unwrap_or(0))
    })
}

unsafe extern "C" fn handle_decode(
    user_data: *mut c_void,
    params: *mut ffi::CuvidPicParamsHeader,
) -> c_int {
    guarded("decode", || {
        let bridge = bridge_from_user_data(user_data)?;
        let picture = Picture {
            params: NonNull::new(params)?,
        };
        Some(bridge.callbacks.on_decode(&picture) as c_int)
    })
}

unsafe extern "C" fn handle_display(
    user_data: *mut c_void,
    info: *mut ffi::CuvidParserDispInfo,
) -> c_int {
    guarded("display", || {
        let bridge = bridge_from_user_data(user_data)?;
        let info = info.as_ref().map(display_info_from_raw);
        Some(bridge.callbacks.on_display(info.as_ref()) as c_int)
    })
}

unsafe extern "C" fn handle_sei(
    user_data: *mut c_void,
    info: *mut ffi::CuvidSeiMessageInfo,
) -> c_int {
    guarded("SEI", || {
        let bridge = bridge_from_user_data(user_data)?;
        let info = info.as_ref()?;
        let count = info.sei_message_count as usize;
        if count == 0 || info.sei_message.is_null() {
            return Some(1);
        }

        let headers = std::slice::from_raw_parts(info.sei_message, count);
        let total: usize = headers.iter().map(|h| h.sei_message_size as usize).sum();
        let data = if info.sei_data.is_null() {
            &[][..]
        } else {
            std::slice::from_raw_parts(info.sei_data as *const u8, total)
        };

        let messages = split_sei_messages(data, headers);
        Some(bridge.callbacks.on_sei(info.pic_idx, &messages) as c_int)
    })
}

/// A CUDA context.
pub struct Context {
    handle: ffi::CuContext,
}

// SAFETY: CUDA contexts can be made current on any thread.
unsafe impl Send for Context {}
// SAFETY: the handle is never mutated and all operations on it go through the driver.
unsafe impl Sync for Context {}

/// An NVCUVID video parser, along with the callbacks it reports to.
pub struct Parser {
    handle: ffi::CuVideoParser,
    // Registered as the parser user data, must outlive `handle`.
    _bridge: Box<CallbackBridge>,
}

// SAFETY: the parser is only used through `&mut` and the bridge is `Send + Sync`.
unsafe impl Send for Parser {}

/// An NVCUVID hardware decoder.
pub struct Decoder {
    handle: ffi::CuVideoDecoder,
}

// SAFETY: the decoder handle is only used with the owning context current.
unsafe impl Send for Decoder {}

/// Picture parameters lent by the parser for the duration of a decode callback.
pub struct Picture {
    params: NonNull<ffi::CuvidPicParamsHeader>,
}

impl Picture {
    fn header(&self) -> &ffi::CuvidPicParamsHeader {
        // SAFETY: the parser keeps the parameters alive while the decode callback runs, and
        // `Picture` is never handed out past it.
        unsafe { self.params.as_ref() }
    }
}

impl PictureParams for Picture {
    fn picture_index(&self) -> u32 {
        self.header().curr_pic_idx as u32
    }

    fn is_second_field(&self) -> bool {
        let header = self.header();
        header.field_pic_flag != 0 && header.second_field != 0
    }
}

/// NVDEC backend, holding the entry points of the driver libraries.
pub struct NvdecBackend {
    cuda: ffi::CudaLibrary,
    cuvid: ffi::CuvidLibrary,
}

impl NvdecBackend {
    /// Loads the CUDA driver and NVCUVID libraries.
    pub fn load() -> BackendResult<Self> {
        let cuda = ffi::CudaLibrary::load()?;
        let cuvid = ffi::CuvidLibrary::load()?;
        log::debug!(
            "loaded {} and {}",
            ffi::cuda_library_name(),
            ffi::cuvid_library_name()
        );

        Ok(Self { cuda, cuvid })
    }

    fn device_handle(&self, ordinal: u32) -> BackendResult<ffi::CuDevice> {
        let mut device = 0;
        // SAFETY: `device` is a valid out pointer.
        check_status(
            unsafe { (self.cuda.cu_device_get)(&mut device, ordinal as c_int) },
            "cuDeviceGet",
        )?;
        Ok(device)
    }
}

impl DecoderBackend for NvdecBackend {
    type Context = Context;
    type Parser = Parser;
    type Decoder = Decoder;
    type Picture = Picture;

    fn init(&self) -> BackendResult<()> {
        // SAFETY: no preconditions, flags must be 0.
        check_status(unsafe { (self.cuda.cu_init)(0) }, "cuInit")
    }

    fn devices(&self) -> BackendResult<Vec<DeviceInfo>> {
        let mut count = 0;
        // SAFETY: `count` is a valid out pointer.
        check_status(
            unsafe { (self.cuda.cu_device_get_count)(&mut count) },
            "cuDeviceGetCount",
        )?;

        let mut devices = Vec::with_capacity(count.max(0) as usize);
        for ordinal in 0..count.max(0) as u32 {
            let device = self.device_handle(ordinal)?;
            let mut name = [0 as std::os::raw::c_char; DEVICE_NAME_LEN];
            // SAFETY: the length passed leaves room for the terminating nul, which the
            // zero-initialized buffer already provides.
            check_status(
                unsafe {
                    (self.cuda.cu_device_get_name)(
                        name.as_mut_ptr(),
                        (DEVICE_NAME_LEN - 1) as c_int,
                        device,
                    )
                },
                "cuDeviceGetName",
            )?;
            // SAFETY: `name` is nul-terminated.
            let name = unsafe { CStr::from_ptr(name.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            devices.push(DeviceInfo { ordinal, name });
        }

        Ok(devices)
    }

    fn create_context(
        &self,
        device: &DeviceInfo,
        scheduling: ContextScheduling,
    ) -> BackendResult<Context> {
        let device = self.device_handle(device.ordinal)?;
        let mut handle = ptr::null_mut();
        // SAFETY: `handle` is a valid out pointer and `device` was returned by the driver.
        check_status(
            unsafe { (self.cuda.cu_ctx_create)(&mut handle, scheduling.flags(), device) },
            "cuCtxCreate",
        )?;

        // Creation makes the context current. Activation is scoped by the caller, so detach it
        // from the creating thread.
        let mut popped = ptr::null_mut();
        // SAFETY: `popped` is a valid out pointer.
        if let Err(e) = check_status(
            unsafe { (self.cuda.cu_ctx_pop_current)(&mut popped) },
            "cuCtxPopCurrent",
        ) {
            // SAFETY: `handle` was just created and is not used anywhere else.
            unsafe { (self.cuda.cu_ctx_destroy)(handle) };
            return Err(e);
        }

        Ok(Context { handle })
    }

    fn api_version(&self, context: &Context) -> BackendResult<u32> {
        let mut version: c_uint = 0;
        // SAFETY: `context.handle` is a live context and `version` a valid out pointer.
        check_status(
            unsafe { (self.cuda.cu_ctx_get_api_version)(context.handle, &mut version) },
            "cuCtxGetApiVersion",
        )?;
        Ok(version)
    }

    fn push_context(&self, context: &Context) -> BackendResult<()> {
        // SAFETY: `context.handle` is a live context.
        check_status(
            unsafe { (self.cuda.cu_ctx_push_current)(context.handle) },
            "cuCtxPushCurrent",
        )
    }

    fn pop_context(&self) -> BackendResult<()> {
        let mut popped = ptr::null_mut();
        // SAFETY: `popped` is a valid out pointer.
        check_status(
            unsafe { (self.cuda.cu_ctx_pop_current)(&mut popped) },
            "cuCtxPopCurrent",
        )
    }

    fn destroy_context(&self, context: Context) -> BackendResult<()> {
        // SAFETY: `context` is consumed, so the handle cannot be used afterwards.
        check_status(
            unsafe { (self.cuda.cu_ctx_destroy)(context.handle) },
            "cuCtxDestroy",
        )
    }

    fn decoder_caps(&self, query: &CapsQuery) -> BackendResult<DecodeCapabilities> {
        let (Some(codec_type), Some(chroma_format)) =
            (codec_to_raw(query.codec), chroma_to_raw(query.chroma_format))
        else {
            return Ok(Default::default());
        };

        let mut caps = ffi::CuvidDecodeCaps {
            codec_type,
            chroma_format,
            bit_depth_minus8: c_uint::from(query.bit_depth.saturating_sub(8)),
            ..Default::default()
        };
        // SAFETY: `caps` is a valid, initialized structure.
        check_status(
            unsafe { (self.cuvid.get_decoder_caps)(&mut caps) },
            "cuvidGetDecoderCaps",
        )?;

        Ok(DecodeCapabilities {
            is_supported: caps.is_supported != 0,
            max_width: caps.max_width,
            max_height: caps.max_height,
            max_macroblock_count: caps.max_mb_count,
            min_width: u32::from(caps.min_width),
            min_height: u32::from(caps.min_height),
            output_format_mask: caps.output_format_mask,
            num_decoders: u32::from(caps.num_nvdecs),
        })
    }

    fn create_parser(
        &self,
        params: &ParserParams,
        callbacks: Arc<dyn ParserCallbacks<Self>>,
    ) -> BackendResult<Parser> {
        let codec_type = codec_to_raw(params.codec)
            .ok_or_else(|| anyhow!("no parser for codec {:?}", params.codec))?;
        let bridge = Box::new(CallbackBridge { callbacks });

        let mut raw_params = ffi::CuvidParserParams {
            codec_type,
            max_num_decode_surfaces: params.max_num_decode_surfaces,
            clock_rate: params.clock_rate,
            error_threshold: params.error_threshold,
            max_display_delay: params.max_display_delay,
            flags: c_uint::from(params.annexb),
            reserved1: [0; 4],
            user_data: &*bridge as *const CallbackBridge as *mut c_void,
            sequence_callback: Some(handle_sequence),
            decode_picture: Some(handle_decode),
            display_picture: Some(handle_display),
            get_operating_point: None,
            get_sei_msg: Some(handle_sei),
            reserved2: [ptr::null_mut(); 5],
            ext_video_info: ptr::null_mut(),
        };

        let mut handle = ptr::null_mut();
        // SAFETY: `raw_params` is fully initialized and the bridge it points to is owned by
        // the returned parser.
        check_status(
            unsafe { (self.cuvid.create_video_parser)(&mut handle, &mut raw_params) },
            "cuvidCreateVideoParser",
        )?;

        Ok(Parser {
            handle,
            _bridge: bridge,
        })
    }

    fn parse(&self, parser: &mut Parser, packet: &SourcePacket) -> BackendResult<()> {
        let mut flags: c_ulong = 0;
        if packet.timestamp.is_some() {
            flags |= ffi::CUVID_PKT_TIMESTAMP;
        }
        if packet.end_of_stream {
            flags |= ffi::CUVID_PKT_ENDOFSTREAM;
        }

        let mut raw_packet = ffi::CuvidSourceDataPacket {
            flags,
            payload_size: packet.data.len() as c_ulong,
            payload: if packet.data.is_empty() {
                ptr::null()
            } else {
                packet.data.as_ptr()
            },
            timestamp: packet.timestamp.unwrap_or(0),
        };

        // SAFETY: the payload outlives the call, which runs the callbacks synchronously.
        check_status(
            unsafe { (self.cuvid.parse_video_data)(parser.handle, &mut raw_packet) },
            "cuvidParseVideoData",
        )
    }

    fn destroy_parser(&self, parser: Parser) -> BackendResult<()> {
        // SAFETY: `parser` is consumed. Its bridge is dropped after the driver is done with it.
        check_status(
            unsafe { (self.cuvid.destroy_video_parser)(parser.handle) },
            "cuvidDestroyVideoParser",
        )
    }

    fn create_decoder(&self, info: &DecoderCreateInfo) -> BackendResult<Decoder> {
        let codec_type = codec_to_raw(info.codec)
            .ok_or_else(|| anyhow!("no decoder for codec {:?}", info.codec))?;
        let chroma_format = chroma_to_raw(info.chroma_format)
            .ok_or_else(|| anyhow!("no decoder for chroma format {:?}", info.chroma_format))?;

        let mut create_info = ffi::CuvidDecodeCreateInfo {
            width: info.coded_resolution.width as c_ulong,
            height: info.coded_resolution.height as c_ulong,
            num_decode_surfaces: info.num_decode_surfaces as c_ulong,
            codec_type,
            chroma_format,
            creation_flags: 0,
            bit_depth_minus8: info.bit_depth.saturating_sub(8) as c_ulong,
            intra_decode_only: 0,
            max_width: info.max_resolution.width as c_ulong,
            max_height: info.max_resolution.height as c_ulong,
            reserved1: 0,
            display_area: short_rect(&info.display_area),
            output_format: surface_format_to_raw(info.surface_format),
            deinterlace_mode: deinterlace_to_raw(info.deinterlace_mode),
            target_width: info.target_resolution.width as c_ulong,
            target_height: info.target_resolution.height as c_ulong,
            num_output_surfaces: info.num_output_surfaces as c_ulong,
            vid_lock: ptr::null_mut(),
            target_rect: Default::default(),
            enable_histogram: 0,
            reserved2: [0; 4],
        };

        let mut handle = ptr::null_mut();
        // SAFETY: `create_info` is fully initialized. The caller has a context current.
        check_status(
            unsafe { (self.cuvid.create_decoder)(&mut handle, &mut create_info) },
            "cuvidCreateDecoder",
        )?;

        Ok(Decoder { handle })
    }

    fn decode_picture(&self, decoder: &Decoder, picture: &Picture) -> BackendResult<()> {
        // SAFETY: the parameters come from the parser and are valid during the decode
        // callback, which is the only place pictures exist.
        check_status(
            unsafe { (self.cuvid.decode_picture)(decoder.handle, picture.params.as_ptr()) },
            "cuvidDecodePicture",
        )
    }

    fn decode_status(&self, decoder: &Decoder, picture_index: u32) -> BackendResult<DecodeStatus> {
        let mut status = ffi::CuvidGetDecodeStatus::default();
        // SAFETY: `status` is a valid out structure.
        check_status(
            unsafe {
                (self.cuvid.get_decode_status)(decoder.handle, picture_index as c_int, &mut status)
            },
            "cuvidGetDecodeStatus",
        )?;
        Ok(DecodeStatus::n(status.decode_status).unwrap_or(DecodeStatus::Invalid))
    }

    fn map_frame(
        &self,
        decoder: &Decoder,
        picture_index: u32,
        params: &ProcParams,
    ) -> BackendResult<MappedFrame> {
        let mut proc_params = ffi::CuvidProcParams {
            progressive_frame: c_int::from(params.progressive_frame),
            second_field: params.second_field,
            top_field_first: c_int::from(params.top_field_first),
            unpaired_field: c_int::from(params.unpaired_field),
            ..Default::default()
        };
        let mut device_ptr = 0u64;
        let mut pitch: c_uint = 0;
        // SAFETY: all out pointers are valid. The caller has a context current.
        check_status(
            unsafe {
                (self.cuvid.map_video_frame)(
                    decoder.handle,
                    picture_index as c_int,
                    &mut device_ptr,
                    &mut pitch,
                    &mut proc_params,
                )
            },
            "cuvidMapVideoFrame64",
        )?;

        Ok(MappedFrame { device_ptr, pitch })
    }

    fn unmap_frame(&self, decoder: &Decoder, frame: MappedFrame) -> BackendResult<()> {
        // SAFETY: `frame` was returned by `map_frame` on this decoder and is consumed.
        check_status(
            unsafe { (self.cuvid.unmap_video_frame)(decoder.handle, frame.device_ptr) },
            "cuvidUnmapVideoFrame64",
        )
    }

    fn copy_to_host(&self, frame: &MappedFrame, dst: &mut [u8]) -> BackendResult<()> {
        // SAFETY: `dst` is valid for `dst.len()` bytes and the mapped surface is at least as
        // large, as computed from its pitch and height by the caller.
        check_status(
            unsafe {
                (self.cuda.cu_memcpy_dtoh)(
                    dst.as_mut_ptr() as *mut c_void,
                    frame.device_ptr,
                    dst.len(),
                )
            },
            "cuMemcpyDtoH",
        )
    }

    fn destroy_decoder(&self, decoder: Decoder) -> BackendResult<()> {
        // SAFETY: `decoder` is consumed. The caller has a context current.
        check_status(
            unsafe { (self.cuvid.destroy_decoder)(decoder.handle) },
            "cuvidDestroyDecoder",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sei_header(sei_message_type: u8, size: u32) -> ffi::CuSeiMessage {
        ffi::CuSeiMessage {
            sei_message_type,
            reserved: [0; 3],
            sei_message_size: size,
        }
    }

    #[test]
    fn sei_payloads_are_split() {
        let data = [1, 2, 3, 4, 5, 6];
        let headers = [sei_header(5, 2), sei_header(4, 4)];

        let messages = split_sei_messages(&data, &headers);
        assert_eq!(
            messages,
            vec![
                SeiMessage {
                    payload_type: 5,
                    payload: vec![1, 2],
                },
                SeiMessage {
                    payload_type: 4,
                    payload: vec![3, 4, 5, 6],
                },
            ]
        );
    }

    #[test]
    fn sei_overflow_truncates() {
        let data = [1, 2, 3];
        let headers = [sei_header(5, 2), sei_header(4, 4), sei_header(1, 0)];

        let messages = split_sei_messages(&data, &headers);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, vec![1, 2]);
    }

    #[test]
    fn codec_mapping() {
        for codec in [Codec::H264, Codec::Hevc, Codec::Av1] {
            let raw = codec_to_raw(codec).unwrap();
            assert_eq!(codec_from_raw(raw), codec);
        }
        assert_eq!(codec_to_raw(Codec::Unsupported), None);
        // VP9 is known to the driver but not to us.
        assert_eq!(codec_from_raw(10), Codec::Unsupported);
    }

    #[test]
    fn sequence_format_conversion() {
        let raw = ffi::CuVideoFormat {
            codec: ffi::CUDA_VIDEO_CODEC_HEVC,
            frame_rate: ffi::FrameRate {
                numerator: 60000,
                denominator: 1001,
            },
            progressive_sequence: 1,
            bit_depth_luma_minus8: 2,
            bit_depth_chroma_minus8: 2,
            min_num_decode_surfaces: 9,
            coded_width: 3840,
            coded_height: 2160,
            display_area: ffi::IntRect {
                left: 0,
                top: 0,
                right: 3840,
                bottom: 2160,
            },
            chroma_format: ffi::CUDA_VIDEO_CHROMA_420,
            ..Default::default()
        };

        let format = video_format_from_raw(&raw);
        assert_eq!(format.codec, Codec::Hevc);
        assert_eq!(format.chroma_format, ChromaFormat::Yuv420);
        assert_eq!(format.bit_depth, 10);
        assert_eq!(format.coded_resolution, Resolution::from((3840, 2160)));
        assert_eq!(format.frame_rate, (60000, 1001));
        assert!(format.progressive);
        assert_eq!(format.min_num_decode_surfaces, 9);
    }

    #[test]
    fn unpaired_field_display() {
        let info = display_info_from_raw(&ffi::CuvidParserDispInfo {
            picture_index: 3,
            progressive_frame: 0,
            top_field_first: 1,
            repeat_first_field: -1,
            timestamp: 1234,
        });
        assert_eq!(info.picture_index, 3);
        assert!(info.top_field_first);

        let params = ProcParams::from(&info);
        assert!(params.unpaired_field);
        assert_eq!(params.second_field, 0);
    }

    #[test]
    fn output_formats_match_caps_mask() {
        for format in [
            SurfaceFormat::Nv12,
            SurfaceFormat::P016,
            SurfaceFormat::Yuv444,
            SurfaceFormat::Yuv444_16Bit,
        ] {
            assert_eq!(1u16 << surface_format_to_raw(format), format.mask_bit());
        }
    }

    #[test]
    fn panicking_callback_reports_failure() {
        assert_eq!(guarded("test", || panic!("boom")), 0);
        assert_eq!(guarded("test", || None), 0);
        assert_eq!(guarded("test", || Some(7)), 7);
    }
}
