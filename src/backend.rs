// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared code for decoder backends.
//!
//! A backend is the provider of the hardware primitives the pipeline is built on: device and
//! execution context management, capability queries, the stateful bitstream parser, and the
//! decoder with its surfaces. This module contains the [`DecoderBackend`] trait every backend
//! implements, the [`ParserCallbacks`] trait through which a backend parser reports progress,
//! and the plain data types exchanged over that boundary.

#[cfg(test)]
pub(crate) mod dummy;
#[cfg(feature = "nvdec")]
pub mod nvdec;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use enumn::N;
use thiserror::Error;

use crate::decoder::capabilities::DecodeCapabilities;
use crate::ChromaFormat;
use crate::Codec;
use crate::Rect;
use crate::Resolution;
use crate::SurfaceFormat;

/// Result codes of the CUDA driver that we know how to name.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum DriverStatus {
    Success = 0,
    InvalidValue = 1,
    OutOfMemory = 2,
    NotInitialized = 3,
    Deinitialized = 4,
    NoDevice = 100,
    InvalidDevice = 101,
    InvalidImage = 200,
    InvalidContext = 201,
    MapFailed = 205,
    UnmapFailed = 206,
    InvalidSource = 300,
    FileNotFound = 301,
    InvalidHandle = 400,
    NotFound = 500,
    NotReady = 600,
    IllegalAddress = 700,
    LaunchFailed = 719,
    NotPermitted = 800,
    NotSupported = 801,
    Unknown = 999,
}

impl DriverStatus {
    fn name(self) -> &'static str {
        match self {
            DriverStatus::Success => "CUDA_SUCCESS",
            DriverStatus::InvalidValue => "CUDA_ERROR_INVALID_VALUE",
            DriverStatus::OutOfMemory => "CUDA_ERROR_OUT_OF_MEMORY",
            DriverStatus::NotInitialized => "CUDA_ERROR_NOT_INITIALIZED",
            DriverStatus::Deinitialized => "CUDA_ERROR_DEINITIALIZED",
            DriverStatus::NoDevice => "CUDA_ERROR_NO_DEVICE",
            DriverStatus::InvalidDevice => "CUDA_ERROR_INVALID_DEVICE",
            DriverStatus::InvalidImage => "CUDA_ERROR_INVALID_IMAGE",
            DriverStatus::InvalidContext => "CUDA_ERROR_INVALID_CONTEXT",
            DriverStatus::MapFailed => "CUDA_ERROR_MAP_FAILED",
            DriverStatus::UnmapFailed => "CUDA_ERROR_UNMAP_FAILED",
            DriverStatus::InvalidSource => "CUDA_ERROR_INVALID_SOURCE",
            DriverStatus::FileNotFound => "CUDA_ERROR_FILE_NOT_FOUND",
            DriverStatus::InvalidHandle => "CUDA_ERROR_INVALID_HANDLE",
            DriverStatus::NotFound => "CUDA_ERROR_NOT_FOUND",
            DriverStatus::NotReady => "CUDA_ERROR_NOT_READY",
            DriverStatus::IllegalAddress => "CUDA_ERROR_ILLEGAL_ADDRESS",
            DriverStatus::LaunchFailed => "CUDA_ERROR_LAUNCH_FAILED",
            DriverStatus::NotPermitted => "CUDA_ERROR_NOT_PERMITTED",
            DriverStatus::NotSupported => "CUDA_ERROR_NOT_SUPPORTED",
            DriverStatus::Unknown => "CUDA_ERROR_UNKNOWN",
        }
    }
}

/// Raw status code returned by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativeStatus(pub i32);

impl NativeStatus {
    pub fn is_success(self) -> bool {
        self.0 == DriverStatus::Success as i32
    }

    pub fn known(self) -> Option<DriverStatus> {
        DriverStatus::n(self.0)
    }
}

impl From<DriverStatus> for NativeStatus {
    fn from(status: DriverStatus) -> Self {
        Self(status as i32)
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Some(status) => write!(f, "{} ({})", self.0, status.name()),
            None => write!(f, "{} (see cudaError_enum)", self.0),
        }
    }
}

/// Error returned by backend methods.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{operation} returned {status}")]
    Status {
        operation: &'static str,
        status: NativeStatus,
    },
    #[error("not enough resources to proceed with the operation now")]
    OutOfResources,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    /// Native status code carried by this error, if any.
    pub fn status(&self) -> Option<NativeStatus> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type returned by backend methods.
pub type BackendResult<T> = Result<T, BackendError>;

/// Turns a raw driver status into a [`BackendResult`].
pub fn check_status(status: i32, operation: &'static str) -> BackendResult<()> {
    let status = NativeStatus(status);
    if status.is_success() {
        Ok(())
    } else {
        Err(BackendError::Status { operation, status })
    }
}

/// A device the backend can decode on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub ordinal: u32,
    pub name: String,
}

/// How a thread waiting on the hardware context is scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextScheduling {
    Auto,
    Spin,
    Yield,
    /// Block the waiting thread on a synchronization primitive.
    #[default]
    BlockingSync,
}

impl ContextScheduling {
    /// Context creation flags understood by the driver.
    pub fn flags(self) -> u32 {
        match self {
            ContextScheduling::Auto => 0x00,
            ContextScheduling::Spin => 0x01,
            ContextScheduling::Yield => 0x02,
            ContextScheduling::BlockingSync => 0x04,
        }
    }
}

/// Input of a capability query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapsQuery {
    pub codec: Codec,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
}

/// Parameters of the driver parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParserParams {
    pub codec: Codec,
    /// Placeholder surface count. The actual count is decided in the sequence callback.
    pub max_num_decode_surfaces: u32,
    /// Clock rate of packet timestamps, 0 letting the driver pick its default.
    pub clock_rate: u32,
    /// Percentage of corrupted macroblocks tolerated before a picture is dropped.
    pub error_threshold: u32,
    /// Number of pictures the parser may hold back to reorder them for display.
    pub max_display_delay: u32,
    /// AV1 only: whether the input uses the Annex B length-delimited format.
    pub annexb: bool,
}

/// One unit of input for the driver parser.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourcePacket<'a> {
    pub data: &'a [u8],
    pub timestamp: Option<i64>,
    /// Instructs the parser to flush every pending picture to display.
    pub end_of_stream: bool,
}

/// Coded format reported by the parser once it has seen the stream headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub codec: Codec,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
    pub coded_resolution: Resolution,
    pub display_area: Rect,
    pub frame_rate: (u32, u32),
    pub progressive: bool,
    /// Minimum number of decode surfaces the decoder must be created with.
    pub min_num_decode_surfaces: u32,
}

impl VideoFormat {
    /// Visible part of the coded picture, falling back to the whole picture when the stream
    /// does not define a valid display area.
    pub fn display_resolution(&self) -> Resolution {
        match self.display_area.resolution() {
            Some(res) if self.coded_resolution.can_contain(res) => res,
            _ => self.coded_resolution,
        }
    }

    /// Whether a decoder created for `self` can keep decoding a stream of `other` format.
    pub fn is_compatible_with(&self, other: &VideoFormat) -> bool {
        self.codec == other.codec
            && self.chroma_format == other.chroma_format
            && self.bit_depth == other.bit_depth
            && self.coded_resolution == other.coded_resolution
    }
}

/// Display notification for one decoded picture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplayInfo {
    pub picture_index: u32,
    pub progressive_frame: bool,
    pub top_field_first: bool,
    /// Number of additional fields to display, negative for an unpaired field.
    pub repeat_first_field: i32,
    pub timestamp: i64,
}

/// A SEI payload attached to a picture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: u8,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeinterlaceMode {
    Weave,
    Bob,
    #[default]
    Adaptive,
}

impl FromStr for DeinterlaceMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weave" => Ok(DeinterlaceMode::Weave),
            "bob" => Ok(DeinterlaceMode::Bob),
            "adaptive" => Ok(DeinterlaceMode::Adaptive),
            _ => Err("unrecognized deinterlace mode. Valid values: weave, bob, adaptive"),
        }
    }
}

/// Parameters the decoder is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderCreateInfo {
    pub codec: Codec,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
    pub coded_resolution: Resolution,
    /// Largest resolution the decoder can be reconfigured to. Equal to the coded resolution as
    /// resolution changes are not supported.
    pub max_resolution: Resolution,
    pub target_resolution: Resolution,
    pub display_area: Rect,
    pub num_decode_surfaces: u32,
    pub num_output_surfaces: u32,
    pub surface_format: SurfaceFormat,
    pub deinterlace_mode: DeinterlaceMode,
}

/// Field handling for a surface being mapped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcParams {
    pub progressive_frame: bool,
    pub top_field_first: bool,
    /// Output field selector, 1 for the first field of a pair.
    pub second_field: i32,
    pub unpaired_field: bool,
}

impl From<&DisplayInfo> for ProcParams {
    fn from(info: &DisplayInfo) -> Self {
        Self {
            progressive_frame: info.progressive_frame,
            top_field_first: info.top_field_first,
            second_field: info.repeat_first_field + 1,
            unpaired_field: info.repeat_first_field < 0,
        }
    }
}

/// A decoded surface currently mapped by the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedFrame {
    pub device_ptr: u64,
    /// Size of one row of the mapped surface, in bytes.
    pub pitch: u32,
}

/// Outcome of the decode of one picture, as reported by the driver.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum DecodeStatus {
    Invalid = 0,
    InProgress = 1,
    Success = 2,
    Error = 8,
    ErrorConcealed = 9,
}

impl DecodeStatus {
    /// Whether the picture content cannot be trusted.
    pub fn is_error(self) -> bool {
        matches!(self, DecodeStatus::Error | DecodeStatus::ErrorConcealed)
    }
}

/// Picture parameters handed by the parser to the decode callback.
pub trait PictureParams {
    /// Index of the decode surface the picture is decoded into.
    fn picture_index(&self) -> u32;

    /// Whether this is the second field of a picture whose first field was already submitted.
    fn is_second_field(&self) -> bool;
}

/// Callbacks invoked by a backend parser while it processes input.
///
/// Backends may call these from any thread, including concurrently with the thread feeding
/// the parser. Each method returns a status to the driver instead of failing.
pub trait ParserCallbacks<B: DecoderBackend>: Send + Sync {
    /// The stream format is known or has changed. Returns the number of decode surfaces the
    /// decoder was created with, or 0 on failure.
    fn on_sequence(&self, format: &VideoFormat) -> u32;

    /// A picture is ready to be submitted for decoding.
    fn on_decode(&self, picture: &B::Picture) -> bool;

    /// A picture is ready to be displayed. `None` signals that the parser reached the end of
    /// the stream.
    fn on_display(&self, info: Option<&DisplayInfo>) -> bool;

    /// SEI messages were parsed for the picture decoded into `picture_index`.
    fn on_sei(&self, _picture_index: u32, _messages: &[SeiMessage]) -> bool {
        true
    }
}

/// Hardware primitives needed by the decode pipeline.
///
/// Methods touching the decoder (submission, status, mapping, copies) must be called with the
/// context made current on the calling thread with [`push_context`](Self::push_context).
pub trait DecoderBackend: Send + Sync + Sized + 'static {
    type Context: Send + Sync;
    type Parser: Send;
    type Decoder: Send;
    type Picture: PictureParams;

    /// Initializes the driver. Must succeed before any other call.
    fn init(&self) -> BackendResult<()>;

    fn devices(&self) -> BackendResult<Vec<DeviceInfo>>;

    fn create_context(
        &self,
        device: &DeviceInfo,
        scheduling: ContextScheduling,
    ) -> BackendResult<Self::Context>;

    fn api_version(&self, context: &Self::Context) -> BackendResult<u32>;

    /// Makes `context` current on the calling thread.
    fn push_context(&self, context: &Self::Context) -> BackendResult<()>;

    /// Restores the context that was current on the calling thread before the last push.
    fn pop_context(&self) -> BackendResult<()>;

    fn destroy_context(&self, context: Self::Context) -> BackendResult<()>;

    fn decoder_caps(&self, query: &CapsQuery) -> BackendResult<DecodeCapabilities>;

    fn create_parser(
        &self,
        params: &ParserParams,
        callbacks: Arc<dyn ParserCallbacks<Self>>,
    ) -> BackendResult<Self::Parser>;

    /// Feeds `packet` to the parser, which invokes the callbacks as needed before returning.
    fn parse(&self, parser: &mut Self::Parser, packet: &SourcePacket) -> BackendResult<()>;

    fn destroy_parser(&self, parser: Self::Parser) -> BackendResult<()>;

    fn create_decoder(&self, info: &DecoderCreateInfo) -> BackendResult<Self::Decoder>;

    fn decode_picture(&self, decoder: &Self::Decoder, picture: &Self::Picture)
        -> BackendResult<()>;

    fn decode_status(&self, decoder: &Self::Decoder, picture_index: u32)
        -> BackendResult<DecodeStatus>;

    fn map_frame(
        &self,
        decoder: &Self::Decoder,
        picture_index: u32,
        params: &ProcParams,
    ) -> BackendResult<MappedFrame>;

    fn unmap_frame(&self, decoder: &Self::Decoder, frame: MappedFrame) -> BackendResult<()>;

    /// Copies the first `dst.len()` bytes of `frame` into `dst`.
    fn copy_to_host(&self, frame: &MappedFrame, dst: &mut [u8]) -> BackendResult<()>;

    fn destroy_decoder(&self, decoder: Self::Decoder) -> BackendResult<()>;
}
