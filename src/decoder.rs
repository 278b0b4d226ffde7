// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The decode pipeline.
//!
//! A [`Session`](session::Session) drives one stream through a backend: it acquires the
//! [hardware context](context), negotiates [capabilities](capabilities), and registers a
//! [parser state machine](parser) with the driver parser. The state machine creates the
//! decoder once the stream format is known and extracts displayed pictures from the
//! [surface pool](surface_pool) into [`DecodedFrame`]s handed to a [`FrameSink`].

pub mod capabilities;
pub mod context;
pub mod parser;
pub mod session;
pub mod surface_pool;

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::backend::ContextScheduling;
use crate::backend::DecodeStatus;
use crate::backend::DeinterlaceMode;
use crate::backend::NativeStatus;
use crate::backend::SeiMessage;
use crate::decoder::capabilities::LimitViolation;
use crate::decoder::parser::ParserState;
use crate::ChromaFormat;
use crate::Rect;
use crate::SurfaceFormat;

pub type Result<T> = std::result::Result<T, Error>;

fn fmt_status(status: &Option<NativeStatus>) -> String {
    match status {
        Some(status) => format!(" with status {}", status),
        None => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The codec, chroma format or bit depth is not one we can decode.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// The stream exceeds the limits reported by the hardware.
    #[error("hardware capability exceeded: {0}")]
    CapabilityExceeded(LimitViolation),
    /// The device or its execution context could not be acquired or activated.
    #[error("{stage} failed: {source}")]
    ContextFailure {
        stage: &'static str,
        #[source]
        source: BackendError,
    },
    /// A driver call needed to set up or tear down the session failed.
    #[error("{stage} failed: {source}")]
    Backend {
        stage: &'static str,
        #[source]
        source: BackendError,
    },
    /// The parser did not accept a packet.
    #[error("packet rejected by the parser in state {state:?}{}", fmt_status(.status))]
    ParseFailure {
        state: ParserState,
        status: Option<NativeStatus>,
    },
    /// The hardware reported an error for one picture.
    #[error("picture {picture_index} failed to decode: {status:?}")]
    DecodeFailure {
        picture_index: u32,
        status: DecodeStatus,
    },
    /// A decoded picture could not be read back.
    #[error("failed to extract picture {picture_index} ({stage}): {source}")]
    ExtractFailure {
        picture_index: u32,
        stage: &'static str,
        #[source]
        source: BackendError,
    },
}

impl Error {
    /// Native status code of the driver call at the origin of this error, if any.
    pub fn status(&self) -> Option<NativeStatus> {
        match self {
            Error::ContextFailure { source, .. }
            | Error::Backend { source, .. }
            | Error::ExtractFailure { source, .. } => source.status(),
            Error::ParseFailure { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the error only affects one packet or picture and the session can go on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CapabilityExceeded(_)
                | Error::ParseFailure { .. }
                | Error::DecodeFailure { .. }
                | Error::ExtractFailure { .. }
        )
    }
}

/// Runs one step of a session initialization, logging its outcome under `label`.
pub(crate) fn run_init_step<T, F>(label: &'static str, step: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match step() {
        Ok(value) => {
            log::debug!("{}: SUCCESS", label);
            Ok(value)
        }
        Err(e) => {
            log::error!("{}: FAILED: {}", label, e);
            Err(e)
        }
    }
}

/// A decoded picture copied to host memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Surface content, `pitch` bytes per row.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
    pub surface_format: SurfaceFormat,
    /// Visible part of the picture.
    pub display_area: Rect,
    pub picture_index: u32,
    pub timestamp: i64,
}

impl DecodedFrame {
    /// CRC32 of the frame content.
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.data)
    }
}

/// Consumer of the frames produced by a session.
///
/// The sink may be called from driver threads, hence the `Send` requirement.
pub trait FrameSink: Send {
    /// Receives the next frame in display order. Called exactly once per extracted frame.
    fn on_frame(&mut self, frame: DecodedFrame);

    /// A picture or packet could not be processed. The session goes on.
    fn on_error(&mut self, _error: &Error) {}

    /// SEI messages were parsed for the picture decoded into `picture_index`.
    fn on_sei(&mut self, _picture_index: u32, _messages: &[SeiMessage]) {}
}

impl<F: FnMut(DecodedFrame) + Send> FrameSink for F {
    fn on_frame(&mut self, frame: DecodedFrame) {
        self(frame)
    }
}

/// Tunables of a decoding session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Ordinal of the device to decode on.
    pub device_ordinal: u32,
    pub context_scheduling: ContextScheduling,
    /// Number of pictures the parser may delay display by. 0 favors latency.
    pub max_display_delay: u32,
    /// Clock rate of packet timestamps, 0 for the driver default.
    pub clock_rate: u32,
    pub error_threshold: u32,
    /// Decode surfaces allocated on top of the minimum required by the stream.
    pub extra_decode_surfaces: u32,
    /// Number of surfaces that can be mapped at the same time.
    pub num_output_surfaces: u32,
    pub deinterlace_mode: DeinterlaceMode,
    /// Fail instead of warning when the stream exceeds the hardware resolution or macroblock
    /// limits.
    pub strict_capabilities: bool,
    /// Maximum time `close` waits for in-flight pictures to be displayed.
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_ordinal: 0,
            context_scheduling: Default::default(),
            max_display_delay: 0,
            clock_rate: 0,
            error_threshold: 0,
            extra_decode_surfaces: 0,
            num_output_surfaces: 1,
            deinterlace_mode: Default::default(),
            strict_capabilities: false,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters describing what a session did so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_fed: u64,
    pub packets_rejected: u64,
    pub sequences: u64,
    pub pictures_submitted: u64,
    pub submit_failures: u64,
    pub pictures_displayed: u64,
    pub frames_emitted: u64,
    pub decode_failures: u64,
    pub extract_failures: u64,
    pub sei_messages: u64,
}
