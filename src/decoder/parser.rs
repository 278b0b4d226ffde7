// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The state machine driven by the callbacks of the backend parser.
//!
//! The backend parser owns decode and display ordering. It reports the stream format once it
//! is known, then every picture to submit and every picture ready for display, possibly from
//! threads other than the one feeding it. [`ParserStateMachine`] reacts to these
//! notifications: it creates the decoder, submits pictures within the surface pool, and
//! extracts displayed pictures into frames for the sink.

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use crate::backend::BackendResult;
use crate::backend::DecoderBackend;
use crate::backend::DecoderCreateInfo;
use crate::backend::DeinterlaceMode;
use crate::backend::DisplayInfo;
use crate::backend::ParserCallbacks;
use crate::backend::PictureParams;
use crate::backend::SeiMessage;
use crate::backend::VideoFormat;
use crate::decoder::capabilities::negotiate;
use crate::decoder::capabilities::DecodeCapabilities;
use crate::decoder::context::HardwareContext;
use crate::decoder::surface_pool::extract_frame;
use crate::decoder::surface_pool::FrameLayout;
use crate::decoder::surface_pool::SurfacePool;
use crate::decoder::Error;
use crate::decoder::FrameSink;
use crate::decoder::Result;
use crate::decoder::SessionConfig;
use crate::decoder::SessionStats;
use crate::Rect;
use crate::StreamDescriptor;

/// State of a decoding session as seen by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParserState {
    /// The stream descriptor has not been validated yet.
    Uninitialized,
    /// Waiting for the parser to report the stream format.
    Negotiating,
    /// The decoder exists and no picture is being processed.
    Ready,
    /// A picture has just been submitted for decoding.
    Decoding,
    /// A picture is being extracted.
    Displaying,
    /// The end of the stream has been signaled. No more packets are accepted.
    Draining,
    /// All resources have been released.
    Closed,
}

impl ParserState {
    /// Whether the parser accepts new packets in this state.
    pub fn accepts_packets(self) -> bool {
        matches!(
            self,
            ParserState::Negotiating
                | ParserState::Ready
                | ParserState::Decoding
                | ParserState::Displaying
        )
    }
}

struct Inner<B: DecoderBackend> {
    state: ParserState,
    /// Format the decoder was created for.
    format: Option<VideoFormat>,
    decoder: Option<B::Decoder>,
    layout: Option<FrameLayout>,
    pool: SurfacePool,
    capabilities: DecodeCapabilities,
    /// Error raised in a callback, to be returned by the next packet submission.
    pending_error: Option<Error>,
    /// The parser signaled that it displayed every picture of the stream.
    end_of_stream: bool,
    stats: SessionStats,
    sink: Box<dyn FrameSink>,
}

impl<B: DecoderBackend> Inner<B> {
    fn record_error(&mut self, error: Error) {
        log::error!("{}", error);
        self.sink.on_error(&error);
        if self.pending_error.is_none() {
            self.pending_error = Some(error);
        }
    }
}

/// Receiver of the parser callbacks of a session.
pub struct ParserStateMachine<B: DecoderBackend> {
    context: Arc<HardwareContext<B>>,
    descriptor: StreamDescriptor,
    config: SessionConfig,
    inner: Mutex<Inner<B>>,
    /// Signaled whenever a picture leaves the pool or the end of the stream is reached.
    drained: Condvar,
}

impl<B: DecoderBackend> ParserStateMachine<B> {
    /// Creates a state machine for a stream of `descriptor`, for which the hardware reported
    /// `capabilities`.
    pub fn new(
        context: Arc<HardwareContext<B>>,
        descriptor: StreamDescriptor,
        config: SessionConfig,
        capabilities: DecodeCapabilities,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            context,
            descriptor,
            config,
            inner: Mutex::new(Inner {
                state: ParserState::Negotiating,
                format: None,
                decoder: None,
                layout: None,
                pool: Default::default(),
                capabilities,
                pending_error: None,
                end_of_stream: false,
                stats: Default::default(),
                sink,
            }),
            drained: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ParserState {
        self.lock().state
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }

    pub fn capabilities(&self) -> DecodeCapabilities {
        self.lock().capabilities
    }

    /// Format reported by the parser, once known.
    pub fn format(&self) -> Option<VideoFormat> {
        self.lock().format
    }

    /// Number of pictures submitted and not displayed yet.
    pub fn in_flight(&self) -> usize {
        self.lock().pool.in_flight()
    }

    /// Fails if the parser does not accept packets anymore.
    pub(crate) fn check_accepts_packets(&self) -> Result<()> {
        let state = self.lock().state;
        if state.accepts_packets() {
            Ok(())
        } else {
            Err(Error::ParseFailure {
                state,
                status: None,
            })
        }
    }

    /// Accounts for a new packet about to be parsed.
    pub(crate) fn begin_packet(&self) -> Result<()> {
        self.check_accepts_packets()?;
        self.lock().stats.packets_fed += 1;
        Ok(())
    }

    /// Turns the outcome of a packet submission into the result of the packet, taking any
    /// error raised by the callbacks in the meantime into account.
    pub(crate) fn end_packet(&self, result: BackendResult<()>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(error) = inner.pending_error.take() {
            inner.stats.packets_rejected += 1;
            return Err(error);
        }

        result.map_err(|e| {
            inner.stats.packets_rejected += 1;
            log::warn!("parser rejected packet: {}", e);
            Error::ParseFailure {
                state: inner.state,
                status: e.status(),
            }
        })
    }

    /// Stops accepting packets. In-flight pictures are still displayed.
    pub(crate) fn begin_draining(&self) {
        let mut inner = self.lock();
        if inner.state != ParserState::Closed {
            inner.state = ParserState::Draining;
        }
    }

    /// Waits until no picture is in flight anymore, or `timeout` expires. Returns whether the
    /// pool was drained.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let inner = self.lock();
        let (inner, result) = self
            .drained
            .wait_timeout_while(inner, timeout, |inner| inner.pool.in_flight() > 0)
            .unwrap_or_else(PoisonError::into_inner);

        if result.timed_out() {
            log::warn!(
                "{} pictures still in flight after {:?}",
                inner.pool.in_flight(),
                timeout
            );
            false
        } else {
            log::debug!(
                "drained (end of stream reached: {})",
                inner.end_of_stream
            );
            true
        }
    }

    /// Destroys the decoder, if any. Must only be called once the parser is gone.
    pub(crate) fn destroy_decoder(&self) -> Result<()> {
        let decoder = self.lock().decoder.take();
        let decoder = match decoder {
            Some(decoder) => decoder,
            None => return Ok(()),
        };

        let _guard = self.context.activate()?;
        self.context
            .backend()
            .destroy_decoder(decoder)
            .map_err(|source| Error::Backend {
                stage: "destroy decoder",
                source,
            })
    }

    pub(crate) fn set_closed(&self) {
        let mut inner = self.lock();
        inner.state = ParserState::Closed;
        inner.pool = Default::default();
        self.drained.notify_all();
    }

    /// Creates the decoder for `format`. Returns the number of decode surfaces.
    fn configure(&self, inner: &mut Inner<B>, format: &VideoFormat) -> Result<u32> {
        if format.codec != self.descriptor.codec {
            return Err(Error::UnsupportedFormat(format!(
                "parser reported {:?} for a {:?} stream",
                format.codec, self.descriptor.codec
            )));
        }

        let coded_resolution = format.coded_resolution;
        let descriptor = StreamDescriptor {
            codec: format.codec,
            chroma_format: format.chroma_format,
            bit_depth: format.bit_depth,
            width: coded_resolution.width,
            height: coded_resolution.height,
        };

        let capabilities = negotiate(&self.context, &descriptor)?;
        inner.capabilities = capabilities;
        capabilities.ensure_decodable(&descriptor, self.config.strict_capabilities)?;

        let target_resolution = format.display_resolution();
        let display_area = match format.display_area.resolution() {
            Some(res) if coded_resolution.can_contain(res) => format.display_area,
            _ => Rect {
                left: 0,
                top: 0,
                right: coded_resolution.width as i32,
                bottom: coded_resolution.height as i32,
            },
        };
        let num_decode_surfaces =
            format.min_num_decode_surfaces.max(1) + self.config.extra_decode_surfaces;
        let surface_format = descriptor.surface_format();

        let create_info = DecoderCreateInfo {
            codec: format.codec,
            chroma_format: format.chroma_format,
            bit_depth: format.bit_depth,
            coded_resolution,
            max_resolution: coded_resolution,
            target_resolution,
            display_area,
            num_decode_surfaces,
            num_output_surfaces: self.config.num_output_surfaces.max(1),
            surface_format,
            deinterlace_mode: if format.progressive {
                DeinterlaceMode::Weave
            } else {
                self.config.deinterlace_mode
            },
        };

        let decoder = {
            let _guard = self.context.activate()?;
            self.context
                .backend()
                .create_decoder(&create_info)
                .map_err(|source| Error::Backend {
                    stage: "create decoder",
                    source,
                })?
        };

        log::info!(
            "created {:?} decoder for {} {:?} {}-bit, output {} {:?}, {} decode surfaces",
            format.codec,
            coded_resolution,
            format.chroma_format,
            format.bit_depth,
            target_resolution,
            surface_format,
            num_decode_surfaces
        );

        inner.decoder = Some(decoder);
        inner.pool = SurfacePool::new(num_decode_surfaces);
        inner.layout = Some(FrameLayout {
            width: target_resolution.width,
            height: target_resolution.height,
            chroma_format: format.chroma_format,
            bit_depth: format.bit_depth,
            surface_format,
            display_area,
        });

        Ok(num_decode_surfaces)
    }
}

impl<B: DecoderBackend> ParserCallbacks<B> for ParserStateMachine<B> {
    fn on_sequence(&self, format: &VideoFormat) -> u32 {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state == ParserState::Closed {
            log::debug!("ignoring sequence callback after close");
            return 0;
        }
        inner.stats.sequences += 1;
        log::debug!("sequence callback: {:?}", format);

        if let Some(current) = inner.format {
            if current.is_compatible_with(format) {
                return inner.pool.capacity() as u32;
            }

            inner.record_error(Error::UnsupportedFormat(format!(
                "stream changed from {} {:?} {}-bit to {} {:?} {}-bit",
                current.coded_resolution,
                current.chroma_format,
                current.bit_depth,
                format.coded_resolution,
                format.chroma_format,
                format.bit_depth
            )));
            return 0;
        }

        match self.configure(inner, format) {
            Ok(num_decode_surfaces) => {
                inner.format = Some(*format);
                if inner.state == ParserState::Negotiating {
                    inner.state = ParserState::Ready;
                }
                num_decode_surfaces
            }
            Err(e) => {
                inner.record_error(e);
                0
            }
        }
    }

    fn on_decode(&self, picture: &B::Picture) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state == ParserState::Closed {
            log::debug!("ignoring decode callback after close");
            return true;
        }

        let picture_index = picture.picture_index();
        let second_field = picture.is_second_field();
        let decoder = match inner.decoder.as_ref() {
            Some(decoder) => decoder,
            None => {
                log::error!("picture {} submitted before the decoder exists", picture_index);
                inner.stats.submit_failures += 1;
                return true;
            }
        };

        if let Err(e) = inner.pool.submit(picture_index, second_field) {
            log::warn!("not submitting picture: {}", e);
            inner.stats.submit_failures += 1;
            return true;
        }

        let submitted = self.context.activate().and_then(|_guard| {
            self.context
                .backend()
                .decode_picture(decoder, picture)
                .map_err(|source| Error::Backend {
                    stage: "submit picture",
                    source,
                })
        });

        match submitted {
            Ok(()) => {
                inner.stats.pictures_submitted += 1;
                if inner.state != ParserState::Draining {
                    inner.state = ParserState::Decoding;
                }
            }
            Err(e) => {
                log::error!("failed to submit picture {}: {}", picture_index, e);
                inner.stats.submit_failures += 1;
                if !second_field {
                    inner.pool.release(picture_index);
                    self.drained.notify_all();
                }
            }
        }

        true
    }

    fn on_display(&self, info: Option<&DisplayInfo>) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state == ParserState::Closed {
            log::debug!("ignoring display callback after close");
            return true;
        }

        let info = match info {
            Some(info) => info,
            None => {
                log::debug!("end of stream reached by the parser");
                inner.end_of_stream = true;
                self.drained.notify_all();
                return true;
            }
        };
        inner.stats.pictures_displayed += 1;

        if let Err(e) = inner.pool.begin_display(info.picture_index) {
            log::warn!("not displaying picture: {}", e);
            return true;
        }

        let (decoder, layout) = match (inner.decoder.as_ref(), inner.layout.as_ref()) {
            (Some(decoder), Some(layout)) => (decoder, layout),
            _ => {
                log::error!("picture {} displayed without a decoder", info.picture_index);
                inner.pool.release(info.picture_index);
                return true;
            }
        };

        let draining = inner.state == ParserState::Draining;
        if !draining {
            inner.state = ParserState::Displaying;
        }

        let extracted = extract_frame(
            &self.context,
            decoder,
            &mut inner.pool,
            layout,
            info,
            inner.sink.as_mut(),
        );
        match extracted {
            Ok(()) => inner.stats.frames_emitted += 1,
            Err(e) => {
                if matches!(e, Error::DecodeFailure { .. }) {
                    inner.stats.decode_failures += 1;
                } else {
                    inner.stats.extract_failures += 1;
                }
                log::error!("{}", e);
                inner.sink.on_error(&e);
            }
        }

        if !draining {
            inner.state = ParserState::Ready;
        }
        if inner.pool.in_flight() == 0 {
            self.drained.notify_all();
        }

        true
    }

    fn on_sei(&self, picture_index: u32, messages: &[SeiMessage]) -> bool {
        let mut inner = self.lock();
        if inner.state == ParserState::Closed {
            return true;
        }

        for message in messages {
            log::debug!(
                "SEI payload type {} ({} bytes) for picture {}",
                message.payload_type,
                message.payload.len(),
                picture_index
            );
        }
        inner.stats.sei_messages += messages.len() as u64;
        inner.sink.on_sei(picture_index, messages);

        true
    }
}
