// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Lifecycle of a decoding session.

use std::sync::Arc;

use crate::backend::DecoderBackend;
use crate::backend::ParserCallbacks;
use crate::backend::ParserParams;
use crate::backend::SourcePacket;
use crate::backend::VideoFormat;
use crate::decoder::capabilities::negotiate;
use crate::decoder::capabilities::validate_descriptor;
use crate::decoder::capabilities::DecodeCapabilities;
use crate::decoder::context::HardwareContext;
use crate::decoder::parser::ParserState;
use crate::decoder::parser::ParserStateMachine;
use crate::decoder::run_init_step;
use crate::decoder::Error;
use crate::decoder::FrameSink;
use crate::decoder::Result;
use crate::decoder::SessionConfig;
use crate::decoder::SessionStats;
use crate::StreamDescriptor;

/// A decoding session for one stream.
///
/// The session owns the hardware context, the backend parser and, through its parser state
/// machine, the decoder. Packets are fed with [`feed`](Self::feed); decoded frames reach the
/// sink given at creation, possibly from another thread. [`close`](Self::close) waits for the
/// pictures still being decoded, then destroys the parser, the decoder and the context in this
/// order. Dropping the session closes it.
pub struct Session<B: DecoderBackend> {
    context: Arc<HardwareContext<B>>,
    machine: Arc<ParserStateMachine<B>>,
    parser: Option<B::Parser>,
    config: SessionConfig,
    end_of_stream_sent: bool,
}

impl<B: DecoderBackend> Session<B> {
    /// Creates a session decoding a stream of `descriptor` on `backend`, delivering frames to
    /// `sink`.
    ///
    /// Fails if the stream format is unsupported, if the hardware context cannot be acquired or
    /// if the backend fails to report its capabilities or create the parser.
    pub fn init<S: FrameSink + 'static>(
        backend: Arc<B>,
        descriptor: &StreamDescriptor,
        config: SessionConfig,
        sink: S,
    ) -> Result<Self> {
        log::debug!("initializing session for {:?} with {:?}", descriptor, config);

        run_init_step("validate stream descriptor", || validate_descriptor(descriptor))?;

        let context = Arc::new(HardwareContext::acquire(
            backend,
            config.device_ordinal,
            config.context_scheduling,
        )?);

        let capabilities = run_init_step("negotiate capabilities", || {
            let capabilities = negotiate(&context, descriptor)?;
            capabilities.ensure_decodable(descriptor, config.strict_capabilities)?;
            Ok(capabilities)
        })?;

        let machine = Arc::new(ParserStateMachine::new(
            Arc::clone(&context),
            *descriptor,
            config.clone(),
            capabilities,
            Box::new(sink),
        ));

        let params = ParserParams {
            codec: descriptor.codec,
            // The actual count is returned by the sequence callback.
            max_num_decode_surfaces: 1,
            clock_rate: config.clock_rate,
            error_threshold: config.error_threshold,
            max_display_delay: config.max_display_delay,
            annexb: false,
        };
        let callbacks: Arc<dyn ParserCallbacks<B>> = machine.clone();
        let parser = run_init_step("create parser", || {
            context
                .backend()
                .create_parser(&params, callbacks)
                .map_err(|source| Error::Backend {
                    stage: "create parser",
                    source,
                })
        })?;

        Ok(Self {
            context,
            machine,
            parser: Some(parser),
            config,
            end_of_stream_sent: false,
        })
    }

    /// Feeds one packet to the parser.
    ///
    /// Frames decoded as a result may be delivered to the sink before this returns. An error
    /// only concerns this packet, or a stream format change detected while parsing it.
    pub fn feed(&mut self, packet: &[u8]) -> Result<()> {
        self.feed_packet(packet, None)
    }

    /// Same as [`feed`](Self::feed), attaching `timestamp` to the pictures of the packet.
    pub fn feed_at(&mut self, packet: &[u8], timestamp: i64) -> Result<()> {
        self.feed_packet(packet, Some(timestamp))
    }

    fn feed_packet(&mut self, data: &[u8], timestamp: Option<i64>) -> Result<()> {
        self.machine.begin_packet()?;
        self.parse(&SourcePacket {
            data,
            timestamp,
            end_of_stream: false,
        })
    }

    fn parse(&mut self, packet: &SourcePacket) -> Result<()> {
        let parser = match self.parser.as_mut() {
            Some(parser) => parser,
            None => {
                return Err(Error::ParseFailure {
                    state: self.machine.state(),
                    status: None,
                })
            }
        };

        let result = self.context.backend().parse(parser, packet);
        self.machine.end_packet(result)
    }

    /// Signals the end of the stream. The parser flushes the pictures it holds and no more
    /// packets are accepted.
    pub fn end_of_stream(&mut self) -> Result<()> {
        if self.end_of_stream_sent {
            return Ok(());
        }
        self.machine.check_accepts_packets()?;
        self.machine.begin_draining();
        self.end_of_stream_sent = true;

        log::debug!("sending end of stream to the parser");
        self.parse(&SourcePacket {
            data: &[],
            timestamp: None,
            end_of_stream: true,
        })
    }

    /// Closes the session, waiting at most the configured drain timeout for pictures still in
    /// flight. Closing an already closed session does nothing.
    ///
    /// Teardown goes on after a failure, and the first error met is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.machine.state() == ParserState::Closed {
            return Ok(());
        }

        let mut ret = Ok(());
        let mut keep_first = |result: Result<()>| {
            if let Err(e) = result {
                log::error!("error while closing session: {}", e);
                if ret.is_ok() {
                    ret = Err(e);
                }
            }
        };

        if !self.end_of_stream_sent && self.parser.is_some() {
            keep_first(self.end_of_stream());
        }
        self.machine.begin_draining();
        self.machine.wait_drained(self.config.drain_timeout);

        if let Some(parser) = self.parser.take() {
            keep_first(
                self.context
                    .backend()
                    .destroy_parser(parser)
                    .map_err(|source| Error::Backend {
                        stage: "destroy parser",
                        source,
                    }),
            );
        }
        keep_first(self.machine.destroy_decoder());
        keep_first(self.context.release());

        self.machine.set_closed();
        log::debug!("session closed: {:?}", self.machine.stats());

        ret
    }

    pub fn state(&self) -> ParserState {
        self.machine.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.machine.stats()
    }

    /// Latest capabilities reported by the hardware for the stream.
    pub fn capabilities(&self) -> DecodeCapabilities {
        self.machine.capabilities()
    }

    /// Format reported by the parser, once it has seen the stream headers.
    pub fn format(&self) -> Option<VideoFormat> {
        self.machine.format()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl<B: DecoderBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("failed to close session: {}", e);
        }
    }
}
