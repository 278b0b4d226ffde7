// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the decoder
//! run so we can test it in isolation.
//!
//! The backend emulates a driver parser that turns every non-empty packet into one picture,
//! and records the calls it receives so tests can check how the pipeline used it. Failures can
//! be injected at most stages.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;
use std::thread::JoinHandle;
use std::thread::ThreadId;
use std::time::Duration;

use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::CapsQuery;
use crate::backend::ContextScheduling;
use crate::backend::DecodeStatus;
use crate::backend::DecoderBackend;
use crate::backend::DecoderCreateInfo;
use crate::backend::DeviceInfo;
use crate::backend::DisplayInfo;
use crate::backend::DriverStatus;
use crate::backend::MappedFrame;
use crate::backend::ParserCallbacks;
use crate::backend::ParserParams;
use crate::backend::PictureParams;
use crate::backend::ProcParams;
use crate::backend::SourcePacket;
use crate::backend::VideoFormat;
use crate::decoder::capabilities::DecodeCapabilities;
use crate::ChromaFormat;
use crate::Codec;
use crate::Rect;
use crate::Resolution;
use crate::SurfaceFormat;

const SURFACE_BASE: u64 = 0x7f00_0000_0000;
const SURFACE_STRIDE: u64 = 0x0100_0000;

thread_local! {
    /// Contexts made current on this thread, most recent last.
    static CURRENT_CONTEXTS: RefCell<Vec<u64>> = RefCell::new(Vec::new());
}

fn status_error(operation: &'static str, status: DriverStatus) -> BackendError {
    BackendError::Status {
        operation,
        status: status.into(),
    }
}

fn require_context(operation: &'static str) -> BackendResult<()> {
    if CURRENT_CONTEXTS.with(|c| c.borrow().is_empty()) {
        Err(status_error(operation, DriverStatus::InvalidContext))
    } else {
        Ok(())
    }
}

/// A call received by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Init,
    CreateContext,
    DestroyContext,
    CapsQuery,
    CreateParser,
    DestroyParser,
    Sequence,
    CreateDecoder,
    DestroyDecoder,
    Decode(u32),
    Display(u32),
    Map(u32),
    Unmap(u32),
}

/// Number of successful calls of each kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub pushes: u64,
    pub pops: u64,
    pub decodes: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub copies: u64,
}

#[derive(Default)]
struct Faults {
    init: Option<DriverStatus>,
    create_context: Option<DriverStatus>,
    caps_query: bool,
    /// Submission attempt to fail.
    submit_at: Option<u64>,
    /// Successful submission whose picture is reported as corrupted.
    decode_at: Option<(u64, DecodeStatus)>,
    /// Map attempt to fail.
    map_at: Option<u64>,
    /// Copy attempt to fail.
    copy_at: Option<u64>,
}

struct State {
    faults: Faults,
    min_decode_surfaces: u32,
    format: Option<VideoFormat>,
    reorder: bool,
    deferred_display: Option<Duration>,
    /// Picture that is never displayed, by submission order.
    dropped_display: Option<u64>,

    events: Vec<Event>,
    counters: Counters,
    next_context: u64,
    submit_attempts: u64,
    map_attempts: u64,
    copy_attempts: u64,
    decoders_created: usize,
    decoder_info: Option<DecoderCreateInfo>,
    display_thread: Option<ThreadId>,
}

type SharedState = Arc<Mutex<State>>;

fn lock(state: &SharedState) -> MutexGuard<'_, State> {
    state.lock().unwrap()
}

fn display(state: &SharedState, callbacks: &Arc<dyn ParserCallbacks<Backend>>, info: &DisplayInfo) {
    {
        let mut state = lock(state);
        state.events.push(Event::Display(info.picture_index));
        state.display_thread = Some(thread::current().id());
    }
    callbacks.on_display(Some(info));
}

/// Dummy backend that can be used for any codec.
pub(crate) struct Backend {
    state: SharedState,
}

pub(crate) struct Context {
    id: u64,
}

pub(crate) struct Decoder {
    info: DecoderCreateInfo,
    statuses: Mutex<Vec<DecodeStatus>>,
}

impl Decoder {
    fn pitch(&self) -> u32 {
        (self.info.target_resolution.width + 63) & !63
    }
}

pub(crate) struct Picture {
    index: u32,
    second_field: bool,
}

impl Picture {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            second_field: false,
        }
    }

    pub fn second_field(index: u32) -> Self {
        Self {
            index,
            second_field: true,
        }
    }
}

impl PictureParams for Picture {
    fn picture_index(&self) -> u32 {
        self.index
    }

    fn is_second_field(&self) -> bool {
        self.second_field
    }
}

pub(crate) struct Parser {
    params: ParserParams,
    callbacks: Arc<dyn ParserCallbacks<Backend>>,
    reported_format: Option<VideoFormat>,
    in_use: Vec<bool>,
    pictures: u64,
    held: VecDeque<DisplayInfo>,
    worker: Option<JoinHandle<()>>,
}

impl Backend {
    /// Packets starting with this byte are rejected by the parser.
    pub const CORRUPT_PACKET_MARKER: u8 = 0xff;

    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                faults: Default::default(),
                min_decode_surfaces: 4,
                format: None,
                reorder: false,
                deferred_display: None,
                dropped_display: None,
                events: vec![],
                counters: Default::default(),
                next_context: 1,
                submit_attempts: 0,
                map_attempts: 0,
                copy_attempts: 0,
                decoders_created: 0,
                decoder_info: None,
                display_thread: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn record(&self, event: Event) {
        self.lock().events.push(event);
    }

    /// Value of every byte of the frames decoded into `picture_index`.
    pub fn fill_byte(picture_index: u32) -> u8 {
        0x10u8.wrapping_add(picture_index as u8)
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    pub fn decoders_created(&self) -> usize {
        self.lock().decoders_created
    }

    /// Parameters of the last decoder created.
    pub fn decoder_create_info(&self) -> Option<DecoderCreateInfo> {
        self.lock().decoder_info
    }

    /// Thread the last display callback was invoked from.
    pub fn display_thread(&self) -> Option<ThreadId> {
        self.lock().display_thread
    }

    /// Whether a context is current on the calling thread.
    pub fn has_current_context(&self) -> bool {
        CURRENT_CONTEXTS.with(|c| !c.borrow().is_empty())
    }

    pub fn set_min_decode_surfaces(&self, count: u32) {
        self.lock().min_decode_surfaces = count;
    }

    /// Overrides the format reported by the parser.
    pub fn set_format(&self, format: VideoFormat) {
        self.lock().format = Some(format);
    }

    /// Displays pictures by pairs in reverse submission order.
    pub fn set_reorder(&self, reorder: bool) {
        self.lock().reorder = reorder;
    }

    /// Displays every picture once the next one is decoded, and the last one `delay` after the
    /// end of the stream, from another thread.
    pub fn defer_final_display(&self, delay: Duration) {
        self.lock().deferred_display = Some(delay);
    }

    /// Never displays the picture submitted in position `n`.
    pub fn drop_display_of(&self, n: u64) {
        self.lock().dropped_display = Some(n);
    }

    pub fn fail_init(&self, status: DriverStatus) {
        self.lock().faults.init = Some(status);
    }

    pub fn fail_create_context(&self, status: DriverStatus) {
        self.lock().faults.create_context = Some(status);
    }

    pub fn fail_caps_query(&self, fail: bool) {
        self.lock().faults.caps_query = fail;
    }

    pub fn fail_submit_at(&self, n: u64) {
        self.lock().faults.submit_at = Some(n);
    }

    pub fn fail_decode_at(&self, n: u64, status: DecodeStatus) {
        self.lock().faults.decode_at = Some((n, status));
    }

    pub fn fail_map_at(&self, n: u64) {
        self.lock().faults.map_at = Some(n);
    }

    pub fn fail_copy_at(&self, n: u64) {
        self.lock().faults.copy_at = Some(n);
    }

    /// Sets the decode outcome reported for the surface `index` of `decoder`.
    pub fn set_surface_status(&self, decoder: &Decoder, index: u32, status: DecodeStatus) {
        decoder.statuses.lock().unwrap()[index as usize] = status;
    }

    fn fixture_caps(query: &CapsQuery) -> DecodeCapabilities {
        use ChromaFormat::*;
        use Codec::*;

        let (max_size, max_macroblock_count, output_format_mask) =
            match (query.codec, query.chroma_format, query.bit_depth) {
                (H264, Yuv420, 8) => (4096, 65536, SurfaceFormat::Nv12.mask_bit()),
                (Hevc | Av1, Yuv420, 8 | 10) | (Hevc, Yuv420, 12) => (
                    8192,
                    262144,
                    SurfaceFormat::Nv12.mask_bit() | SurfaceFormat::P016.mask_bit(),
                ),
                (Hevc, Yuv444, 8 | 10 | 12) => (
                    8192,
                    262144,
                    SurfaceFormat::Yuv444.mask_bit() | SurfaceFormat::Yuv444_16Bit.mask_bit(),
                ),
                _ => return Default::default(),
            };

        DecodeCapabilities {
            is_supported: true,
            max_width: max_size,
            max_height: max_size,
            max_macroblock_count,
            min_width: 48,
            min_height: 16,
            output_format_mask,
            num_decoders: 1,
        }
    }

    fn stream_format(&self, codec: Codec) -> VideoFormat {
        let state = self.lock();
        state.format.unwrap_or(VideoFormat {
            codec,
            chroma_format: ChromaFormat::Yuv420,
            bit_depth: 8,
            coded_resolution: Resolution::from((1920, 1080)),
            display_area: Rect {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080,
            },
            frame_rate: (30, 1),
            progressive: true,
            min_num_decode_surfaces: state.min_decode_surfaces,
        })
    }

    fn parse_picture(&self, parser: &mut Parser, timestamp: Option<i64>) -> BackendResult<()> {
        let format = self.stream_format(parser.params.codec);
        if parser.reported_format != Some(format) {
            self.record(Event::Sequence);
            let num_surfaces = parser.callbacks.on_sequence(&format);
            if num_surfaces == 0 {
                return Err(status_error("cuvidParseVideoData", DriverStatus::Unknown));
            }
            parser.reported_format = Some(format);
            parser.in_use.resize(num_surfaces as usize, false);
        }

        let index = parser
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(BackendError::OutOfResources)?;
        parser.in_use[index] = true;
        let index = index as u32;

        let number = parser.pictures;
        parser.pictures += 1;

        if !parser.callbacks.on_decode(&Picture::new(index)) {
            return Err(status_error("cuvidParseVideoData", DriverStatus::Unknown));
        }

        let (reorder, deferred, dropped) = {
            let state = self.lock();
            (
                state.reorder,
                state.deferred_display.is_some(),
                state.dropped_display == Some(number),
            )
        };

        if dropped {
            parser.in_use[index as usize] = false;
            return Ok(());
        }

        parser.held.push_back(DisplayInfo {
            picture_index: index,
            progressive_frame: true,
            top_field_first: false,
            repeat_first_field: 0,
            timestamp: timestamp.unwrap_or(number as i64),
        });

        if reorder {
            if parser.held.len() == 2 {
                let first = parser.held.pop_front();
                let second = parser.held.pop_front();
                for info in [second, first].into_iter().flatten() {
                    self.display(parser, &info);
                }
            }
        } else {
            let keep = usize::from(deferred);
            while parser.held.len() > keep {
                if let Some(info) = parser.held.pop_front() {
                    self.display(parser, &info);
                }
            }
        }

        Ok(())
    }

    fn display(&self, parser: &mut Parser, info: &DisplayInfo) {
        parser.in_use[info.picture_index as usize] = false;
        display(&self.state, &parser.callbacks, info);
    }

    fn flush(&self, parser: &mut Parser) {
        let deferred = self.lock().deferred_display;
        let held: Vec<_> = parser.held.drain(..).collect();
        for info in &held {
            parser.in_use[info.picture_index as usize] = false;
        }

        match deferred {
            Some(delay) => {
                let state = Arc::clone(&self.state);
                let callbacks = Arc::clone(&parser.callbacks);
                parser.worker = Some(thread::spawn(move || {
                    thread::sleep(delay);
                    for info in &held {
                        display(&state, &callbacks, info);
                    }
                    callbacks.on_display(None);
                }));
            }
            None => {
                for info in &held {
                    display(&self.state, &parser.callbacks, info);
                }
                parser.callbacks.on_display(None);
            }
        }
    }
}

impl DecoderBackend for Backend {
    type Context = Context;
    type Parser = Parser;
    type Decoder = Decoder;
    type Picture = Picture;

    fn init(&self) -> BackendResult<()> {
        let mut state = self.lock();
        state.events.push(Event::Init);
        match state.faults.init {
            Some(status) => Err(status_error("cuInit", status)),
            None => Ok(()),
        }
    }

    fn devices(&self) -> BackendResult<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            ordinal: 0,
            name: "Dummy GPU".into(),
        }])
    }

    fn create_context(
        &self,
        _device: &DeviceInfo,
        _scheduling: ContextScheduling,
    ) -> BackendResult<Context> {
        let mut state = self.lock();
        if let Some(status) = state.faults.create_context {
            return Err(status_error("cuCtxCreate", status));
        }
        state.events.push(Event::CreateContext);
        let id = state.next_context;
        state.next_context += 1;
        Ok(Context { id })
    }

    fn api_version(&self, _context: &Context) -> BackendResult<u32> {
        Ok(12000)
    }

    fn push_context(&self, context: &Context) -> BackendResult<()> {
        CURRENT_CONTEXTS.with(|c| c.borrow_mut().push(context.id));
        self.lock().counters.pushes += 1;
        Ok(())
    }

    fn pop_context(&self) -> BackendResult<()> {
        match CURRENT_CONTEXTS.with(|c| c.borrow_mut().pop()) {
            Some(_) => {
                self.lock().counters.pops += 1;
                Ok(())
            }
            None => Err(status_error("cuCtxPopCurrent", DriverStatus::InvalidContext)),
        }
    }

    fn destroy_context(&self, _context: Context) -> BackendResult<()> {
        self.record(Event::DestroyContext);
        Ok(())
    }

    fn decoder_caps(&self, query: &CapsQuery) -> BackendResult<DecodeCapabilities> {
        require_context("cuvidGetDecoderCaps")?;
        let mut state = self.lock();
        state.events.push(Event::CapsQuery);
        if state.faults.caps_query {
            return Err(status_error("cuvidGetDecoderCaps", DriverStatus::InvalidValue));
        }
        Ok(Self::fixture_caps(query))
    }

    fn create_parser(
        &self,
        params: &ParserParams,
        callbacks: Arc<dyn ParserCallbacks<Self>>,
    ) -> BackendResult<Parser> {
        self.record(Event::CreateParser);
        Ok(Parser {
            params: *params,
            callbacks,
            reported_format: None,
            in_use: vec![],
            pictures: 0,
            held: Default::default(),
            worker: None,
        })
    }

    fn parse(&self, parser: &mut Parser, packet: &SourcePacket) -> BackendResult<()> {
        if packet.data.first() == Some(&Self::CORRUPT_PACKET_MARKER) {
            return Err(status_error("cuvidParseVideoData", DriverStatus::InvalidValue));
        }
        if !packet.data.is_empty() {
            self.parse_picture(parser, packet.timestamp)?;
        }
        if packet.end_of_stream {
            self.flush(parser);
        }
        Ok(())
    }

    fn destroy_parser(&self, mut parser: Parser) -> BackendResult<()> {
        if let Some(worker) = parser.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("display thread panicked"))?;
        }
        self.record(Event::DestroyParser);
        Ok(())
    }

    fn create_decoder(&self, info: &DecoderCreateInfo) -> BackendResult<Decoder> {
        require_context("cuvidCreateDecoder")?;
        let mut state = self.lock();
        state.events.push(Event::CreateDecoder);
        state.decoders_created += 1;
        state.decoder_info = Some(*info);
        Ok(Decoder {
            info: *info,
            statuses: Mutex::new(vec![
                DecodeStatus::Success;
                info.num_decode_surfaces as usize
            ]),
        })
    }

    fn decode_picture(&self, decoder: &Decoder, picture: &Picture) -> BackendResult<()> {
        require_context("cuvidDecodePicture")?;
        let mut state = self.lock();
        let attempt = state.submit_attempts;
        state.submit_attempts += 1;
        if state.faults.submit_at == Some(attempt) {
            return Err(status_error("cuvidDecodePicture", DriverStatus::InvalidValue));
        }

        let mut statuses = decoder.statuses.lock().unwrap();
        let slot = statuses
            .get_mut(picture.index as usize)
            .ok_or_else(|| status_error("cuvidDecodePicture", DriverStatus::InvalidValue))?;
        *slot = match state.faults.decode_at {
            Some((n, status)) if n == state.counters.decodes => status,
            _ => DecodeStatus::Success,
        };

        state.counters.decodes += 1;
        state.events.push(Event::Decode(picture.index));
        Ok(())
    }

    fn decode_status(&self, decoder: &Decoder, picture_index: u32) -> BackendResult<DecodeStatus> {
        require_context("cuvidGetDecodeStatus")?;
        decoder
            .statuses
            .lock()
            .unwrap()
            .get(picture_index as usize)
            .copied()
            .ok_or_else(|| status_error("cuvidGetDecodeStatus", DriverStatus::InvalidValue))
    }

    fn map_frame(
        &self,
        decoder: &Decoder,
        picture_index: u32,
        _params: &ProcParams,
    ) -> BackendResult<MappedFrame> {
        require_context("cuvidMapVideoFrame")?;
        let mut state = self.lock();
        let attempt = state.map_attempts;
        state.map_attempts += 1;
        if state.faults.map_at == Some(attempt) {
            return Err(status_error("cuvidMapVideoFrame", DriverStatus::MapFailed));
        }

        state.counters.maps += 1;
        state.events.push(Event::Map(picture_index));
        Ok(MappedFrame {
            device_ptr: SURFACE_BASE + picture_index as u64 * SURFACE_STRIDE,
            pitch: decoder.pitch(),
        })
    }

    fn unmap_frame(&self, _decoder: &Decoder, frame: MappedFrame) -> BackendResult<()> {
        require_context("cuvidUnmapVideoFrame")?;
        let mut state = self.lock();
        state.counters.unmaps += 1;
        state.events.push(Event::Unmap(
            ((frame.device_ptr - SURFACE_BASE) / SURFACE_STRIDE) as u32,
        ));
        Ok(())
    }

    fn copy_to_host(&self, frame: &MappedFrame, dst: &mut [u8]) -> BackendResult<()> {
        require_context("cuMemcpyDtoH")?;
        let mut state = self.lock();
        let attempt = state.copy_attempts;
        state.copy_attempts += 1;
        if state.faults.copy_at == Some(attempt) {
            return Err(status_error("cuMemcpyDtoH", DriverStatus::IllegalAddress));
        }

        let picture_index = ((frame.device_ptr - SURFACE_BASE) / SURFACE_STRIDE) as u32;
        dst.fill(Self::fill_byte(picture_index));
        state.counters.copies += 1;
        Ok(())
    }

    fn destroy_decoder(&self, _decoder: Decoder) -> BackendResult<()> {
        require_context("cuvidDestroyDecoder")?;
        self.record(Event::DestroyDecoder);
        Ok(())
    }
}
