// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tracking of the decode surfaces of a decoder and extraction of the pictures they hold.

use crate::backend::BackendResult;
use crate::backend::DecoderBackend;
use crate::backend::DisplayInfo;
use crate::backend::MappedFrame;
use crate::backend::ProcParams;
use crate::decoded_frame_size;
use crate::decoder::context::HardwareContext;
use crate::decoder::DecodedFrame;
use crate::decoder::Error;
use crate::decoder::FrameSink;
use crate::decoder::Result;
use crate::ChromaFormat;
use crate::Rect;
use crate::SurfaceFormat;

/// Where the picture decoded into a surface currently is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// No picture uses the surface.
    Free,
    /// A picture has been submitted for decoding into the surface.
    Submitted,
    /// The parser reported the picture as ready for display.
    Decoded,
    /// The surface is mapped for reading.
    Mapped,
    /// The picture has been copied out and handed to the sink.
    Extracted,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("picture index {index} is outside of the pool of {capacity} surfaces")]
    OutOfRange { index: u32, capacity: usize },
    #[error("surface {index} is busy ({state:?})")]
    Busy { index: u32, state: SlotState },
    #[error("surface {index} has no picture waiting for display ({state:?})")]
    NotSubmitted { index: u32, state: SlotState },
}

/// The fixed set of surfaces a decoder was created with.
///
/// At most one picture can be in flight per surface. A picture is in flight from its
/// submission until it is released after display.
#[derive(Debug, Default)]
pub struct SurfacePool {
    slots: Vec<SlotState>,
}

impl SurfacePool {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: vec![SlotState::Free; capacity as usize],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of pictures currently in flight.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| **s != SlotState::Free).count()
    }

    pub fn state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).copied()
    }

    fn slot_mut(&mut self, index: u32) -> std::result::Result<&mut SlotState, PoolError> {
        let capacity = self.slots.len();
        self.slots
            .get_mut(index as usize)
            .ok_or(PoolError::OutOfRange { index, capacity })
    }

    /// Marks the surface at `index` as the target of a new decode.
    ///
    /// The second field of a picture goes to the surface of its first field. The parser decides
    /// when a surface can be reused: a picture that is decoded but never displayed leaves its
    /// surface submitted, and the next picture decoded into it replaces it. Surfaces being
    /// displayed are busy.
    pub fn submit(&mut self, index: u32, second_field: bool) -> std::result::Result<(), PoolError> {
        let slot = self.slot_mut(index)?;
        match *slot {
            SlotState::Free => {
                *slot = SlotState::Submitted;
                Ok(())
            }
            SlotState::Submitted => {
                if !second_field {
                    log::debug!("surface {} reused before its picture was displayed", index);
                }
                Ok(())
            }
            state => Err(PoolError::Busy { index, state }),
        }
    }

    /// Marks the picture at `index` as ready for display.
    pub fn begin_display(&mut self, index: u32) -> std::result::Result<(), PoolError> {
        let slot = self.slot_mut(index)?;
        match *slot {
            SlotState::Submitted => {
                *slot = SlotState::Decoded;
                Ok(())
            }
            state => Err(PoolError::NotSubmitted { index, state }),
        }
    }

    fn set_state(&mut self, index: u32, state: SlotState) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = state;
        }
    }

    /// Returns the surface at `index` to the pool.
    pub fn release(&mut self, index: u32) {
        self.set_state(index, SlotState::Free);
    }
}

/// Properties shared by all the frames produced by a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
    pub surface_format: SurfaceFormat,
    pub display_area: Rect,
}

/// A decoded surface mapped for reading. It is unmapped when dropped.
pub struct MappedSurface<'a, B: DecoderBackend> {
    backend: &'a B,
    decoder: &'a B::Decoder,
    frame: MappedFrame,
    mapped: bool,
}

impl<'a, B: DecoderBackend> MappedSurface<'a, B> {
    /// Maps the surface of `picture_index`. The context must be current.
    pub fn map(
        backend: &'a B,
        decoder: &'a B::Decoder,
        picture_index: u32,
        params: &ProcParams,
    ) -> BackendResult<Self> {
        let frame = backend.map_frame(decoder, picture_index, params)?;

        Ok(Self {
            backend,
            decoder,
            frame,
            mapped: true,
        })
    }

    pub fn frame(&self) -> &MappedFrame {
        &self.frame
    }

    /// Unmaps the surface, reporting the failure the destructor would only log.
    pub fn unmap(mut self) -> BackendResult<()> {
        self.mapped = false;
        self.backend.unmap_frame(self.decoder, self.frame)
    }
}

impl<'a, B: DecoderBackend> Drop for MappedSurface<'a, B> {
    fn drop(&mut self) {
        if self.mapped {
            if let Err(e) = self.backend.unmap_frame(self.decoder, self.frame) {
                log::error!("failed to unmap surface: {}", e);
            }
        }
    }
}

/// Copies the picture described by `info` out of its surface and hands it to `sink`.
///
/// The surface is unmapped and returned to `pool` whatever the outcome. An error only
/// concerns this picture.
pub fn extract_frame<B: DecoderBackend>(
    context: &HardwareContext<B>,
    decoder: &B::Decoder,
    pool: &mut SurfacePool,
    layout: &FrameLayout,
    info: &DisplayInfo,
    sink: &mut dyn FrameSink,
) -> Result<()> {
    let ret = extract_mapped(context, decoder, pool, layout, info, sink);
    pool.release(info.picture_index);
    ret
}

fn extract_mapped<B: DecoderBackend>(
    context: &HardwareContext<B>,
    decoder: &B::Decoder,
    pool: &mut SurfacePool,
    layout: &FrameLayout,
    info: &DisplayInfo,
    sink: &mut dyn FrameSink,
) -> Result<()> {
    let picture_index = info.picture_index;
    let extract_failure = |stage| move |source| Error::ExtractFailure {
        picture_index,
        stage,
        source,
    };

    let _guard = context.activate()?;
    let backend = &**context.backend();

    let surface = MappedSurface::map(backend, decoder, picture_index, &ProcParams::from(info))
        .map_err(extract_failure("map surface"))?;
    pool.set_state(picture_index, SlotState::Mapped);

    let status = backend
        .decode_status(decoder, picture_index)
        .map_err(extract_failure("query decode status"))?;
    if status.is_error() {
        return Err(Error::DecodeFailure {
            picture_index,
            status,
        });
    }

    let pitch = surface.frame().pitch;
    let size = decoded_frame_size(pitch as usize, layout.height as usize, layout.chroma_format);
    let mut data = vec![0u8; size];
    backend
        .copy_to_host(surface.frame(), &mut data)
        .map_err(extract_failure("copy to host"))?;
    pool.set_state(picture_index, SlotState::Extracted);

    sink.on_frame(DecodedFrame {
        data,
        width: layout.width,
        height: layout.height,
        pitch,
        chroma_format: layout.chroma_format,
        bit_depth: layout.bit_depth,
        surface_format: layout.surface_format,
        display_area: layout.display_area,
        picture_index,
        timestamp: info.timestamp,
    });

    // The frame was delivered, so a failure here only leaks the mapping.
    if let Err(e) = surface.unmap() {
        log::error!("failed to unmap surface {}: {}", picture_index, e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::dummy::Backend;
    use crate::backend::dummy::Event;
    use crate::backend::ContextScheduling;
    use crate::backend::DecodeStatus;
    use crate::backend::DecoderCreateInfo;
    use crate::backend::DeinterlaceMode;
    use crate::Codec;
    use crate::Resolution;

    #[test]
    fn pool_lifecycle() {
        let mut pool = SurfacePool::new(2);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.in_flight(), 0);

        pool.submit(0, false).unwrap();
        assert_eq!(pool.state(0), Some(SlotState::Submitted));
        assert_eq!(pool.in_flight(), 1);

        // Second field of the same picture.
        pool.submit(0, true).unwrap();
        // New picture replacing one that was never displayed.
        pool.submit(0, false).unwrap();
        assert_eq!(pool.state(0), Some(SlotState::Submitted));
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(
            pool.submit(2, false),
            Err(PoolError::OutOfRange {
                index: 2,
                capacity: 2
            })
        );

        assert_eq!(
            pool.begin_display(1),
            Err(PoolError::NotSubmitted {
                index: 1,
                state: SlotState::Free
            })
        );
        pool.begin_display(0).unwrap();
        assert_eq!(pool.state(0), Some(SlotState::Decoded));
        assert!(pool.submit(0, true).is_err());
        assert_eq!(
            pool.submit(0, false),
            Err(PoolError::Busy {
                index: 0,
                state: SlotState::Decoded
            })
        );

        pool.release(0);
        assert_eq!(pool.in_flight(), 0);
        pool.submit(0, false).unwrap();
    }

    struct Fixture {
        backend: Arc<Backend>,
        context: HardwareContext<Backend>,
        decoder: <Backend as DecoderBackend>::Decoder,
        pool: SurfacePool,
        layout: FrameLayout,
    }

    impl Fixture {
        fn new(chroma_format: ChromaFormat) -> Self {
            let backend = Arc::new(Backend::new());
            let context =
                HardwareContext::acquire(Arc::clone(&backend), 0, ContextScheduling::Auto)
                    .unwrap();
            let resolution = Resolution::from((1920, 1080));
            let surface_format = SurfaceFormat::for_stream(chroma_format, 8);
            let display_area = Rect {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080,
            };
            let decoder = {
                let _guard = context.activate().unwrap();
                backend
                    .create_decoder(&DecoderCreateInfo {
                        codec: Codec::Hevc,
                        chroma_format,
                        bit_depth: 8,
                        coded_resolution: resolution,
                        max_resolution: resolution,
                        target_resolution: resolution,
                        display_area,
                        num_decode_surfaces: 4,
                        num_output_surfaces: 1,
                        surface_format,
                        deinterlace_mode: DeinterlaceMode::Adaptive,
                    })
                    .unwrap()
            };

            Self {
                backend,
                context,
                decoder,
                pool: SurfacePool::new(4),
                layout: FrameLayout {
                    width: 1920,
                    height: 1080,
                    chroma_format,
                    bit_depth: 8,
                    surface_format,
                    display_area,
                },
            }
        }

        /// Submits and decodes a picture in `index` with the given outcome.
        fn decode(&mut self, index: u32, status: DecodeStatus) {
            self.pool.submit(index, false).unwrap();
            self.backend.set_surface_status(&self.decoder, index, status);
            self.pool.begin_display(index).unwrap();
        }

        fn extract(&mut self, index: u32, frames: &mut Vec<DecodedFrame>) -> Result<()> {
            let info = DisplayInfo {
                picture_index: index,
                progressive_frame: true,
                timestamp: 40 * index as i64,
                ..Default::default()
            };
            extract_frame(
                &self.context,
                &self.decoder,
                &mut self.pool,
                &self.layout,
                &info,
                &mut |frame: DecodedFrame| frames.push(frame),
            )
        }
    }

    #[test]
    fn extract_copies_the_whole_surface() {
        let mut fixture = Fixture::new(ChromaFormat::Yuv420);
        let mut frames = vec![];

        fixture.decode(2, DecodeStatus::Success);
        fixture.extract(2, &mut frames).unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.pitch, 1920);
        assert_eq!(frame.data.len(), 3_110_400);
        assert_eq!(frame.picture_index, 2);
        assert_eq!(frame.timestamp, 80);
        assert!(frame.data.iter().all(|b| *b == Backend::fill_byte(2)));

        assert_eq!(fixture.pool.state(2), Some(SlotState::Free));
        let counters = fixture.backend.counters();
        assert_eq!((counters.maps, counters.unmaps), (1, 1));
        assert_eq!(counters.pushes, counters.pops);
    }

    #[test]
    fn extract_444_frame_size() {
        let mut fixture = Fixture::new(ChromaFormat::Yuv444);
        let mut frames = vec![];

        fixture.decode(0, DecodeStatus::Success);
        fixture.extract(0, &mut frames).unwrap();

        assert_eq!(frames[0].data.len(), 6_220_800);
        assert_eq!(frames[0].surface_format, SurfaceFormat::Yuv444);
    }

    #[test]
    fn decode_errors_unmap_and_release() {
        let mut fixture = Fixture::new(ChromaFormat::Yuv420);
        let mut frames = vec![];

        for (index, status) in [(0, DecodeStatus::Error), (1, DecodeStatus::ErrorConcealed)] {
            fixture.decode(index, status);
            let err = fixture.extract(index, &mut frames).unwrap_err();
            assert!(matches!(
                err,
                Error::DecodeFailure { picture_index, status: s } if picture_index == index && s == status
            ));
            assert_eq!(fixture.pool.state(index), Some(SlotState::Free));
        }

        // The session goes on with the next picture.
        fixture.decode(2, DecodeStatus::Success);
        fixture.extract(2, &mut frames).unwrap();

        assert_eq!(frames.len(), 1);
        let counters = fixture.backend.counters();
        assert_eq!((counters.maps, counters.unmaps), (3, 3));
    }

    #[test]
    fn copy_failure_unmaps() {
        let mut fixture = Fixture::new(ChromaFormat::Yuv420);
        let mut frames = vec![];
        fixture.backend.fail_copy_at(0);

        fixture.decode(1, DecodeStatus::Success);
        let err = fixture.extract(1, &mut frames).unwrap_err();
        assert!(matches!(
            err,
            Error::ExtractFailure {
                picture_index: 1,
                stage: "copy to host",
                ..
            }
        ));
        assert!(frames.is_empty());
        assert_eq!(fixture.pool.state(1), Some(SlotState::Free));
        assert_eq!(fixture.backend.events().last(), Some(&Event::Unmap(1)));
    }

    #[test]
    fn map_failure_releases_without_unmap() {
        let mut fixture = Fixture::new(ChromaFormat::Yuv420);
        let mut frames = vec![];
        fixture.backend.fail_map_at(0);

        fixture.decode(3, DecodeStatus::Success);
        let err = fixture.extract(3, &mut frames).unwrap_err();
        assert!(matches!(
            err,
            Error::ExtractFailure {
                stage: "map surface",
                ..
            }
        ));
        assert!(err.status().is_some());
        assert_eq!(fixture.pool.state(3), Some(SlotState::Free));

        let counters = fixture.backend.counters();
        assert_eq!((counters.maps, counters.unmaps), (0, 0));
        assert_eq!(counters.pushes, counters.pops);
    }
}
