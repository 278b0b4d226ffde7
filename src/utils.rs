// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Playback helpers shared by the demo and the tests: a loop feeding a whole [`PacketSource`] to
//! a session, and a sink writing decoded frames without their row padding.

use std::io;
use std::io::Write;

use crate::backend::DecoderBackend;
use crate::decoded_frame_size;
use crate::decoder::session::Session;
use crate::decoder::DecodedFrame;
use crate::decoder::Error;
use crate::decoder::FrameSink;
use crate::decoder::Result;
use crate::decoder::SessionStats;
use crate::source::PacketSource;
use crate::ChromaFormat;
use crate::SurfaceFormat;

/// Feeds every packet of `source` to `session`, then signals the end of the stream and closes
/// the session.
///
/// Errors that only concern one packet are logged and decoding goes on. The first fatal error, or
/// any error once the session stopped accepting packets, ends the loop and is returned after the
/// session has been closed.
pub fn decode_stream<B, S>(session: &mut Session<B>, source: &mut S) -> Result<SessionStats>
where
    B: DecoderBackend,
    S: PacketSource + ?Sized,
{
    let mut num_packets = 0u64;

    let fed = loop {
        let packet = match source.next_packet() {
            Some(packet) => packet,
            None => break session.end_of_stream(),
        };

        let result = match packet.timestamp {
            Some(timestamp) => session.feed_at(&packet.data, timestamp),
            None => session.feed(&packet.data),
        };
        num_packets += 1;

        match result {
            Ok(()) => (),
            Err(e) if e.is_recoverable() && session.state().accepts_packets() => {
                log::warn!("packet {} ({} bytes): {}", num_packets, packet.data.len(), e)
            }
            Err(e) => break Err(e),
        }
    };

    let closed = session.close();
    if let Err(e) = fed {
        if let Err(close_error) = closed {
            log::error!("error while closing the session: {}", close_error);
        }
        return Err(e);
    }
    closed?;

    let stats = session.stats();
    log::info!(
        "decoded {} frames out of {} packets",
        stats.frames_emitted,
        num_packets
    );
    Ok(stats)
}

/// Number of bytes of one row of visible samples.
fn row_size(frame: &DecodedFrame) -> usize {
    let bytes_per_sample = match frame.surface_format {
        SurfaceFormat::Nv12 | SurfaceFormat::Yuv444 => 1,
        SurfaceFormat::P016 | SurfaceFormat::Yuv444_16Bit => 2,
    };

    frame.width as usize * bytes_per_sample
}

/// Number of rows of all the planes of `frame`.
fn num_rows(frame: &DecodedFrame) -> usize {
    let height = frame.height as usize;
    match frame.chroma_format {
        ChromaFormat::Yuv444 => height * 3,
        _ => height + (height + 1) / 2,
    }
}

/// Writes the content of decoded frames to `W`, one frame after the other, dropping the padding
/// at the end of each row.
///
/// Write errors cannot be reported from the decoding callback: the first one is kept, further
/// frames are dropped, and the error is returned by [`FrameWriter::into_inner`].
pub struct FrameWriter<W: Write + Send> {
    writer: W,
    frames_written: u64,
    error: Option<io::Error>,
}

impl<W: Write + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames_written: 0,
            error: None,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Returns the underlying writer, or the first error met while writing.
    pub fn into_inner(mut self) -> io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_frame(&mut self, frame: &DecodedFrame) -> io::Result<()> {
        let pitch = frame.pitch as usize;
        let row_size = row_size(frame);
        let expected = decoded_frame_size(pitch, frame.height as usize, frame.chroma_format);

        if row_size > pitch || frame.data.len() < expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame {} holds {} bytes with a pitch of {}, {} rows of {} bytes expected",
                    frame.picture_index,
                    frame.data.len(),
                    pitch,
                    num_rows(frame),
                    row_size
                ),
            ));
        }

        for row in frame.data.chunks(pitch).take(num_rows(frame)) {
            self.writer.write_all(&row[..row_size])?;
        }

        Ok(())
    }
}

impl<W: Write + Send> FrameSink for FrameWriter<W> {
    fn on_frame(&mut self, frame: DecodedFrame) {
        if self.error.is_some() {
            return;
        }

        match self.write_frame(&frame) {
            Ok(()) => self.frames_written += 1,
            Err(e) => {
                log::error!("failed to write frame {}: {}", frame.picture_index, e);
                self.error = Some(e);
            }
        }
    }

    fn on_error(&mut self, error: &Error) {
        log::warn!("frame lost: {}", error);
    }
}
