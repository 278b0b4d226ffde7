// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! nvdec, a simple decoder program using nvdec-pipeline. Capable of computing MD5 checksums of
//! the decoded frames and writing them to a file.

use std::fs::File;
use std::io::BufWriter;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use bytes::Bytes;

use nvdec_pipeline::backend::nvdec::NvdecBackend;
use nvdec_pipeline::decoder::session::Session;
use nvdec_pipeline::decoder::DecodedFrame;
use nvdec_pipeline::decoder::Error;
use nvdec_pipeline::decoder::FrameSink;
use nvdec_pipeline::decoder::SessionConfig;
use nvdec_pipeline::source;
use nvdec_pipeline::source::FilteredSource;
use nvdec_pipeline::source::PacketSource;
use nvdec_pipeline::utils::decode_stream;
use nvdec_pipeline::utils::FrameWriter;
use nvdec_pipeline::StreamDescriptor;

use crate::mkv::MkvSource;
use crate::util::Args;
use crate::util::Md5Computation;

mod mkv;
mod util;

/// Outputs of the decoding, shared between the frame sink and `main`.
struct Outputs {
    file: Option<FrameWriter<BufWriter<File>>>,
    stream_md5: Option<FrameWriter<md5::Context>>,
    frame_md5: bool,
}

struct OutputSink(Arc<Mutex<Outputs>>);

impl FrameSink for OutputSink {
    fn on_frame(&mut self, frame: DecodedFrame) {
        let mut outputs = self.0.lock().unwrap();

        if outputs.frame_md5 {
            let mut writer = FrameWriter::new(Vec::new());
            writer.on_frame(frame.clone());
            match writer.into_inner() {
                Ok(data) => println!("{:x}", md5::compute(&data)),
                Err(e) => log::error!("cannot checksum frame {}: {}", frame.picture_index, e),
            }
        }
        if let Some(md5) = outputs.stream_md5.as_mut() {
            md5.on_frame(frame.clone());
        }
        if let Some(file) = outputs.file.as_mut() {
            file.on_frame(frame);
        }
    }

    fn on_error(&mut self, error: &Error) {
        log::warn!("frame lost: {}", error);
    }
}

/// Opens the input file, selecting the source from the container signature.
fn open_input(args: &Args) -> anyhow::Result<(StreamDescriptor, Box<dyn PacketSource>)> {
    let mut header = [0u8; 4];
    File::open(&args.input)
        .with_context(|| format!("error opening {}", args.input.display()))?
        .read(&mut header)?;

    if header != mkv::MAGIC {
        return source::open(&args.input);
    }

    let data = Bytes::from(std::fs::read(&args.input)?);
    let (mkv, descriptor, filter) = MkvSource::new(data)?;
    let source: Box<dyn PacketSource> = match filter {
        Some(filter) => Box::new(FilteredSource::new(mkv, filter)),
        None => Box::new(mkv),
    };

    Ok((descriptor, source))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let (descriptor, mut source) = open_input(&args)?;
    log::info!("decoding {} as {:?}", args.input.display(), descriptor);

    let file = match &args.output {
        Some(path) => Some(FrameWriter::new(BufWriter::new(
            File::create(path).context("error creating output file")?,
        ))),
        None => None,
    };
    let outputs = Arc::new(Mutex::new(Outputs {
        file,
        stream_md5: (args.compute_md5 == Some(Md5Computation::Stream))
            .then(|| FrameWriter::new(md5::Context::new())),
        frame_md5: args.compute_md5 == Some(Md5Computation::Frame),
    }));

    let config = SessionConfig {
        device_ordinal: args.device,
        deinterlace_mode: args.deinterlace,
        extra_decode_surfaces: args.extra_surfaces,
        max_display_delay: args.display_delay,
        strict_capabilities: args.strict,
        ..Default::default()
    };

    let backend = Arc::new(NvdecBackend::load().context("failed to load the NVDEC libraries")?);
    let mut session = Session::init(
        backend,
        &descriptor,
        config,
        OutputSink(Arc::clone(&outputs)),
    )?;
    let stats = decode_stream(&mut session, &mut source)?;
    log::info!("{:?}", stats);
    drop(session);

    let mut outputs = outputs.lock().unwrap();
    if let Some(file) = outputs.file.take() {
        let frames = file.frames_written();
        file.into_inner().context("failed to write the output file")?;
        log::info!("wrote {} frames", frames);
    }
    if let Some(md5) = outputs.stream_md5.take() {
        println!("{:x}", md5.into_inner()?.compute());
    }

    Ok(())
}
