// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Negotiation of the decode capabilities of the hardware for a given stream.

use crate::backend::CapsQuery;
use crate::backend::DecoderBackend;
use crate::decoder::context::HardwareContext;
use crate::decoder::Error;
use crate::decoder::Result;
use crate::ChromaFormat;
use crate::Codec;
use crate::Resolution;
use crate::StreamDescriptor;
use crate::SurfaceFormat;

/// Bit depths the pipeline accepts.
const SUPPORTED_BIT_DEPTHS: [u8; 3] = [8, 10, 12];

/// Decode capabilities of the hardware for one codec, chroma format and bit depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeCapabilities {
    pub is_supported: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub max_macroblock_count: u32,
    pub min_width: u32,
    pub min_height: u32,
    /// Bitmask of the supported output surface formats, see [`SurfaceFormat::mask_bit`]. 0 if
    /// the driver does not report it.
    pub output_format_mask: u16,
    /// Number of hardware decoders on the device.
    pub num_decoders: u32,
}

/// A hardware limit exceeded by a stream.
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitViolation {
    #[error("resolution {actual} exceeds the maximum of {max}")]
    ResolutionTooLarge { actual: Resolution, max: Resolution },
    #[error("{actual} macroblocks exceed the maximum of {max}")]
    TooManyMacroblocks { actual: u32, max: u32 },
    #[error("resolution {actual} is below the minimum of {min}")]
    ResolutionTooSmall { actual: Resolution, min: Resolution },
    #[error("output format {0:?} is not supported")]
    OutputFormat(SurfaceFormat),
}

impl DecodeCapabilities {
    pub fn max_resolution(&self) -> Resolution {
        Resolution::from((self.max_width, self.max_height))
    }

    pub fn min_resolution(&self) -> Resolution {
        Resolution::from((self.min_width, self.min_height))
    }

    /// Returns the limits of `self` that a stream of `descriptor` violates, in the order they
    /// are checked.
    pub fn limit_violations(&self, descriptor: &StreamDescriptor) -> Vec<LimitViolation> {
        let mut violations = vec![];
        let resolution = descriptor.resolution();

        if !self.max_resolution().can_contain(resolution) {
            violations.push(LimitViolation::ResolutionTooLarge {
                actual: resolution,
                max: self.max_resolution(),
            });
        }

        let macroblocks = resolution.macroblock_count();
        if macroblocks > self.max_macroblock_count {
            violations.push(LimitViolation::TooManyMacroblocks {
                actual: macroblocks,
                max: self.max_macroblock_count,
            });
        }

        if !resolution.can_contain(self.min_resolution()) {
            violations.push(LimitViolation::ResolutionTooSmall {
                actual: resolution,
                min: self.min_resolution(),
            });
        }

        let surface_format = descriptor.surface_format();
        if self.output_format_mask != 0 && self.output_format_mask & surface_format.mask_bit() == 0
        {
            violations.push(LimitViolation::OutputFormat(surface_format));
        }

        violations
    }

    /// Checks whether a decoder can be created for `descriptor`.
    ///
    /// A stream the hardware does not support is always rejected. Limit violations are only
    /// fatal if `strict` is set, in which case the first one is returned.
    pub fn ensure_decodable(&self, descriptor: &StreamDescriptor, strict: bool) -> Result<()> {
        if !self.is_supported {
            return Err(Error::UnsupportedFormat(format!(
                "{:?} {:?} {}-bit is not supported by the hardware",
                descriptor.codec, descriptor.chroma_format, descriptor.bit_depth
            )));
        }

        match self.limit_violations(descriptor).into_iter().next() {
            Some(violation) if strict => Err(Error::CapabilityExceeded(violation)),
            _ => Ok(()),
        }
    }
}

/// Checks that `descriptor` describes a stream of one of the formats we know how to map to a
/// hardware decoder and returns the matching capability query.
pub fn validate_descriptor(descriptor: &StreamDescriptor) -> Result<CapsQuery> {
    if descriptor.codec == Codec::Unsupported {
        return Err(Error::UnsupportedFormat("unsupported codec".into()));
    }
    // 4:2:2 has no output surface format: semi-planar surfaces hold 4:2:0 chroma.
    if matches!(
        descriptor.chroma_format,
        ChromaFormat::Yuv422 | ChromaFormat::Unsupported
    ) {
        return Err(Error::UnsupportedFormat(format!(
            "unsupported chroma format {:?}",
            descriptor.chroma_format
        )));
    }
    if !SUPPORTED_BIT_DEPTHS.contains(&descriptor.bit_depth) {
        return Err(Error::UnsupportedFormat(format!(
            "unsupported bit depth {}",
            descriptor.bit_depth
        )));
    }
    if descriptor.width == 0 || descriptor.height == 0 {
        return Err(Error::UnsupportedFormat(format!(
            "invalid resolution {}",
            descriptor.resolution()
        )));
    }

    Ok(CapsQuery {
        codec: descriptor.codec,
        chroma_format: descriptor.chroma_format,
        bit_depth: descriptor.bit_depth,
    })
}

/// Queries the capabilities of the hardware behind `context` for `descriptor`.
///
/// Every condition that prevents decoding `descriptor` is logged, but only a failure of the
/// query itself is returned as an error. Callers decide what to do with the result using
/// [`DecodeCapabilities::ensure_decodable`].
pub fn negotiate<B: DecoderBackend>(
    context: &HardwareContext<B>,
    descriptor: &StreamDescriptor,
) -> Result<DecodeCapabilities> {
    let query = validate_descriptor(descriptor)?;

    let caps = {
        let _guard = context.activate()?;
        context
            .backend()
            .decoder_caps(&query)
            .map_err(|source| Error::Backend {
                stage: "query decoder capabilities",
                source,
            })?
    };

    if !caps.is_supported {
        log::warn!(
            "{:?} {:?} {}-bit is not supported by the hardware",
            query.codec,
            query.chroma_format,
            query.bit_depth
        );
    } else {
        for violation in caps.limit_violations(descriptor) {
            log::warn!("{:?} stream: {}", query.codec, violation);
        }
    }

    log::debug!("capabilities for {:?}: {:?}", descriptor, caps);

    Ok(caps)
}
