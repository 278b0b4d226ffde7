// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Cursor;

use bytes::Buf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ReadError {
    #[error("reader ran out of bits")]
    OutOfBits,
    #[error("more than 31 ({0}) bits were requested")]
    TooManyBitsRequested(usize),
    #[error("failed to convert read input to target type")]
    ConversionFailed,
    #[error("exp-Golomb code longer than 32 bits")]
    InvalidExpGolomb,
    #[error("value out of bounds: expected {min} - {max}, got {value}")]
    OutOfBounds { min: i64, max: i64, value: i64 },
}

pub(crate) type ReadResult<T> = Result<T, ReadError>;

/// A bit reader for H.264 RBSP data. Emulation-prevention bytes are skipped transparently.
pub(crate) struct NaluReader<'a> {
    data: Cursor<&'a [u8]>,
    /// First unread bit is at position 8 - `bits_left_in_byte`.
    curr_byte: u32,
    bits_left_in_byte: usize,
    /// Last two bytes read, for emulation-prevention detection.
    prev_two_bytes: u32,
    num_epb: usize,
}

impl<'a> NaluReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data: Cursor::new(data),
            curr_byte: 0,
            bits_left_in_byte: 0,
            prev_two_bytes: 0xffff,
            num_epb: 0,
        }
    }

    pub fn read_bit(&mut self) -> ReadResult<bool> {
        Ok(self.read_bits::<u32>(1)? == 1)
    }

    /// Reads up to 31 bits.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> ReadResult<U> {
        if num_bits > 31 {
            return Err(ReadError::TooManyBitsRequested(num_bits));
        }

        let mut bits_left = num_bits;
        let mut out = 0u32;

        while self.bits_left_in_byte < bits_left {
            out |= self.curr_byte << (bits_left - self.bits_left_in_byte);
            bits_left -= self.bits_left_in_byte;
            self.next_byte()?;
        }

        out |= self.curr_byte >> (self.bits_left_in_byte - bits_left);
        out &= (1 << num_bits) - 1;
        self.bits_left_in_byte -= bits_left;

        U::try_from(out).map_err(|_| ReadError::ConversionFailed)
    }

    pub fn skip_bits(&mut self, mut num_bits: usize) -> ReadResult<()> {
        while num_bits > 0 {
            let n = std::cmp::min(num_bits, 31);
            self.read_bits::<u32>(n)?;
            num_bits -= n;
        }

        Ok(())
    }

    pub fn num_bits_left(&self) -> usize {
        self.data.remaining() * 8 + self.bits_left_in_byte
    }

    /// Number of emulation-prevention bytes skipped so far.
    pub fn num_epb(&self) -> usize {
        self.num_epb
    }

    /// Reads an unsigned exp-Golomb code, 9.1 of H.264.
    pub fn read_ue<U: TryFrom<u32>>(&mut self) -> ReadResult<U> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(ReadError::InvalidExpGolomb);
            }
        }

        let value = ((1u64 << leading_zeros) - 1) + u64::from(self.read_bits::<u32>(leading_zeros)?);
        let value = u32::try_from(value).map_err(|_| ReadError::InvalidExpGolomb)?;

        U::try_from(value).map_err(|_| ReadError::ConversionFailed)
    }

    pub fn read_ue_max<U: TryFrom<u32>>(&mut self, max: u32) -> ReadResult<U> {
        let value: u32 = self.read_ue()?;
        if value > max {
            return Err(ReadError::OutOfBounds {
                min: 0,
                max: i64::from(max),
                value: i64::from(value),
            });
        }

        U::try_from(value).map_err(|_| ReadError::ConversionFailed)
    }

    /// Reads a signed exp-Golomb code, 9.1.1 of H.264.
    pub fn read_se<U: TryFrom<i32>>(&mut self) -> ReadResult<U> {
        let code = i64::from(self.read_ue::<u32>()?);
        let value = if code % 2 == 0 {
            -(code / 2)
        } else {
            code / 2 + 1
        };

        i32::try_from(value)
            .ok()
            .and_then(|v| U::try_from(v).ok())
            .ok_or(ReadError::ConversionFailed)
    }

    fn next_byte(&mut self) -> ReadResult<()> {
        if !self.data.has_remaining() {
            return Err(ReadError::OutOfBits);
        }
        let mut byte = self.data.get_u8();

        if (self.prev_two_bytes & 0xffff) == 0 && byte == 0x03 {
            self.num_epb += 1;
            if !self.data.has_remaining() {
                return Err(ReadError::OutOfBits);
            }
            byte = self.data.get_u8();
            // Two more bytes are needed before another emulation-prevention byte can appear.
            self.prev_two_bytes = 0xffff;
        }

        self.bits_left_in_byte = 8;
        self.prev_two_bytes = ((self.prev_two_bytes & 0xff) << 8) | u32::from(byte);
        self.curr_byte = u32::from(byte);
        Ok(())
    }
}
