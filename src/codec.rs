// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bitstream parsing for the codecs whose elementary streams need to be described or split on
//! the host before being handed to the hardware parser.

pub mod h264;
