// Symphonia
// Copyright (c) 2019-2021 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! An Opus (RFC 6716) encoder.
//!
//! ```text
//!                    PCM in (f32, 8/12/16/24/48 kHz)
//!                              |
//!                    +---------v---------+
//!                    |  LSB quant + DC    |
//!                    |  reject + buffer   |
//!                    +---------+---------+
//!                              |
//!              +---------------+---------------+
//!              |                               |
//!     +--------v--------+             +--------v--------+
//!     |  tonality/VAD    |             |   DTX + comfort  |
//!     |   analyzer        |             |      noise       |
//!     +--------+--------+             +--------+--------+
//!              |                               |
//!              +---------------+---------------+
//!                              |
//!                    +---------v---------+
//!                    |  mode/bandwidth/   |
//!                    |  channel decision  |
//!                    +---------+---------+
//!                              |
//!            +-----------------+-----------------+
//!            |                 |                 |
//!   +--------v-------+ +-------v-------+ +-------v--------+
//!   |   SILK-only     | |    Hybrid     | |   CELT-only    |
//!   | (NB/MB/WB, 10-  | | (SWB/FB, 10-  | | (any bandwidth, |
//!   |   60 ms)        | |   20 ms)      | |  2.5-60 ms)     |
//!   +--------+-------+ +-------+-------+ +-------+--------+
//!            |                 |                 |
//!            +-----------------+-----------------+
//!                              |
//!                    +---------v---------+
//!                    |  TOC + packet      |
//!                    |  assembly, CBR pad  |
//!                    +---------+---------+
//!                              |
//!                      Opus packet out
//! ```
//!
//! Every subsystem in the diagram above has its own module: [`range`] is the
//! shared entropy coder both [`silk`] and [`celt`] write into, [`hybrid`]
//! orchestrates the two when a frame needs both, [`mode_decision`] and
//! [`fec`] pick the mode/bandwidth/redundancy for each frame, [`analysis`]
//! and [`vad`] feed that decision, [`dtx`] gates silence, [`resampler`]
//! adapts between the encoder's internal 48 kHz working rate and SILK's
//! lower rates, and [`toc`]/[`packet`] assemble the final bitstream.
//! [`encoder::Encoder`] is the public entry point that wires all of this
//! together; [`config`] is its configuration surface.

pub mod analysis;
pub mod celt;
pub mod config;
pub mod dtx;
pub mod encoder;
pub mod error;
pub mod fec;
pub mod hybrid;
pub mod mode_decision;
pub mod packet;
pub mod range;
pub mod resampler;
pub mod silk;
pub mod toc;
pub mod vad;

pub use config::{Application, Bandwidth, BitrateMode, EncoderConfig, ForceChannels, Mode, SignalType};
pub use encoder::Encoder;
pub use error::{Error, Result};
