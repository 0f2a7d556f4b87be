//! Crate-wide error aggregate.
//!
//! Every subsystem defines its own `thiserror`-derived `Error` enum close to
//! the code that raises it (`range::Error`, `toc::Error`, `packet::Error`,
//! `analysis::Error`, `silk::Error`, `celt::Error`). This module aggregates
//! them into the single error type returned from [`crate::Encoder::encode`]
//! and the configuration setters that can fail.

use thiserror::Error;

/// Crate-wide result alias, mirroring `symphonia_core::errors::Result`'s
/// role in the decoder crate it grew out of.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid sample rate: {0} Hz (expected one of 8000, 12000, 16000, 24000, 48000)")]
    InvalidSampleRate(u32),

    #[error("invalid channel count: {0} (expected 1 or 2)")]
    InvalidChannels(u8),

    #[error("invalid frame size: {0} samples at 48 kHz")]
    InvalidFrameSize(u32),

    #[error("invalid hybrid frame size: {0} samples (hybrid mode only supports 480/960)")]
    InvalidHybridFrameSize(u32),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("range coder error: {0}")]
    Range(#[from] crate::range::Error),

    #[error("TOC error: {0}")]
    Toc(#[from] crate::toc::Error),

    #[error("packet assembly error: {0}")]
    Packet(#[from] crate::packet::Error),

    #[error("analyzer error: {0}")]
    Analysis(#[from] crate::analysis::Error),

    #[error("SILK subsystem error: {0}")]
    Silk(#[from] crate::silk::Error),

    #[error("CELT subsystem error: {0}")]
    Celt(#[from] crate::celt::Error),

    #[error("hybrid orchestrator error: {0}")]
    Hybrid(#[from] crate::hybrid::Error),

    #[error("resampler error: {0}")]
    Resampler(#[from] crate::resampler::Error),
}
