//! Error types for the request preparation pipeline.
//!
//! Every fallible operation returns a [`Report<PipelineError>`](error_stack::Report)
//! so the originating `serde_json` or `config` error stays attached as context.

use derive_more::{Display, Error};

/// Errors raised while turning one incoming bid request into per-bidder requests.
#[derive(Debug, Display, Error)]
pub enum PipelineError {
    /// Malformed JSON found while scanning, splicing or decoding a document.
    #[display("Parse error: {message}")]
    Parse { message: String },

    /// The first-party data directive sections are inconsistent.
    ///
    /// Fatal for the whole auction: raised before any bidder is processed.
    #[display("First-party data configuration error: {message}")]
    Config { message: String },

    /// A merge-patch could not be applied for one bidder.
    #[display("Merge error: {message}")]
    Merge { message: String },

    /// A soft check failed; the offending value is dropped and processing continues.
    #[display("Validation warning: {message}")]
    Validation { message: String },

    /// Settings could not be loaded or failed validation.
    #[display("Settings error: {message}")]
    Settings { message: String },
}

impl PipelineError {
    /// Returns `true` for errors that abort the whole auction rather than one bidder.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Settings { .. })
    }
}
