//! Common functionality for bid request preparation.
//!
//! This crate turns one inbound `OpenRTB` auction request into the individual
//! requests sent to each bidder, applying per-bidder first-party data and the
//! request's CCPA signals along the way.
//!
//! # Modules
//!
//! - [`eids`]: Extended-identifier allow-listing against a partner table
//! - [`error`]: Error types and error handling utilities
//! - [`fpd`]: First-party data extraction, directive resolution and merging
//! - [`json_util`]: Raw JSON path lookup, member removal and merge-patch
//! - [`openrtb`]: The subset of `OpenRTB` request types the pipeline touches
//! - [`pipeline`]: Per-bidder fan-out of a prepared auction
//! - [`privacy`]: Privacy policies read from and written to requests
//! - [`request_wrapper`]: Lazily decoded extension views with dirty tracking
//! - [`settings`]: Configuration management and validation
//! - [`test_support`]: Testing utilities

pub mod eids;
pub mod error;
pub mod fpd;
pub mod json_util;
pub mod openrtb;
pub mod pipeline;
pub mod privacy;
pub mod request_wrapper;
pub mod settings;
