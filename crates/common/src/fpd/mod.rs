//! First-party data handling.
//!
//! The stages run in order once per auction:
//!
//! 1. [`extract::extract_fpd`] strips publisher-custom `data` members from the
//!    raw request.
//! 2. [`directives::validate_directives`] and [`directives::preprocess`] fold
//!    `ext.prebid.bidderconfig` into one [`FpdObject`](crate::openrtb::FpdObject)
//!    per allowed bidder.
//! 3. [`merge::build_fpd`] lays each bidder's overrides and the extracted data
//!    over the base `site`/`app`/`user` objects.

use std::fmt;

pub mod directives;
pub mod extract;
pub mod merge;

pub use directives::{preprocess, validate_directives, BidderFpdDirectives};
pub use extract::{extract_fpd, DataShape, ExtractedFpd, Extraction};
pub use merge::{build_fpd, resolve_for, FpdBuild, ResolvedFpd};

/// Request sections that can carry first-party data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpdScope {
    Site,
    App,
    User,
}

impl FpdScope {
    pub const ALL: [FpdScope; 3] = [FpdScope::Site, FpdScope::App, FpdScope::User];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FpdScope::Site => "site",
            FpdScope::App => "app",
            FpdScope::User => "user",
        }
    }
}

impl fmt::Display for FpdScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
