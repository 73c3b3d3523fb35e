//! Resolves `ext.prebid.data.bidders` and `ext.prebid.bidderconfig` into one
//! override object per bidder.

use std::collections::{HashMap, HashSet};

use error_stack::Report;

use crate::error::PipelineError;
use crate::openrtb::{ExtRequestPrebid, FpdObject};

/// Effective first-party data overrides keyed by bidder name.
pub type BidderFpdDirectives = HashMap<String, FpdObject>;

fn has_allow_list(prebid: &ExtRequestPrebid) -> bool {
    prebid
        .data
        .as_ref()
        .is_some_and(|data| !data.bidders.is_empty())
}

/// Checks that the allow-list and the bidder config blocks come as a pair.
///
/// Neither section present is valid and means no first-party data was
/// requested.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] when exactly one of the two sections is present.
pub fn validate_directives(prebid: &ExtRequestPrebid) -> Result<(), Report<PipelineError>> {
    let allow_list = has_allow_list(prebid);
    let bidder_config = prebid.bidderconfig.is_some();

    let message = match (allow_list, bidder_config) {
        (true, false) => "request.ext.prebid.data.bidders are specified but request.ext.prebid.bidderconfig is not",
        (false, true) if prebid.data.is_none() => {
            "request.ext.prebid.data is not specified but request.ext.prebid.bidderconfig is"
        }
        (false, true) => {
            "request.ext.prebid.data.bidders are not specified but request.ext.prebid.bidderconfig is"
        }
        _ => return Ok(()),
    };

    Err(Report::new(PipelineError::Config {
        message: message.to_string(),
    }))
}

/// Folds the bidder config blocks into one directive per allowed bidder and
/// strips the consumed sections from the extension.
///
/// Only bidders named both in the allow-list and in at least one block get a
/// directive. When several blocks target the same bidder, a later block's
/// non-null `site`/`app`/`user` replaces the earlier one for that scope only.
#[must_use]
pub fn preprocess(mut prebid: ExtRequestPrebid) -> (BidderFpdDirectives, ExtRequestPrebid) {
    let mut directives = BidderFpdDirectives::new();

    if let (Some(data), Some(configs)) = (&prebid.data, &prebid.bidderconfig) {
        let allowed: HashSet<&str> = data.bidders.iter().map(String::as_str).collect();

        for config in configs {
            let Some(fpd) = &config.config.fpd else {
                continue;
            };
            for bidder in &config.bidders {
                if !allowed.contains(bidder.as_str()) {
                    log::debug!("Ignoring bidder config for '{}': not in data.bidders", bidder);
                    continue;
                }
                directives
                    .entry(bidder.clone())
                    .and_modify(|existing| overlay(existing, fpd))
                    .or_insert_with(|| fpd.clone());
            }
        }
    }

    prebid.bidderconfig = None;
    if let Some(data) = &mut prebid.data {
        data.bidders.clear();
        if data.extra.is_empty() {
            prebid.data = None;
        }
    }

    log::debug!("Resolved first-party data for {} bidders", directives.len());
    (directives, prebid)
}

fn overlay(existing: &mut FpdObject, later: &FpdObject) {
    if let Some(site) = &later.site {
        existing.site = Some(site.clone());
    }
    if let Some(app) = &later.app {
        existing.app = Some(app.clone());
    }
    if let Some(user) = &later.user {
        existing.user = Some(user.clone());
    }
}
