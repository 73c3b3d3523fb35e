//! Builds each bidder's `site`/`app`/`user` from its directive and the base request.

use std::collections::HashMap;

use error_stack::{Report, ResultExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::PipelineError;
use crate::json_util::{build_ext_data, merge_patch};
use crate::openrtb::{App, BidRequest, FpdObject, Site, User};

use super::directives::BidderFpdDirectives;
use super::extract::ExtractedFpd;
use super::FpdScope;

/// Merged first-party data for one bidder. `None` scopes keep the base value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFpd {
    pub site: Option<Site>,
    pub app: Option<App>,
    pub user: Option<User>,
}

impl ResolvedFpd {
    /// Replaces the scopes this bidder overrides on its copy of the request.
    pub fn apply_to(self, request: &mut BidRequest) {
        if let Some(site) = self.site {
            request.site = Some(site);
        }
        if let Some(app) = self.app {
            request.app = Some(app);
        }
        if let Some(user) = self.user {
            request.user = Some(user);
        }
    }
}

/// Output of [`build_fpd`]: whatever could be merged plus one error per failed bidder.
#[derive(Debug, Default)]
pub struct FpdBuild {
    pub resolved: HashMap<String, ResolvedFpd>,
    pub errors: Vec<Report<PipelineError>>,
}

/// Merges every bidder's directive over the base request.
///
/// A bidder whose merge fails is left out of `resolved` and contributes one
/// entry to `errors`; the remaining bidders are unaffected. This is the
/// sequential form of [`resolve_for`], which the auction pipeline calls from
/// each bidder's own branch.
#[must_use]
pub fn build_fpd(
    request: &BidRequest,
    directives: &BidderFpdDirectives,
    extracted: &ExtractedFpd,
) -> FpdBuild {
    let mut build = FpdBuild::default();

    for bidder in directives.keys() {
        match resolve_for(bidder, request, directives, extracted) {
            Some(Ok(resolved)) => {
                build.resolved.insert(bidder.clone(), resolved);
            }
            Some(Err(err)) => build.errors.push(err),
            None => {}
        }
    }

    build
}

/// Merges the directive of one named bidder, or returns `None` when the
/// bidder has no directive.
///
/// A failure is logged and carries a `bidder: <name>` attachment.
#[must_use]
pub fn resolve_for(
    bidder: &str,
    request: &BidRequest,
    directives: &BidderFpdDirectives,
    extracted: &ExtractedFpd,
) -> Option<Result<ResolvedFpd, Report<PipelineError>>> {
    let directive = directives.get(bidder)?;
    Some(
        resolve_bidder(request, directive, extracted).map_err(|err| {
            log::warn!("First-party data for bidder '{}' dropped: {}", bidder, err);
            err.attach(format!("bidder: {bidder}"))
        }),
    )
}

/// Merges one bidder's directive.
///
/// # Errors
///
/// Returns [`PipelineError::Merge`] if an override is not a JSON object and
/// [`PipelineError::Parse`] if a merged scope no longer decodes.
pub fn resolve_bidder(
    request: &BidRequest,
    directive: &FpdObject,
    extracted: &ExtractedFpd,
) -> Result<ResolvedFpd, Report<PipelineError>> {
    let mut resolved = ResolvedFpd::default();

    if let Some(patch) = &directive.site {
        resolved.site = Some(merge_scope(
            request.site.as_ref(),
            patch,
            extracted.get(FpdScope::Site),
            FpdScope::Site,
        )?);
    }
    if let Some(patch) = &directive.app {
        resolved.app = Some(merge_scope(
            request.app.as_ref(),
            patch,
            extracted.get(FpdScope::App),
            FpdScope::App,
        )?);
    }
    if let Some(patch) = &directive.user {
        resolved.user = Some(merge_scope(
            request.user.as_ref(),
            patch,
            extracted.get(FpdScope::User),
            FpdScope::User,
        )?);
    }

    Ok(resolved)
}

fn merge_scope<T>(
    base: Option<&T>,
    patch: &Value,
    captured: Option<&RawValue>,
    scope: FpdScope,
) -> Result<T, Report<PipelineError>>
where
    T: Serialize + DeserializeOwned,
{
    if !patch.is_object() {
        return Err(Report::new(PipelineError::Merge {
            message: format!("{scope} override must be a JSON object"),
        }));
    }

    let merged = match base {
        // Nothing to merge against; the override is taken as is.
        None => patch.clone(),
        Some(base) => {
            let mut merged = serde_json::to_value(base).change_context(PipelineError::Merge {
                message: format!("Failed to encode base {scope}"),
            })?;
            merge_patch(&mut merged, patch);
            if let Some(captured) = captured {
                merge_patch(&mut merged, &build_ext_data(captured)?);
            }
            merged
        }
    };

    serde_json::from_value(merged).change_context(PipelineError::Parse {
        message: format!("Merged {scope} does not decode"),
    })
}
