//! Extended-identifier allow-listing.
//!
//! Keeps only `user.ext.eids` entries whose source is a configured partner and
//! whose first uid carries the partner's expected `rtiPartner`. Rejected
//! entries are reported as [`PipelineError::Validation`] warnings.

use std::collections::HashMap;

use error_stack::Report;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::openrtb::{ExtUser, ExtUserEid, User};
use crate::settings::EidSettings;

#[derive(Debug, Deserialize)]
struct UidExt {
    #[serde(rename = "rtiPartner", default)]
    rti_partner: String,
}

/// Filters extended identifiers against an explicit partner table.
#[derive(Debug, Clone, Default)]
pub struct ExtendedIdFilter {
    partners: HashMap<String, String>,
}

impl ExtendedIdFilter {
    /// Builds a filter from `source -> rtiPartner` pairs. Sources are matched
    /// case-insensitively.
    #[must_use]
    pub fn new(partners: HashMap<String, String>) -> Self {
        let partners = partners
            .into_iter()
            .map(|(source, partner)| (source.to_ascii_lowercase(), partner))
            .collect();
        Self { partners }
    }

    #[must_use]
    pub fn from_settings(settings: &EidSettings) -> Self {
        Self {
            partners: settings.partner_table(),
        }
    }

    /// Returns the user extension with only allowed eids kept.
    ///
    /// `None` means there was nothing to filter: no user, no `user.ext`, or a
    /// `user.ext` that does not decode.
    #[must_use]
    pub fn filter(&self, user: Option<&User>) -> (Option<ExtUser>, Vec<Report<PipelineError>>) {
        let mut warnings = Vec::new();

        let Some(raw_ext) = user.and_then(|user| user.ext.as_ref()) else {
            return (None, warnings);
        };
        let Ok(mut ext_user) = ExtUser::deserialize(raw_ext) else {
            log::debug!("user.ext does not decode, skipping eid filtering");
            return (None, warnings);
        };

        let eids = std::mem::take(&mut ext_user.eids);
        ext_user.eids = eids
            .into_iter()
            .filter(|eid| match self.check(eid) {
                Ok(keep) => keep,
                Err(warning) => {
                    warnings.push(warning);
                    false
                }
            })
            .collect();

        (Some(ext_user), warnings)
    }

    /// Rewrites `user.ext.eids` in place and returns the warnings raised.
    pub fn apply(&self, user: &mut User) -> Vec<Report<PipelineError>> {
        let (ext_user, mut warnings) = self.filter(Some(&*user));
        if let Some(ext_user) = ext_user {
            match serde_json::to_value(ext_user) {
                Ok(value) => user.ext = Some(value),
                Err(err) => warnings.push(Report::new(PipelineError::Validation {
                    message: format!("Failed to re-encode user.ext: {err}"),
                })),
            }
        }
        warnings
    }

    fn check(&self, eid: &ExtUserEid) -> Result<bool, Report<PipelineError>> {
        let source = eid.source.to_ascii_lowercase();
        let Some(expected) = self.partners.get(&source) else {
            return Ok(false);
        };

        let warning = |message: String| Report::new(PipelineError::Validation { message });

        let Some(uid) = eid.uids.first() else {
            return Err(warning(format!("UserId: {source} : invalid uids length")));
        };
        if uid.id.is_empty() {
            return Err(warning(format!("UserId: {source} : invalid ID {}", uid.id)));
        }

        let uid_ext = uid
            .ext
            .as_ref()
            .and_then(|ext| UidExt::deserialize(ext).ok())
            .ok_or_else(|| warning(format!("UserId: {source} : missing or invalid uid ext")))?;

        if &uid_ext.rti_partner != expected {
            return Err(warning(format!(
                "UserId: {source} : RtiPartner mismatch: expected {expected} got {}",
                uid_ext.rti_partner
            )));
        }

        Ok(true)
    }
}
