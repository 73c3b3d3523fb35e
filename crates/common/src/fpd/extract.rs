//! Pulls publisher-custom `data` members out of the raw request.

use std::borrow::Cow;

use error_stack::Report;
use serde_json::value::RawValue;

use crate::error::PipelineError;
use crate::json_util::{find_and_drop, find_element};
use crate::openrtb::Data;

use super::FpdScope;

const DATA: &str = "data";

/// What a `{site,app,user}.data` member turned out to be.
#[derive(Debug, Clone)]
pub enum DataShape {
    /// Missing, `null` or an empty string.
    Absent,
    /// A list of the protocol's generic data objects. Left in place.
    StructuredList,
    /// Any other shape: publisher first-party content destined for `ext.data`.
    Opaque(Box<RawValue>),
}

impl PartialEq for DataShape {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Absent, Self::Absent) | (Self::StructuredList, Self::StructuredList) => true,
            (Self::Opaque(a), Self::Opaque(b)) => a.get() == b.get(),
            _ => false,
        }
    }
}

impl DataShape {
    /// Classifies a raw `data` member.
    #[must_use]
    pub fn classify(raw: Option<&RawValue>) -> Self {
        let Some(raw) = raw else {
            return Self::Absent;
        };
        let text = raw.get();
        if text == "null" || text == "\"\"" {
            return Self::Absent;
        }

        match serde_json::from_str::<Vec<Data>>(text) {
            Ok(_) => Self::StructuredList,
            Err(err) => {
                if text.starts_with('[') {
                    log::warn!(
                        "data list does not match the generic data shape ({}); treating it as first-party content",
                        err
                    );
                }
                Self::Opaque(raw.to_owned())
            }
        }
    }
}

/// First-party data captured from the base request, one slot per scope.
///
/// Built once per auction and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFpd {
    site: Option<Box<RawValue>>,
    app: Option<Box<RawValue>>,
    user: Option<Box<RawValue>>,
}

impl ExtractedFpd {
    /// Captured bytes for `scope`, if any.
    #[must_use]
    pub fn get(&self, scope: FpdScope) -> Option<&RawValue> {
        match scope {
            FpdScope::Site => self.site.as_deref(),
            FpdScope::App => self.app.as_deref(),
            FpdScope::User => self.user.as_deref(),
        }
    }

    /// Captured bytes for `scope`, empty when nothing was captured.
    #[must_use]
    pub fn bytes(&self, scope: FpdScope) -> &[u8] {
        self.get(scope).map_or(&[][..], |raw| raw.get().as_bytes())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.site.is_none() && self.app.is_none() && self.user.is_none()
    }

    fn set(&mut self, scope: FpdScope, raw: Box<RawValue>) {
        match scope {
            FpdScope::Site => self.site = Some(raw),
            FpdScope::App => self.app = Some(raw),
            FpdScope::User => self.user = Some(raw),
        }
    }
}

/// The pruned request plus everything captured from it.
#[derive(Debug)]
pub struct Extraction<'a> {
    pub request: Cow<'a, [u8]>,
    pub fpd: ExtractedFpd,
}

/// Removes opaque `{site,app,user}.data` members from a raw request.
///
/// Structured data lists stay where they are; any other shape is dropped from
/// the document and returned in [`ExtractedFpd`]. Running this on an already
/// pruned request captures nothing and returns the input untouched.
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] if the request is not valid JSON.
pub fn extract_fpd(request: &[u8]) -> Result<Extraction<'_>, Report<PipelineError>> {
    let mut document = Cow::Borrowed(request);
    let mut fpd = ExtractedFpd::default();

    for scope in FpdScope::ALL {
        let path = [scope.as_str(), DATA];
        let found = find_element(&document, &path)?;

        match DataShape::classify(found.as_deref()) {
            DataShape::Absent => {}
            DataShape::StructuredList => {
                log::debug!("{}.data is a structured data list, leaving it in place", scope);
            }
            DataShape::Opaque(raw) => {
                let pruned = find_and_drop(&document, &path)?.document.into_owned();
                document = Cow::Owned(pruned);
                log::debug!(
                    "Extracted {} bytes of first-party data from {}.data",
                    raw.get().len(),
                    scope
                );
                fpd.set(scope, raw);
            }
        }
    }

    Ok(Extraction {
        request: document,
        fpd,
    })
}
