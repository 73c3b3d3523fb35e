//! Mutable extension views over one bid request.
//!
//! `regs.ext` and `ext` are decoded on first access and carry a dirty flag.
//! [`RequestWrapper::rebuild_request`] re-encodes only the views that changed,
//! so a request whose privacy fields were left alone is never re-serialized.

use error_stack::{Report, ResultExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::PipelineError;
use crate::openrtb::{BidRequest, ExtRegs, ExtRequest, ExtRequestPrebid, Regs};

/// Decoded `regs.ext`.
#[derive(Debug, Clone, Default)]
pub struct RegExt {
    ext: ExtRegs,
    us_privacy_dirty: bool,
}

impl RegExt {
    /// The US privacy consent string, empty when absent.
    #[must_use]
    pub fn us_privacy(&self) -> &str {
        self.ext.us_privacy.as_deref().unwrap_or_default()
    }

    /// Sets the consent string and marks the view dirty.
    pub fn set_us_privacy(&mut self, consent: impl Into<String>) {
        let consent = consent.into();
        self.ext.us_privacy = (!consent.is_empty()).then_some(consent);
        self.us_privacy_dirty = true;
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.us_privacy_dirty
    }
}

/// Decoded top-level `ext`.
#[derive(Debug, Clone, Default)]
pub struct RequestExt {
    ext: ExtRequest,
    prebid_dirty: bool,
}

impl RequestExt {
    #[must_use]
    pub fn prebid(&self) -> Option<&ExtRequestPrebid> {
        self.ext.prebid.as_ref()
    }

    /// Replaces `ext.prebid` and marks the view dirty.
    pub fn set_prebid(&mut self, prebid: Option<ExtRequestPrebid>) {
        self.ext.prebid = prebid;
        self.prebid_dirty = true;
    }

    /// Mutable access to `ext.prebid`, created if missing. Marks the view dirty.
    pub fn prebid_mut(&mut self) -> &mut ExtRequestPrebid {
        self.prebid_dirty = true;
        self.ext.prebid.get_or_insert_with(ExtRequestPrebid::default)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.prebid_dirty
    }
}

/// Owns one bid request plus its lazily decoded extension views.
#[derive(Debug, Clone)]
pub struct RequestWrapper {
    request: BidRequest,
    reg_ext: Option<RegExt>,
    request_ext: Option<RequestExt>,
}

impl RequestWrapper {
    #[must_use]
    pub fn new(request: BidRequest) -> Self {
        Self {
            request,
            reg_ext: None,
            request_ext: None,
        }
    }

    #[must_use]
    pub fn request(&self) -> &BidRequest {
        &self.request
    }

    /// Decodes `regs.ext` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] if `regs.ext` does not decode.
    pub fn reg_ext(&mut self) -> Result<&mut RegExt, Report<PipelineError>> {
        if self.reg_ext.is_none() {
            let raw = self.request.regs.as_ref().and_then(|regs| regs.ext.as_ref());
            let ext: ExtRegs = decode_ext(raw).attach("while reading request.regs.ext")?;
            self.reg_ext = Some(RegExt {
                ext,
                us_privacy_dirty: false,
            });
        }
        Ok(self.reg_ext.get_or_insert_with(RegExt::default))
    }

    /// Decodes the top-level `ext` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] if `ext` does not decode.
    pub fn request_ext(&mut self) -> Result<&mut RequestExt, Report<PipelineError>> {
        if self.request_ext.is_none() {
            let ext: ExtRequest =
                decode_ext(self.request.ext.as_ref()).attach("while reading request.ext")?;
            self.request_ext = Some(RequestExt {
                ext,
                prebid_dirty: false,
            });
        }
        Ok(self.request_ext.get_or_insert_with(RequestExt::default))
    }

    /// Writes dirty views back into the request and clears their flags.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] if a view cannot be encoded.
    pub fn rebuild_request(&mut self) -> Result<(), Report<PipelineError>> {
        if let Some(reg_ext) = self.reg_ext.as_mut().filter(|view| view.is_dirty()) {
            let encoded = encode_ext(&reg_ext.ext)?;
            if let Some(regs) = self.request.regs.as_mut() {
                regs.ext = encoded;
            } else if let Some(encoded) = encoded {
                self.request.regs = Some(Regs {
                    ext: Some(encoded),
                    ..Regs::default()
                });
            }
            reg_ext.us_privacy_dirty = false;
            log::debug!("Rebuilt request.regs.ext for request {}", self.request.id);
        }

        if let Some(request_ext) = self.request_ext.as_mut().filter(|view| view.is_dirty()) {
            self.request.ext = encode_ext(&request_ext.ext)?;
            request_ext.prebid_dirty = false;
            log::debug!("Rebuilt request.ext for request {}", self.request.id);
        }

        Ok(())
    }

    /// Rebuilds dirty views and hands back the request.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] if a view cannot be encoded.
    pub fn into_request(mut self) -> Result<BidRequest, Report<PipelineError>> {
        self.rebuild_request()?;
        Ok(self.request)
    }

    /// Hands back the request as of the last rebuild, discarding pending view changes.
    #[must_use]
    pub fn into_inner(self) -> BidRequest {
        self.request
    }
}

fn decode_ext<T>(raw: Option<&Value>) -> Result<T, Report<PipelineError>>
where
    T: DeserializeOwned + Default,
{
    match raw {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => T::deserialize(value).change_context(PipelineError::Parse {
            message: "Malformed extension object".to_string(),
        }),
    }
}

/// Encodes a view, collapsing an empty object to `None`.
fn encode_ext<T: Serialize>(ext: &T) -> Result<Option<Value>, Report<PipelineError>> {
    let value = serde_json::to_value(ext).change_context(PipelineError::Parse {
        message: "Failed to encode extension object".to_string(),
    })?;
    Ok(match &value {
        Value::Object(map) if map.is_empty() => None,
        _ => Some(value),
    })
}
