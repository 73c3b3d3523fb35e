//! CCPA signals: the US privacy consent string and the no-sale bidder list.

use error_stack::Report;

use crate::error::PipelineError;
use crate::openrtb::ExtRequestPrebid;
use crate::request_wrapper::RequestWrapper;

/// CCPA regulatory information read from a bid request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    /// `regs.ext.us_privacy`, empty when absent.
    pub consent: String,
    /// `ext.prebid.nosale`, in request order.
    pub no_sale_bidders: Vec<String>,
}

impl Policy {
    /// Reads the policy from a request. An absent request yields an empty policy.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] if `regs.ext` or `ext` do not decode.
    pub fn read_from_request(
        req: Option<&mut RequestWrapper>,
    ) -> Result<Self, Report<PipelineError>> {
        let Some(req) = req else {
            return Ok(Self::default());
        };

        let consent = req.reg_ext()?.us_privacy().to_string();
        let no_sale_bidders = req
            .request_ext()?
            .prebid()
            .and_then(|prebid| prebid.nosale.clone())
            .unwrap_or_default();

        Ok(Self {
            consent,
            no_sale_bidders,
        })
    }

    /// Writes the policy into a request's extension views.
    ///
    /// Only the dirty flags of views whose content was touched are raised; the
    /// caller rebuilds the request afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] if `regs.ext` or `ext` do not decode.
    pub fn write(&self, req: Option<&mut RequestWrapper>) -> Result<(), Report<PipelineError>> {
        let Some(req) = req else {
            return Ok(());
        };

        let reg_ext = req.reg_ext()?;
        if self.consent.is_empty() {
            if !reg_ext.us_privacy().is_empty() {
                reg_ext.set_us_privacy(String::new());
            }
        } else {
            reg_ext.set_us_privacy(self.consent.clone());
        }

        let request_ext = req.request_ext()?;
        if self.no_sale_bidders.is_empty() {
            if let Some(prebid) = request_ext.prebid() {
                let mut prebid = prebid.clone();
                prebid.nosale = None;
                let prebid = (prebid != ExtRequestPrebid::default()).then_some(prebid);
                request_ext.set_prebid(prebid);
            }
        } else {
            request_ext.prebid_mut().nosale = Some(self.no_sale_bidders.clone());
        }

        Ok(())
    }
}
