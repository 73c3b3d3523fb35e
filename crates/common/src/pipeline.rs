//! Pre-dispatch preparation of one auction.
//!
//! The shared steps (first-party data extraction, directive resolution and the
//! CCPA read) run once. Every participating bidder then gets its own branch on
//! the blocking pool, at most [`PipelineSettings::max_concurrent_bidders`] at a
//! time. A branch owns a deep copy of the base request and only reads the
//! shared inputs.

use std::sync::Arc;

use error_stack::{Report, ResultExt};
use futures::stream::{self, StreamExt};

use crate::error::PipelineError;
use crate::fpd::{
    extract_fpd, preprocess, resolve_for, validate_directives, BidderFpdDirectives, ExtractedFpd,
    ResolvedFpd,
};
use crate::openrtb::{BidRequest, ExtRequestPrebid};
use crate::privacy::Policy;
use crate::request_wrapper::RequestWrapper;
use crate::settings::PipelineSettings;

/// The request one bidder will be sent.
#[derive(Debug, Clone)]
pub struct BidderRequest {
    pub bidder: String,
    pub request: BidRequest,
    /// The merged first-party data applied to `request`, if any.
    pub fpd: Option<ResolvedFpd>,
}

/// Result of [`prepare_auction`].
#[derive(Debug)]
pub struct PreparedAuction {
    /// The pruned base request with the directive sections stripped.
    pub base: BidRequest,
    pub policy: Policy,
    /// One entry per bidder branch that completed, in input order.
    pub requests: Vec<BidderRequest>,
    /// Non-fatal problems, each attached with the bidder it concerns.
    pub warnings: Vec<Report<PipelineError>>,
}

impl PreparedAuction {
    #[must_use]
    pub fn request_for(&self, bidder: &str) -> Option<&BidderRequest> {
        self.requests.iter().find(|request| request.bidder == bidder)
    }
}

/// Read-only inputs every bidder branch shares.
struct SharedInputs {
    base: BidRequest,
    directives: BidderFpdDirectives,
    extracted: ExtractedFpd,
    policy: Policy,
}

/// Prepares one request per bidder from a raw auction request.
///
/// # Errors
///
/// - [`PipelineError::Parse`] if the request or its extensions do not decode
/// - [`PipelineError::Config`] if the first-party data directives are inconsistent
///
/// Per-bidder merge failures are not errors: the bidder keeps the base request
/// and the failure is returned in [`PreparedAuction::warnings`].
pub async fn prepare_auction(
    raw: &[u8],
    bidders: &[String],
    settings: &PipelineSettings,
) -> Result<PreparedAuction, Report<PipelineError>> {
    let extraction = extract_fpd(raw)?;
    let request: BidRequest =
        serde_json::from_slice(&extraction.request).change_context(PipelineError::Parse {
            message: "Failed to decode bid request".to_string(),
        })?;

    let mut wrapper = RequestWrapper::new(request);
    let (directives, policy) = resolve_shared(&mut wrapper)?;
    let base = wrapper.into_request()?;

    log::info!(
        "Preparing request {} for {} bidders ({} with first-party data)",
        base.id,
        bidders.len(),
        directives.len()
    );

    let shared = Arc::new(SharedInputs {
        base: base.clone(),
        directives,
        extracted: extraction.fpd,
        policy: policy.clone(),
    });

    let branches = bidders.iter().cloned().map(|bidder| {
        let shared = Arc::clone(&shared);
        async move {
            let label = bidder.clone();
            let joined = tokio::task::spawn_blocking(move || prepare_bidder(bidder, &shared)).await;
            (label, joined)
        }
    });

    let max_in_flight = settings.max_concurrent_bidders.max(1);
    let outcomes: Vec<_> = stream::iter(branches).buffered(max_in_flight).collect().await;

    let mut requests = Vec::with_capacity(outcomes.len());
    let mut warnings = Vec::new();
    for (bidder, joined) in outcomes {
        match joined {
            Ok((request, branch_warnings)) => {
                requests.push(request);
                warnings.extend(branch_warnings);
            }
            Err(err) => {
                log::error!("Branch for bidder '{}' did not complete: {}", bidder, err);
                warnings.push(
                    Report::new(err)
                        .change_context(PipelineError::Merge {
                            message: "Bidder branch did not complete".to_string(),
                        })
                        .attach(format!("bidder: {bidder}")),
                );
            }
        }
    }

    if settings.debug {
        for warning in &warnings {
            log::info!("Auction warning: {:?}", warning);
        }
    }

    Ok(PreparedAuction {
        base,
        policy,
        requests,
        warnings,
    })
}

/// Validates and strips the directive sections and reads the CCPA policy.
fn resolve_shared(
    wrapper: &mut RequestWrapper,
) -> Result<(BidderFpdDirectives, Policy), Report<PipelineError>> {
    let request_ext = wrapper.request_ext()?;
    let prebid = request_ext.prebid().cloned();

    let directives = match prebid {
        Some(prebid) => {
            validate_directives(&prebid)?;
            let carries_directives = prebid.data.is_some() || prebid.bidderconfig.is_some();
            let (directives, stripped) = preprocess(prebid);
            if carries_directives {
                let stripped = (stripped != ExtRequestPrebid::default()).then_some(stripped);
                request_ext.set_prebid(stripped);
            }
            directives
        }
        None => BidderFpdDirectives::new(),
    };

    let policy = Policy::read_from_request(Some(wrapper))?;
    Ok((directives, policy))
}

fn prepare_bidder(
    bidder: String,
    shared: &SharedInputs,
) -> (BidderRequest, Vec<Report<PipelineError>>) {
    let mut warnings = Vec::new();
    let mut request = shared.base.clone();

    let fpd = match resolve_for(&bidder, &shared.base, &shared.directives, &shared.extracted) {
        Some(Ok(resolved)) => Some(resolved),
        Some(Err(err)) => {
            log::warn!("Bidder '{}' falls back to the base request", bidder);
            warnings.push(err);
            None
        }
        None => None,
    };
    if let Some(resolved) = &fpd {
        resolved.clone().apply_to(&mut request);
    }

    let mut wrapper = RequestWrapper::new(request);
    let written = shared
        .policy
        .write(Some(&mut wrapper))
        .and_then(|()| wrapper.rebuild_request());
    if let Err(err) = written {
        log::warn!("Privacy policy not written for bidder '{}': {}", bidder, err);
        warnings.push(err.attach(format!("bidder: {bidder}")));
    }

    let request = BidderRequest {
        bidder,
        request: wrapper.into_inner(),
        fpd,
    };
    (request, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::{create_test_request, create_test_settings};
    use serde_json::{json, Value};

    fn raw(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).expect("encode")
    }

    fn bidders(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_bidders_without_directives_get_base_request() {
        let body = raw(json!({"id": "r", "site": {"page": "p"}}));
        let prepared = prepare_auction(&body, &bidders(&["a", "b"]), &PipelineSettings::default())
            .await
            .expect("should prepare");

        assert!(prepared.warnings.is_empty());
        assert_eq!(prepared.requests.len(), 2);
        for request in &prepared.requests {
            assert!(request.fpd.is_none());
            assert_eq!(request.request, prepared.base);
        }
    }

    #[tokio::test]
    async fn test_requests_follow_input_order() {
        let body = raw(json!({"id": "r"}));
        let names = bidders(&["c", "a", "b", "d"]);
        let settings = PipelineSettings {
            max_concurrent_bidders: 2,
            ..PipelineSettings::default()
        };
        let prepared = prepare_auction(&body, &names, &settings)
            .await
            .expect("should prepare");

        let order: Vec<&str> = prepared
            .requests
            .iter()
            .map(|r| r.bidder.as_str())
            .collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }

    #[tokio::test]
    async fn test_directive_sections_are_stripped_from_base() {
        let body = raw(json!({
            "id": "r",
            "ext": {"prebid": {
                "debug": true,
                "data": {"bidders": ["x"]},
                "bidderconfig": [{"bidders": ["x"], "config": {"fpd": {"site": {"name": "n"}}}}]
            }}
        }));
        let prepared = prepare_auction(&body, &bidders(&["x"]), &PipelineSettings::default())
            .await
            .expect("should prepare");

        assert_eq!(prepared.base.ext, Some(json!({"prebid": {"debug": true}})));
        let x = prepared.request_for("x").expect("x");
        assert_eq!(x.request.ext, Some(json!({"prebid": {"debug": true}})));
    }

    #[tokio::test]
    async fn test_inconsistent_directives_abort() {
        let body = raw(json!({"id": "r", "ext": {"prebid": {"data": {"bidders": ["x"]}}}}));
        let err = prepare_auction(&body, &bidders(&["x"]), &PipelineSettings::default())
            .await
            .expect_err("should fail");

        assert!(matches!(
            err.current_context(),
            PipelineError::Config { .. }
        ));
        assert!(err.current_context().is_fatal());
    }

    #[tokio::test]
    async fn test_request_without_ids_is_prepared() {
        let body = raw(json!({
            "imp": [{"banner": {"w": 1}}],
            "site": {"page": "p", "data": {"k": "v"}},
            "ext": {"prebid": {
                "data": {"bidders": ["x"]},
                "bidderconfig": [{"bidders": ["x"], "config": {"fpd": {"site": {"name": "n"}}}}]
            }}
        }));
        let prepared = prepare_auction(&body, &bidders(&["x"]), &PipelineSettings::default())
            .await
            .expect("should prepare");

        assert!(prepared.base.id.is_empty());
        assert!(prepared.base.imp[0].id.is_empty());
        let site = prepared
            .request_for("x")
            .and_then(|x| x.request.site.as_ref())
            .expect("site");
        assert_eq!(site.name.as_deref(), Some("n"));
        assert_eq!(site.ext, Some(json!({"data": {"k": "v"}})));
    }

    #[tokio::test]
    async fn test_malformed_request_is_parse_error() {
        let err = prepare_auction(b"{\"id\": 5}", &bidders(&["x"]), &PipelineSettings::default())
            .await
            .expect_err("should fail");

        assert!(matches!(
            err.current_context(),
            PipelineError::Parse { .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_merge_keeps_bidder_on_base_request() {
        let body = raw(json!({
            "id": "r",
            "user": {"id": "u"},
            "ext": {"prebid": {
                "data": {"bidders": ["bad", "good"]},
                "bidderconfig": [
                    {"bidders": ["bad"], "config": {"fpd": {"user": {"yob": "nope"}}}},
                    {"bidders": ["good"], "config": {"fpd": {"user": {"yob": 1990}}}}
                ]
            }}
        }));
        let prepared = prepare_auction(
            &body,
            &bidders(&["bad", "good"]),
            &PipelineSettings {
                debug: true,
                ..PipelineSettings::default()
            },
        )
        .await
        .expect("should prepare");

        assert_eq!(prepared.warnings.len(), 1);
        let bad = prepared.request_for("bad").expect("bad still participates");
        assert!(bad.fpd.is_none());
        assert_eq!(bad.request, prepared.base);

        let good = prepared.request_for("good").expect("good");
        assert_eq!(good.request.user.as_ref().and_then(|u| u.yob), Some(1990));
    }

    #[tokio::test]
    async fn test_policy_is_carried_into_every_branch() {
        let body = raw(json!({
            "id": "r",
            "regs": {"ext": {"us_privacy": "1YNY"}},
            "ext": {"prebid": {"nosale": ["a"]}}
        }));
        let prepared = prepare_auction(&body, &bidders(&["a", "b"]), &PipelineSettings::default())
            .await
            .expect("should prepare");

        assert_eq!(prepared.policy.consent, "1YNY");
        for request in &prepared.requests {
            assert_eq!(
                request.request.regs.as_ref().and_then(|r| r.ext.clone()),
                Some(json!({"us_privacy": "1YNY"}))
            );
            assert_eq!(
                request.request.ext,
                Some(json!({"prebid": {"nosale": ["a"]}}))
            );
        }
    }

    #[tokio::test]
    async fn test_full_request_fans_out_per_bidder() {
        let settings = create_test_settings();
        let body = raw(create_test_request());
        let prepared = prepare_auction(
            &body,
            &bidders(&["appnexus", "rubicon", "ix"]),
            &settings.pipeline,
        )
        .await
        .expect("should prepare");

        assert!(prepared.warnings.is_empty());
        assert!(prepared.base.site.as_ref().expect("site").extra.get("data").is_none());
        assert!(prepared.base.ext.is_none());

        let appnexus = prepared.request_for("appnexus").expect("appnexus");
        let site = appnexus.request.site.as_ref().expect("site");
        assert_eq!(site.name.as_deref(), Some("x"));
        assert_eq!(site.ext, Some(json!({"data": {"section": "sports"}})));
        assert_eq!(appnexus.request.user, prepared.base.user);

        let rubicon = prepared.request_for("rubicon").expect("rubicon");
        let user = rubicon.request.user.as_ref().expect("user");
        assert_eq!(user.keywords.as_deref(), Some("k"));
        assert_eq!(
            user.ext,
            Some(json!({"consent": "CO-test", "data": {"customKey": "customValue"}}))
        );
        assert_eq!(rubicon.request.site, prepared.base.site);

        let ix = prepared.request_for("ix").expect("ix");
        assert!(ix.fpd.is_none());
        assert_eq!(ix.request, prepared.base);
    }
}
