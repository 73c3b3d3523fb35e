//! The `prepare` command: one auction request in, one request per bidder out.

use std::fs;
use std::io::Read;
use std::path::Path;

use bidprep_common::eids::ExtendedIdFilter;
use bidprep_common::pipeline::{prepare_auction, PreparedAuction};
use bidprep_common::settings::Settings;
use serde_json::{Map, Value};

use crate::config::load_and_merge_config;
use crate::error::CliError;

/// Reads the auction request from `input`, or stdin when absent or `-`.
fn read_input(input: Option<&Path>) -> Result<Vec<u8>, CliError> {
    match input {
        Some(path) if path != Path::new("-") => Ok(fs::read(path)?),
        _ => {
            let mut raw = Vec::new();
            std::io::stdin().read_to_end(&mut raw)?;
            Ok(raw)
        }
    }
}

/// Runs the pipeline on a current-thread runtime.
pub(crate) fn run_pipeline(
    raw: &[u8],
    bidders: &[String],
    settings: &Settings,
) -> Result<PreparedAuction, CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    Ok(runtime.block_on(prepare_auction(raw, bidders, &settings.pipeline))?)
}

/// Renders the prepared requests as `{ "<bidder>": <request>, ... }`.
///
/// With `filter_eids`, each request's `user.ext.eids` is reduced to the
/// configured partners first.
pub(crate) fn render(
    prepared: PreparedAuction,
    settings: &Settings,
    filter_eids: bool,
) -> Result<Value, CliError> {
    for warning in &prepared.warnings {
        log::warn!("{:?}", warning);
    }

    let filter = filter_eids.then(|| ExtendedIdFilter::from_settings(&settings.eids));

    let mut output = Map::new();
    for mut bidder_request in prepared.requests {
        if let (Some(filter), Some(user)) = (&filter, bidder_request.request.user.as_mut()) {
            for warning in filter.apply(user) {
                log::warn!("bidder {}: {}", bidder_request.bidder, warning);
            }
        }
        output.insert(
            bidder_request.bidder,
            serde_json::to_value(bidder_request.request)?,
        );
    }

    Ok(Value::Object(output))
}

pub fn prepare(
    input: Option<&Path>,
    bidders: &[String],
    settings_file: Option<&Path>,
    filter_eids: bool,
    verbose: bool,
) -> Result<(), CliError> {
    let (settings, _) = load_and_merge_config(settings_file, verbose)?;
    let raw = read_input(input)?;

    let prepared = run_pipeline(&raw, bidders, &settings)?;
    if verbose {
        log::info!(
            "Prepared {} of {} bidder requests with {} warnings",
            prepared.requests.len(),
            bidders.len(),
            prepared.warnings.len()
        );
    }

    let output = render(prepared, &settings, filter_eids)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidprep_common::error::PipelineError;
    use serde_json::json;
    use tempfile::TempDir;

    fn settings() -> Settings {
        Settings::from_toml(
            r#"
[[eids.partners]]
source = "idx.lat"
rti_partner = "idx"
"#,
        )
        .expect("settings")
    }

    fn request() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "r",
            "user": {"id": "u", "ext": {"eids": [
                {"source": "idx.lat", "uids": [{"id": "a", "ext": {"rtiPartner": "idx"}}]},
                {"source": "other.com", "uids": [{"id": "b"}]}
            ]}},
            "ext": {"prebid": {
                "data": {"bidders": ["x"]},
                "bidderconfig": [{"bidders": ["x"], "config": {"fpd": {"user": {"yob": 1990}}}}]
            }}
        }))
        .expect("encode")
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_render_keys_by_bidder() {
        let settings = settings();
        let prepared = run_pipeline(&request(), &names(&["x", "y"]), &settings).expect("prepare");
        let output = render(prepared, &settings, false).expect("render");

        assert_eq!(output["x"]["user"]["yob"], json!(1990));
        assert!(output["y"]["user"].get("yob").is_none());
        assert_eq!(output["y"]["user"]["ext"]["eids"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_render_filters_eids_when_asked() {
        let settings = settings();
        let prepared = run_pipeline(&request(), &names(&["x"]), &settings).expect("prepare");
        let output = render(prepared, &settings, true).expect("render");

        assert_eq!(
            output["x"]["user"]["ext"]["eids"],
            json!([{"source": "idx.lat", "uids": [{"id": "a", "ext": {"rtiPartner": "idx"}}]}])
        );
    }

    #[test]
    fn test_pipeline_errors_are_reported() {
        let settings = settings();
        let result = run_pipeline(b"not json", &names(&["x"]), &settings);
        assert!(matches!(
            result,
            Err(CliError::Pipeline(ref report))
                if matches!(report.current_context(), PipelineError::Parse { .. })
        ));
    }

    #[test]
    fn test_read_input_from_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("request.json");
        fs::write(&path, request()).expect("write request");

        assert_eq!(read_input(Some(&path)).expect("read"), request());
    }
}
