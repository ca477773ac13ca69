//! ID resolver module
//!
//! Lets users type an unambiguous prefix of a run id instead of the whole id.

use anyhow::{Context, Result, anyhow};
use ferry_client::OrchestratorClient;

/// Resolve a run id or prefix to a full run id
///
/// An exact match always wins, so an id that happens to prefix another id
/// stays addressable.
pub async fn resolve_run_id(client: &OrchestratorClient, id_or_prefix: &str) -> Result<String> {
    let runs = client
        .list_runs()
        .await
        .context("Failed to fetch runs for ID resolution")?;

    let ids: Vec<String> = runs.into_iter().map(|r| r.run_id.to_string()).collect();
    match_prefix(&ids, id_or_prefix)
}

fn match_prefix(ids: &[String], prefix: &str) -> Result<String> {
    if let Some(exact) = ids.iter().find(|id| id.as_str() == prefix) {
        return Ok(exact.clone());
    }

    let matches: Vec<&String> = ids.iter().filter(|id| id.starts_with(prefix)).collect();

    match matches.len() {
        0 => Err(anyhow!("No run found with ID starting with '{}'", prefix)),
        1 => Ok(matches[0].clone()),
        _ => {
            let ids: Vec<&str> = matches.iter().map(|id| id.as_str()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
