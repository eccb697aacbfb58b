//! ID resolver module
//!
//! Handles resolution of UUID prefixes to full UUIDs by querying the API.
//! This allows users to specify short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use archway_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a run ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, fetches all runs and finds the one matching the prefix.
///
/// # Errors
/// Returns an error if:
/// - No run matches the prefix
/// - Multiple runs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_run_id(client: &OrchestratorClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    // If it's already a full UUID, return it
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs()
        .await
        .context("Failed to fetch runs for ID resolution")?;

    let ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
    pick_unique(id_or_prefix, &ids)
}

/// Picks the only id matching `id_or_prefix`
fn pick_unique(id_or_prefix: &IdOrPrefix, ids: &[Uuid]) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .iter()
        .copied()
        .filter(|id| id_or_prefix.matches(*id))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No run found with ID starting with '{}'",
            id_or_prefix
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Uuid> {
        [
            "aa11c1e0-0000-4000-8000-000000000001",
            "aa22c1e0-0000-4000-8000-000000000002",
            "bb33c1e0-0000-4000-8000-000000000003",
        ]
        .iter()
        .map(|s| Uuid::parse_str(s).unwrap())
        .collect()
    }

    #[test]
    fn test_unique_prefix() {
        let ids = ids();
        assert_eq!(pick_unique(&IdOrPrefix::parse("bb"), &ids).unwrap(), ids[2]);
        assert_eq!(pick_unique(&IdOrPrefix::parse("aa2"), &ids).unwrap(), ids[1]);
    }

    #[test]
    fn test_ambiguous_prefix() {
        let err = pick_unique(&IdOrPrefix::parse("aa"), &ids()).unwrap_err();
        assert!(err.to_string().contains("Ambiguous"));
    }

    #[test]
    fn test_unknown_prefix() {
        let err = pick_unique(&IdOrPrefix::parse("cc"), &ids()).unwrap_err();
        assert!(err.to_string().contains("No run found"));
    }
}
