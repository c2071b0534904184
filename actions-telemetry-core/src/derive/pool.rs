//! Managed DevOps pool name extraction from runner labels.

/// Label marker used by Azure Managed DevOps Pools runners
pub const POOL_MARKER: &str = "ManagedDevOps.Pool=";

/// Pool name from the first label containing [`POOL_MARKER`], or "" when no
/// label carries one. Best effort: the label convention is not validated.
pub fn pool_name(labels: &[String]) -> &str {
    labels
        .iter()
        .find_map(|label| label.split_once(POOL_MARKER).map(|(_, pool)| pool))
        .unwrap_or("")
}
