//! Two-phase topology discovery (§4.E): pair the naming and metric instance
//! id lists positionally, then (by a separate `GetRevision` call per entry,
//! done by `client.rs`) resolve each circuit's display name.

use crate::error::ErrorKind;

/// Static topology for one circuit, discovered once per `connect()`.
#[derive(Debug, Clone)]
pub struct CircuitInfo {
    pub circuit_id: String,
    pub name: String,
    pub name_iid: u64,
    pub metric_iid: u64,
    /// G3's topology discovery pairs one naming id with one metric id per
    /// positional slot; it carries no second position for 240 V loads the
    /// way G2's `tabs` list does, so every G3 circuit is reported as
    /// single-phase (see DESIGN.md).
    pub is_dual_phase: bool,
    pub breaker_position: usize,
}

/// Positionally pairs two independently sorted, de-duplicated instance-id
/// lists into circuit slots. `circuit_id` is the 1-based positional index
/// as text, never the instance id itself (§4.E's fix for the name/metric
/// mismatch bug).
///
/// Fails with `TopologyMismatch` if the lists disagree in length after
/// dedup — the discovery response is internally inconsistent.
pub fn pair_topology(
    naming: impl IntoIterator<Item = u64>,
    metric: impl IntoIterator<Item = u64>,
) -> Result<Vec<CircuitInfo>, ErrorKind> {
    let mut naming: Vec<u64> = naming.into_iter().collect();
    let mut metric: Vec<u64> = metric.into_iter().collect();
    naming.sort_unstable();
    naming.dedup();
    metric.sort_unstable();
    metric.dedup();

    if naming.len() != metric.len() {
        return Err(ErrorKind::TopologyMismatch { naming: naming.len(), metric: metric.len() });
    }

    Ok(naming
        .into_iter()
        .zip(metric)
        .enumerate()
        .map(|(i, (name_iid, metric_iid))| CircuitInfo {
            circuit_id: (i + 1).to_string(),
            name: String::new(),
            name_iid,
            metric_iid,
            is_dual_phase: false,
            breaker_position: i + 1,
        })
        .collect())
}

#[cfg(test)]
#[path = "topology_tests.rs"]
mod tests;
