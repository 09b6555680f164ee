//! Capacity planning
//!
//! Turns a [`ClusterView`] and an estimate of the data volume into a
//! [`CapacityBudget`]:
//!
//! ```text
//! byte_budget = min(headroom_factor * estimated_needed_bytes,
//!                   node_memory_fraction * total_memory_bytes)
//! ```
//!
//! The fraction is a hard ceiling that protects co-resident workloads; the
//! headroom absorbs estimation error below that ceiling.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::ClusterView;
use crate::error::{IngestError, Result};
use ddload_common::units::human_bytes;

/// Policy inputs for [`plan`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerPolicy {
    /// Store managers to place on each node
    pub shards_per_node: usize,
    /// Nodes to span; `None` means every node in the view
    pub node_count: Option<usize>,
    /// Multiplier on the estimated volume, at least 1.0
    pub headroom_factor: f64,
    /// Ceiling as a fraction of total cluster memory, in (0, 1]
    pub node_memory_fraction: f64,
}

impl PlannerPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.shards_per_node == 0 {
            return Err(IngestError::Config("shards_per_node must be at least 1".to_string()));
        }
        if self.node_count == Some(0) {
            return Err(IngestError::Config("node_count must be at least 1".to_string()));
        }
        if !(self.headroom_factor.is_finite() && self.headroom_factor >= 1.0) {
            return Err(IngestError::Config(format!(
                "headroom_factor must be a finite number >= 1.0, got {}",
                self.headroom_factor
            )));
        }
        if !(self.node_memory_fraction > 0.0 && self.node_memory_fraction <= 1.0) {
            return Err(IngestError::Config(format!(
                "node_memory_fraction must be in (0, 1], got {}",
                self.node_memory_fraction
            )));
        }
        Ok(())
    }
}

/// Store sizing decided once per run.
///
/// Deliberately not `Clone`: the provisioner takes it by value.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct CapacityBudget {
    shards_per_node: usize,
    node_count: usize,
    byte_budget: u64,
}

impl CapacityBudget {
    pub fn shards_per_node(&self) -> usize {
        self.shards_per_node
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn byte_budget(&self) -> u64 {
        self.byte_budget
    }

    /// Total number of managers the store will run
    pub fn manager_count(&self) -> usize {
        self.shards_per_node.saturating_mul(self.node_count)
    }
}

/// Scale a byte count by a factor, flooring and saturating at `u64::MAX`
pub fn scale_bytes(bytes: u64, factor: f64) -> u64 {
    let scaled = (bytes as f64 * factor).floor();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else if scaled <= 0.0 {
        0
    } else {
        scaled as u64
    }
}

/// Compute the store budget for a cluster
pub fn plan(
    view: &ClusterView,
    estimated_needed_bytes: u64,
    policy: &PlannerPolicy,
) -> Result<CapacityBudget> {
    policy.validate()?;

    let available_nodes = view.node_count();
    let node_count = policy.node_count.unwrap_or(available_nodes);
    if node_count > available_nodes {
        return Err(IngestError::Config(format!(
            "node_count {} exceeds the {} nodes in the cluster",
            node_count, available_nodes
        )));
    }

    let wanted = scale_bytes(estimated_needed_bytes, policy.headroom_factor);
    let ceiling = scale_bytes(view.total_memory_bytes(), policy.node_memory_fraction);
    let byte_budget = wanted.min(ceiling);

    if byte_budget == 0 {
        return Err(IngestError::Config(format!(
            "computed store budget is zero (wanted {} bytes, ceiling {} bytes)",
            wanted, ceiling
        )));
    }

    if wanted > ceiling {
        warn!(
            wanted = %human_bytes(wanted),
            ceiling = %human_bytes(ceiling),
            "Requested headroom exceeds the memory ceiling; capping store size"
        );
    }

    info!(
        "Store will be {} bytes ({}) across {} nodes x {} managers",
        byte_budget,
        human_bytes(byte_budget),
        node_count,
        policy.shards_per_node
    );

    Ok(CapacityBudget {
        shards_per_node: policy.shards_per_node,
        node_count,
        byte_budget,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::NodeInfo;
    use proptest::prelude::*;

    fn view(memories: &[u64]) -> ClusterView {
        ClusterView::new(
            memories
                .iter()
                .enumerate()
                .map(|(i, m)| NodeInfo {
                    node_id: format!("node{}", i),
                    physical_memory_bytes: *m,
                })
                .collect(),
        )
    }

    fn policy(headroom_factor: f64, node_memory_fraction: f64) -> PlannerPolicy {
        PlannerPolicy {
            shards_per_node: 2,
            node_count: None,
            headroom_factor,
            node_memory_fraction,
        }
    }

    #[test]
    fn test_headroom_below_ceiling() {
        let budget = plan(&view(&[1000]), 100, &policy(2.0, 0.5)).unwrap();
        assert_eq!(budget.byte_budget(), 200);
        assert_eq!(budget.node_count(), 1);
        assert_eq!(budget.shards_per_node(), 2);
        assert_eq!(budget.manager_count(), 2);
    }

    #[test]
    fn test_ceiling_caps_budget() {
        let budget = plan(&view(&[600, 400]), 400, &policy(2.0, 0.5)).unwrap();
        assert_eq!(budget.byte_budget(), 500);
        assert_eq!(budget.node_count(), 2);
    }

    #[test]
    fn test_node_count_above_cluster_size_rejected() {
        let mut p = policy(1.0, 0.1);
        p.node_count = Some(3);
        let err = plan(&view(&[1 << 30, 1 << 30]), 1024, &p).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_explicit_node_count_subset() {
        let mut p = policy(1.0, 0.1);
        p.node_count = Some(1);
        let budget = plan(&view(&[1 << 30, 1 << 30]), 1024, &p).unwrap();
        assert_eq!(budget.node_count(), 1);
    }

    #[test]
    fn test_invalid_policy() {
        assert!(plan(&view(&[1000]), 10, &policy(0.5, 0.5)).is_err());
        assert!(plan(&view(&[1000]), 10, &policy(2.0, 0.0)).is_err());
        assert!(plan(&view(&[1000]), 10, &policy(2.0, 1.5)).is_err());
        assert!(plan(&view(&[1000]), 10, &policy(f64::NAN, 0.5)).is_err());

        let mut p = policy(2.0, 0.5);
        p.shards_per_node = 0;
        assert!(plan(&view(&[1000]), 10, &p).is_err());
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(plan(&view(&[1000]), 0, &policy(2.0, 0.5)).is_err());
        assert!(plan(&view(&[1]), 100, &policy(2.0, 0.5)).is_err());
    }

    #[test]
    fn test_scale_bytes_saturates() {
        assert_eq!(scale_bytes(u64::MAX, 2.0), u64::MAX);
        assert_eq!(scale_bytes(10, 0.25), 2);
    }

    proptest! {
        #[test]
        fn prop_budget_never_exceeds_ceiling(
            memories in prop::collection::vec(1u64..(1 << 40), 1..16),
            estimated in 1u64..(1 << 42),
            headroom in 1.0f64..8.0,
            fraction in 0.01f64..1.0,
        ) {
            let view = view(&memories);
            if let Ok(budget) = plan(&view, estimated, &policy(headroom, fraction)) {
                let ceiling = view.total_memory_bytes() as f64 * fraction;
                prop_assert!(budget.byte_budget() as f64 <= ceiling);
            }
        }

        #[test]
        fn prop_headroom_used_exactly_below_ceiling(
            memory in (1u64 << 30)..(1u64 << 40),
            estimated in 1u64..(1 << 20),
            headroom in 1.0f64..8.0,
        ) {
            let budget = plan(&view(&[memory]), estimated, &policy(headroom, 0.5)).unwrap();
            prop_assert_eq!(budget.byte_budget(), scale_bytes(estimated, headroom));
        }
    }
}
