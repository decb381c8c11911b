//! Run configuration shared by every rank.

use serde::{Deserialize, Serialize};

use crate::delaunay_error::DelaunayError;

/// Tunables for decomposition and the exchange loop.
///
/// Every rank must be handed the same configuration; nothing here is
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaunayConfig {
    /// Requested leaves per rank. The partitioner target is
    /// `(ranks * leaves_per_rank).next_power_of_two()`.
    pub leaves_per_rank: usize,
    /// Abort with [`DelaunayError::NotConverged`] after this many rounds.
    /// `None` runs until the absorbed-point count reaches zero.
    pub max_exchange_rounds: Option<usize>,
    /// Validate leaf invariants after every round, in release builds too.
    pub check_invariants: bool,
}

impl Default for DelaunayConfig {
    fn default() -> Self {
        Self {
            leaves_per_rank: 1,
            max_exchange_rounds: None,
            check_invariants: false,
        }
    }
}

impl DelaunayConfig {
    pub fn validate(&self) -> Result<(), DelaunayError> {
        if self.leaves_per_rank == 0 {
            return Err(DelaunayError::InvalidConfig(
                "leaves_per_rank must be at least 1".into(),
            ));
        }
        if self.max_exchange_rounds == Some(0) {
            return Err(DelaunayError::InvalidConfig(
                "max_exchange_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Leaf count requested from the partitioner for `ranks` processes.
    pub fn target_leaves(&self, ranks: usize) -> usize {
        (ranks.max(1) * self.leaves_per_rank.max(1)).next_power_of_two()
    }
}
