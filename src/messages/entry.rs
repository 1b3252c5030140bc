//! Registration handshake of remote worker hosts.

use serde::{Deserialize, Serialize};

use crate::config::TrainConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    pub host: String,
    /// Worker processes the host offers.
    pub num_process: usize,
}

/// Roles assigned to a host's workers, plus the full training config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryResponse {
    pub config: TrainConfig,
    pub generator_ids: Vec<usize>,
    pub evaluator_ids: Vec<usize>,
}
