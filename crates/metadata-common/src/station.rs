//! Composite station identification.

use serde::{Deserialize, Serialize};

/// Composite key identifying the logical entity a metadata submission
/// belongs to. A station may have many historical submissions, but at most
/// one is active in the pipeline at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationKey {
    /// FDSN network code (e.g. "NL")
    pub network: String,
    /// Station code within the network (e.g. "HGN")
    pub station: String,
}

impl StationKey {
    pub fn new(network: impl Into<String>, station: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
        }
    }
}

impl std::fmt::Display for StationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.network, self.station)
    }
}
