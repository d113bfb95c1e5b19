use serde::{Deserialize, Serialize};

/// Counters kept by one relay pump over the lifetime of a source stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Forwarding sinks created at stream start.
    pub sinks_created: u64,
    pub packets_read: u64,
    /// Successful sink writes (one packet counts once per destination).
    pub packets_forwarded: u64,
    /// Deliveries skipped because the destination had no sink yet.
    pub packets_dropped: u64,
    pub write_errors: u64,
}

impl RelayStats {
    /// Share of attempted deliveries that did not reach a sink, in percent.
    pub fn loss_rate(&self) -> f64 {
        let attempted = self.packets_forwarded + self.packets_dropped + self.write_errors;
        if attempted == 0 {
            return 0.0;
        }
        (self.packets_dropped + self.write_errors) as f64 * 100.0 / attempted as f64
    }
}
