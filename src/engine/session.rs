//! Per-connection session state: the mutable grouper thresholds and
//! display flags that a server client can override via an option line,
//! isolated from the shared read-only signature table and name arrays so
//! concurrent connections cannot clobber each other's settings.

use super::grouper::GrouperConfig;
use super::otu::OtuTally;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionConfig {
    pub aa: bool,
    pub debug: u32,
    pub hits_only: bool,
    pub min_hits: usize,
    pub min_weighted_hits: f32,
    pub order_constraint: bool,
    pub max_gap: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            aa: false,
            debug: 0,
            hits_only: false,
            min_hits: 5,
            min_weighted_hits: 0.0,
            order_constraint: false,
            max_gap: 200,
        }
    }
}

impl SessionConfig {
    pub fn grouper_config(&self) -> GrouperConfig {
        GrouperConfig {
            min_hits: self.min_hits,
            min_weighted_hits: self.min_weighted_hits,
            max_gap: self.max_gap,
            order_constraint: self.order_constraint,
        }
    }
}

/// Per-connection (or, in pipe mode, whole-process) mutable state: the
/// thresholds a client may override, plus the OTU tally that spans all
/// six frames of one sequence. The grouper itself is per-frame and is
/// constructed fresh for each frame by the frame driver.
pub struct Session {
    pub config: SessionConfig,
    pub otu: OtuTally,
}

impl Session {
    pub fn new(defaults: SessionConfig) -> Self {
        Session { config: defaults, otu: OtuTally::new() }
    }

    /// Reset session parameters to the server's startup defaults at the
    /// start of a new connection.
    pub fn reset_to(&mut self, defaults: SessionConfig) {
        self.config = defaults;
        self.otu.clear();
    }

    /// Clear per-sequence state (the OTU tally) before processing a new
    /// request's frames.
    pub fn start_request(&mut self) {
        self.otu.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_defaults() {
        let d = SessionConfig::default();
        assert_eq!(d.min_hits, 5);
        assert_eq!(d.min_weighted_hits, 0.0);
        assert_eq!(d.max_gap, 200);
        assert!(!d.order_constraint);
        assert!(!d.aa);
        assert!(!d.hits_only);
    }

    #[test]
    fn reset_to_clears_otu_and_restores_config() {
        let mut s = Session::new(SessionConfig::default());
        s.config.min_hits = 1;
        s.otu.record(3);
        s.reset_to(SessionConfig::default());
        assert_eq!(s.config.min_hits, 5);
        assert!(s.otu.entries().is_empty());
    }
}
