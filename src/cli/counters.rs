//! Per-request debug counters, summarized via `tracing::debug!` rather
//! than printed to the record stream; the protocol's own stdout output
//! is built entirely from the record kinds in `engine::frame`.

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestCounters {
    pub frames: u64,
    pub hits_seen: u64,
    pub calls_emitted: u64,
    pub grouper_overflow_drops: u64,
}

impl std::ops::AddAssign for RequestCounters {
    fn add_assign(&mut self, other: Self) {
        self.frames += other.frames;
        self.hits_seen += other.hits_seen;
        self.calls_emitted += other.calls_emitted;
        self.grouper_overflow_drops += other.grouper_overflow_drops;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assign_sums_every_field() {
        let mut total = RequestCounters { frames: 1, hits_seen: 2, calls_emitted: 1, grouper_overflow_drops: 0 };
        total += RequestCounters { frames: 1, hits_seen: 3, calls_emitted: 0, grouper_overflow_drops: 2 };
        assert_eq!(total.frames, 2);
        assert_eq!(total.hits_seen, 5);
        assert_eq!(total.calls_emitted, 1);
        assert_eq!(total.grouper_overflow_drops, 2);
    }
}
