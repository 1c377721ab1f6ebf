//! The hit grouper: a small per-frame state machine that folds a stream of
//! [`RawHit`]s into `CALL` records, governed by function identity, gap
//! distance, positional-offset coherence and weighted-hit thresholds.
//!
//! The two-hit tail carry at a function transition mirrors a buffer of
//! exactly two trailing hits being handed forward to seed the next group.
//! A gap-triggered flush can leave fewer than two buffered hits (possible
//! with `min_hits < 2`); this implementation guards that case explicitly
//! rather than indexing before the start of the buffer.

use super::otu::OtuTally;
use super::scanner::RawHit;

/// Maximum buffered hits per sequence.
pub const MAX_HITS_PER_SEQ: usize = 40_000;

#[derive(Clone, Copy, Debug)]
pub struct GrouperConfig {
    pub min_hits: usize,
    pub min_weighted_hits: f32,
    pub max_gap: u32,
    pub order_constraint: bool,
}

impl Default for GrouperConfig {
    fn default() -> Self {
        GrouperConfig {
            min_hits: 5,
            min_weighted_hits: 0.0,
            max_gap: 200,
            order_constraint: false,
        }
    }
}

/// An emitted CALL: a contiguous run of hits implicating one function.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRecord {
    pub start: u32,
    pub end: u32,
    pub hit_count: u32,
    pub function_index: i32,
    pub weighted_hits: f32,
}

/// Per-frame (really, per-request — it is reset at the start of each
/// frame and by every flush without a tail carry) grouping buffer.
pub struct Grouper {
    config: GrouperConfig,
    hits: Vec<RawHit>,
    current_fi: Option<i32>,
    overflow_drops: u64,
}

impl Grouper {
    pub fn new(config: GrouperConfig) -> Self {
        Grouper {
            config,
            hits: Vec::with_capacity(64),
            current_fi: None,
            overflow_drops: 0,
        }
    }

    /// Reset to empty at the start of a new frame.
    pub fn reset(&mut self) {
        self.hits.clear();
        self.current_fi = None;
    }

    /// Hits dropped so far because the buffer hit `MAX_HITS_PER_SEQ - 2`.
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops
    }

    /// Feed one raw hit (in ascending `from0_in_prot` order) through the
    /// state machine, emitting zero or more CALLs via `on_call` and
    /// crediting accepted hits' OTUs to `otu`.
    pub fn ingest(&mut self, hit: RawHit, on_call: &mut impl FnMut(CallRecord), otu: &mut OtuTally) {
        // 1. Gap check.
        if let Some(last) = self.hits.last() {
            if hit.from0_in_prot.saturating_sub(last.from0_in_prot) > self.config.max_gap {
                if self.hits.len() >= self.config.min_hits {
                    self.emit(on_call, otu);
                } else {
                    self.hits.clear();
                    self.current_fi = None;
                }
            }
        }

        // 2. First-hit init.
        if self.hits.is_empty() {
            self.current_fi = Some(hit.function_index);
        }

        // 3. Acceptance predicate.
        let accept = !self.config.order_constraint
            || self.hits.is_empty()
            || {
                let last = self.hits.last().unwrap();
                hit.function_index == last.function_index
                    && ((hit.from0_in_prot as i64 - last.from0_in_prot as i64)
                        - (last.avg_off_from_end as i64 - hit.avg_off_from_end as i64))
                        .abs()
                        <= 20
            };
        if !accept {
            return;
        }

        // 4. Overflow guard.
        if self.hits.len() >= MAX_HITS_PER_SEQ - 2 {
            self.overflow_drops += 1;
            return;
        }
        self.hits.push(hit);

        // 5. Function-transition emission trigger.
        let n = self.hits.len();
        if n > 1
            && self.current_fi != Some(hit.function_index)
            && self.hits[n - 2].function_index == self.hits[n - 1].function_index
        {
            self.emit(on_call, otu);
        }
    }

    /// Flush at frame end: if the buffer meets `min_hits`, run emission;
    /// the buffer is always empty after this call.
    pub fn finish(&mut self, on_call: &mut impl FnMut(CallRecord), otu: &mut OtuTally) {
        if self.hits.len() >= self.config.min_hits {
            self.emit(on_call, otu);
        }
        self.hits.clear();
        self.current_fi = None;
    }

    /// The CALL emission procedure: tally hits sharing the active function,
    /// emit a CALL if the thresholds clear, then either carry the trailing
    /// two hits into a fresh group or clear the buffer.
    fn emit(&mut self, on_call: &mut impl FnMut(CallRecord), otu: &mut OtuTally) {
        let current_fi = match self.current_fi {
            Some(fi) => fi,
            None => {
                self.hits.clear();
                return;
            }
        };

        let mut fi_count: u32 = 0;
        let mut weighted_hits: f32 = 0.0;
        let mut last_hit = 0usize;
        for (i, h) in self.hits.iter().enumerate() {
            if h.function_index == current_fi {
                last_hit = i;
                fi_count += 1;
                weighted_hits += h.function_weight;
            }
        }

        if fi_count >= self.config.min_hits as u32 && weighted_hits >= self.config.min_weighted_hits {
            on_call(CallRecord {
                start: self.hits[0].from0_in_prot,
                end: self.hits[last_hit].from0_in_prot + (super::alphabet::K as u32 - 1),
                hit_count: fi_count,
                function_index: current_fi,
                weighted_hits,
            });
            for h in self.hits.iter().take(last_hit + 1) {
                if h.function_index == current_fi {
                    otu.record(h.otu_index);
                }
            }
        }

        // Post-step: carry the two trailing hits if they seed a new group.
        let n = self.hits.len();
        if n >= 2 {
            let a = self.hits[n - 2];
            let b = self.hits[n - 1];
            if a.function_index != current_fi && a.function_index == b.function_index {
                self.current_fi = Some(b.function_index);
                self.hits.truncate(0);
                self.hits.push(a);
                self.hits.push(b);
                return;
            }
        }
        self.hits.clear();
        self.current_fi = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(pos: u32, fi: i32, avg_off: u16, oi: i32, wt: f32) -> RawHit {
        RawHit {
            from0_in_prot: pos,
            encoded_kmer: 0,
            avg_off_from_end: avg_off,
            function_index: fi,
            otu_index: oi,
            function_weight: wt,
        }
    }

    #[test]
    fn s1_single_function_two_hits_call() {
        let mut g = Grouper::new(GrouperConfig { min_hits: 1, ..Default::default() });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        g.ingest(hit(0, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.ingest(hit(8, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert_eq!(calls.len(), 1);
        let c = &calls[0];
        assert_eq!(c.start, 0);
        assert_eq!(c.end, 8 + (super::super::alphabet::K as u32 - 1));
        assert_eq!(c.hit_count, 2);
        assert_eq!(c.weighted_hits, 2.0);
    }

    #[test]
    fn s2_gap_splits_into_two_calls() {
        let mut g = Grouper::new(GrouperConfig { min_hits: 1, max_gap: 200, ..Default::default() });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        g.ingest(hit(0, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        // next hit far beyond max_gap
        g.ingest(hit(209, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].start, 0);
        assert_eq!(calls[1].start, 209);
        assert_eq!(calls[0].hit_count, 1);
        assert_eq!(calls[1].hit_count, 1);
    }

    #[test]
    fn order_constraint_rejects_incoherent_hit() {
        // Second hit avg_from_end=40 vs first=12: |1 - (12-40)| = 29 > 20, rejected.
        let mut g = Grouper::new(GrouperConfig {
            min_hits: 2,
            order_constraint: true,
            ..Default::default()
        });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        g.ingest(hit(0, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.ingest(hit(1, 7, 40, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert!(calls.is_empty());
    }

    #[test]
    fn order_constraint_accepts_coherent_hit() {
        // avg_from_end=30 vs first=12: |1 - (12-30)| = 19 <= 20, accepted.
        let mut g = Grouper::new(GrouperConfig {
            min_hits: 2,
            order_constraint: true,
            ..Default::default()
        });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        g.ingest(hit(0, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.ingest(hit(1, 7, 30, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].hit_count, 2);
    }

    #[test]
    fn weighted_threshold_gates_call() {
        let mut g = Grouper::new(GrouperConfig {
            min_hits: 1,
            min_weighted_hits: 1.0,
            ..Default::default()
        });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        for p in [0u32, 1, 2] {
            g.ingest(hit(p, 7, 12, 3, 0.3), &mut |c| calls.push(c), &mut otu);
        }
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert!(calls.is_empty(), "0.9 weighted total should not clear 1.0 threshold");
    }

    #[test]
    fn weighted_threshold_allows_call_when_lowered() {
        let mut g = Grouper::new(GrouperConfig {
            min_hits: 1,
            min_weighted_hits: 0.5,
            ..Default::default()
        });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        for p in [0u32, 1, 2] {
            g.ingest(hit(p, 7, 12, 3, 0.3), &mut |c| calls.push(c), &mut otu);
        }
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert_eq!(calls.len(), 1);
        assert!((calls[0].weighted_hits - 0.9).abs() < 1e-5);
    }

    #[test]
    fn function_transition_carries_trailing_pair() {
        // 5 hits of fI=1 (min_hits=5) followed by 2 hits of fI=2: the
        // transition should emit the fI=1 call and seed fI=2's group with
        // the carried pair, which then needs just one more hit to call.
        let mut g = Grouper::new(GrouperConfig { min_hits: 3, ..Default::default() });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        for p in 0..3u32 {
            g.ingest(hit(p, 1, 0, 0, 1.0), &mut |c| calls.push(c), &mut otu);
        }
        g.ingest(hit(3, 2, 0, 0, 1.0), &mut |c| calls.push(c), &mut otu);
        g.ingest(hit(4, 2, 0, 0, 1.0), &mut |c| calls.push(c), &mut otu);
        // transition triggers here: fI=1 call emitted, fI=2 seeded with [3,4]
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_index, 1);
        g.ingest(hit(5, 2, 0, 0, 1.0), &mut |c| calls.push(c), &mut otu);
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].function_index, 2);
        assert_eq!(calls[1].hit_count, 3);
    }

    #[test]
    fn small_buffer_gap_flush_does_not_panic_on_tail_carry() {
        // A gap-triggered flush with exactly one buffered hit must not
        // attempt the two-hit tail carry.
        let mut g = Grouper::new(GrouperConfig { min_hits: 1, max_gap: 5, ..Default::default() });
        let mut otu = OtuTally::new();
        let mut calls = Vec::new();
        g.ingest(hit(0, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.ingest(hit(50, 7, 12, 3, 1.0), &mut |c| calls.push(c), &mut otu);
        g.finish(&mut |c| calls.push(c), &mut otu);
        assert_eq!(calls.len(), 2);
    }
}
