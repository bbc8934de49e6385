use super::shared::Shared;
use crate::MAX_NONZERO_TRACES;
use crate::MEMORY_SIZE;
use crate::TRACE_GROWTH;

/// replacing eligibility traces over the sparse support arrays.
/// the support is a swap-remove set with an inverse permutation, so
/// membership, insertion and removal are all O(1) and decay is linear
/// in the number of live traces rather than in feature-space size.
impl Shared {
    /// set (or replace) the trace for feature f. growing past the
    /// support capacity raises the minimum trace until room appears.
    pub fn set_trace(&mut self, f: i32, value: f64) {
        let Some(f) = self.tracked(f, "set trace") else {
            return;
        };
        if self.traces[f] >= self.minimum_trace {
            self.traces[f] = value;
        } else {
            while self.num_nonzero as usize >= MAX_NONZERO_TRACES {
                self.increase_min_trace();
            }
            self.traces[f] = value;
            self.nonzero[self.num_nonzero as usize] = f as i32;
            self.inverse[f] = self.num_nonzero as i32;
            self.num_nonzero += 1;
        }
    }

    /// drop feature f from the support if present
    pub fn clear_trace(&mut self, f: i32) {
        let Some(f) = self.tracked(f, "clear trace") else {
            return;
        };
        if self.traces[f] != 0.0 {
            self.clear_existent(f, self.inverse[f] as usize);
        }
    }

    /// multiply every live trace by rate, dropping any that fall
    /// below the minimum. rate zero empties the support.
    pub fn decay_traces(&mut self, rate: f64) {
        for loc in (0..self.num_nonzero as usize).rev() {
            let f = self.nonzero[loc] as usize;
            self.traces[f] *= rate;
            if self.traces[f] < self.minimum_trace {
                self.clear_existent(f, loc);
            }
        }
    }

    /// raise the admission threshold and re-filter the support.
    /// called when the support is full; repeated calls eventually
    /// clear room because every trace is finite.
    pub fn increase_min_trace(&mut self) {
        self.minimum_trace *= TRACE_GROWTH;
        log::warn!("raising minimum trace to {}", self.minimum_trace);
        for loc in (0..self.num_nonzero as usize).rev() {
            let f = self.nonzero[loc] as usize;
            if self.traces[f] < self.minimum_trace {
                self.clear_existent(f, loc);
            }
        }
    }

    /// credit the TD error to every feature in proportion to its
    /// trace. non-finite results are a divergence bug: fatal in debug,
    /// skipped in release so a long training run can limp on.
    pub fn update_weights(&mut self, delta: f64, alpha: f64, tilings: usize) {
        assert!(tilings > 0);
        let step = delta * alpha / tilings as f64;
        for loc in 0..self.num_nonzero as usize {
            let f = self.nonzero[loc] as usize;
            let weight = self.weights[f] + step * self.traces[f];
            debug_assert!(weight.is_finite(), "weight diverged at feature {}", f);
            if weight.is_finite() {
                self.weights[f] = weight;
            } else {
                log::error!("skipping non-finite weight update at feature {}", f);
            }
        }
    }

    /// swap-remove from the support, patching the inverse permutation
    fn clear_existent(&mut self, f: usize, loc: usize) {
        debug_assert!(self.nonzero[loc] as usize == f);
        self.traces[f] = 0.0;
        self.num_nonzero -= 1;
        let last = self.nonzero[self.num_nonzero as usize];
        self.nonzero[loc] = last;
        self.inverse[last as usize] = loc as i32;
    }

    /// bounds guard. out-of-range indices can only come from a
    /// corrupted region surviving a process restart; tolerate them.
    fn tracked(&self, f: i32, op: &str) -> Option<usize> {
        if f < 0 || f as usize >= MEMORY_SIZE {
            log::error!("{}: feature {} out of range", op, f);
            None
        } else {
            Some(f as usize)
        }
    }
}
