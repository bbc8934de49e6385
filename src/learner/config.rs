use crate::MAX_AGENTS;
use crate::MAX_STATE_VARS;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::path::PathBuf;

/// everything the embedding runtime decides once, at startup.
/// misconfiguration is fatal: there is no meaningful recovery for the
/// skill layer, so `check` asserts instead of returning errors.
pub struct Config {
    /// enables TD updates and ε-exploration. when false the greedy
    /// policy runs and weights are never modified.
    pub learning: bool,
    /// off-policy max target instead of the on-policy SARSA target
    pub q_learning: bool,
    /// SMDP discount, supplied by the domain
    pub gamma: f64,
    /// per-feature tile scaling widths; length fixes F
    pub widths: Vec<f64>,
    /// θ entries on a fresh region
    pub initial_weight: f64,
    pub load_weights: Option<PathBuf>,
    pub save_weights: Option<PathBuf>,
    /// team size N and this process's canonical index
    pub agents: usize,
    pub agent: usize,
    /// named region + semaphores; false backs a single-agent private
    /// region for offline evaluation and tests
    pub shared: bool,
    /// fixed exploration / tie-break stream for deterministic replay
    pub seed: Option<u64>,
    // step size, trace decay, exploration rate
    pub alpha: f64,
    pub lambda: f64,
    pub epsilon: f64,
}

impl Config {
    pub fn new(agents: usize, agent: usize, gamma: f64, widths: Vec<f64>) -> Self {
        Self {
            learning: true,
            q_learning: false,
            gamma,
            widths,
            initial_weight: 0.0,
            load_weights: None,
            save_weights: None,
            agents,
            agent,
            shared: agents > 1,
            seed: None,
            alpha: 0.125,
            lambda: 0.0,
            epsilon: 0.01,
        }
    }

    pub fn check(&self) {
        assert!(self.agents > 0 && self.agents <= MAX_AGENTS);
        assert!(self.agent < self.agents);
        assert!(!self.widths.is_empty() && self.widths.len() <= MAX_STATE_VARS);
        assert!(self.widths.iter().all(|&w| w > 0.0));
        assert!(self.gamma > 0.0 && self.gamma <= 1.0);
        assert!(self.shared || self.agents == 1);
    }

    /// number of continuous state features F
    pub fn features(&self) -> usize {
        self.widths.len()
    }

    /// run identity: executable plus the hyperparameters that shape
    /// the region contents. runs differing in any of them must never
    /// share a region; identical runs reattach across restarts.
    pub fn tag(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        std::env::current_exe()
            .unwrap_or_default()
            .hash(&mut hasher);
        self.gamma.to_string().hash(&mut hasher);
        self.initial_weight.to_string().hash(&mut hasher);
        self.q_learning.hash(&mut hasher);
        hasher.finish()
    }

    /// shared-memory object name for this run
    pub fn region(&self) -> String {
        format!("/{:x}.shm", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_separates_hyperparameters() {
        let a = Config::new(1, 0, 1.0, vec![1.0]);
        let mut b = Config::new(1, 0, 0.9, vec![1.0]);
        assert!(a.tag() != b.tag());
        b.gamma = 1.0;
        assert!(a.tag() == b.tag());
        b.q_learning = true;
        assert!(a.tag() != b.tag());
    }

    #[test]
    #[should_panic]
    fn zero_width_is_fatal() {
        Config::new(1, 0, 1.0, vec![1.0, 0.0]).check();
    }
}
