use super::choices::Choices;
use super::config::Config;
use super::deterministic::Determinism;
use super::shared::Shared;
use crate::save::weights;
use crate::sync::barrier::Barrier;
use crate::sync::region::Region;
use crate::tiles::coder::Coder;
use crate::Tick;
use crate::CHECKPOINT_ODDS;
use crate::MAX_JOINT_ACTIONS;
use crate::MAX_TILINGS;
use crate::TILINGS_PER_GROUP;
use crate::UNKNOWN_TIME;
use anyhow::Result;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::hash::Hasher;

/// scratch tiling, one row of feature indices per joint action.
/// boxed because value bootstrapping through deterministic chains
/// needs a fresh one per recursion level.
type Grid = Vec<[i32; MAX_TILINGS]>;

fn grid() -> Grid {
    vec![[0; MAX_TILINGS]; MAX_JOINT_ACTIONS]
}

/// accumulated discounted in-step reward over an inter-decision
/// interval of tau ticks, one unit per tick
fn reward(gamma: f64, tau: f64) -> crate::Reward {
    if gamma < 1.0 {
        (1.0 - gamma.powf(tau)) / (1.0 - gamma)
    } else {
        tau
    }
}

/// stable context hash of a joint machine state, folded to fit the
/// tile coder's integer coordinate space
fn context(machine: &[String]) -> i64 {
    let mut hasher = DefaultHasher::new();
    machine.hash(&mut hasher);
    (hasher.finish() % i32::MAX as u64) as i64
}

/// joint SMDP learner over the team's choice points. every agent
/// process owns one; they meet at the barrier each decision and the
/// leader (agent 0) performs selection and credit assignment on the
/// shared record on behalf of the team.
pub struct Learner {
    config: Config,
    coder: Coder,
    region: Region<Shared>,
    barrier: Barrier,
    rng: SmallRng,
    choices: Choices,
    /// every joint machine state fixes its fan-out vector for the run
    cardinality: HashMap<Vec<String>, Vec<usize>>,
    determinism: Determinism,
    /// local snapshot of the shared decision state
    machine: Vec<String>,
    last_machine: Vec<String>,
    counts: Vec<usize>,
    joint: Vec<usize>,
    joint_idx: Option<usize>,
    joint_time: Tick,
}

impl Learner {
    pub fn new(config: Config) -> Result<Self> {
        config.check();
        let leader = config.agent == 0;
        let (mut region, created) = match config.shared {
            true => Region::<Shared>::shared(&config.region(), leader)?,
            false => (Region::private(), true),
        };
        let barrier = match config.shared {
            true => Barrier::shared(
                config.tag(),
                config.agents,
                &mut region.get_mut().blocked,
                leader,
            )?,
            false => Barrier::solo(),
        };
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let mut learner = Self {
            config,
            region,
            barrier,
            rng,
            coder: Coder::new(),
            choices: Choices::default(),
            cardinality: HashMap::new(),
            determinism: Determinism::default(),
            machine: Vec::new(),
            last_machine: Vec::new(),
            counts: Vec::new(),
            joint: Vec::new(),
            joint_idx: None,
            joint_time: UNKNOWN_TIME,
        };
        if created {
            let initial = learner.config.initial_weight;
            let shared = learner.region.get_mut();
            shared.reset();
            shared.weights.fill(initial);
            if let Some(path) = learner.config.load_weights.clone() {
                weights::load(learner.region.get_mut(), &path)?;
                log::info!("loaded weights from {}", path.display());
            }
        }
        log::info!(
            "learner up: agent {}/{}, gamma {}, {}",
            learner.config.agent,
            learner.config.agents,
            learner.config.gamma,
            if learner.config.q_learning {
                "q-learning"
            } else {
                "sarsa"
            },
        );
        Ok(learner)
    }

    /// synchronisation entry point, called by the machine runtime at
    /// every choice point. publishes this agent's fan-out and label,
    /// meets the team at the barrier, and returns this agent's
    /// component of the committed joint choice, in [0, alternatives).
    pub fn step(&mut self, time: Tick, state: &[f64], label: &str, alternatives: usize) -> Result<usize> {
        assert!(alternatives >= 1);
        assert!(state.len() >= self.config.features());
        let agent = self.config.agent;
        {
            let shared = self.region.get_mut();
            shared.num_choices[agent] = alternatives as i32;
            shared.set_label(agent, label);
        }
        log::trace!("agent {} offers {} choices at {}", agent, alternatives, label);
        self.barrier.wait()?;
        self.last_machine = self.machine.clone();
        let action_state = self.snapshot();
        self.barrier.wait()?;
        if action_state {
            // nobody has a real alternative: everyone acts
            return Ok(0);
        }
        if agent == 0 {
            // a revisit on the same tick means the previous joint
            // choice led here without any intervening world step
            if time == self.joint_time && !self.last_machine.is_empty() {
                if let Some(last) = self.joint_idx {
                    self.determinism
                        .record(self.last_machine.clone(), last, self.machine.clone());
                }
            }
            let choice = self.decide(time, state);
            self.joint_idx = Some(choice);
            self.joint_time = time;
            self.joint = self.choices.joint(&self.counts)[choice].clone();
            self.publish();
        }
        self.barrier.wait()?;
        let action_state2 = self.snapshot();
        self.barrier.wait()?;
        if action_state2 != action_state {
            log::warn!("choice fan-out changed mid-decision; returning dummy choice");
            return Ok(0);
        }
        match self.counts[agent] {
            0 | 1 => self.step(time, state, label, alternatives),
            _ => {
                let choice = self.joint[agent];
                assert!(choice < alternatives);
                Ok(choice)
            }
        }
    }

    /// terminal SMDP update and decision-state reset. all agents must
    /// call this at every episode boundary.
    pub fn end_episode(&mut self, time: Tick) -> Result<()> {
        if self.config.agent == 0 {
            self.snapshot();
            if self.config.learning {
                if let Some(last) = self.joint_idx {
                    let tilings = self.region.get().num_tilings as usize;
                    assert!(tilings > 0);
                    assert!(self.joint_time != UNKNOWN_TIME && self.joint_time <= time);
                    let tau = (time - self.joint_time) as f64;
                    let delta = reward(self.config.gamma, tau) - self.region.get().q[last];
                    let alpha = self.config.alpha;
                    self.region.get_mut().update_weights(delta, alpha, tilings);
                }
            }
            self.joint_idx = None;
            self.joint_time = UNKNOWN_TIME;
            self.publish();
            self.checkpoint();
        }
        self.barrier.wait()?;
        self.snapshot();
        self.barrier.wait()?;
        self.machine.clear();
        self.last_machine.clear();
        self.counts.clear();
        self.joint.clear();
        self.joint_idx = None;
        self.joint_time = UNKNOWN_TIME;
        log::debug!("agent {} episode closed at {}", self.config.agent, time);
        Ok(())
    }

    /// leader-only inner step: evaluate, select, credit
    fn decide(&mut self, time: Tick, state: &[f64]) -> usize {
        let machine = self.machine.clone();
        let counts = self.counts.clone();
        let valid = self.choices.valid(&counts).to_vec();
        let mut scratch = grid();
        let tilings;
        let choice;
        match self.joint_idx {
            None => {
                // fresh episode: no credit crosses the boundary
                self.region.get_mut().decay_traces(0.0);
                assert!(self.region.get().num_nonzero == 0);
                tilings = self.load_tiles(state, &machine, &counts, &mut scratch);
                self.store(&valid, &scratch, tilings);
                self.evaluate(state, &machine, &valid, &scratch, tilings);
                choice = self.select(&counts);
            }
            Some(last) => {
                assert!(self.joint_time != UNKNOWN_TIME);
                let tau = (time - self.joint_time) as f64;
                let mut delta = reward(self.config.gamma, tau) - self.region.get().q[last];
                tilings = self.load_tiles(state, &machine, &counts, &mut scratch);
                self.store(&valid, &scratch, tilings);
                self.evaluate(state, &machine, &valid, &scratch, tilings);
                choice = self.select(&counts);
                if !self.config.learning {
                    return choice;
                }
                let value = self.region.get().q[choice];
                debug_assert!(value.is_finite(), "Q diverged at joint choice {}", choice);
                if !value.is_finite() {
                    log::error!("non-finite Q at joint choice {}", choice);
                }
                let target = match self.config.q_learning {
                    true => self.argmax(&counts),
                    false => choice,
                };
                delta += self.config.gamma.powf(tau) * self.region.get().q[target];
                let alpha = self.config.alpha;
                self.region.get_mut().update_weights(delta, alpha, tilings);
                let refreshed = self.q_value(state, &machine, choice, &scratch, tilings);
                let decay = self.config.gamma * self.config.lambda;
                let shared = self.region.get_mut();
                shared.q[choice] = refreshed;
                shared.decay_traces(decay);
                // replacing traces across the action dimension
                for &a in valid.iter().filter(|&&a| a != choice) {
                    for j in 0..tilings {
                        shared.clear_trace(scratch[a][j]);
                    }
                }
            }
        }
        let shared = self.region.get_mut();
        for j in 0..tilings {
            shared.set_trace(scratch[choice][j], 1.0);
        }
        log::trace!("decided joint choice {} at {}", choice, time);
        choice
    }

    /// ε-greedy over the joint enumeration
    fn select(&mut self, counts: &[usize]) -> usize {
        if self.config.learning && self.rng.random::<f64>() < self.config.epsilon {
            let valid = self.choices.valid(counts);
            let choice = valid[self.rng.random_range(0..valid.len())];
            log::trace!("exploring joint choice {}", choice);
            choice
        } else {
            self.argmax(counts)
        }
    }

    /// greedy joint choice with reservoir tie-breaking
    fn argmax(&mut self, counts: &[usize]) -> usize {
        let q = self.region.get().q;
        let valid = self.choices.valid(counts).to_vec();
        let mut best = None;
        let mut value = f64::NEG_INFINITY;
        let mut ties = 0;
        for &a in valid.iter() {
            if q[a] > value {
                value = q[a];
                best = Some(a);
                ties = 0;
            } else if q[a] == value {
                ties += 1;
                if self.rng.random_range(0..=ties) == 0 {
                    best = Some(a);
                }
            }
        }
        best.expect("at least one valid joint choice")
    }

    /// hash the joint view and tile every (feature, action) group
    fn load_tiles(
        &mut self,
        state: &[f64],
        machine: &[String],
        counts: &[usize],
        scratch: &mut Grid,
    ) -> usize {
        let valid = self.choices.valid(counts).to_vec();
        let context = context(machine);
        let features = self.config.features();
        let shared = self.region.get_mut();
        let mut tilings = 0;
        for v in 0..features {
            let scaled = (state[v] / self.config.widths[v]) as f32;
            for &a in valid.iter() {
                self.coder.tiles(
                    &mut shared.collisions,
                    &mut scratch[a][tilings..tilings + TILINGS_PER_GROUP],
                    scaled,
                    &[a as i64, v as i64, context],
                );
            }
            tilings += TILINGS_PER_GROUP;
        }
        assert!(tilings > 0);
        assert!(tilings < MAX_TILINGS);
        tilings
    }

    /// persist the scratch tiling into the shared record
    fn store(&mut self, valid: &[usize], scratch: &Grid, tilings: usize) {
        let shared = self.region.get_mut();
        shared.num_tilings = tilings as u32;
        for &a in valid.iter() {
            shared.tiles[a][..tilings].copy_from_slice(&scratch[a][..tilings]);
        }
    }

    /// Q for every valid joint choice, into the shared record
    fn evaluate(
        &mut self,
        state: &[f64],
        machine: &[String],
        valid: &[usize],
        scratch: &Grid,
        tilings: usize,
    ) {
        for &c in valid.iter() {
            let q = self.q_value(state, machine, c, scratch, tilings);
            self.region.get_mut().q[c] = q;
        }
    }

    /// Q(s, M, a): linear in the active tiles, unless the choice is
    /// known to deterministically reach a successor machine state, in
    /// which case it collapses to the bootstrapped V there. the
    /// deterministic map is a DAG, so the recursion terminates.
    fn q_value(
        &mut self,
        state: &[f64],
        machine: &[String],
        choice: usize,
        scratch: &Grid,
        tilings: usize,
    ) -> f64 {
        match self.determinism.successor(machine, choice) {
            Some(successor) => {
                let successor = successor.clone();
                log::trace!("bootstrapping {:?}/{} through {:?}", machine, choice, successor);
                self.value(state, &successor)
            }
            None => self.compute_q(&scratch[choice], tilings),
        }
    }

    /// V(s, M) = max over the valid choices of the witnessed fan-out
    fn value(&mut self, state: &[f64], machine: &[String]) -> f64 {
        let counts = self
            .cardinality
            .get(machine)
            .expect("deterministic successor was witnessed with a fan-out")
            .clone();
        let mut scratch = grid();
        let tilings = self.load_tiles(state, machine, &counts, &mut scratch);
        let valid = self.choices.valid(&counts).to_vec();
        valid
            .into_iter()
            .map(|c| self.q_value(state, machine, c, &scratch, tilings))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn compute_q(&self, row: &[i32], tilings: usize) -> f64 {
        let shared = self.region.get();
        row[..tilings]
            .iter()
            .map(|&f| shared.weights[f as usize])
            .sum()
    }

    /// mirror the shared decision state locally; report whether every
    /// agent is mid-action (nobody fields a real alternative)
    fn snapshot(&mut self) -> bool {
        let agents = self.config.agents;
        let shared = self.region.get();
        self.joint_idx = match shared.joint_idx {
            idx if idx < 0 => None,
            idx => Some(idx as usize),
        };
        self.joint_time = shared.joint_time;
        self.joint = shared.components(agents);
        self.machine = shared.machine(agents);
        self.counts = shared.counts(agents);
        match self.cardinality.entry(self.machine.clone()) {
            Entry::Occupied(entry) => assert!(
                entry.get() == &self.counts,
                "fan-out of {:?} changed from {:?} to {:?}",
                self.machine,
                entry.get(),
                self.counts
            ),
            Entry::Vacant(entry) => {
                entry.insert(self.counts.clone());
            }
        }
        self.counts.iter().all(|&k| k <= 1)
    }

    /// write the local decision state back for the team to read
    fn publish(&mut self) {
        let agents = self.config.agents;
        debug_assert!(self.counts.len() == agents);
        debug_assert!(self.machine.len() == agents);
        debug_assert!(self.joint.len() == agents);
        let idx = self.joint_idx.map(|i| i as i32).unwrap_or(-1);
        let time = self.joint_time;
        let shared = self.region.get_mut();
        shared.joint_idx = idx;
        shared.joint_time = time;
        for i in 0..agents {
            shared.num_choices[i] = self.counts[i] as i32;
            shared.joint[i] = self.joint[i] as i32;
        }
        for i in 0..agents {
            let ref label = self.machine[i];
            shared.set_label(i, label);
        }
    }

    /// 1-in-1000 episode checkpoint. racing a concurrent update is
    /// tolerated by the training protocol; failure is logged, never
    /// fatal.
    fn checkpoint(&mut self) {
        if self.config.learning {
            if let Some(path) = self.config.save_weights.clone() {
                if self.rng.random_range(0..CHECKPOINT_ODDS) == 0 {
                    match weights::save(self.region.get(), &path) {
                        Ok(()) => log::info!("checkpointed weights to {}", path.display()),
                        Err(e) => log::error!("weight checkpoint failed: {}", e),
                    }
                }
            }
        }
    }
}

impl Drop for Learner {
    fn drop(&mut self) {
        if self.config.agent == 0 && self.config.learning {
            if let Some(path) = self.config.save_weights.clone() {
                log::debug!(
                    "maps at shutdown: {} fan-outs, {} deterministic edges",
                    self.cardinality.len(),
                    self.determinism.len()
                );
                log::info!("saving weights at shutdown");
                if let Err(e) = weights::save(self.region.get(), &path) {
                    log::error!("shutdown weight save failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solo(gamma: f64, learning: bool, seed: u64) -> Learner {
        let mut config = Config::new(1, 0, gamma, vec![1.0]);
        config.shared = false;
        config.learning = learning;
        config.seed = Some(seed);
        Learner::new(config).unwrap()
    }

    #[test]
    fn reward_is_tau_when_undiscounted() {
        assert!(reward(1.0, 5.0) == 5.0);
        assert!(reward(1.0, 0.0) == 0.0);
    }

    #[test]
    fn reward_is_monotone_in_tau() {
        for gamma in [0.5, 0.9, 0.99, 1.0] {
            let mut previous = -1.0;
            for tau in 0..20 {
                let r = reward(gamma, tau as f64);
                assert!(r >= previous);
                previous = r;
            }
        }
    }

    #[test]
    fn discounted_reward_matches_closed_form() {
        assert!((reward(0.9, 3.0) - 2.71).abs() < 1e-9);
    }

    #[test]
    fn returned_choice_is_in_range() {
        let mut learner = solo(1.0, true, 11);
        for t in 0..30 {
            let state = [(t % 7) as f64];
            let k = 1 + (t as usize % 3);
            let ref label = format!("[Keeper, K{}]", k);
            let choice = learner.step(t, &state, label, k).unwrap();
            assert!(choice < k);
        }
        learner.end_episode(30).unwrap();
    }

    #[test]
    fn greedy_replay_is_deterministic() {
        let run = |seed| {
            let mut learner = solo(1.0, false, seed);
            let mut choices = Vec::new();
            for t in 0..20 {
                let state = [t as f64 * 0.1];
                choices.push(learner.step(t, &state, "[Keeper]", 3).unwrap());
            }
            learner.end_episode(20).unwrap();
            choices
        };
        assert!(run(7) == run(7));
    }

    #[test]
    fn smdp_return_drives_the_update() {
        let mut learner = solo(0.9, true, 42);
        let state = [0.5];
        let first = learner.step(0, &state, "[Keeper]", 2).unwrap();
        let row = learner.region.get().tiles[first];
        let tilings = learner.region.get().num_tilings as usize;
        assert!(tilings == TILINGS_PER_GROUP);
        learner.step(3, &state, "[Keeper]", 2).unwrap();
        // tau = 3, all Q were zero, so delta is exactly R(tau)
        let delta = (1.0 - 0.9f64.powi(3)) / (1.0 - 0.9);
        let credited: f64 = row[..tilings]
            .iter()
            .map(|&f| learner.region.get().weights[f as usize])
            .sum();
        assert!((credited - delta * 0.125).abs() < 1e-9);
    }

    #[test]
    fn deterministic_shortcut_bootstraps_value() {
        let mut learner = solo(1.0, true, 1);
        learner.region.get_mut().weights.fill(7.0 / 32.0);
        learner
            .cardinality
            .insert(vec!["[Goal]".to_string()], vec![1]);
        learner
            .determinism
            .record(vec!["[Root]".to_string()], 0, vec!["[Goal]".to_string()]);
        let scratch = grid();
        let q = learner.q_value(&[0.5], &vec!["[Root]".to_string()], 0, &scratch, 32);
        assert!((q - 7.0).abs() < 1e-9);
    }

    #[test]
    fn zero_tau_revisit_records_determinism() {
        let mut learner = solo(1.0, true, 3);
        let state = [0.0];
        let first = learner.step(5, &state, "[Root]", 2).unwrap();
        learner.step(5, &state, "[Root, Inner]", 2).unwrap();
        let machine = vec!["[Root]".to_string()];
        assert!(learner.determinism.len() == 1);
        assert!(learner.determinism.successor(&machine, first) == Some(&vec!["[Root, Inner]".to_string()]));
    }

    #[test]
    fn fresh_episode_empties_traces() {
        let mut learner = solo(1.0, true, 5);
        let state = [1.0];
        learner.step(0, &state, "[Keeper]", 2).unwrap();
        learner.step(1, &state, "[Keeper]", 2).unwrap();
        learner.end_episode(2).unwrap();
        learner.step(3, &state, "[Keeper]", 2).unwrap();
        let shared = learner.region.get();
        // only the newly chosen action's tiles carry traces
        assert!(shared.num_nonzero as usize == TILINGS_PER_GROUP);
    }

    /// two agent threads over a real named region and barrier: every
    /// decision commits, components agree with the advertised
    /// fan-outs, and the run terminates
    #[test]
    fn joint_decisions_synchronize_across_agents() {
        const AGENTS: usize = 2;
        const TICKS: Tick = 10;
        let stale = Config::new(AGENTS, 0, 1.0, vec![1.0, 1.0]);
        unsafe {
            let name = std::ffi::CString::new(stale.region()).unwrap();
            libc::shm_unlink(name.as_ptr());
            for suffix in ["mutex", "turnstile", "turnstile2"] {
                let name =
                    std::ffi::CString::new(format!("/{:x}.{}", stale.tag(), suffix)).unwrap();
                libc::sem_unlink(name.as_ptr());
            }
        }
        let spawn = |agent: usize| {
            std::thread::spawn(move || {
                let mut config = Config::new(AGENTS, agent, 1.0, vec![1.0, 1.0]);
                config.seed = Some(9 + agent as u64);
                let mut learner = Learner::new(config).unwrap();
                let mut mine = Vec::new();
                for t in 0..TICKS {
                    let state = [t as f64, -(t as f64)];
                    mine.push(learner.step(t, &state, "[Keeper]", 2).unwrap());
                }
                learner.end_episode(TICKS).unwrap();
                mine
            })
        };
        let leader = spawn(0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let follower = spawn(1);
        let ours = leader.join().unwrap();
        let theirs = follower.join().unwrap();
        assert!(ours.len() == TICKS as usize);
        assert!(theirs.len() == TICKS as usize);
        assert!(ours.iter().chain(theirs.iter()).all(|&c| c < 2));
    }
}
