use crate::tiles::collision::Collisions;
use crate::MACHINE_LABEL_BYTES;
use crate::MAX_AGENTS;
use crate::MAX_JOINT_ACTIONS;
use crate::MAX_NONZERO_TRACES;
use crate::MAX_TILINGS;
use crate::MEMORY_SIZE;
use crate::MINIMUM_TRACE;
use crate::UNKNOWN_TIME;
use crate::Weight;

/// everything the learner mutates, in one fixed-layout record mapped
/// into every agent process. between barriers the leader is the only
/// writer; the other agents read their snapshots out of it.
#[repr(C)]
pub struct Shared {
    /// per-joint-action value estimates from the last evaluation
    pub q: [f64; MAX_JOINT_ACTIONS],
    /// per-joint-action active feature indices from the last tiling
    pub tiles: [[i32; MAX_TILINGS]; MAX_JOINT_ACTIONS],
    pub weights: [Weight; MEMORY_SIZE],
    pub traces: [f64; MEMORY_SIZE],
    /// sparse trace support: the first num_nonzero entries are the
    /// feature indices carrying a non-zero trace
    pub nonzero: [i32; MAX_NONZERO_TRACES],
    /// inverse permutation: nonzero[inverse[f]] == f for tracked f
    pub inverse: [i32; MEMORY_SIZE],
    pub collisions: Collisions,

    pub num_tilings: u32,
    pub minimum_trace: f64,
    pub num_nonzero: u32,

    /// per-agent slots, written only by the owning agent
    pub num_choices: [i32; MAX_AGENTS],
    pub labels: [[u8; MACHINE_LABEL_BYTES]; MAX_AGENTS],

    /// the committed joint decision
    pub joint_idx: i32,
    pub joint_time: i32,
    pub joint: [i32; MAX_AGENTS],

    /// barrier occupancy counter
    pub blocked: i32,
}

impl Shared {
    /// fresh-run state. called once by whichever agent created the
    /// region, before anyone else can have reached the first barrier.
    pub fn reset(&mut self) {
        self.q.fill(0.0);
        for row in self.tiles.iter_mut() {
            row.fill(0);
        }
        self.weights.fill(0.0);
        self.traces.fill(0.0);
        self.nonzero.fill(0);
        self.inverse.fill(0);
        self.collisions.reset();
        self.num_tilings = 0;
        self.minimum_trace = MINIMUM_TRACE;
        self.num_nonzero = 0;
        self.num_choices.fill(0);
        for label in self.labels.iter_mut() {
            label.fill(0);
        }
        self.joint_idx = -1;
        self.joint_time = UNKNOWN_TIME;
        self.joint.fill(0);
        self.blocked = 0;
    }

    pub fn label(&self, agent: usize) -> String {
        let bytes = &self.labels[agent];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    pub fn set_label(&mut self, agent: usize, label: &str) {
        assert!(
            label.len() < MACHINE_LABEL_BYTES,
            "machine state label over {} octets",
            MACHINE_LABEL_BYTES - 1
        );
        self.labels[agent].fill(0);
        self.labels[agent][..label.len()].copy_from_slice(label.as_bytes());
    }

    /// label vector in canonical agent order
    pub fn machine(&self, agents: usize) -> Vec<String> {
        (0..agents).map(|i| self.label(i)).collect()
    }

    /// choice cardinalities in canonical agent order
    pub fn counts(&self, agents: usize) -> Vec<usize> {
        self.num_choices[..agents]
            .iter()
            .map(|&k| k as usize)
            .collect()
    }

    /// per-agent components of the committed joint choice
    pub fn components(&self, agents: usize) -> Vec<usize> {
        self.joint[..agents].iter().map(|&c| c as usize).collect()
    }

    /// zeroed heap allocation for private regions and tests
    pub fn boxed() -> Box<Self> {
        let mut shared = unsafe { Box::<Self>::new_zeroed().assume_init() };
        shared.reset();
        shared
    }
}
