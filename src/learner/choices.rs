use crate::MAX_JOINT_ACTIONS;
use std::collections::HashMap;

/// memoised enumeration of the joint choice space. keyed by the
/// vector of per-agent cardinalities, which only takes a handful of
/// distinct values over a run, so the lazy cache stays tiny.
#[derive(Default)]
pub struct Choices {
    valid: HashMap<Vec<usize>, Vec<usize>>,
    joint: HashMap<Vec<usize>, Vec<Vec<usize>>>,
}

impl Choices {
    /// flat indices [0, ∏ k_i) into the joint enumeration
    pub fn valid(&mut self, counts: &[usize]) -> &[usize] {
        self.fill(counts);
        self.valid.get(counts).unwrap()
    }

    /// the lex-ordered tuples of the joint enumeration, first agent
    /// most significant
    pub fn joint(&mut self, counts: &[usize]) -> &[Vec<usize>] {
        self.fill(counts);
        self.joint.get(counts).unwrap()
    }

    fn fill(&mut self, counts: &[usize]) {
        if !self.valid.contains_key(counts) {
            let tuples = Self::enumerate(counts);
            assert!(
                tuples.len() <= MAX_JOINT_ACTIONS,
                "joint choice space {} exceeds capacity {}",
                tuples.len(),
                MAX_JOINT_ACTIONS
            );
            self.valid
                .insert(counts.to_vec(), (0..tuples.len()).collect());
            self.joint.insert(counts.to_vec(), tuples);
        }
    }

    fn enumerate(counts: &[usize]) -> Vec<Vec<usize>> {
        match counts.split_first() {
            None => vec![vec![]],
            Some((&head, tail)) => {
                let rest = Self::enumerate(tail);
                let mut tuples = Vec::with_capacity(head.max(1) * rest.len());
                for i in 0..head {
                    for suffix in rest.iter() {
                        let mut tuple = Vec::with_capacity(counts.len());
                        tuple.push(i);
                        tuple.extend_from_slice(suffix);
                        tuples.push(tuple);
                    }
                }
                tuples
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_enumeration() {
        let mut choices = Choices::default();
        let joint = choices.joint(&[2, 3]);
        assert!(joint.len() == 6);
        assert!(joint[0] == vec![0, 0]);
        assert!(joint[1] == vec![0, 1]);
        assert!(joint[2] == vec![0, 2]);
        assert!(joint[3] == vec![1, 0]);
        assert!(joint[5] == vec![1, 2]);
    }

    #[test]
    fn dummy_agents_collapse() {
        let mut choices = Choices::default();
        let joint = choices.joint(&[1, 2, 1]).to_vec();
        assert!(joint.len() == 2);
        assert!(joint[0] == vec![0, 0, 0]);
        assert!(joint[1] == vec![0, 1, 0]);
        assert!(choices.valid(&[1, 2, 1]) == [0, 1]);
    }

    #[test]
    fn memoisation_is_stable() {
        let mut choices = Choices::default();
        let first = choices.joint(&[2, 2]).to_vec();
        let again = choices.joint(&[2, 2]).to_vec();
        assert!(first == again);
    }

    #[test]
    #[should_panic]
    fn oversized_joint_space_is_fatal() {
        let mut choices = Choices::default();
        choices.valid(&[MAX_JOINT_ACTIONS, 2]);
    }
}
