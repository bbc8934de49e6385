use std::collections::HashMap;

/// per-run cache of observed deterministic transitions: from a joint
/// machine state, taking a joint choice that re-fields no non-trivial
/// decision always lands in the same successor. queried by the value
/// estimator to bootstrap Q through the chain. never persisted: it is
/// a runtime shortcut, not a semantic commitment.
#[derive(Default)]
pub struct Determinism(HashMap<Vec<String>, HashMap<usize, Vec<String>>>);

impl Determinism {
    pub fn successor(&self, machine: &[String], choice: usize) -> Option<&Vec<String>> {
        self.0.get(machine).and_then(|edges| edges.get(&choice))
    }

    /// record an observation. a disagreement with an earlier one means
    /// the supplied machine violated its declared determinism, which
    /// no amount of learning can recover from.
    pub fn record(&mut self, machine: Vec<String>, choice: usize, successor: Vec<String>) {
        let edges = self.0.entry(machine).or_default();
        match edges.get(&choice) {
            None => {
                log::debug!("deterministic transition via {} to {:?}", choice, successor);
                edges.insert(choice, successor);
            }
            Some(known) => {
                assert!(
                    *known == successor,
                    "deterministic map conflict: choice {} reached {:?} then {:?}",
                    choice,
                    known,
                    successor
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.values().map(|edges| edges.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn records_and_recalls() {
        let mut map = Determinism::default();
        map.record(machine(&["[A]", "[B]"]), 3, machine(&["[A, X]", "[B]"]));
        assert!(map.successor(&machine(&["[A]", "[B]"]), 3) == Some(&machine(&["[A, X]", "[B]"])));
        assert!(map.successor(&machine(&["[A]", "[B]"]), 2).is_none());
        assert!(map.len() == 1);
    }

    #[test]
    fn agreement_is_idempotent() {
        let mut map = Determinism::default();
        map.record(machine(&["[A]"]), 0, machine(&["[B]"]));
        map.record(machine(&["[A]"]), 0, machine(&["[B]"]));
        assert!(map.len() == 1);
    }

    #[test]
    #[should_panic]
    fn conflict_is_fatal() {
        let mut map = Determinism::default();
        map.record(machine(&["[A]"]), 0, machine(&["[B]"]));
        map.record(machine(&["[A]"]), 0, machine(&["[C]"]));
    }
}
