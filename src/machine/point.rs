use super::stack::Stack;
use crate::learner::sarsa::Learner;
use crate::Tick;
use anyhow::Result;

/// a named decision among local alternatives. choosing hands the
/// fan-out to the joint learner and indexes the committed component
/// back into the alternatives.
pub struct ChoicePoint<T> {
    name: String,
    choices: Vec<T>,
}

impl<T: Clone> ChoicePoint<T> {
    pub fn new(name: &str, choices: Vec<T>) -> Self {
        assert!(!choices.is_empty());
        Self {
            name: name.to_string(),
            choices,
        }
    }

    pub fn choose(
        &self,
        learner: &mut Learner,
        time: Tick,
        state: &[f64],
        stack: &Stack,
    ) -> Result<T> {
        log::trace!("choice point {} at {}", self.name, stack);
        let index = learner.step(time, state, &stack.label(), self.choices.len())?;
        Ok(self.choices[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::config::Config;

    #[test]
    fn chosen_alternative_comes_from_the_list() {
        let mut config = Config::new(1, 0, 1.0, vec![1.0]);
        config.shared = false;
        config.seed = Some(4);
        let mut learner = Learner::new(config).unwrap();
        let mut stack = Stack::default();
        stack.push("Keeper");
        let point = ChoicePoint::new("passTarget", vec!["near", "far", "hold"]);
        for t in 0..5 {
            let pick = point.choose(&mut learner, t, &[0.25], &stack).unwrap();
            assert!(["near", "far", "hold"].contains(&pick));
        }
        learner.end_episode(5).unwrap();
    }
}
