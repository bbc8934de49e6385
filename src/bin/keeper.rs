//! Keeper binary
//!
//! Synthetic keepaway run: three keeper threads attach the shared
//! region, meet at the barrier every decision, and jointly learn a
//! hold/pass policy over a toy world model. Stands in for the soccer
//! simulation client while exercising the full learning stack.

use anyhow::Result;
use keepaway::learner::config::Config;
use keepaway::learner::sarsa::Learner;
use keepaway::machine::point::ChoicePoint;
use keepaway::machine::stack::Stack;
use keepaway::Tick;

const KEEPERS: usize = 3;
const EPISODES: usize = 200;
const DECISIONS: usize = 25;
const GAMMA: f64 = 1.0;

/// distances to the ball and to the open teammates, plus the two
/// passing lanes' angles
const WIDTHS: [f64; 4] = [3.0, 3.0, 10.0, 10.0];

fn main() {
    keepaway::init();
    let threads = (0..KEEPERS)
        .map(|agent| {
            let handle = std::thread::spawn(move || keeper(agent));
            // let the first keeper create and zero the region before
            // the rest attach
            if agent == 0 {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            handle
        })
        .collect::<Vec<_>>();
    for thread in threads {
        thread.join().expect("keeper thread").expect("keeper run");
    }
    log::info!("all keepers done");
}

fn keeper(agent: usize) -> Result<()> {
    let mut config = Config::new(KEEPERS, agent, GAMMA, WIDTHS.to_vec());
    config.save_weights = match agent {
        0 => Some("logs/keeper.weights".into()),
        _ => None,
    };
    let mut learner = Learner::new(config)?;
    let mut stack = Stack::default();
    stack.push("Keeper");
    let point = ChoicePoint::new("move", vec!["hold", "passNear", "passFar"]);
    for episode in 0..EPISODES {
        let mut time: Tick = (episode * 1000) as Tick;
        for decision in 0..DECISIONS {
            let state = observe(episode, decision);
            let action = point.choose(&mut learner, time, &state, &stack)?;
            log::trace!("keeper {} plays {} at {}", agent, action, time);
            // the world ticks once per decision, with the occasional
            // longer possession
            time += 1 + (decision % 3) as Tick;
        }
        learner.end_episode(time)?;
        if agent == 0 && episode % 50 == 0 {
            log::info!("episode {:>4} of {}", episode, EPISODES);
        }
    }
    Ok(())
}

/// stand-in world model: a deterministic pseudo-random walk, so every
/// keeper derives the identical state vector at the identical tick
fn observe(episode: usize, decision: usize) -> [f64; 4] {
    let mut x = (episode as u64 + 1).wrapping_mul(6364136223846793005).wrapping_add(decision as u64);
    let mut state = [0.0; 4];
    for (v, feature) in state.iter_mut().enumerate() {
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let unit = (x >> 11) as f64 / (1u64 << 53) as f64;
        *feature = unit * (10.0 + v as f64 * 5.0);
    }
    state
}
