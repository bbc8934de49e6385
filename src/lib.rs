pub mod learner;
pub mod machine;
pub mod save;
pub mod sync;
pub mod tiles;

/// dimensional analysis types
pub type Tick = i32;
pub type Reward = f64;
pub type Weight = f64;

/// capacity of the linear function approximator.
/// the shared record is laid out at compile time from these,
/// so two builds disagreeing on any of them map incompatible regions
/// and write incompatible weight files.
pub const MEMORY_SIZE: usize = 1 << 20;
pub const MAX_JOINT_ACTIONS: usize = 128;
pub const MAX_TILINGS: usize = 2048;
pub const MAX_NONZERO_TRACES: usize = 100_000;
pub const MAX_STATE_VARS: usize = 32;
pub const MAX_AGENTS: usize = 11;
pub const MACHINE_LABEL_BYTES: usize = 1024;

// tile coding parameters
pub const TILINGS_PER_GROUP: usize = 32;

// trace bookkeeping parameters
const MINIMUM_TRACE: f64 = 0.01;
const TRACE_GROWTH: f64 = 1.1;

// weight checkpoint odds per episode
const CHECKPOINT_ODDS: u32 = 1000;

/// sentinel for "no decision committed yet"
pub const UNKNOWN_TIME: Tick = -1;

/// initialize logging to terminal and a timestamped file
pub fn init() {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    std::fs::create_dir_all("logs").expect("create logs directory");
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}
