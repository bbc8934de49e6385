pub mod barrier;
pub mod region;
pub mod semaphore;
