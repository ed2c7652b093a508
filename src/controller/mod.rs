pub mod loop_detector;
pub mod recovery;
pub mod run;
pub mod verify;

pub use run::{Budgets, ControlLoop, RunOutcome, RunReport};
