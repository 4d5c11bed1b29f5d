pub mod results;
pub mod simulator;

pub use results::*;
pub use simulator::{simulate, PositionSimulator};
