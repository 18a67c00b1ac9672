pub mod env;
pub mod logging;
pub mod rng;
