pub mod error;
pub mod ppo;
pub mod rollout;
pub mod utils;

pub use error::{PPOError, Result};
