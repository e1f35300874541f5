//! Training infrastructure: rollout buffer, returns, optimizer and PPO.

pub mod buffer;
pub mod returns;

#[cfg(feature = "rl-nn")]
pub mod optim;
#[cfg(feature = "rl-nn")]
pub mod ppo;

pub use buffer::RolloutBuffer;
pub use returns::discounted_returns;

#[cfg(feature = "rl-nn")]
pub use optim::Adam;
#[cfg(feature = "rl-nn")]
pub use ppo::{PolicyGradient, Ppo, UpdateStats, UpdateTarget};
