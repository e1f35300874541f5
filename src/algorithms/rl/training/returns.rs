//! Discounted returns.
//!
//! Advantages are estimated at update time as `returns - values`, so only the
//! Monte Carlo returns are stored with the rollout.

/// Computes discounted returns, restarting the sum after every terminal step.
///
/// # Arguments
///
/// * `rewards` - Per-step rewards
/// * `dones` - Per-step episode termination flags
/// * `gamma` - Discount factor
///
/// An unfinished trailing episode is bootstrapped with zero.
pub fn discounted_returns(rewards: &[f64], dones: &[bool], gamma: f64) -> Vec<f64> {
    let n = rewards.len().min(dones.len());
    let mut returns = vec![0.0; n];
    let mut running = 0.0;

    for t in (0..n).rev() {
        if dones[t] {
            running = 0.0;
        }
        running = rewards[t] + gamma * running;
        returns[t] = running;
    }

    returns
}
