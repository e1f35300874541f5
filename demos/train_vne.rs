// Demonstration: train the multi-policy solver on generated requests and
// evaluate it on a held-out set.
//
// Build/run from this repo root:
//   cargo run --example train_vne -- --episodes 200 --eval 50 --config solver.yaml --load model/model.pt

use std::env;

use anyhow::Result;
use vnembed::algorithms::rl::{MultiPolicySolver, SolverConfig};
use vnembed::topology::NetworkGenerator;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let episodes: usize = arg_value(&args, "--episodes")
        .and_then(|s| s.parse().ok())
        .unwrap_or(200);
    let eval: usize = arg_value(&args, "--eval")
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);

    let mut config = match arg_value(&args, "--config") {
        Some(path) => SolverConfig::load(path)?,
        None => SolverConfig::default(),
    };
    if let Some(seed) = arg_value(&args, "--seed").and_then(|s| s.parse().ok()) {
        config.seed = seed;
    }

    let mut generator = NetworkGenerator::new(config.generator.clone(), config.seed);
    let p_net = generator.physical_network()?;
    let train = generator.instances(&p_net, episodes)?;
    let test = generator.instances(&p_net, eval)?;

    let mut solver = MultiPolicySolver::new(config)?;
    if let Some(path) = arg_value(&args, "--load") {
        solver.load_model(path);
    }

    let metrics = solver.learn(&train)?;
    println!("Training");
    println!("{}", metrics);

    let path = solver.save_model("model.pt")?;
    println!("Task policies {:?} saved to {}", solver.task_ids(), path.display());

    let metrics = solver.evaluate(&test)?;
    println!("Evaluation");
    println!("{}", metrics);
    Ok(())
}

fn arg_value<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
