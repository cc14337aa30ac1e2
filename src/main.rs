use std::path::PathBuf;

use ballistic_learn::{
    PPOError, Result,
    ppo::{ActionMap, ActorConfig, Agent, CriticConfig, PPO, PPOTrainingConfig},
    rollout::{Environment, RolloutWorkerConfig, Snapshot, WorkerRolloutGenerator},
};
use burn::{
    backend::{Autodiff, NdArray},
    config::Config,
};
use clap::Parser;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

type TrainingBackend = Autodiff<NdArray>;

const ARENA: f32 = 4.0;

/// Point mass that has to be steered onto a target. Each action dimension
/// nudges one axis by -1, 0 or +1 step.
#[derive(Debug)]
struct SteeringEnv {
    rng: StdRng,
    position: [f32; 2],
    target: [f32; 2],
}

impl SteeringEnv {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            position: [0.0; 2],
            target: [0.0; 2],
        }
    }

    fn observation(&self) -> Vec<f32> {
        vec![
            (self.target[0] - self.position[0]) / ARENA,
            (self.target[1] - self.position[1]) / ARENA,
        ]
    }

    fn distance(&self) -> f32 {
        let dx = self.target[0] - self.position[0];
        let dy = self.target[1] - self.position[1];
        (dx * dx + dy * dy).sqrt()
    }
}

impl Environment for SteeringEnv {
    const MAX_STEPS: usize = 64;

    fn reset(&mut self) -> Vec<f32> {
        self.position = [0.0; 2];
        self.target = [
            self.rng.random_range(-ARENA..ARENA),
            self.rng.random_range(-ARENA..ARENA),
        ];
        self.observation()
    }

    fn step(&mut self, action: &[f32]) -> Snapshot {
        let before = self.distance();
        for (axis, delta) in action.iter().enumerate().take(2) {
            self.position[axis] = (self.position[axis] + 0.25 * delta).clamp(-ARENA, ARENA);
        }
        let after = self.distance();

        let reached = after < 0.25;
        let reward = before - after + if reached { 1.0 } else { 0.0 };
        Snapshot::new(self.observation(), reward, reached)
    }
}

#[derive(Debug, Parser)]
#[command(about = "Train a multi-discrete PPO agent on a toy steering task")]
struct Cli {
    #[arg(short = 'v', long, action = clap::ArgAction::Count, help = "Increase verbosity (-v = DEBUG, -vv = TRACE)")]
    verbose: u8,

    #[arg(long, help = "JSON file with a PPOTrainingConfig")]
    config: Option<PathBuf>,

    #[arg(long, help = "Write the effective training config to this path")]
    save_config: Option<PathBuf>,

    #[arg(long, default_value_t = 2, help = "Number of rollout worker threads")]
    workers: usize,

    #[arg(long, default_value_t = 128, help = "Maximum steps per rollout buffer")]
    steps_per_rollout: usize,

    #[arg(long, default_value_t = 144, help = "Total rollouts to train on")]
    rollouts: usize,

    #[arg(long, default_value_t = 64, help = "Hidden layer width of both networks")]
    hidden_size: usize,

    #[arg(long, help = "Seed for minibatch shuffling and environments")]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();

    let mut config = match &cli.config {
        Some(path) => PPOTrainingConfig::load(path)
            .map_err(|e| PPOError::Config(format!("{}: {e}", path.display())))?,
        // A negative coefficient turns the entropy term into an exploration bonus.
        None => PPOTrainingConfig::new().with_n_rollouts(8).with_ent_coef(-0.01),
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate()?;

    if let Some(path) = &cli.save_config {
        config
            .save(path)
            .map_err(|e| PPOError::Config(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "saved training config");
    }

    let device = Default::default();
    let steps = vec![-1.0, 0.0, 1.0];
    let action_map = ActionMap::new(vec![steps.clone(), steps]);
    let actor = ActorConfig::new(2, action_map.choices())
        .with_hidden_size(cli.hidden_size)
        .init::<TrainingBackend>(&device);
    let critic = CriticConfig::new(2)
        .with_hidden_size(cli.hidden_size)
        .init::<TrainingBackend>(&device);
    let agent = Agent::new(actor, critic, action_map, device);

    let worker_config = RolloutWorkerConfig::new()
        .with_n_workers(cli.workers)
        .with_steps_per_rollout(cli.steps_per_rollout)
        .with_max_rollouts(Some(cli.rollouts));
    let env_seed = config.seed.unwrap_or(0);
    let generator = WorkerRolloutGenerator::new(worker_config, &agent, |id| {
        SteeringEnv::new(env_seed.wrapping_add(id as u64))
    })?;

    let mut ppo = PPO::new(agent, generator, config)?;
    let summary = ppo.run()?;

    info!(
        updates = summary.updates,
        samples = summary.samples,
        optimizer_steps = summary.optimizer_steps,
        last_reward_sum = summary.last_reward_sum,
        elapsed_ms = summary.elapsed().num_milliseconds(),
        "training finished"
    );

    let (_, mut generator) = ppo.into_parts();
    generator.shutdown();

    Ok(())
}
