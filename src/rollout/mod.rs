mod environment;
mod workers;

pub use environment::{Environment, Snapshot};
pub use workers::{PolicySlot, RolloutStream, RolloutWorkerConfig, WorkerRolloutGenerator};

use crate::{
    error::PPOError,
    ppo::{agent::ModelParams, rollout_buffer::ExperienceBuffer},
};

/// Source of experience for the learner.
///
/// `generate_rollouts` hands out an owned stream that may block while workers
/// are still collecting; the stream ending means training is over.
/// `update_parameters` receives a snapshot after every update, actor first.
/// `take_failure` reports why a stream ended early, if it did.
pub trait RolloutGenerator<A, C> {
    type Rollouts: Iterator<Item = ExperienceBuffer>;

    fn generate_rollouts(&mut self) -> Self::Rollouts;

    fn update_parameters(&mut self, params: ModelParams<A, C>);

    fn take_failure(&mut self) -> Option<PPOError> {
        None
    }
}
