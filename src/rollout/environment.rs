use std::fmt::Debug;

/// Outcome of one environment transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
}

impl Snapshot {
    pub fn new(observation: Vec<f32>, reward: f32, done: bool) -> Self {
        Self {
            observation,
            reward,
            done,
        }
    }
}

/// Environment driven by a rollout worker. Actions arrive already mapped
/// through the agent's `ActionMap`.
pub trait Environment: Debug + Send + 'static {
    /// Episodes are cut after this many steps.
    const MAX_STEPS: usize = usize::MAX;

    fn reset(&mut self) -> Vec<f32>;

    fn step(&mut self, action: &[f32]) -> Snapshot;
}
