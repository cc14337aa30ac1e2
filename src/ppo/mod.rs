pub mod advantage;
pub mod agent;
pub mod config;
pub mod distribution;
pub mod loss;
pub mod model;
pub mod rollout_buffer;
pub mod training;


pub use agent::{ActionMap, ActionSample, Agent, IntoObservations, ModelParams};
pub use config::PPOTrainingConfig;
pub use model::{Actor, ActorConfig, ActorCritic, Critic, CriticConfig, PolicyNetwork, ValueNetwork};
pub use rollout_buffer::ExperienceBuffer;
pub use training::{MetricsLogger, MinibatchMetrics, PPO, TracingLogger, TrainingSummary, UpdateStats};
