use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use chrono::{DateTime, Utc};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info, warn};

use crate::{
    error::{PPOError, Result},
    ppo::{
        advantage::{compute_gae, standardize},
        agent::{Agent, ModelParams},
        config::PPOTrainingConfig,
        loss::{approx_kl, clipped_surrogate_loss, entropy_loss, shifted_value_loss},
        model::{ActorCritic, PolicyNetwork, ValueNetwork},
        rollout_buffer::{ExperienceBuffer, MinibatchTensors, RolloutBatch, TrainingBatch},
    },
    rollout::RolloutGenerator,
    utils::{tensor_scalar, tensor_to_vec},
};

/// Scalars recorded for every optimizer step.
#[derive(Clone, Debug, PartialEq)]
pub struct MinibatchMetrics {
    pub epoch: usize,
    pub minibatch: usize,
    pub samples: usize,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy_loss: f32,
    pub total_loss: f32,
    pub approx_kl: f32,
}

/// Summary of one `calculate` call. Losses are means over minibatches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateStats {
    pub samples: usize,
    pub minibatches: usize,
    pub optimizer_steps: usize,
    pub reward_sum: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy_loss: f32,
    pub approx_kl: f32,
}

impl UpdateStats {
    fn accumulate(&mut self, metrics: &MinibatchMetrics) {
        self.minibatches += 1;
        self.optimizer_steps += 1;
        self.policy_loss += metrics.policy_loss;
        self.value_loss += metrics.value_loss;
        self.entropy_loss += metrics.entropy_loss;
        self.approx_kl += metrics.approx_kl;
    }

    fn finish(mut self) -> Self {
        if self.minibatches > 0 {
            let n = self.minibatches as f32;
            self.policy_loss /= n;
            self.value_loss /= n;
            self.entropy_loss /= n;
            self.approx_kl /= n;
        }
        self
    }
}

/// Counters for one `run`, returned once the generator is exhausted.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updates: usize,
    pub samples: usize,
    pub optimizer_steps: usize,
    pub last_reward_sum: Option<f32>,
}

impl TrainingSummary {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            updates: 0,
            samples: 0,
            optimizer_steps: 0,
            last_reward_sum: None,
        }
    }

    pub fn record(&mut self, stats: &UpdateStats) {
        self.updates += 1;
        self.samples += stats.samples;
        self.optimizer_steps += stats.optimizer_steps;
        self.last_reward_sum = Some(stats.reward_sum);
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// Receives training metrics as they are produced.
pub trait MetricsLogger {
    fn log_minibatch(&mut self, metrics: &MinibatchMetrics);

    fn log_update(&mut self, _stats: &UpdateStats) {}
}

/// Default logger, forwards everything to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl MetricsLogger for TracingLogger {
    fn log_minibatch(&mut self, m: &MinibatchMetrics) {
        debug!(
            epoch = m.epoch,
            minibatch = m.minibatch,
            samples = m.samples,
            policy_loss = m.policy_loss,
            value_loss = m.value_loss,
            entropy_loss = m.entropy_loss,
            total_loss = m.total_loss,
            approx_kl = m.approx_kl,
            "minibatch"
        );
    }

    fn log_update(&mut self, s: &UpdateStats) {
        info!(
            samples = s.samples,
            minibatches = s.minibatches,
            policy_loss = s.policy_loss,
            value_loss = s.value_loss,
            entropy_loss = s.entropy_loss,
            approx_kl = s.approx_kl,
            "policy updated"
        );
    }
}

pub struct PPO<B, A, C, G>
where
    B: AutodiffBackend,
    A: PolicyNetwork<B> + AutodiffModule<B>,
    C: ValueNetwork<B> + AutodiffModule<B>,
    G: RolloutGenerator<A, C>,
{
    agent: Agent<B, A, C>,
    generator: G,
    config: PPOTrainingConfig,
    actor_optimizer: OptimizerAdaptor<Adam, A, B>,
    critic_optimizer: OptimizerAdaptor<Adam, C, B>,
    rng: StdRng,
    logger: Box<dyn MetricsLogger>,
}

impl<B, A, C, G> PPO<B, A, C, G>
where
    B: AutodiffBackend,
    A: PolicyNetwork<B> + AutodiffModule<B>,
    C: ValueNetwork<B> + AutodiffModule<B>,
    G: RolloutGenerator<A, C>,
{
    pub fn new(agent: Agent<B, A, C>, generator: G, config: PPOTrainingConfig) -> Result<Self> {
        config.validate()?;

        let actor_optimizer = AdamConfig::new()
            .with_grad_clipping(config.max_grad_norm.map(GradientClippingConfig::Norm))
            .init();
        let critic_optimizer = AdamConfig::new().init();

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            agent,
            generator,
            config,
            actor_optimizer,
            critic_optimizer,
            rng,
            logger: Box::new(TracingLogger),
        })
    }

    pub fn set_logger(&mut self, logger: Box<dyn MetricsLogger>) {
        self.logger = logger;
    }

    pub fn agent(&self) -> &Agent<B, A, C> {
        &self.agent
    }

    pub fn config(&self) -> &PPOTrainingConfig {
        &self.config
    }

    pub fn generator_mut(&mut self) -> &mut G {
        &mut self.generator
    }

    /// Current actor and critic parameters, actor first.
    pub fn policy_params(&self) -> ModelParams<A, C> {
        self.agent.get_model_params()
    }

    pub fn into_parts(self) -> (Agent<B, A, C>, G) {
        (self.agent, self.generator)
    }

    /// Collects `n_rollouts` buffers, updates, broadcasts, and repeats until the
    /// generator runs dry. A partially filled final group is discarded.
    pub fn run(&mut self) -> Result<TrainingSummary> {
        let mut summary = TrainingSummary::start();
        info!(
            started_at = %summary.started_at,
            n_rollouts = self.config.n_rollouts,
            batch_size = self.config.batch_size,
            epochs = self.config.epochs,
            "starting ppo training"
        );

        let mut rollouts = self.generator.generate_rollouts();
        loop {
            let buffers: Vec<ExperienceBuffer> =
                rollouts.by_ref().take(self.config.n_rollouts).collect();
            if buffers.len() < self.config.n_rollouts {
                if let Some(err) = self.generator.take_failure() {
                    warn!(%err, updates = summary.updates, "rollout generator failed");
                    return Err(err);
                }
                info!(
                    discarded = buffers.len(),
                    updates = summary.updates,
                    "rollout generator exhausted"
                );
                break;
            }

            let stats = self.calculate(&buffers)?;
            summary.record(&stats);
            self.generator.update_parameters(self.agent.get_model_params());
        }

        Ok(summary.finish())
    }

    /// One PPO update over the concatenation of `buffers`.
    pub fn calculate(&mut self, buffers: &[ExperienceBuffer]) -> Result<UpdateStats> {
        let batch = RolloutBatch::concat(buffers)?;
        if batch.len() < 2 {
            return Err(PPOError::InsufficientSteps { steps: batch.len() });
        }
        if batch.action_dims != self.agent.action_map().n_dims() {
            return Err(PPOError::MalformedBatch(format!(
                "rollouts carry {}-dimensional actions, agent expects {}",
                batch.action_dims,
                self.agent.action_map().n_dims()
            )));
        }

        let reward_sum = batch.reward_sum();
        info!(reward_sum, steps = batch.len(), buffers = buffers.len(), "collected rollouts");

        let obs = batch.obs_tensor::<B>(self.agent.device());
        let values = tensor_to_vec(self.agent.forward_critic(obs).detach())?;

        let (returns, mut advantages) = compute_gae(
            &batch.rewards,
            &values,
            &batch.dones,
            self.config.gamma,
            self.config.gae_lambda,
        )?;
        standardize(&mut advantages, self.config.advantage_epsilon);

        let training = TrainingBatch::align(batch, returns, advantages)?;
        let n = training.len();

        let mut stats = UpdateStats {
            samples: n,
            reward_sum,
            ..Default::default()
        };
        // One shuffle per update; every epoch walks the same minibatches.
        let mut permutation: Vec<usize> = (0..n).collect();
        permutation.shuffle(&mut self.rng);
        let shuffled = training.permute(&permutation);

        for epoch in 0..self.config.epochs {
            for (minibatch, start) in (0..n).step_by(self.config.batch_size).enumerate() {
                let end = (start + self.config.batch_size).min(n);
                let tensors = shuffled.minibatch::<B>(start..end, self.agent.device());

                let metrics = self.train_minibatch(tensors, epoch, minibatch)?;
                self.logger.log_minibatch(&metrics);
                stats.accumulate(&metrics);
            }
        }

        let stats = stats.finish();
        self.logger.log_update(&stats);
        Ok(stats)
    }

    fn train_minibatch(
        &mut self,
        batch: MinibatchTensors<B>,
        epoch: usize,
        minibatch: usize,
    ) -> Result<MinibatchMetrics> {
        let [samples, _] = batch.obs.dims();

        let (log_prob, entropy) = self.evaluate_actions(batch.obs.clone(), batch.actions)?;
        let values = self.agent.forward_critic(batch.obs).squeeze::<1>(1);

        let policy_loss = clipped_surrogate_loss(
            log_prob.clone(),
            batch.old_log_probs.clone(),
            batch.advantages,
            self.config.clip_range,
        );
        let entropy_loss = entropy_loss(entropy);
        let value_loss = shifted_value_loss(values, batch.returns);
        let kl = approx_kl(log_prob, batch.old_log_probs);

        let loss = policy_loss.clone()
            + entropy_loss.clone().mul_scalar(self.config.ent_coef)
            + value_loss.clone().mul_scalar(self.config.vf_coef);

        let metrics = MinibatchMetrics {
            epoch,
            minibatch,
            samples,
            policy_loss: tensor_scalar(policy_loss)?,
            value_loss: tensor_scalar(value_loss)?,
            entropy_loss: tensor_scalar(entropy_loss)?,
            total_loss: tensor_scalar(loss.clone())?,
            approx_kl: tensor_scalar(kl)?,
        };

        let mut grads = loss.backward();
        let actor_grads = GradientsParams::from_module(&mut grads, &self.agent.actor);
        let critic_grads = GradientsParams::from_module(&mut grads, &self.agent.critic);

        self.agent.actor =
            self.actor_optimizer
                .step(self.config.lr_actor, self.agent.actor.clone(), actor_grads);
        self.agent.critic =
            self.critic_optimizer
                .step(self.config.lr_critic, self.agent.critic.clone(), critic_grads);

        Ok(metrics)
    }

    /// Joint log-probability of stored `actions` (`[batch, n_dims]`) under the
    /// current policy, and per-sample entropy summed over dimensions.
    pub fn evaluate_actions(
        &self,
        obs: Tensor<B, 2>,
        actions: Tensor<B, 2, Int>,
    ) -> Result<(Tensor<B, 1>, Tensor<B, 1>)> {
        let distributions = self.agent.get_action_distribution(obs)?;
        let [rows, n_dims] = actions.dims();
        if n_dims != distributions.len() {
            return Err(PPOError::MalformedBatch(format!(
                "{n_dims} action columns for {} action dimensions",
                distributions.len()
            )));
        }

        let mut log_probs: Vec<Tensor<B, 1>> = Vec::with_capacity(n_dims);
        let mut entropies: Vec<Tensor<B, 1>> = Vec::with_capacity(n_dims);
        for (dim, dist) in distributions.iter().enumerate() {
            let column: Tensor<B, 1, Int> = actions.clone().slice([0..rows, dim..dim + 1]).squeeze(1);
            log_probs.push(dist.log_prob(column));
            entropies.push(dist.entropy());
        }

        Ok((
            Tensor::stack::<2>(log_probs, 1).sum_dim(1).squeeze(1),
            Tensor::stack::<2>(entropies, 1).sum_dim(1).squeeze(1),
        ))
    }
}
