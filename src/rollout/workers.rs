use std::{
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use burn::{module::AutodiffModule, prelude::*, tensor::backend::AutodiffBackend};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{self, PPOError},
    ppo::{
        agent::{Agent, ModelParams},
        model::{PolicyNetwork, ValueNetwork},
        rollout_buffer::ExperienceBuffer,
    },
    rollout::{Environment, RolloutGenerator},
    utils::{int_tensor_to_vec, tensor_scalar},
};

const SEND_POLL: Duration = Duration::from_millis(50);

#[derive(Config, Debug)]
pub struct RolloutWorkerConfig {
    #[config(default = 1)]
    pub n_workers: usize,
    /// Upper bound on steps per buffer; a terminal step closes a buffer early.
    #[config(default = 256)]
    pub steps_per_rollout: usize,
    #[config(default = 16)]
    pub channel_capacity: usize,
    /// Buffers handed out per `generate_rollouts` stream, unbounded if unset.
    #[config(default = "None")]
    pub max_rollouts: Option<usize>,
    #[config(default = false)]
    pub deterministic: bool,
}

impl RolloutWorkerConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.n_workers == 0 {
            return Err(PPOError::Config("n_workers must be at least 1".to_string()));
        }
        if self.steps_per_rollout == 0 {
            return Err(PPOError::Config(
                "steps_per_rollout must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(PPOError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Single pending parameter snapshot shared between the learner and one worker.
///
/// Publishing overwrites whatever the worker has not picked up yet, so a slow
/// worker only ever sees the latest policy.
pub struct PolicySlot<M> {
    pending: Mutex<Option<M>>,
    version: AtomicU64,
}

impl<M> PolicySlot<M> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            version: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Returns true if an unconsumed snapshot was replaced.
    pub fn publish(&self, params: M) -> bool {
        let mut guard = self.pending.lock();
        let replaced = guard.replace(params).is_some();
        self.version.fetch_add(1, Ordering::Release);
        replaced
    }

    pub fn take(&self) -> Option<(M, u64)> {
        let mut guard = self.pending.lock();
        guard.take().map(|params| (params, self.version()))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl<M> Default for PolicySlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking stream of buffers from the worker pool.
///
/// Ends after `max_rollouts` buffers, or once every worker has exited.
pub struct RolloutStream {
    receiver: Receiver<ExperienceBuffer>,
    remaining: Option<usize>,
}

impl RolloutStream {
    pub fn new(receiver: Receiver<ExperienceBuffer>, max_rollouts: Option<usize>) -> Self {
        Self {
            receiver,
            remaining: max_rollouts,
        }
    }
}

impl Iterator for RolloutStream {
    type Item = ExperienceBuffer;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }

        let buffer = self.receiver.recv().ok()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(buffer)
    }
}

type InnerParams<B, A, C> =
    ModelParams<<A as AutodiffModule<B>>::InnerModule, <C as AutodiffModule<B>>::InnerModule>;

/// Thread-per-worker rollout generator.
///
/// Every worker owns an environment and a replica of the agent running on the
/// inner (non-autodiff) backend. Buffers travel over a bounded channel and
/// policy updates through one `PolicySlot` per worker. The first worker error
/// stops the whole pool and is kept for `take_failure`.
pub struct WorkerRolloutGenerator<B, A, C>
where
    B: AutodiffBackend,
    A: AutodiffModule<B>,
    C: AutodiffModule<B>,
{
    receiver: Receiver<ExperienceBuffer>,
    slots: Vec<Arc<PolicySlot<InnerParams<B, A, C>>>>,
    stop: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<PPOError>>>,
    handles: Vec<JoinHandle<()>>,
    max_rollouts: Option<usize>,
    _learner: PhantomData<fn() -> (B, A, C)>,
}

impl<B, A, C> WorkerRolloutGenerator<B, A, C>
where
    B: AutodiffBackend,
    A: PolicyNetwork<B> + AutodiffModule<B>,
    C: ValueNetwork<B> + AutodiffModule<B>,
    A::InnerModule: PolicyNetwork<B::InnerBackend> + 'static,
    C::InnerModule: ValueNetwork<B::InnerBackend> + 'static,
{
    /// Spawns `n_workers` threads; `env_factory` is called once per worker id.
    pub fn new<E, F>(
        config: RolloutWorkerConfig,
        agent: &Agent<B, A, C>,
        mut env_factory: F,
    ) -> error::Result<Self>
    where
        E: Environment,
        F: FnMut(usize) -> E,
    {
        config.validate()?;

        let (sender, receiver) = crossbeam_channel::bounded(config.channel_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));
        let mut slots = Vec::with_capacity(config.n_workers);
        let mut handles = Vec::with_capacity(config.n_workers);

        for id in 0..config.n_workers {
            let slot = Arc::new(PolicySlot::new());
            let worker = Worker {
                id,
                env: env_factory(id),
                agent: Agent::<B::InnerBackend, _, _>::new(
                    agent.actor.valid(),
                    agent.critic.valid(),
                    agent.action_map().clone(),
                    agent.device().clone(),
                ),
                slot: Arc::clone(&slot),
                sender: sender.clone(),
                stop: Arc::clone(&stop),
                failure: Arc::clone(&failure),
                steps_per_rollout: config.steps_per_rollout,
                deterministic: config.deterministic,
                obs: Vec::new(),
                episode_steps: 0,
            };

            let handle = thread::Builder::new()
                .name(format!("rollout-worker-{id}"))
                .spawn(move || worker.run())
                .map_err(|e| PPOError::Worker(format!("failed to spawn worker {id}: {e}")))?;

            slots.push(slot);
            handles.push(handle);
        }

        info!(
            n_workers = config.n_workers,
            steps_per_rollout = config.steps_per_rollout,
            "rollout workers started"
        );

        Ok(Self {
            receiver,
            slots,
            stop,
            failure,
            handles,
            max_rollouts: config.max_rollouts,
            _learner: PhantomData,
        })
    }
}

impl<B, A, C> WorkerRolloutGenerator<B, A, C>
where
    B: AutodiffBackend,
    A: AutodiffModule<B>,
    C: AutodiffModule<B>,
{
    pub fn n_workers(&self) -> usize {
        self.slots.len()
    }

    /// Latest policy version published to worker `id`.
    pub fn policy_version(&self, id: usize) -> Option<u64> {
        self.slots.get(id).map(|slot| slot.version())
    }

    /// Signals every worker to stop and joins them.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.stop.store(true, Ordering::Relaxed);
        while self.receiver.try_recv().is_ok() {}

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("rollout worker panicked");
            }
        }
        debug!("rollout workers stopped");
    }
}

impl<B, A, C> RolloutGenerator<A, C> for WorkerRolloutGenerator<B, A, C>
where
    B: AutodiffBackend,
    A: AutodiffModule<B>,
    C: AutodiffModule<B>,
{
    type Rollouts = RolloutStream;

    fn generate_rollouts(&mut self) -> Self::Rollouts {
        RolloutStream::new(self.receiver.clone(), self.max_rollouts)
    }

    fn update_parameters(&mut self, params: ModelParams<A, C>) {
        let inner = ModelParams {
            actor: params.actor.valid(),
            critic: params.critic.valid(),
        };

        for slot in &self.slots {
            if slot.publish(inner.clone()) {
                debug!(version = slot.version(), "replaced unconsumed policy update");
            }
        }
    }

    fn take_failure(&mut self) -> Option<PPOError> {
        self.failure.lock().take()
    }
}

impl<B, A, C> Drop for WorkerRolloutGenerator<B, A, C>
where
    B: AutodiffBackend,
    A: AutodiffModule<B>,
    C: AutodiffModule<B>,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<B: Backend, A, C, E> {
    id: usize,
    env: E,
    agent: Agent<B, A, C>,
    slot: Arc<PolicySlot<ModelParams<A, C>>>,
    sender: Sender<ExperienceBuffer>,
    stop: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<PPOError>>>,
    steps_per_rollout: usize,
    deterministic: bool,
    obs: Vec<f32>,
    episode_steps: usize,
}

impl<B, A, C, E> Worker<B, A, C, E>
where
    B: Backend,
    A: PolicyNetwork<B>,
    C: ValueNetwork<B>,
    E: Environment,
{
    fn run(mut self) {
        debug!(worker = self.id, "rollout worker running");
        self.obs = self.env.reset();

        while !self.stopped() {
            if let Some((params, version)) = self.slot.take() {
                self.agent.set_model_params(params);
                debug!(worker = self.id, version, "loaded policy update");
            }

            let buffer = match self.collect() {
                Ok(buffer) => buffer,
                Err(err) => {
                    warn!(worker = self.id, %err, "rollout worker aborted");
                    self.fail(err);
                    break;
                }
            };

            if buffer.is_empty() {
                continue;
            }
            if !self.send(buffer) {
                break;
            }
        }

        debug!(worker = self.id, "rollout worker exiting");
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Records the first failure in the pool and stops every worker.
    fn fail(&self, err: PPOError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(PPOError::Worker(format!("worker {}: {err}", self.id)));
        }
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Steps the environment until a terminal step or `steps_per_rollout`.
    ///
    /// The terminal flag is recorded exactly as the environment reports it.
    fn collect(&mut self) -> error::Result<ExperienceBuffer> {
        let mut buffer = ExperienceBuffer::with_capacity(self.steps_per_rollout);

        for _ in 0..self.steps_per_rollout {
            if self.stopped() {
                break;
            }

            let (indices, log_prob) = self.act()?;
            let action = self.agent.get_action(&indices)?;
            let snapshot = self.env.step(&action);
            self.episode_steps += 1;

            let done = snapshot.done || self.episode_steps >= E::MAX_STEPS;
            let obs = std::mem::replace(&mut self.obs, snapshot.observation);
            buffer.add_step(obs, indices, snapshot.reward, done, log_prob);

            if done {
                self.obs = self.env.reset();
                self.episode_steps = 0;
                break;
            }
        }

        Ok(buffer)
    }

    fn act(&self) -> error::Result<(Vec<usize>, f32)> {
        let dists = self.agent.get_action_distribution(self.obs.as_slice())?;
        let sample = self
            .agent
            .get_action_indices(&dists, self.deterministic, true, false);

        let indices = self
            .agent
            .action_map()
            .to_indices(&int_tensor_to_vec(sample.indices)?)?;
        let log_prob = sample.log_prob.map(tensor_scalar).transpose()?.unwrap_or(0.0);

        Ok((indices, log_prob))
    }

    /// Returns false once the learner side is gone or asked to stop.
    fn send(&self, buffer: ExperienceBuffer) -> bool {
        let mut pending = buffer;
        loop {
            match self.sender.send_timeout(pending, SEND_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(buffer)) => {
                    if self.stopped() {
                        return false;
                    }
                    pending = buffer;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}
