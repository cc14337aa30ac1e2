use burn::prelude::*;

use crate::{
    error::{PPOError, Result},
    ppo::{
        distribution::CategoricalDistribution,
        model::{ActorCritic, PolicyNetwork, ValueNetwork},
    },
    utils::{float_tensor_2d, int_tensor_to_vec},
};

/// Anything the agent accepts as a batch of observations.
///
/// Conversion happens once, at the boundary; the rest of the agent only ever
/// sees `[batch, obs_dim]` tensors.
pub trait IntoObservations<B: Backend> {
    fn into_observations(self, device: &B::Device) -> Result<Tensor<B, 2>>;
}

impl<B: Backend> IntoObservations<B> for Tensor<B, 2> {
    fn into_observations(self, _device: &B::Device) -> Result<Tensor<B, 2>> {
        Ok(self)
    }
}

impl<B: Backend> IntoObservations<B> for &[Vec<f32>] {
    fn into_observations(self, device: &B::Device) -> Result<Tensor<B, 2>> {
        let obs_dim = self.first().map(Vec::len).unwrap_or(0);
        if obs_dim == 0 {
            return Err(PPOError::Observation(
                "observation batch is empty".to_string(),
            ));
        }

        let mut flat = Vec::with_capacity(self.len() * obs_dim);
        for (row, obs) in self.iter().enumerate() {
            if obs.len() != obs_dim {
                return Err(PPOError::Observation(format!(
                    "row {row} has {} features, expected {obs_dim}",
                    obs.len()
                )));
            }
            flat.extend_from_slice(obs);
        }

        Ok(float_tensor_2d(flat, self.len(), obs_dim, device))
    }
}

impl<B: Backend> IntoObservations<B> for Vec<Vec<f32>> {
    fn into_observations(self, device: &B::Device) -> Result<Tensor<B, 2>> {
        self.as_slice().into_observations(device)
    }
}

/// A single observation becomes a batch of one.
impl<B: Backend> IntoObservations<B> for &[f32] {
    fn into_observations(self, device: &B::Device) -> Result<Tensor<B, 2>> {
        if self.is_empty() {
            return Err(PPOError::Observation("observation is empty".to_string()));
        }
        Ok(float_tensor_2d(self.to_vec(), 1, self.len(), device))
    }
}

/// Per-dimension lookup tables translating sampled indices into the raw
/// action vector the environment expects.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionMap {
    tables: Vec<Vec<f32>>,
}

impl ActionMap {
    pub fn new(tables: Vec<Vec<f32>>) -> Self {
        Self { tables }
    }

    pub fn n_dims(&self) -> usize {
        self.tables.len()
    }

    /// Number of choices per dimension.
    pub fn choices(&self) -> Vec<usize> {
        self.tables.iter().map(Vec::len).collect()
    }

    pub fn lookup(&self, indices: &[usize]) -> Result<Vec<f32>> {
        if indices.len() > self.tables.len() {
            return Err(PPOError::TooManyActionDimensions {
                got: indices.len(),
                max: self.tables.len(),
            });
        }

        indices
            .iter()
            .zip(&self.tables)
            .enumerate()
            .map(|(dim, (&index, table))| {
                table
                    .get(index)
                    .copied()
                    .ok_or(PPOError::ActionIndexOutOfRange {
                        dim,
                        index: index as i64,
                        choices: table.len(),
                    })
            })
            .collect()
    }

    /// Converts one row of sampled tensor indices to table indices.
    pub fn to_indices(&self, row: &[i64]) -> Result<Vec<usize>> {
        row.iter()
            .enumerate()
            .map(|(dim, &index)| {
                usize::try_from(index).map_err(|_| PPOError::ActionIndexOutOfRange {
                    dim,
                    index,
                    choices: self.tables.get(dim).map_or(0, Vec::len),
                })
            })
            .collect()
    }
}

/// Result of `Agent::get_action_indices`.
///
/// `indices` is always present; `log_prob` and `entropy` are only filled when
/// requested and are summed over action dimensions.
#[derive(Clone, Debug)]
pub struct ActionSample<B: Backend> {
    /// `[batch, n_dims]`
    pub indices: Tensor<B, 2, Int>,
    pub log_prob: Option<Tensor<B, 1>>,
    pub entropy: Option<Tensor<B, 1>>,
}

/// Snapshot of both parameter sets, actor first.
#[derive(Clone, Debug)]
pub struct ModelParams<A, C> {
    pub actor: A,
    pub critic: C,
}

#[derive(Clone, Debug)]
pub struct Agent<B: Backend, A, C> {
    pub actor: A,
    pub critic: C,
    action_map: ActionMap,
    device: B::Device,
}

impl<B, A, C> Agent<B, A, C>
where
    B: Backend,
    A: PolicyNetwork<B>,
    C: ValueNetwork<B>,
{
    pub fn new(actor: A, critic: C, action_map: ActionMap, device: B::Device) -> Self {
        Self {
            actor,
            critic,
            action_map,
            device,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn action_map(&self) -> &ActionMap {
        &self.action_map
    }

    pub fn get_action_distribution<O: IntoObservations<B>>(
        &self,
        obs: O,
    ) -> Result<Vec<CategoricalDistribution<B>>> {
        let obs = obs.into_observations(&self.device)?;

        Ok(self
            .forward_actor(obs)
            .into_iter()
            .map(CategoricalDistribution::new)
            .collect())
    }

    pub fn get_action_indices(
        &self,
        distribution: &[CategoricalDistribution<B>],
        deterministic: bool,
        include_log_prob: bool,
        include_entropy: bool,
    ) -> ActionSample<B> {
        let choices: Vec<Tensor<B, 1, Int>> = distribution
            .iter()
            .map(|dist| {
                if deterministic {
                    dist.mode()
                } else {
                    dist.sample()
                }
            })
            .collect();

        let log_prob: Option<Tensor<B, 1>> = include_log_prob.then(|| {
            let per_dim: Vec<Tensor<B, 1>> = distribution
                .iter()
                .zip(&choices)
                .map(|(dist, action)| dist.log_prob(action.clone()))
                .collect();
            Tensor::stack::<2>(per_dim, 1).sum_dim(1).squeeze(1)
        });

        let entropy: Option<Tensor<B, 1>> = include_entropy.then(|| {
            let per_dim: Vec<Tensor<B, 1>> =
                distribution.iter().map(|dist| dist.entropy()).collect();
            Tensor::stack::<2>(per_dim, 1).sum_dim(1).squeeze(1)
        });

        ActionSample {
            indices: Tensor::stack(choices, 1),
            log_prob,
            entropy,
        }
    }

    /// Maps one row of action indices to the environment's raw action vector.
    pub fn get_action(&self, action_indices: &[usize]) -> Result<Vec<f32>> {
        self.action_map.lookup(action_indices)
    }

    /// Row-wise `get_action` over a `[batch, n_dims]` index tensor.
    pub fn get_actions(&self, action_indices: Tensor<B, 2, Int>) -> Result<Vec<Vec<f32>>> {
        let [_, n_dims] = action_indices.dims();
        let flat = int_tensor_to_vec(action_indices)?;

        flat.chunks(n_dims.max(1))
            .map(|row| {
                let row = self.action_map.to_indices(row)?;
                self.get_action(&row)
            })
            .collect()
    }

    pub fn get_model_params(&self) -> ModelParams<A, C> {
        ModelParams {
            actor: self.actor.clone(),
            critic: self.critic.clone(),
        }
    }

    pub fn set_model_params(&mut self, params: ModelParams<A, C>) {
        self.actor = params.actor;
        self.critic = params.critic;
    }
}

impl<B, A, C> ActorCritic<B> for Agent<B, A, C>
where
    B: Backend,
    A: PolicyNetwork<B>,
    C: ValueNetwork<B>,
{
    fn evaluate(&self, obs: Tensor<B, 2>) -> (Vec<Tensor<B, 2>>, Tensor<B, 2>) {
        (self.actor.forward(obs.clone()), self.critic.forward(obs))
    }

    fn forward_actor(&self, obs: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
        self.actor.forward(obs)
    }

    fn forward_critic(&self, obs: Tensor<B, 2>) -> Tensor<B, 2> {
        self.critic.forward(obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ppo::model::{Actor, ActorConfig, Critic, CriticConfig},
        utils::tensor_to_vec,
    };
    use burn::backend::NdArray;

    type B = NdArray;

    fn agent() -> Agent<B, Actor<B>, Critic<B>> {
        let device = Default::default();
        let actor = ActorConfig::new(3, vec![3, 2]).init(&device);
        let critic = CriticConfig::new(3).init(&device);
        let action_map = ActionMap::new(vec![vec![-1.0, 0.0, 1.0], vec![0.0, 1.0]]);

        Agent::new(actor, critic, action_map, device)
    }

    fn obs() -> Vec<Vec<f32>> {
        vec![
            vec![0.1, -0.2, 0.3],
            vec![1.0, 0.5, -0.5],
            vec![0.0, 0.0, 0.0],
            vec![-1.0, 2.0, 0.25],
        ]
    }

    #[test]
    fn one_distribution_per_action_dimension() {
        let agent = agent();
        let dists = agent.get_action_distribution(obs()).unwrap();

        assert_eq!(dists.len(), 2);
        assert_eq!(dists[0].logits().dims(), [4, 3]);
        assert_eq!(dists[1].logits().dims(), [4, 2]);
    }

    #[test]
    fn single_observation_is_a_batch_of_one() {
        let agent = agent();
        let single = [0.5f32, 0.5, 0.5];
        let dists = agent.get_action_distribution(single.as_slice()).unwrap();

        assert_eq!(dists[0].logits().dims(), [1, 3]);
    }

    #[test]
    fn ragged_observations_are_rejected() {
        let agent = agent();
        let ragged = vec![vec![0.0, 1.0, 2.0], vec![0.0]];

        assert!(matches!(
            agent.get_action_distribution(ragged),
            Err(PPOError::Observation(_))
        ));
    }

    #[test]
    fn optional_outputs_only_when_requested() {
        let agent = agent();
        let dists = agent.get_action_distribution(obs()).unwrap();

        let bare = agent.get_action_indices(&dists, false, false, false);
        assert_eq!(bare.indices.dims(), [4, 2]);
        assert!(bare.log_prob.is_none());
        assert!(bare.entropy.is_none());

        let full = agent.get_action_indices(&dists, false, true, true);
        assert_eq!(full.log_prob.unwrap().dims(), [4]);
        assert_eq!(full.entropy.unwrap().dims(), [4]);
    }

    #[test]
    fn joint_log_prob_is_sum_over_dimensions() {
        let agent = agent();
        let dists = agent.get_action_distribution(obs()).unwrap();
        let sample = agent.get_action_indices(&dists, true, true, true);

        let indices = sample.indices.clone();
        let manual_log_prob = dists
            .iter()
            .enumerate()
            .map(|(dim, dist)| {
                let column: Tensor<B, 1, Int> = indices.clone().slice([0..4, dim..dim + 1]).squeeze(1);
                dist.log_prob(column)
            })
            .reduce(|a, b| a + b)
            .unwrap();
        let manual_entropy = dists
            .iter()
            .map(|dist| dist.entropy())
            .reduce(|a, b| a + b)
            .unwrap();

        let joint = tensor_to_vec(sample.log_prob.unwrap()).unwrap();
        let manual = tensor_to_vec(manual_log_prob).unwrap();
        for (a, b) in joint.iter().zip(&manual) {
            assert!((a - b).abs() < 1e-5);
        }

        let joint = tensor_to_vec(sample.entropy.unwrap()).unwrap();
        let manual = tensor_to_vec(manual_entropy).unwrap();
        for (a, b) in joint.iter().zip(&manual) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn deterministic_indices_are_argmax() {
        let agent = agent();
        let dists = agent.get_action_distribution(obs()).unwrap();
        let sample = agent.get_action_indices(&dists, true, false, false);

        let flat = int_tensor_to_vec(sample.indices).unwrap();
        let mode0 = int_tensor_to_vec(dists[0].mode()).unwrap();
        let mode1 = int_tensor_to_vec(dists[1].mode()).unwrap();
        for row in 0..4 {
            assert_eq!(flat[row * 2], mode0[row]);
            assert_eq!(flat[row * 2 + 1], mode1[row]);
        }
    }

    #[test]
    fn action_map_translates_indices() {
        let agent = agent();

        assert_eq!(agent.get_action(&[2, 0]).unwrap(), vec![1.0, 0.0]);
        assert_eq!(agent.get_action(&[0]).unwrap(), vec![-1.0]);

        let indices = Tensor::<B, 2, Int>::from_data(
            TensorData::new(vec![0i64, 1, 1, 0], [2, 2]),
            &Default::default(),
        );
        assert_eq!(
            agent.get_actions(indices).unwrap(),
            vec![vec![-1.0, 1.0], vec![0.0, 0.0]]
        );
    }

    #[test]
    fn action_map_rejects_bad_indices() {
        let agent = agent();

        assert!(matches!(
            agent.get_action(&[1, 2]),
            Err(PPOError::ActionIndexOutOfRange {
                dim: 1,
                index: 2,
                choices: 2
            })
        ));
        assert!(matches!(
            agent.get_action(&[0, 0, 0]),
            Err(PPOError::TooManyActionDimensions { got: 3, max: 2 })
        ));
    }

    #[test]
    fn negative_indices_are_rejected() {
        let agent = agent();

        let indices = Tensor::<B, 2, Int>::from_data(
            TensorData::new(vec![0i64, 1, 2, -1], [2, 2]),
            &Default::default(),
        );
        assert!(matches!(
            agent.get_actions(indices),
            Err(PPOError::ActionIndexOutOfRange {
                dim: 1,
                index: -1,
                choices: 2
            })
        ));
        assert!(matches!(
            agent.action_map().to_indices(&[-3]),
            Err(PPOError::ActionIndexOutOfRange {
                dim: 0,
                index: -3,
                choices: 3
            })
        ));
        assert_eq!(agent.action_map().to_indices(&[2, 1]).unwrap(), vec![2, 1]);
    }

    #[test]
    fn model_params_round_trip_is_idempotent() {
        let mut agent = agent();
        let input: Tensor<B, 2> = obs().into_observations(agent.device()).unwrap();

        let before_value = tensor_to_vec(agent.forward_critic(input.clone())).unwrap();
        let before_logits = tensor_to_vec(agent.forward_actor(input.clone()).remove(0)).unwrap();

        for _ in 0..3 {
            let params = agent.get_model_params();
            agent.set_model_params(params);
        }

        assert_eq!(tensor_to_vec(agent.forward_critic(input.clone())).unwrap(), before_value);
        assert_eq!(tensor_to_vec(agent.forward_actor(input).remove(0)).unwrap(), before_logits);
    }
}
