use std::ops::Range;

use burn::prelude::*;

use crate::{
    error::{PPOError, Result},
    utils::{float_tensor_1d, float_tensor_2d},
};

/// One episode (or episode segment) recorded by a rollout worker.
///
/// Append-only while collecting; the learner only reads it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExperienceBuffer {
    pub observations: Vec<Vec<f32>>,
    pub actions: Vec<Vec<usize>>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub log_prob: Vec<f32>,
}

impl ExperienceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(num_steps: usize) -> Self {
        Self {
            observations: Vec::with_capacity(num_steps),
            actions: Vec::with_capacity(num_steps),
            rewards: Vec::with_capacity(num_steps),
            dones: Vec::with_capacity(num_steps),
            log_prob: Vec::with_capacity(num_steps),
        }
    }

    pub fn add_step(
        &mut self,
        observation: Vec<f32>,
        action: Vec<usize>,
        reward: f32,
        done: bool,
        log_prob: f32,
    ) {
        self.observations.push(observation);
        self.actions.push(action);
        self.rewards.push(reward);
        self.dones.push(done);
        self.log_prob.push(log_prob);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn clear(&mut self) {
        self.observations.clear();
        self.actions.clear();
        self.rewards.clear();
        self.dones.clear();
        self.log_prob.clear();
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.observations.len();
        let lengths = [
            ("actions", self.actions.len()),
            ("rewards", self.rewards.len()),
            ("dones", self.dones.len()),
            ("log_prob", self.log_prob.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(PPOError::MalformedBatch(format!(
                    "buffer has {n} observations but {len} {name}"
                )));
            }
        }
        Ok(())
    }
}

/// Several experience buffers concatenated into flat, row-major columns.
#[derive(Clone, Debug)]
pub struct RolloutBatch {
    pub obs: Vec<f32>,
    pub obs_dim: usize,
    pub actions: Vec<i64>,
    pub action_dims: usize,
    pub log_probs: Vec<f32>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
}

impl RolloutBatch {
    /// Concatenates buffers in the order given, keeping each buffer's step order.
    pub fn concat(buffers: &[ExperienceBuffer]) -> Result<Self> {
        for (index, buffer) in buffers.iter().enumerate() {
            buffer
                .validate()
                .map_err(|e| PPOError::MalformedBatch(format!("buffer {index}: {e}")))?;
        }

        let total: usize = buffers.iter().map(ExperienceBuffer::len).sum();
        let first = buffers.iter().find(|buffer| !buffer.is_empty());
        let obs_dim = first
            .and_then(|b| b.observations.first())
            .map_or(0, Vec::len);
        let action_dims = first.and_then(|b| b.actions.first()).map_or(0, Vec::len);

        let mut batch = Self {
            obs: Vec::with_capacity(total * obs_dim),
            obs_dim,
            actions: Vec::with_capacity(total * action_dims),
            action_dims,
            log_probs: Vec::with_capacity(total),
            rewards: Vec::with_capacity(total),
            dones: Vec::with_capacity(total),
        };

        for (index, buffer) in buffers.iter().enumerate() {
            for (obs, action) in buffer.observations.iter().zip(&buffer.actions) {
                if obs.len() != obs_dim {
                    return Err(PPOError::MalformedBatch(format!(
                        "buffer {index} has a {}-wide observation, expected {obs_dim}",
                        obs.len()
                    )));
                }
                if action.len() != action_dims {
                    return Err(PPOError::MalformedBatch(format!(
                        "buffer {index} has a {}-dimensional action, expected {action_dims}",
                        action.len()
                    )));
                }
                batch.obs.extend_from_slice(obs);
                batch.actions.extend(action.iter().map(|&a| a as i64));
            }
            batch.log_probs.extend_from_slice(&buffer.log_prob);
            batch.rewards.extend_from_slice(&buffer.rewards);
            batch.dones.extend_from_slice(&buffer.dones);
        }

        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn reward_sum(&self) -> f32 {
        self.rewards.iter().sum()
    }

    pub fn obs_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        float_tensor_2d(self.obs.clone(), self.len(), self.obs_dim, device)
    }
}

/// Rows aligned with the `N - 1` advantage targets, ready for minibatching.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingBatch {
    pub obs: Vec<f32>,
    pub obs_dim: usize,
    pub actions: Vec<i64>,
    pub action_dims: usize,
    pub old_log_probs: Vec<f32>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
}

/// Tensors for one minibatch.
pub struct MinibatchTensors<B: Backend> {
    pub obs: Tensor<B, 2>,
    pub actions: Tensor<B, 2, Int>,
    pub old_log_probs: Tensor<B, 1>,
    pub advantages: Tensor<B, 1>,
    pub returns: Tensor<B, 1>,
}

impl TrainingBatch {
    /// Drops the final row of every per-step column so observations, actions and
    /// old log-probs line up with `returns`/`advantages`.
    pub fn align(rollout: RolloutBatch, returns: Vec<f32>, advantages: Vec<f32>) -> Result<Self> {
        let n = returns.len();
        if advantages.len() != n || rollout.len() != n + 1 {
            return Err(PPOError::MalformedBatch(format!(
                "cannot align {} rollout steps with {n} returns and {} advantages",
                rollout.len(),
                advantages.len()
            )));
        }

        let RolloutBatch {
            mut obs,
            obs_dim,
            mut actions,
            action_dims,
            mut log_probs,
            ..
        } = rollout;
        obs.truncate(n * obs_dim);
        actions.truncate(n * action_dims);
        log_probs.truncate(n);

        Ok(Self {
            obs,
            obs_dim,
            actions,
            action_dims,
            old_log_probs: log_probs,
            advantages,
            returns,
        })
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Reorders every column with the same permutation: row `i` of the result
    /// is row `permutation[i]` of `self`.
    pub fn permute(&self, permutation: &[usize]) -> Self {
        let mut out = Self {
            obs: Vec::with_capacity(self.obs.len()),
            obs_dim: self.obs_dim,
            actions: Vec::with_capacity(self.actions.len()),
            action_dims: self.action_dims,
            old_log_probs: Vec::with_capacity(self.len()),
            advantages: Vec::with_capacity(self.len()),
            returns: Vec::with_capacity(self.len()),
        };

        for &row in permutation {
            out.obs
                .extend_from_slice(&self.obs[row * self.obs_dim..(row + 1) * self.obs_dim]);
            out.actions.extend_from_slice(
                &self.actions[row * self.action_dims..(row + 1) * self.action_dims],
            );
            out.old_log_probs.push(self.old_log_probs[row]);
            out.advantages.push(self.advantages[row]);
            out.returns.push(self.returns[row]);
        }

        out
    }

    /// Contiguous rows `range` as tensors.
    pub fn minibatch<B: Backend>(&self, range: Range<usize>, device: &B::Device) -> MinibatchTensors<B> {
        let rows = range.len();
        let obs = self.obs[range.start * self.obs_dim..range.end * self.obs_dim].to_vec();
        let actions =
            self.actions[range.start * self.action_dims..range.end * self.action_dims].to_vec();

        MinibatchTensors {
            obs: float_tensor_2d(obs, rows, self.obs_dim, device),
            actions: Tensor::from_data(TensorData::new(actions, [rows, self.action_dims]), device),
            old_log_probs: float_tensor_1d(self.old_log_probs[range.clone()].to_vec(), device),
            advantages: float_tensor_1d(self.advantages[range.clone()].to_vec(), device),
            returns: float_tensor_1d(self.returns[range].to_vec(), device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

    fn buffer(offset: f32, steps: usize) -> ExperienceBuffer {
        let mut buffer = ExperienceBuffer::with_capacity(steps);
        for i in 0..steps {
            let x = offset + i as f32;
            buffer.add_step(vec![x, -x], vec![i % 3, i % 2], x * 0.1, i % 2 == 0, -x);
        }
        buffer
    }

    #[test]
    fn concat_preserves_order_within_buffers() {
        let batch = RolloutBatch::concat(&[buffer(0.0, 3), buffer(100.0, 2)]).unwrap();

        assert_eq!(batch.len(), 5);
        assert_eq!(batch.obs_dim, 2);
        assert_eq!(batch.action_dims, 2);
        assert_eq!(
            batch.obs,
            vec![0.0, -0.0, 1.0, -1.0, 2.0, -2.0, 100.0, -100.0, 101.0, -101.0]
        );
        assert_eq!(batch.log_probs, vec![-0.0, -1.0, -2.0, -100.0, -101.0]);
        assert_eq!(batch.dones, vec![true, false, true, true, false]);
        assert!((batch.reward_sum() - (0.0 + 0.1 + 0.2 + 10.0 + 10.1)).abs() < 1e-4);
    }

    #[test]
    fn concat_rejects_ragged_buffers() {
        let mut ragged = buffer(0.0, 3);
        ragged.rewards.pop();
        assert!(matches!(
            RolloutBatch::concat(&[ragged]),
            Err(PPOError::MalformedBatch(_))
        ));

        let mut no_actions = buffer(0.0, 2);
        no_actions.actions.clear();
        assert!(matches!(
            RolloutBatch::concat(&[no_actions]),
            Err(PPOError::MalformedBatch(_))
        ));

        let mut late_ragged = buffer(10.0, 2);
        late_ragged.dones.pop();
        assert!(matches!(
            RolloutBatch::concat(&[buffer(0.0, 3), late_ragged]),
            Err(PPOError::MalformedBatch(_))
        ));

        let mut wide = buffer(0.0, 2);
        wide.observations[1].push(7.0);
        assert!(matches!(
            RolloutBatch::concat(&[wide]),
            Err(PPOError::MalformedBatch(_))
        ));
    }

    #[test]
    fn align_drops_the_final_row() {
        let batch = RolloutBatch::concat(&[buffer(0.0, 4)]).unwrap();
        let aligned = TrainingBatch::align(batch, vec![1.0, 2.0, 3.0], vec![0.1, 0.2, 0.3]).unwrap();

        assert_eq!(aligned.len(), 3);
        assert_eq!(aligned.obs, vec![0.0, -0.0, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(aligned.actions, vec![0, 0, 1, 1, 2, 0]);
        assert_eq!(aligned.old_log_probs, vec![-0.0, -1.0, -2.0]);
    }

    #[test]
    fn align_rejects_wrong_target_count() {
        let batch = RolloutBatch::concat(&[buffer(0.0, 4)]).unwrap();
        assert!(TrainingBatch::align(batch, vec![1.0; 4], vec![0.0; 4]).is_err());
    }

    #[test]
    fn permutation_keeps_rows_together() {
        let batch = RolloutBatch::concat(&[buffer(0.0, 6), buffer(50.0, 5)]).unwrap();
        let n = batch.len() - 1;
        let returns: Vec<f32> = (0..n).map(|i| i as f32 * 10.0).collect();
        let advantages: Vec<f32> = (0..n).map(|i| i as f32 * -3.0).collect();
        let aligned = TrainingBatch::align(batch, returns, advantages).unwrap();

        let mut permutation: Vec<usize> = (0..n).collect();
        permutation.shuffle(&mut StdRng::seed_from_u64(7));
        let shuffled = aligned.permute(&permutation);

        assert_eq!(shuffled.len(), n);
        for (i, &src) in permutation.iter().enumerate() {
            assert_eq!(shuffled.obs[i * 2..i * 2 + 2], aligned.obs[src * 2..src * 2 + 2]);
            assert_eq!(
                shuffled.actions[i * 2..i * 2 + 2],
                aligned.actions[src * 2..src * 2 + 2]
            );
            assert_eq!(shuffled.old_log_probs[i], aligned.old_log_probs[src]);
            assert_eq!(shuffled.advantages[i], aligned.advantages[src]);
            assert_eq!(shuffled.returns[i], aligned.returns[src]);
        }
    }

    #[test]
    fn minibatch_builds_tensors_for_the_range() {
        use crate::utils::{int_tensor_to_vec, tensor_to_vec};
        use burn::backend::NdArray;

        let batch = RolloutBatch::concat(&[buffer(0.0, 5)]).unwrap();
        let aligned =
            TrainingBatch::align(batch, vec![1.0, 2.0, 3.0, 4.0], vec![0.1, 0.2, 0.3, 0.4]).unwrap();

        let mb = aligned.minibatch::<NdArray>(1..3, &Default::default());

        assert_eq!(mb.obs.dims(), [2, 2]);
        assert_eq!(tensor_to_vec(mb.obs).unwrap(), vec![1.0, -1.0, 2.0, -2.0]);
        assert_eq!(int_tensor_to_vec(mb.actions).unwrap(), vec![1, 1, 2, 0]);
        assert_eq!(tensor_to_vec(mb.returns).unwrap(), vec![2.0, 3.0]);
        assert_eq!(tensor_to_vec(mb.advantages).unwrap(), vec![0.2, 0.3]);
    }
}
