use burn::{
    prelude::*,
    tensor::{
        Distribution,
        activation::{log_softmax, softmax},
    },
};

/// Categorical distribution over the last axis of a `[batch, n_choices]` logits tensor.
///
/// The logits are kept as given; normalization only happens inside the
/// probability computations.
#[derive(Clone, Debug)]
pub struct CategoricalDistribution<B: Backend> {
    logits: Tensor<B, 2>,
}

impl<B: Backend> CategoricalDistribution<B> {
    pub fn new(logits: Tensor<B, 2>) -> Self {
        Self { logits }
    }

    pub fn logits(&self) -> &Tensor<B, 2> {
        &self.logits
    }

    pub fn n_choices(&self) -> usize {
        self.logits.dims()[1]
    }

    pub fn probs(&self) -> Tensor<B, 2> {
        softmax(self.logits.clone(), 1)
    }

    /// Draws one index per row using the Gumbel-max trick.
    pub fn sample(&self) -> Tensor<B, 1, Int> {
        let uniform = Tensor::<B, 2>::random(
            self.logits.shape(),
            Distribution::Uniform(0.0, 1.0),
            &self.logits.device(),
        )
        .clamp_min(1e-10);
        let gumbel = uniform.log().neg().log().neg();

        (self.logits.clone() + gumbel).argmax(1).squeeze(1)
    }

    /// Most likely index per row.
    pub fn mode(&self) -> Tensor<B, 1, Int> {
        self.logits.clone().argmax(1).squeeze(1)
    }

    pub fn log_prob(&self, actions: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        log_softmax(self.logits.clone(), 1)
            .gather(1, actions.unsqueeze_dim(1))
            .squeeze(1)
    }

    pub fn entropy(&self) -> Tensor<B, 1> {
        let log_probs = log_softmax(self.logits.clone(), 1);
        let probs = log_probs.clone().exp();

        (probs * log_probs).sum_dim(1).squeeze::<1>(1).neg()
    }
}
