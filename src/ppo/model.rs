use burn::prelude::*;

/// Policy network: one logits tensor `[batch, n_choices]` per action dimension.
pub trait PolicyNetwork<B: Backend>: Module<B> {
    fn forward(&self, obs: Tensor<B, 2>) -> Vec<Tensor<B, 2>>;
}

/// Value network: one state value per observation, `[batch, 1]`.
pub trait ValueNetwork<B: Backend>: Module<B> {
    fn forward(&self, obs: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// What the training core needs from a policy/value pair.
///
/// Only `evaluate` is required; the single-headed accessors default to it and
/// can be overridden when the two halves are cheaper to run separately.
pub trait ActorCritic<B: Backend> {
    fn evaluate(&self, obs: Tensor<B, 2>) -> (Vec<Tensor<B, 2>>, Tensor<B, 2>);

    fn forward_actor(&self, obs: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
        self.evaluate(obs).0
    }

    fn forward_critic(&self, obs: Tensor<B, 2>) -> Tensor<B, 2> {
        self.evaluate(obs).1
    }
}

#[derive(Config, Debug)]
pub struct CriticConfig {
    pub obs_dim: usize,
    #[config(default = 64)]
    pub hidden_size: usize,
}

impl CriticConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Critic<B> {
        let linear1 = nn::LinearConfig::new(self.obs_dim, self.hidden_size).init(device);
        let linear2 = nn::LinearConfig::new(self.hidden_size, self.hidden_size).init(device);
        let linear3 = nn::LinearConfig::new(self.hidden_size, 1)
            .with_initializer(nn::Initializer::XavierUniform { gain: 1.0 })
            .init(device);

        Critic {
            linear1,
            linear2,
            linear3,
        }
    }
}

#[derive(Module, Debug)]
pub struct Critic<B: Backend> {
    linear1: nn::Linear<B>,
    linear2: nn::Linear<B>,
    linear3: nn::Linear<B>,
}

impl<B: Backend> ValueNetwork<B> for Critic<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear1.forward(x).tanh();
        let x = self.linear2.forward(x).tanh();
        self.linear3.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ActorConfig {
    pub obs_dim: usize,
    /// Number of choices for each action dimension.
    pub action_choices: Vec<usize>,
    #[config(default = 64)]
    pub hidden_size: usize,
}

impl ActorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Actor<B> {
        let linear1 = nn::LinearConfig::new(self.obs_dim, self.hidden_size).init(device);
        let linear2 = nn::LinearConfig::new(self.hidden_size, self.hidden_size).init(device);
        let heads = self
            .action_choices
            .iter()
            .map(|&choices| {
                nn::LinearConfig::new(self.hidden_size, choices)
                    .with_initializer(nn::Initializer::XavierUniform { gain: 0.01 })
                    .init(device)
            })
            .collect();

        Actor {
            linear1,
            linear2,
            heads,
        }
    }
}

/// Shared tanh trunk with a separate linear head per action dimension.
#[derive(Module, Debug)]
pub struct Actor<B: Backend> {
    linear1: nn::Linear<B>,
    linear2: nn::Linear<B>,
    heads: Vec<nn::Linear<B>>,
}

impl<B: Backend> PolicyNetwork<B> for Actor<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
        let x = self.linear1.forward(x).tanh();
        let x = self.linear2.forward(x).tanh();
        self.heads
            .iter()
            .map(|head| head.forward(x.clone()))
            .collect()
    }
}
