use burn::prelude::*;

use crate::error::{self, PPOError};

#[derive(Config, Debug)]
pub struct PPOTrainingConfig {
    /// Rollouts collected before each update.
    #[config(default = 36)]
    pub n_rollouts: usize,
    #[config(default = 3e-4)]
    pub lr_actor: f64,
    #[config(default = 3e-4)]
    pub lr_critic: f64,
    #[config(default = 0.95)]
    pub gamma: f32,
    #[config(default = 512)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub epochs: usize,
    #[config(default = 1.0)]
    pub gae_lambda: f32,
    #[config(default = 0.2)]
    pub clip_range: f32,
    #[config(default = 1.0)]
    pub ent_coef: f32,
    #[config(default = 1.0)]
    pub vf_coef: f32,
    /// Norm clipping applied to actor gradients only.
    #[config(default = "None")]
    pub max_grad_norm: Option<f32>,
    #[config(default = 1e-10)]
    pub advantage_epsilon: f32,
    #[config(default = "None")]
    pub seed: Option<u64>,
}

impl PPOTrainingConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.n_rollouts == 0 {
            return Err(PPOError::Config("n_rollouts must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(PPOError::Config("batch_size must be at least 1".to_string()));
        }
        if self.epochs == 0 {
            return Err(PPOError::Config("epochs must be at least 1".to_string()));
        }
        if self.clip_range <= 0.0 {
            return Err(PPOError::Config(format!(
                "clip_range must be positive, got {}",
                self.clip_range
            )));
        }
        if let Some(norm) = self.max_grad_norm.filter(|norm| *norm <= 0.0) {
            return Err(PPOError::Config(format!(
                "max_grad_norm must be positive, got {norm}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PPOTrainingConfig::new();

        assert_eq!(config.n_rollouts, 36);
        assert_eq!(config.batch_size, 512);
        assert_eq!(config.epochs, 1);
        assert_eq!(config.gamma, 0.95);
        assert!(config.max_grad_norm.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_form_reloads() {
        let config = PPOTrainingConfig::new()
            .with_ent_coef(-0.01)
            .with_max_grad_norm(Some(0.5))
            .with_seed(Some(7));

        let loaded = PPOTrainingConfig::load_binary(config.to_string().as_bytes()).unwrap();

        assert_eq!(loaded.ent_coef, -0.01);
        assert_eq!(loaded.max_grad_norm, Some(0.5));
        assert_eq!(loaded.seed, Some(7));
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_settings() {
        let bad = [
            PPOTrainingConfig::new().with_batch_size(0),
            PPOTrainingConfig::new().with_epochs(0),
            PPOTrainingConfig::new().with_n_rollouts(0),
            PPOTrainingConfig::new().with_clip_range(0.0),
            PPOTrainingConfig::new().with_max_grad_norm(Some(-1.0)),
        ];

        for config in bad {
            assert!(matches!(config.validate(), Err(PPOError::Config(_))));
        }
    }
}
