use burn::prelude::*;

/// PPO clipped surrogate objective, negated for minimization.
///
/// `-mean(min(A * r, A * clip(r, 1 - eps, 1 + eps)))` with `r = exp(new - old)`.
pub fn clipped_surrogate_loss<B: Backend>(
    log_prob: Tensor<B, 1>,
    old_log_prob: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    clip_range: f32,
) -> Tensor<B, 1> {
    let ratio = (log_prob - old_log_prob).exp();

    let policy_loss_1 = advantages.clone() * ratio.clone();
    let policy_loss_2 = advantages * ratio.clamp(1.0 - clip_range, 1.0 + clip_range);

    policy_loss_1.min_pair(policy_loss_2).mean().neg()
}

/// Mean squared error between `values[1..]` and `returns[..m - 1]`.
///
/// The critic prediction for row `k + 1` is regressed onto the return target
/// of row `k`. Minibatches with fewer than two rows carry no pair and yield a
/// constant zero.
pub fn shifted_value_loss<B: Backend>(values: Tensor<B, 1>, returns: Tensor<B, 1>) -> Tensor<B, 1> {
    let [m] = values.dims();
    if m < 2 {
        return Tensor::zeros([1], &values.device());
    }

    let predicted = values.slice([1..m]);
    let target = returns.slice([0..m - 1]);

    (predicted - target).powf_scalar(2.0).mean()
}

/// Mean per-sample entropy, added to the loss unchanged. A positive
/// `ent_coef` therefore pushes the policy towards lower entropy.
pub fn entropy_loss<B: Backend>(entropy: Tensor<B, 1>) -> Tensor<B, 1> {
    entropy.mean()
}

/// `mean((r - 1) - log r)`; only ever read for monitoring.
pub fn approx_kl<B: Backend>(log_prob: Tensor<B, 1>, old_log_prob: Tensor<B, 1>) -> Tensor<B, 1> {
    let log_ratio = (log_prob - old_log_prob).detach();

    (log_ratio.clone().exp() - 1.0 - log_ratio).mean()
}
