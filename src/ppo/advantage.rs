use crate::error::{PPOError, Result};

/// Generalized advantage estimation over a concatenated rollout batch.
///
/// Walks the batch backwards from `N - 2`; the last step only contributes its
/// value as the bootstrap for step `N - 2`, so both outputs hold `N - 1`
/// entries. `dones[i]` multiplies the successor terms, i.e. a flag of `1`
/// keeps the recursion flowing into step `i + 1` and `0` cuts it.
///
/// Returns `(returns, advantages)`.
pub fn compute_gae(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    gamma: f32,
    lambda: f32,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let n = rewards.len();
    if values.len() != n || dones.len() != n {
        return Err(PPOError::MalformedBatch(format!(
            "gae inputs disagree in length: {n} rewards, {} values, {} dones",
            values.len(),
            dones.len()
        )));
    }
    if n < 2 {
        return Err(PPOError::InsufficientSteps { steps: n });
    }

    let mut returns = vec![0.0_f32; n - 1];
    let mut gae = 0.0_f32;

    for i in (0..n - 1).rev() {
        let done = if dones[i] { 1.0 } else { 0.0 };
        let delta = rewards[i] + gamma * values[i + 1] * done - values[i];
        gae = delta + gamma * lambda * done * gae;
        returns[i] = gae + values[i];
    }

    let advantages = returns
        .iter()
        .zip(values)
        .map(|(ret, value)| ret - value)
        .collect();

    Ok((returns, advantages))
}

/// Shifts to zero mean and scales by the sample standard deviation plus `epsilon`.
pub fn standardize(advantages: &mut [f32], epsilon: f32) {
    if advantages.is_empty() {
        return;
    }

    let n = advantages.len() as f32;
    let mean = advantages.iter().sum::<f32>() / n;
    let sum_sq: f32 = advantages.iter().map(|a| (a - mean).powi(2)).sum();
    let std = (sum_sq / (n - 1.0).max(1.0)).sqrt();

    for a in advantages.iter_mut() {
        *a = (*a - mean) / (std + epsilon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn emits_one_fewer_target_than_steps() {
        for n in 2..12 {
            let rewards = vec![0.5; n];
            let values = vec![0.1; n];
            let dones = vec![true; n];

            let (returns, advantages) = compute_gae(&rewards, &values, &dones, 0.99, 0.95).unwrap();
            assert_eq!(returns.len(), n - 1);
            assert_eq!(advantages.len(), n - 1);
        }
    }

    #[test]
    fn matches_discounted_sum_with_unit_lambda() {
        let rewards = [1.0, 1.0, 1.0, 1.0];
        let values = [0.0, 0.0, 0.0, 0.0];
        let dones = [true, true, true, true];

        let (returns, advantages) = compute_gae(&rewards, &values, &dones, 0.95, 1.0).unwrap();

        let expected = [1.0 + 0.95 + 0.95 * 0.95, 1.0 + 0.95, 1.0];
        assert_close(&returns, &expected);
        assert_close(&advantages, &expected);
    }

    #[test]
    fn cleared_flag_cuts_bootstrap_and_recursion() {
        let rewards = [1.0, 2.0, 3.0];
        let values = [0.5, 1.0, 4.0];
        let dones = [false, false, false];

        let (returns, advantages) = compute_gae(&rewards, &values, &dones, 0.9, 0.8).unwrap();

        // With every flag cleared each delta is r - v and returns reduce to r.
        assert_close(&returns, &[1.0, 2.0]);
        assert_close(&advantages, &[0.5, 1.0]);
    }

    #[test]
    fn bootstraps_from_successor_value() {
        let rewards = [0.0, 0.0];
        let values = [1.0, 2.0];
        let dones = [true, true];

        let (returns, advantages) = compute_gae(&rewards, &values, &dones, 0.5, 0.9).unwrap();

        assert_close(&returns, &[1.0]);
        assert_close(&advantages, &[0.0]);
    }

    #[test]
    fn lambda_blends_multi_step_errors() {
        let rewards = [1.0, 0.0, 0.0];
        let values = [0.0, 1.0, 0.0];
        let dones = [true, true, true];
        let gamma = 0.9;
        let lambda = 0.5;

        let (returns, _) = compute_gae(&rewards, &values, &dones, gamma, lambda).unwrap();

        let delta1 = 0.0 + gamma * 0.0 - 1.0;
        let delta0 = 1.0 + gamma * 1.0 - 0.0;
        let gae1 = delta1;
        let gae0 = delta0 + gamma * lambda * gae1;
        assert_close(&returns, &[gae0, gae1 + 1.0]);
    }

    #[test]
    fn rejects_batches_too_short_to_bootstrap() {
        assert!(matches!(
            compute_gae(&[], &[], &[], 0.9, 1.0),
            Err(PPOError::InsufficientSteps { steps: 0 })
        ));
        assert!(matches!(
            compute_gae(&[1.0], &[0.0], &[true], 0.9, 1.0),
            Err(PPOError::InsufficientSteps { steps: 1 })
        ));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        assert!(matches!(
            compute_gae(&[1.0, 1.0], &[0.0], &[true, true], 0.9, 1.0),
            Err(PPOError::MalformedBatch(_))
        ));
    }

    #[test]
    fn standardized_advantages_have_zero_mean_unit_std() {
        let mut advantages = vec![0.3, -1.2, 4.5, 2.0, 0.0, -0.7, 1.1];
        standardize(&mut advantages, 1e-10);

        let n = advantages.len() as f32;
        let mean = advantages.iter().sum::<f32>() / n;
        let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / (n - 1.0);

        assert!(mean.abs() < 1e-5);
        assert!((var.sqrt() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn constant_advantages_collapse_to_zero() {
        let mut advantages = vec![2.5; 5];
        standardize(&mut advantages, 1e-10);

        assert!(advantages.iter().all(|a| a.abs() < 1e-6));

        let mut single = vec![3.0];
        standardize(&mut single, 1e-10);
        assert_eq!(single, vec![0.0]);
    }
}
