use burn::prelude::*;

use crate::error::{PPOError, Result};

/// Copies a float tensor back to the host as a flat, row-major vector.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PPOError::TensorData(format!("{e:?}")))
}

pub fn int_tensor_to_vec<B: Backend, const D: usize>(
    tensor: Tensor<B, D, Int>,
) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| PPOError::TensorData(format!("{e:?}")))
}

/// Reads the first element of a (usually single element) tensor.
pub fn tensor_scalar<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<f32> {
    tensor_to_vec(tensor)?
        .first()
        .copied()
        .ok_or_else(|| PPOError::TensorData("expected a non-empty tensor".to_string()))
}

/// Builds a `[rows, cols]` float tensor from row-major host data.
pub fn float_tensor_2d<B: Backend>(
    data: Vec<f32>,
    rows: usize,
    cols: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(data, [rows, cols]), device)
}

pub fn float_tensor_1d<B: Backend>(data: Vec<f32>, device: &B::Device) -> Tensor<B, 1> {
    let len = data.len();
    Tensor::from_data(TensorData::new(data, [len]), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn round_trips_float_data() {
        let device = Default::default();
        let tensor = float_tensor_2d::<B>(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, &device);

        assert_eq!(tensor.dims(), [2, 3]);
        assert_eq!(
            tensor_to_vec(tensor).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn reads_scalar_from_mean() {
        let device = Default::default();
        let tensor = float_tensor_1d::<B>(vec![1.0, 2.0, 3.0], &device);

        assert!((tensor_scalar(tensor.mean()).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn reads_int_data() {
        let device = Default::default();
        let tensor =
            Tensor::<B, 1, Int>::from_data(TensorData::new(vec![3i64, 0, 2], [3]), &device);

        assert_eq!(int_tensor_to_vec(tensor).unwrap(), vec![3, 0, 2]);
    }
}
