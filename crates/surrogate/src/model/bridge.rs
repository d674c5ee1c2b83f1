//! Tensor bridge: utilities to convert between host design rows
//! (`Vec<Vec<f32>>`) and burn tensors.

use burn::prelude::*;
use burn::tensor::TensorData;

/// Convert a batch of design rows to a burn 2D tensor of shape `(rows, dim)`.
///
/// # Panics
/// Panics if `rows` is empty or if rows have inconsistent lengths.
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    assert!(!rows.is_empty(), "rows must not be empty");
    let dim = rows[0].len();
    assert!(dim > 0, "row dimension must be > 0");
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), dim, "row {i} has length {}, expected {dim}", row.len());
    }

    let batch = rows.len();
    let flat: Vec<f32> = rows.iter().flat_map(|v| v.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [batch, dim]), device)
}

/// Convert labels to a burn 1D tensor.
pub fn values_to_tensor<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), device)
}

/// Extract f32 values from a burn 1D tensor.
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}

/// Extract the rows of a burn 2D tensor.
pub fn tensor_to_rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f32>> {
    let [_, dim] = tensor.dims();
    let flat: Vec<f32> = tensor.into_data().iter::<f32>().collect();
    if dim == 0 {
        return Vec::new();
    }
    flat.chunks(dim).map(<[f32]>::to_vec).collect()
}

/// Extract a single f64 scalar from a burn 1D tensor.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_rows_round_trip() {
        let device = Default::default();
        let rows = vec![vec![1.0_f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]];

        let tensor = rows_to_tensor::<TestBackend>(&rows, &device);
        assert_eq!(tensor.dims(), [2, 3]);
        assert_eq!(tensor_to_rows(tensor), rows);
    }

    #[test]
    fn test_values_and_scalar() {
        let device = Default::default();
        let tensor = values_to_tensor::<TestBackend>(&[1.0, 2.5, -3.0], &device);
        assert_eq!(tensor_to_vec(tensor.clone()), vec![1.0, 2.5, -3.0]);
        let total = tensor_to_f64(tensor.sum());
        assert!((total - 0.5).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "row 1 has length 1")]
    fn test_ragged_rows_panic() {
        let device = Default::default();
        rows_to_tensor::<TestBackend>(&[vec![0.0, 1.0], vec![2.0]], &device);
    }
}
