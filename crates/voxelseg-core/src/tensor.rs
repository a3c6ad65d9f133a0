use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// N-dimensional tensor — the fundamental data structure of voxelseg.
///
/// Stores data in a flat contiguous `Vec<T>` with row-major (C-order) layout.
/// The network works with rank-5 volumes (batch, channel, depth, height,
/// width) on the contracting path and rank-4 planes (batch, channel, height,
/// width) on the expanding path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Float")]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![T::ZERO; s.numel()],
            shape: s,
        }
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: Vec<usize>) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![T::ONE; s.numel()],
            shape: s,
        }
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![value; s.numel()],
            shape: s,
        }
    }

    /// Random tensor with standard normal distribution (Box-Muller).
    pub fn randn(shape: Vec<usize>, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self::randn_using(shape, &mut rng)
    }

    /// Standard normal tensor drawn from an existing generator.
    pub fn randn_using(shape: Vec<usize>, rng: &mut StdRng) -> Self {
        let s = Shape::new(shape);
        let n = s.numel();
        let mut data = Vec::with_capacity(n);

        let mut i = 0;
        while i < n {
            let u1: f64 = rng.gen::<f64>().max(1e-10);
            let u2: f64 = rng.gen::<f64>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            data.push(T::from_f64(r * theta.cos()));
            if i + 1 < n {
                data.push(T::from_f64(r * theta.sin()));
            }
            i += 2;
        }
        data.truncate(n);
        Tensor { data, shape: s }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Multi-dimensional indexing: compute flat offset from indices.
    pub fn get(&self, indices: &[usize]) -> TensorResult<T> {
        let offset = self.offset_of(indices)?;
        Ok(self.data[offset])
    }

    /// Set a single element.
    pub fn set(&mut self, indices: &[usize], value: T) -> TensorResult<()> {
        let offset = self.offset_of(indices)?;
        self.data[offset] = value;
        Ok(())
    }

    fn offset_of(&self, indices: &[usize]) -> TensorResult<usize> {
        if indices.len() != self.ndim() {
            return Err(TensorError::DimensionMismatch(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        let strides = self.shape.strides();
        let mut offset = 0;
        for (i, &idx) in indices.iter().enumerate() {
            let dim_size = self.shape.dim(i)?;
            if idx >= dim_size {
                return Err(TensorError::IndexOutOfBounds {
                    index: idx,
                    axis: i,
                    size: dim_size,
                });
            }
            offset += idx * strides[i];
        }
        Ok(offset)
    }

    // ─── Element-wise Operations ────────────────────────────────────────────

    pub fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// ReLU activation: max(0, x).
    pub fn relu(&self) -> Tensor<T> {
        self.apply(|x| x.max(T::ZERO))
    }

    /// Element-wise addition. Shapes must match exactly; the residual
    /// addition in the network has no meaningful broadcast semantics, so a
    /// mismatch is an immediate error.
    pub fn add(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape_vec(),
                got: other.shape_vec(),
            });
        }
        let data: Vec<T> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a + b)
            .collect();
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }

    // ─── Structural Operations ──────────────────────────────────────────────

    /// Concatenate tensors along an axis. All other dimensions must agree.
    pub fn concatenate(tensors: &[&Tensor<T>], axis: usize) -> TensorResult<Tensor<T>> {
        if tensors.is_empty() {
            return Err(TensorError::EmptyTensor);
        }
        let ndim = tensors[0].ndim();
        if axis >= ndim {
            return Err(TensorError::InvalidAxis { axis, ndim });
        }

        let ref_shape = tensors[0].shape_vec();
        for t in &tensors[1..] {
            if t.ndim() != ndim {
                return Err(TensorError::DimensionMismatch(
                    "All tensors must have the same number of dimensions".to_string(),
                ));
            }
            for (i, (&a, &b)) in ref_shape.iter().zip(t.shape_vec().iter()).enumerate() {
                if i != axis && a != b {
                    return Err(TensorError::ShapeMismatch {
                        expected: ref_shape.clone(),
                        got: t.shape_vec(),
                    });
                }
            }
        }

        let outer: usize = ref_shape[..axis].iter().product();
        let inner: usize = ref_shape[axis + 1..].iter().product();

        let mut new_axis_size = 0usize;
        for t in tensors {
            new_axis_size += t.shape.dim(axis)?;
        }

        let mut data = Vec::with_capacity(outer * new_axis_size * inner);
        for o in 0..outer {
            for t in tensors {
                let t_stride = t.shape.dim(axis)? * inner;
                let start = o * t_stride;
                data.extend_from_slice(&t.data[start..start + t_stride]);
            }
        }

        let mut new_shape = ref_shape;
        new_shape[axis] = new_axis_size;
        Tensor::new(data, new_shape)
    }

    /// Select a single index along an axis, removing that axis from the
    /// result. Extracting the central slice of a volume is
    /// `select(2, depth / 2)`.
    pub fn select(&self, axis: usize, index: usize) -> TensorResult<Tensor<T>> {
        let dims = self.shape.dims();
        if axis >= dims.len() {
            return Err(TensorError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            });
        }
        let axis_size = dims[axis];
        if index >= axis_size {
            return Err(TensorError::IndexOutOfBounds {
                index,
                axis,
                size: axis_size,
            });
        }

        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();

        let mut data = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            let start = (o * axis_size + index) * inner;
            data.extend_from_slice(&self.data[start..start + inner]);
        }

        let mut new_dims: Vec<usize> = dims.to_vec();
        new_dims.remove(axis);
        Tensor::new(data, new_dims)
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

// ─── Display ────────────────────────────────────────────────────────────────

impl<T: Float> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ndim() == 1 {
            write!(f, "tensor([")?;
            for (i, v) in self.data.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                if i > 6 {
                    write!(f, "...")?;
                    break;
                }
                write!(f, "{:.4}", v)?;
            }
            return write!(f, "])");
        }
        write!(f, "tensor(shape={}, numel={})", self.shape, self.numel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_creation() {
        let t: Tensor<f64> = Tensor::zeros(vec![3, 4]);
        assert_eq!(t.shape_vec(), vec![3, 4]);
        assert_eq!(t.numel(), 12);
        assert_eq!(t.data()[0], 0.0);

        let t: Tensor<f64> = Tensor::ones(vec![2, 3]);
        assert_eq!(t.data().iter().sum::<f64>(), 6.0);
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let r: TensorResult<Tensor<f32>> = Tensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]);
        assert!(r.is_err());
    }

    #[test]
    fn test_get_set() {
        let mut t: Tensor<f64> = Tensor::zeros(vec![2, 3, 4]);
        t.set(&[1, 2, 3], 7.0).unwrap();
        assert_eq!(t.get(&[1, 2, 3]).unwrap(), 7.0);
        assert_eq!(t.get(&[0, 0, 0]).unwrap(), 0.0);
        assert!(t.get(&[2, 0, 0]).is_err());
        assert!(t.get(&[0, 0]).is_err());
    }

    #[test]
    fn test_add_strict_shape() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        let b: Tensor<f64> = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]).unwrap();
        let c = a.add(&b).unwrap();
        assert_eq!(c.data(), &[6.0, 8.0, 10.0, 12.0]);

        let d: Tensor<f64> = Tensor::zeros(vec![4]);
        assert!(matches!(
            a.add(&d),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_relu() {
        let a: Tensor<f64> = Tensor::new(vec![-1.0, 0.0, 2.0], vec![3]).unwrap();
        assert_eq!(a.relu().data(), &[0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_concatenate_channel_axis() {
        // (1, 2, 2, 2) + (1, 3, 2, 2) along axis 1
        let a: Tensor<f64> = Tensor::full(vec![1, 2, 2, 2], 1.0);
        let b: Tensor<f64> = Tensor::full(vec![1, 3, 2, 2], 2.0);
        let c = Tensor::concatenate(&[&a, &b], 1).unwrap();
        assert_eq!(c.shape_vec(), vec![1, 5, 2, 2]);
        // skip channels come first
        assert_eq!(c.get(&[0, 0, 0, 0]).unwrap(), 1.0);
        assert_eq!(c.get(&[0, 1, 1, 1]).unwrap(), 1.0);
        assert_eq!(c.get(&[0, 2, 0, 0]).unwrap(), 2.0);
        assert_eq!(c.get(&[0, 4, 1, 1]).unwrap(), 2.0);
    }

    #[test]
    fn test_concatenate_spatial_mismatch() {
        let a: Tensor<f64> = Tensor::zeros(vec![1, 2, 4, 4]);
        let b: Tensor<f64> = Tensor::zeros(vec![1, 2, 3, 4]);
        assert!(matches!(
            Tensor::concatenate(&[&a, &b], 1),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_select_removes_axis() {
        // (1, 2, 3, 2, 2) volume, pick depth index 1
        let mut t: Tensor<f64> = Tensor::zeros(vec![1, 2, 3, 2, 2]);
        for c in 0..2 {
            for d in 0..3 {
                for h in 0..2 {
                    for w in 0..2 {
                        t.set(&[0, c, d, h, w], (c * 100 + d * 10 + h * 2 + w) as f64)
                            .unwrap();
                    }
                }
            }
        }
        let s = t.select(2, 1).unwrap();
        assert_eq!(s.shape_vec(), vec![1, 2, 2, 2]);
        assert_eq!(s.get(&[0, 0, 0, 0]).unwrap(), 10.0);
        assert_eq!(s.get(&[0, 1, 1, 1]).unwrap(), 113.0);

        assert!(t.select(2, 3).is_err());
        assert!(t.select(5, 0).is_err());
    }

    #[test]
    fn test_randn_statistics() {
        let t: Tensor<f64> = Tensor::randn(vec![10_000], Some(7));
        let mean = t.data().iter().sum::<f64>() / 10_000.0;
        let var = t.data().iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / 10_000.0;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(var, 1.0, epsilon = 0.1);
    }
}
