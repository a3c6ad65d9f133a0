use voxelseg_core::{Float, Tensor, TensorError, TensorResult};

/// Per-channel batch normalization shared by the 2D and 3D layers.
///
/// Training mode normalizes with biased batch statistics and folds them into
/// the running estimates with momentum 0.1; eval mode normalizes with the
/// running estimates. Freshly constructed layers are an affine identity
/// (weight 1, bias 0, running mean 0, running var 1) in eval mode.
pub struct BatchNorm<T: Float> {
    pub num_features: usize,
    pub eps: f64,
    pub momentum: f64,
    pub weight: Tensor<T>,
    pub bias: Tensor<T>,
    pub running_mean: Tensor<T>,
    pub running_var: Tensor<T>,
    pub training: bool,
    rank: usize,
}

impl<T: Float> BatchNorm<T> {
    fn with_rank(num_features: usize, rank: usize) -> Self {
        BatchNorm {
            num_features,
            eps: 1e-5,
            momentum: 0.1,
            weight: Tensor::ones(vec![num_features]),
            bias: Tensor::zeros(vec![num_features]),
            running_mean: Tensor::zeros(vec![num_features]),
            running_var: Tensor::ones(vec![num_features]),
            training: false,
            rank,
        }
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn forward(&mut self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let dims = input.shape_vec();
        if dims.len() != self.rank {
            return Err(TensorError::DimensionMismatch(format!(
                "batch norm expects a rank-{} input, got rank {}",
                self.rank,
                dims.len()
            )));
        }
        if dims[1] != self.num_features {
            return Err(TensorError::DimensionMismatch(format!(
                "batch norm expects {} channels, got {}",
                self.num_features, dims[1]
            )));
        }
        let batch = dims[0];
        let channels = dims[1];
        let inner: usize = dims[2..].iter().product();
        let count = T::from_usize(batch * inner);
        let eps = T::from_f64(self.eps);
        let momentum = T::from_f64(self.momentum);

        let x = input.data();
        let mut out = vec![T::ZERO; x.len()];

        for ch in 0..channels {
            let (mean, var) = if self.training {
                let mut sum = T::ZERO;
                for b in 0..batch {
                    let start = (b * channels + ch) * inner;
                    for &v in &x[start..start + inner] {
                        sum += v;
                    }
                }
                let mean = sum / count;
                let mut sq = T::ZERO;
                for b in 0..batch {
                    let start = (b * channels + ch) * inner;
                    for &v in &x[start..start + inner] {
                        let d = v - mean;
                        sq += d * d;
                    }
                }
                let var = sq / count;

                let rm = self.running_mean.data()[ch];
                let rv = self.running_var.data()[ch];
                self.running_mean.data_mut()[ch] = (T::ONE - momentum) * rm + momentum * mean;
                self.running_var.data_mut()[ch] = (T::ONE - momentum) * rv + momentum * var;
                (mean, var)
            } else {
                (self.running_mean.data()[ch], self.running_var.data()[ch])
            };

            let scale = self.weight.data()[ch] / (var + eps).sqrt();
            let shift = self.bias.data()[ch] - mean * scale;
            for b in 0..batch {
                let start = (b * channels + ch) * inner;
                for i in start..start + inner {
                    out[i] = x[i] * scale + shift;
                }
            }
        }

        Tensor::new(out, dims)
    }
}

/// Batch normalization over (batch, channel, height, width) planes.
pub struct BatchNorm2d<T: Float>(pub BatchNorm<T>);

impl<T: Float> BatchNorm2d<T> {
    pub fn new(num_features: usize) -> Self {
        BatchNorm2d(BatchNorm::with_rank(num_features, 4))
    }

    pub fn forward(&mut self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.0.forward(input)
    }

    pub fn train(&mut self) {
        self.0.train();
    }

    pub fn eval(&mut self) {
        self.0.eval();
    }
}

/// Batch normalization over (batch, channel, depth, height, width) volumes.
pub struct BatchNorm3d<T: Float>(pub BatchNorm<T>);

impl<T: Float> BatchNorm3d<T> {
    pub fn new(num_features: usize) -> Self {
        BatchNorm3d(BatchNorm::with_rank(num_features, 5))
    }

    pub fn forward(&mut self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        self.0.forward(input)
    }

    pub fn train(&mut self) {
        self.0.train();
    }

    pub fn eval(&mut self) {
        self.0.eval();
    }
}
