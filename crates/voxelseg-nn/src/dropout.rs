use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use voxelseg_core::{Float, Tensor, TensorError, TensorResult};

/// Channel dropout — zeroes whole (batch, channel) feature maps during
/// training and rescales the survivors by 1/(1-p). Acts as identity when not
/// training (the default) or when p is 0.
pub struct Dropout {
    pub p: f64,
    pub training: bool,
}

impl Dropout {
    pub fn new(p: f64) -> Self {
        Dropout { p, training: false }
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn forward<T: Float>(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        if !self.training || self.p == 0.0 {
            return Ok(input.clone());
        }
        let dims = input.shape_vec();
        if dims.len() < 2 {
            return Err(TensorError::DimensionMismatch(format!(
                "channel dropout expects a (batch, channel, ...) input, got rank {}",
                dims.len()
            )));
        }
        if self.p >= 1.0 {
            return Ok(Tensor::zeros(dims));
        }

        let batch = dims[0];
        let channels = dims[1];
        let inner: usize = dims[2..].iter().product();
        let scale = T::from_f64(1.0 / (1.0 - self.p));

        let mut rng = StdRng::from_entropy();
        let x = input.data();
        let mut out = vec![T::ZERO; x.len()];
        for bc in 0..batch * channels {
            if rng.gen::<f64>() < self.p {
                continue;
            }
            let start = bc * inner;
            for i in start..start + inner {
                out[i] = x[i] * scale;
            }
        }
        Tensor::new(out, dims)
    }
}

impl Default for Dropout {
    fn default() -> Self {
        Self::new(0.5)
    }
}
