use rayon::prelude::*;
use voxelseg_core::{Float, Tensor, TensorError, TensorResult};

#[inline]
fn out_dim(n: usize, k: usize, s: usize, p: usize) -> TensorResult<usize> {
    if n + 2 * p < k {
        return Err(TensorError::DimensionMismatch(format!(
            "kernel size {} exceeds padded input extent {}",
            k,
            n + 2 * p
        )));
    }
    Ok((n + 2 * p - k) / s + 1)
}

/// 3D convolution over (batch, channel, depth, height, width) volumes.
///
/// The kernel is cubic and the stride applies to all three axes. Padding is
/// per-axis `(depth, height, width)`: the contracting path pads height and
/// width always but depth only at stride 1, which keeps the central slice of
/// a volume centered through repeated downsampling.
pub struct Conv3d<T: Float> {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: (usize, usize, usize),
    /// Weight layout: (out_channels, in_channels, k, k, k).
    pub weight: Tensor<T>,
    pub bias: Option<Tensor<T>>,
}

impl<T: Float> Conv3d<T> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: (usize, usize, usize),
        bias: bool,
    ) -> Self {
        let k = kernel_size;
        Conv3d {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            weight: Tensor::zeros(vec![out_channels, in_channels, k, k, k]),
            bias: bias.then(|| Tensor::zeros(vec![out_channels])),
        }
    }

    pub fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let dims = input.shape_vec();
        if dims.len() != 5 {
            return Err(TensorError::DimensionMismatch(format!(
                "Conv3d expects a rank-5 input, got rank {}",
                dims.len()
            )));
        }
        if dims[1] != self.in_channels {
            return Err(TensorError::DimensionMismatch(format!(
                "Conv3d expects {} input channels, got {}",
                self.in_channels, dims[1]
            )));
        }
        let (batch, d, h, w) = (dims[0], dims[2], dims[3], dims[4]);
        let k = self.kernel_size;
        let s = self.stride;
        let (pd, ph, pw) = self.padding;
        let d_out = out_dim(d, k, s, pd)?;
        let h_out = out_dim(h, k, s, ph)?;
        let w_out = out_dim(w, k, s, pw)?;

        let in_plane = d * h * w;
        let in_batch = self.in_channels * in_plane;
        let w_oc = self.in_channels * k * k * k;
        let out_plane = d_out * h_out * w_out;

        let x = input.data();
        let wt = self.weight.data();
        let bias = self.bias.as_ref().map(|b| b.data());

        let mut out = vec![T::ZERO; batch * self.out_channels * out_plane];
        out.par_chunks_mut(out_plane)
            .enumerate()
            .for_each(|(idx, plane)| {
                let b = idx / self.out_channels;
                let oc = idx % self.out_channels;
                let b0 = bias.map_or(T::ZERO, |bv| bv[oc]);
                let mut o = 0usize;
                for od in 0..d_out {
                    let id0 = (od * s) as isize - pd as isize;
                    for oh in 0..h_out {
                        let ih0 = (oh * s) as isize - ph as isize;
                        for ow in 0..w_out {
                            let iw0 = (ow * s) as isize - pw as isize;
                            let mut acc = b0;
                            for ic in 0..self.in_channels {
                                let x_base = b * in_batch + ic * in_plane;
                                let w_base = oc * w_oc + ic * k * k * k;
                                for kd in 0..k {
                                    let id = id0 + kd as isize;
                                    if id < 0 || id >= d as isize {
                                        continue;
                                    }
                                    for khi in 0..k {
                                        let ih = ih0 + khi as isize;
                                        if ih < 0 || ih >= h as isize {
                                            continue;
                                        }
                                        let x_row =
                                            x_base + (id as usize) * h * w + (ih as usize) * w;
                                        let w_row = w_base + kd * k * k + khi * k;
                                        for kwi in 0..k {
                                            let iw = iw0 + kwi as isize;
                                            if iw < 0 || iw >= w as isize {
                                                continue;
                                            }
                                            acc += x[x_row + iw as usize] * wt[w_row + kwi];
                                        }
                                    }
                                }
                            }
                            plane[o] = acc;
                            o += 1;
                        }
                    }
                }
            });

        Tensor::new(out, vec![batch, self.out_channels, d_out, h_out, w_out])
    }
}

/// 2D convolution over (batch, channel, height, width) planes.
pub struct Conv2d<T: Float> {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    /// Weight layout: (out_channels, in_channels, k, k).
    pub weight: Tensor<T>,
    pub bias: Option<Tensor<T>>,
}

impl<T: Float> Conv2d<T> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        bias: bool,
    ) -> Self {
        let k = kernel_size;
        Conv2d {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            weight: Tensor::zeros(vec![out_channels, in_channels, k, k]),
            bias: bias.then(|| Tensor::zeros(vec![out_channels])),
        }
    }

    pub fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let dims = input.shape_vec();
        if dims.len() != 4 {
            return Err(TensorError::DimensionMismatch(format!(
                "Conv2d expects a rank-4 input, got rank {}",
                dims.len()
            )));
        }
        if dims[1] != self.in_channels {
            return Err(TensorError::DimensionMismatch(format!(
                "Conv2d expects {} input channels, got {}",
                self.in_channels, dims[1]
            )));
        }
        let (batch, h, w) = (dims[0], dims[2], dims[3]);
        let k = self.kernel_size;
        let s = self.stride;
        let p = self.padding;
        let h_out = out_dim(h, k, s, p)?;
        let w_out = out_dim(w, k, s, p)?;

        let in_plane = h * w;
        let in_batch = self.in_channels * in_plane;
        let w_oc = self.in_channels * k * k;
        let out_plane = h_out * w_out;

        let x = input.data();
        let wt = self.weight.data();
        let bias = self.bias.as_ref().map(|b| b.data());

        let mut out = vec![T::ZERO; batch * self.out_channels * out_plane];
        out.par_chunks_mut(out_plane)
            .enumerate()
            .for_each(|(idx, plane)| {
                let b = idx / self.out_channels;
                let oc = idx % self.out_channels;
                let b0 = bias.map_or(T::ZERO, |bv| bv[oc]);
                let mut o = 0usize;
                for oh in 0..h_out {
                    let ih0 = (oh * s) as isize - p as isize;
                    for ow in 0..w_out {
                        let iw0 = (ow * s) as isize - p as isize;
                        let mut acc = b0;
                        for ic in 0..self.in_channels {
                            let x_base = b * in_batch + ic * in_plane;
                            let w_base = oc * w_oc + ic * k * k;
                            for khi in 0..k {
                                let ih = ih0 + khi as isize;
                                if ih < 0 || ih >= h as isize {
                                    continue;
                                }
                                let x_row = x_base + (ih as usize) * w;
                                let w_row = w_base + khi * k;
                                for kwi in 0..k {
                                    let iw = iw0 + kwi as isize;
                                    if iw < 0 || iw >= w as isize {
                                        continue;
                                    }
                                    acc += x[x_row + iw as usize] * wt[w_row + kwi];
                                }
                            }
                        }
                        plane[o] = acc;
                        o += 1;
                    }
                }
            });

        Tensor::new(out, vec![batch, self.out_channels, h_out, w_out])
    }
}

/// Transposed 2D convolution. With kernel 2 and stride 2 (the only
/// configuration the network uses) it exactly doubles spatial resolution.
pub struct ConvTranspose2d<T: Float> {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    /// Weight layout: (in_channels, out_channels, k, k).
    pub weight: Tensor<T>,
    pub bias: Option<Tensor<T>>,
}

impl<T: Float> ConvTranspose2d<T> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        bias: bool,
    ) -> Self {
        let k = kernel_size;
        ConvTranspose2d {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            weight: Tensor::zeros(vec![in_channels, out_channels, k, k]),
            bias: bias.then(|| Tensor::zeros(vec![out_channels])),
        }
    }

    pub fn forward(&self, input: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let dims = input.shape_vec();
        if dims.len() != 4 {
            return Err(TensorError::DimensionMismatch(format!(
                "ConvTranspose2d expects a rank-4 input, got rank {}",
                dims.len()
            )));
        }
        if dims[1] != self.in_channels {
            return Err(TensorError::DimensionMismatch(format!(
                "ConvTranspose2d expects {} input channels, got {}",
                self.in_channels, dims[1]
            )));
        }
        let (batch, h, w) = (dims[0], dims[2], dims[3]);
        let k = self.kernel_size;
        let s = self.stride;
        let h_out = (h - 1) * s + k;
        let w_out = (w - 1) * s + k;

        let in_plane = h * w;
        let in_batch = self.in_channels * in_plane;
        let w_ic = self.out_channels * k * k;
        let out_plane = h_out * w_out;

        let x = input.data();
        let wt = self.weight.data();
        let bias = self.bias.as_ref().map(|b| b.data());

        let mut out = vec![T::ZERO; batch * self.out_channels * out_plane];
        out.par_chunks_mut(out_plane)
            .enumerate()
            .for_each(|(idx, plane)| {
                let b = idx / self.out_channels;
                let oc = idx % self.out_channels;
                let b0 = bias.map_or(T::ZERO, |bv| bv[oc]);
                let mut o = 0usize;
                for oh in 0..h_out {
                    for ow in 0..w_out {
                        let mut acc = b0;
                        for khi in 0..k {
                            if oh < khi || (oh - khi) % s != 0 {
                                continue;
                            }
                            let ih = (oh - khi) / s;
                            if ih >= h {
                                continue;
                            }
                            for kwi in 0..k {
                                if ow < kwi || (ow - kwi) % s != 0 {
                                    continue;
                                }
                                let iw = (ow - kwi) / s;
                                if iw >= w {
                                    continue;
                                }
                                for ic in 0..self.in_channels {
                                    let xv = x[b * in_batch + ic * in_plane + ih * w + iw];
                                    let wv = wt[ic * w_ic + oc * k * k + khi * k + kwi];
                                    acc += xv * wv;
                                }
                            }
                        }
                        plane[o] = acc;
                        o += 1;
                    }
                }
            });

        Tensor::new(out, vec![batch, self.out_channels, h_out, w_out])
    }
}
