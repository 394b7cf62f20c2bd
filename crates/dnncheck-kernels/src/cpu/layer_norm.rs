//! CPU layer normalization kernel.
//!
//! Normalizes each row of a `[N, C]` buffer over its `C` elements with
//! optional per-channel scale (gamma) and shift (beta). Statistics and the
//! normalized values are computed in `f64` and narrowed on store.

use rayon::prelude::*;

use crate::error::{Result, invalid_args};

// ── Configuration ──────────────────────────────────────────────────

/// Configuration for layer normalization.
#[derive(Debug, Clone)]
pub struct LayerNormConfig {
    /// Length of each normalized row.
    pub norm_size: usize,
    /// Added to the variance before the square root.
    pub eps: f32,
    /// Multiply by gamma; otherwise gamma is taken as all ones.
    pub use_scale: bool,
    /// Add beta; otherwise beta is taken as all zeros.
    pub use_shift: bool,
}

impl LayerNormConfig {
    #[must_use]
    pub fn new(norm_size: usize, eps: f32) -> Self {
        Self { norm_size, eps, use_scale: false, use_shift: false }
    }

    #[must_use]
    pub fn with_affine(mut self, use_scale: bool, use_shift: bool) -> Self {
        self.use_scale = use_scale;
        self.use_shift = use_shift;
        self
    }
}

/// Forward outputs. `mean` and `var` are the statistics actually used.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNormForward {
    pub output: Vec<f32>,
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
}

/// Backward outputs. Weight gradients are always produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNormBackward {
    pub grad_input: Vec<f32>,
    pub grad_gamma: Vec<f32>,
    pub grad_beta: Vec<f32>,
}

// ── Forward ────────────────────────────────────────────────────────

/// Layer normalization forward pass.
///
/// With `stats` present the given per-row `(mean, var)` are used as-is;
/// otherwise they are computed from `input`.
pub fn layer_norm_forward(
    input: &[f32],
    gamma: &[f32],
    beta: &[f32],
    stats: Option<(&[f32], &[f32])>,
    config: &LayerNormConfig,
) -> Result<LayerNormForward> {
    let c = config.norm_size;
    validate_common_args(input, c, config.eps)?;
    let (gamma, beta) = effective_affine(gamma, beta, config)?;
    let rows = input.len() / c;

    let (mean, var) = match stats {
        Some((mean, var)) => {
            validate_param_len(mean, rows, "mean")?;
            validate_param_len(var, rows, "var")?;
            (mean.to_vec(), var.to_vec())
        }
        None => compute_row_stats(input, c)?,
    };

    let mut output = vec![0.0f32; input.len()];
    output.par_chunks_mut(c).zip(input.par_chunks(c)).enumerate().for_each(|(n, (out, x))| {
        let inv_std = 1.0 / (var[n] as f64 + config.eps as f64).sqrt();
        let m = mean[n] as f64;
        for ch in 0..c {
            let x_hat = (x[ch] as f64 - m) * inv_std;
            out[ch] = (gamma[ch] as f64 * x_hat + beta[ch] as f64) as f32;
        }
    });

    Ok(LayerNormForward { output, mean, var })
}

// ── Backward ───────────────────────────────────────────────────────

/// Layer normalization backward pass.
///
/// With `use_global_stats` the statistics are treated as constants and
/// the mean/variance terms drop out of the input gradient.
pub fn layer_norm_backward(
    grad_output: &[f32],
    input: &[f32],
    gamma: &[f32],
    mean: &[f32],
    var: &[f32],
    config: &LayerNormConfig,
    use_global_stats: bool,
) -> Result<LayerNormBackward> {
    let c = config.norm_size;
    validate_common_args(input, c, config.eps)?;
    if grad_output.len() != input.len() {
        return Err(invalid_args(format!(
            "grad_output length {} != input length {}",
            grad_output.len(),
            input.len()
        )));
    }
    let ones = vec![1.0f32; c];
    let gamma = if config.use_scale {
        validate_param_len(gamma, c, "gamma")?;
        gamma
    } else {
        &ones
    };
    let rows = input.len() / c;
    validate_param_len(mean, rows, "mean")?;
    validate_param_len(var, rows, "var")?;

    let inv_std: Vec<f64> =
        var.iter().map(|&v| 1.0 / (v as f64 + config.eps as f64).sqrt()).collect();
    let c_f64 = c as f64;

    let mut grad_input = vec![0.0f32; input.len()];
    grad_input
        .par_chunks_mut(c)
        .zip(input.par_chunks(c).zip(grad_output.par_chunks(c)))
        .enumerate()
        .for_each(|(n, (gi, (x, dy)))| {
            let m = mean[n] as f64;
            let rcp = inv_std[n];
            let (mut sum_dy_g, mut sum_dy_g_x) = (0.0f64, 0.0f64);
            if !use_global_stats {
                for ch in 0..c {
                    let dyg = dy[ch] as f64 * gamma[ch] as f64;
                    sum_dy_g += dyg;
                    sum_dy_g_x += dyg * (x[ch] as f64 - m);
                }
                sum_dy_g_x *= rcp;
            }
            for ch in 0..c {
                let x_hat = (x[ch] as f64 - m) * rcp;
                let mut ds = dy[ch] as f64 * gamma[ch] as f64;
                if !use_global_stats {
                    ds -= (sum_dy_g + x_hat * sum_dy_g_x) / c_f64;
                }
                gi[ch] = (ds * rcp) as f32;
            }
        });

    // Channel sums run over rows in order.
    let mut dg = vec![0.0f64; c];
    let mut db = vec![0.0f64; c];
    for n in 0..rows {
        let m = mean[n] as f64;
        for ch in 0..c {
            let idx = n * c + ch;
            let dy = grad_output[idx] as f64;
            dg[ch] += dy * (input[idx] as f64 - m) * inv_std[n];
            db[ch] += dy;
        }
    }

    Ok(LayerNormBackward {
        grad_input,
        grad_gamma: dg.iter().map(|&v| v as f32).collect(),
        grad_beta: db.iter().map(|&v| v as f32).collect(),
    })
}

// ── Row statistics ─────────────────────────────────────────────────

/// Per-row mean and (biased) variance of a `[N, C]` buffer.
pub fn compute_row_stats(input: &[f32], c: usize) -> Result<(Vec<f32>, Vec<f32>)> {
    if c == 0 {
        return Err(invalid_args("norm_size must be > 0"));
    }
    if !input.len().is_multiple_of(c) {
        return Err(invalid_args("input length must be a multiple of norm_size"));
    }
    let count = c as f64;
    Ok(input
        .par_chunks(c)
        .map(|row| {
            let mean = row.iter().map(|&v| v as f64).sum::<f64>() / count;
            let var = row.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / count;
            (mean as f32, var as f32)
        })
        .unzip())
}

// ── Internal helpers ───────────────────────────────────────────────

fn validate_common_args(input: &[f32], c: usize, eps: f32) -> Result<()> {
    if c == 0 {
        return Err(invalid_args("norm_size must be > 0"));
    }
    if input.is_empty() {
        return Err(invalid_args("input must be non-empty"));
    }
    if eps < 0.0 || !eps.is_finite() {
        return Err(invalid_args("eps must be non-negative and finite"));
    }
    if !input.len().is_multiple_of(c) {
        return Err(invalid_args("input length must be a multiple of norm_size"));
    }
    Ok(())
}

fn validate_param_len(param: &[f32], expected: usize, name: &str) -> Result<()> {
    if param.len() != expected {
        return Err(invalid_args(format!("{name} length {} != expected {expected}", param.len())));
    }
    Ok(())
}

fn effective_affine<'a>(
    gamma: &'a [f32],
    beta: &'a [f32],
    config: &LayerNormConfig,
) -> Result<(std::borrow::Cow<'a, [f32]>, std::borrow::Cow<'a, [f32]>)> {
    use std::borrow::Cow;
    let c = config.norm_size;
    let gamma = if config.use_scale {
        validate_param_len(gamma, c, "gamma")?;
        Cow::Borrowed(gamma)
    } else {
        Cow::Owned(vec![1.0; c])
    };
    let beta = if config.use_shift {
        validate_param_len(beta, c, "beta")?;
        Cow::Borrowed(beta)
    } else {
        Cow::Owned(vec![0.0; c])
    };
    Ok((gamma, beta))
}

// ── Tests ──────────────────────────────────────────────────────────
