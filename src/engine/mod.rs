//! The transformer engine: forward pass, manual backward, and the strategy
//! seam between the two differentiation implementations.
//!
//! [`forward`] computes next-token logits for one token at one position over
//! a growable [`KvCache`], optionally recording the intermediates backward
//! needs. [`ManualBackward`] consumes those recordings to produce gradients
//! analytically, with no computation graph; [`crate::autograd::GraphBackward`]
//! computes the same gradients through a dynamic graph and exists to
//! cross-check the manual derivation.

mod backward;
mod forward;
#[cfg(test)]
mod tests;

pub use backward::{backward_layer, ManualBackward};
pub use forward::{forward, ActivationCache, KvCache, LayerRecord, NormRecord, PosRecord};

use crate::model::{Matrix, Settings, StateDict};

/// Epsilon inside the RMS normalization denominator.
pub(crate) const RMSNORM_EPS: f64 = 1e-5;

/// Strategy for differentiating one training example.
///
/// Implementations run the model over the sentinel-wrapped `tokens`
/// (truncated to the block size), accumulate per-parameter gradients into
/// `grads` (adding, never overwriting; the caller zeroes between steps),
/// and return the mean cross-entropy loss.
///
/// Two implementations exist: [`ManualBackward`] (hand-derived, the
/// performance-oriented default) and [`crate::autograd::GraphBackward`]
/// (generic reverse-mode reference). Tests validate them against each other.
pub trait BackwardStrategy {
    /// Accumulates this example's gradients and returns its mean loss.
    fn accumulate(
        &self,
        settings: &Settings,
        params: &StateDict,
        tokens: &[usize],
        grads: &mut StateDict,
    ) -> f64;
}

/// `y = W·x`, one dot product per row of `w` (`[out][in]` orientation).
pub(crate) fn linear(x: &[f64], w: &Matrix) -> Vec<f64> {
    w.iter()
        .map(|row| row.iter().zip(x).map(|(wi, xi)| wi * xi).sum())
        .collect()
}

/// Accumulates `dW[i][j] += dy[i] · x[j]` (outer product).
pub(crate) fn linear_bwd_weight(dw: &mut Matrix, dy: &[f64], x: &[f64]) {
    for (row, dyi) in dw.iter_mut().zip(dy) {
        for (w, xj) in row.iter_mut().zip(x) {
            *w += dyi * xj;
        }
    }
}

/// Gradient on the input of a linear layer: `dx = Wᵀ·dy`.
pub(crate) fn linear_bwd_input(dy: &[f64], w: &Matrix) -> Vec<f64> {
    let n_in = w.first().map_or(0, Vec::len);
    let mut dx = vec![0.0; n_in];
    for (row, dyi) in w.iter().zip(dy) {
        for (dxj, wj) in dx.iter_mut().zip(row) {
            *dxj += dyi * wj;
        }
    }
    dx
}

/// Numerically-stable softmax: subtract the max before exponentiating.
pub(crate) fn softmax(logits: &[f64]) -> Vec<f64> {
    let max_val = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max_val).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// RMS normalization without learned scale/shift.
///
/// Returns the normalized vector and the inverse-RMS scale, which the
/// backward pass needs for the Jacobian.
pub(crate) fn rmsnorm(x: &[f64]) -> (Vec<f64>, f64) {
    let ms: f64 = x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64;
    let inv_rms = 1.0 / (ms + RMSNORM_EPS).sqrt();
    (x.iter().map(|v| v * inv_rms).collect(), inv_rms)
}

/// RMSNorm backward from the recorded normalized output and scale.
///
/// With `y = x·s` and `s = (mean(x²)+ε)^(-1/2)`:
/// `dx_i = s·dy_i − (s/n)·y_i·Σ_j dy_j·y_j`.
pub(crate) fn rmsnorm_bwd(dy: &[f64], record: &forward::NormRecord) -> Vec<f64> {
    let n = record.normed.len() as f64;
    let s = record.inv_rms;
    let dot: f64 = dy.iter().zip(&record.normed).map(|(d, y)| d * y).sum();
    dy.iter()
        .zip(&record.normed)
        .map(|(d, y)| s * d - (s / n) * dot * y)
        .collect()
}

/// Mean cross-entropy loss of one sentinel-wrapped example, forward-only.
///
/// Runs the forward engine across all positions (truncated to the block
/// size) without recording. Used by the finite-difference gradient checks
/// and anywhere a loss without gradients is wanted.
#[must_use]
pub fn example_loss(settings: &Settings, params: &StateDict, tokens: &[usize]) -> f64 {
    let n = (tokens.len() - 1).min(settings.block_size);
    let mut kv = KvCache::new(settings.n_layer);
    let mut loss = 0.0;
    for pos in 0..n {
        let logits = forward(settings, params, tokens[pos], pos, &mut kv, None);
        let probs = softmax(&logits);
        loss -= probs[tokens[pos + 1]].ln();
    }
    loss / n as f64
}
