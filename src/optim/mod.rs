//! Adam with global gradient-norm clipping and linear learning-rate decay.
//!
//! Moment buffers are flat vectors ordered by the [`StateDict`] tensor
//! traversal, so the pairing of parameter to `(m, v)` slot is deterministic
//! across runs and across save/load. The optimizer never zeroes gradients;
//! accumulation and reset belong to the caller.

use crate::config::Config;
use crate::model::StateDict;

/// Global L2 norm over every gradient value, in traversal order.
#[must_use]
pub fn grad_norm(grads: &StateDict) -> f64 {
    let sum_sq: f64 = grads
        .tensors()
        .iter()
        .map(|(_, m)| {
            m.iter()
                .map(|row| row.iter().map(|g| g * g).sum::<f64>())
                .sum::<f64>()
        })
        .sum();
    sum_sq.sqrt()
}

/// Rescales every gradient by `max_norm / norm` when the global norm exceeds
/// `max_norm`; otherwise leaves them untouched. Relative magnitudes are
/// preserved.
pub fn clip_gradients(grads: &mut StateDict, max_norm: f64) {
    let norm = grad_norm(grads);
    if norm > max_norm {
        let scale = max_norm / norm;
        for (_, m) in grads.tensors_mut() {
            for row in m.iter_mut() {
                for g in row.iter_mut() {
                    *g *= scale;
                }
            }
        }
    }
}

/// Adam state: first/second moment per scalar parameter plus the fixed
/// hyperparameters of a training run.
#[derive(Clone, Debug)]
pub struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    grad_clip: f64,
    base_lr: f64,
    total_steps: usize,
}

impl Adam {
    /// Zeroed moments for `n_params` scalars, hyperparameters from `config`.
    #[must_use]
    pub fn new(n_params: usize, config: &Config) -> Self {
        Adam {
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
            beta1: config.beta1,
            beta2: config.beta2,
            epsilon: config.epsilon,
            grad_clip: config.grad_clip,
            base_lr: config.learning_rate,
            total_steps: config.num_steps,
        }
    }

    /// The learning rate at `step`: linear decay from the base rate to zero
    /// over the configured step count.
    #[must_use]
    pub fn lr_at(&self, step: usize) -> f64 {
        self.base_lr * (1.0 - step as f64 / self.total_steps as f64)
    }

    /// One optimizer step.
    ///
    /// Clips `grads` to the global-norm threshold (when enabled), then
    /// updates every parameter in the deterministic traversal order:
    /// biased moment estimates with bias correction by `1 − β^(step+1)`,
    /// update `p -= lr_t · m̂ / (√v̂ + ε)`. Gradients are assumed already
    /// accumulated by the caller and are not zeroed here.
    pub fn step(&mut self, params: &mut StateDict, grads: &mut StateDict, step: usize) {
        if self.grad_clip > 0.0 {
            clip_gradients(grads, self.grad_clip);
        }
        let lr_t = self.lr_at(step);
        let bc1 = 1.0 - self.beta1.powi(step as i32 + 1);
        let bc2 = 1.0 - self.beta2.powi(step as i32 + 1);

        let mut i = 0;
        for ((_, p), (_, g)) in params.tensors_mut().into_iter().zip(grads.tensors()) {
            for (p_row, g_row) in p.iter_mut().zip(g) {
                for (pv, &gv) in p_row.iter_mut().zip(g_row) {
                    self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * gv;
                    self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * gv * gv;
                    let m_hat = self.m[i] / bc1;
                    let v_hat = self.v[i] / bc2;
                    *pv -= lr_t * m_hat / (v_hat.sqrt() + self.epsilon);
                    i += 1;
                }
            }
        }
    }
}
