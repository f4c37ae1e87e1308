//! Configuration for model, training, inference, persistence, and paths.
//!
//! Load from environment via [`from_env`] and validate with
//! [`Config::validate`]. Default values and env key names are centralized in
//! the `constants` submodule.

mod builder;
mod constants;
mod error;

use std::path::PathBuf;

use constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_BETA1, DEFAULT_BETA2, DEFAULT_BLOCK_SIZE, DEFAULT_EPSILON,
    DEFAULT_GRAD_CLIP, DEFAULT_INIT_STD, DEFAULT_INPUT_PATH, DEFAULT_LEARNING_RATE,
    DEFAULT_LOSS_LOG_EVERY, DEFAULT_NUM_STEPS, DEFAULT_N_EMBED, DEFAULT_N_HEAD, DEFAULT_N_LAYER,
    DEFAULT_SAMPLE_SIZE, DEFAULT_SEED, DEFAULT_TEMPERATURE,
};

pub use builder::{env_key, env_parsed, env_string, from_env};
pub use error::ConfigError;

use crate::weights::Quant;

/// Central configuration for the picogpt pipeline.
///
/// Holds model dimensions, optimizer and training parameters, inference
/// parameters, and paths. Use [`from_env`] to build from environment
/// variables and [`Config::validate`] before use.
#[derive(Clone, Debug)]
pub struct Config {
    /// Seed for RNG (reproducibility of shuffling, init, and sampling).
    pub seed: u64,
    /// Path to input corpus (one document per line).
    pub input_path: PathBuf,
    /// When set, load persisted weights from this path and skip training.
    pub weights_in: Option<PathBuf>,
    /// When set, save weights to this path after training.
    pub weights_out: Option<PathBuf>,
    /// Quantization used when saving weights.
    pub quant: Quant,

    /// Embedding dimension (must be divisible by `n_head`).
    pub n_embed: usize,
    /// Number of attention heads.
    pub n_head: usize,
    /// Number of transformer layers.
    pub n_layer: usize,
    /// Maximum context length (tokens).
    pub block_size: usize,
    /// Weight init standard deviation (output projections are zero-init).
    pub init_std: f64,

    /// Adam base learning rate (decays linearly to zero over `num_steps`).
    pub learning_rate: f64,
    /// Adam first-moment decay rate.
    pub beta1: f64,
    /// Adam second-moment decay rate.
    pub beta2: f64,
    /// Adam denominator epsilon.
    pub epsilon: f64,
    /// Global gradient-norm clip threshold.
    pub grad_clip: f64,

    /// Number of training steps.
    pub num_steps: usize,
    /// Documents accumulated per optimizer step.
    pub batch_size: usize,
    /// Log loss every this many steps.
    pub loss_log_every: usize,

    /// Sampling temperature (0 < T <= 1).
    pub temperature: f64,
    /// Number of samples to generate after training.
    pub sample_size: usize,
}

impl Default for Config {
    /// Returns the default configuration (suitable for tests and fallbacks).
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            input_path: PathBuf::from(DEFAULT_INPUT_PATH),
            weights_in: None,
            weights_out: None,
            quant: Quant::Fp32,
            n_embed: DEFAULT_N_EMBED,
            n_head: DEFAULT_N_HEAD,
            n_layer: DEFAULT_N_LAYER,
            block_size: DEFAULT_BLOCK_SIZE,
            init_std: DEFAULT_INIT_STD,
            learning_rate: DEFAULT_LEARNING_RATE,
            beta1: DEFAULT_BETA1,
            beta2: DEFAULT_BETA2,
            epsilon: DEFAULT_EPSILON,
            grad_clip: DEFAULT_GRAD_CLIP,
            num_steps: DEFAULT_NUM_STEPS,
            batch_size: DEFAULT_BATCH_SIZE,
            loss_log_every: DEFAULT_LOSS_LOG_EVERY,
            temperature: DEFAULT_TEMPERATURE,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// Ensures `n_embed` is divisible by `n_head`, sizes are nonzero, the
    /// temperature is in range, and the init/optimizer scalars are sane.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the rule that failed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_head == 0 {
            return Err(ConfigError::Validation(
                "n_head must be greater than 0".to_string(),
            ));
        }
        if self.n_embed % self.n_head != 0 {
            return Err(ConfigError::Validation(format!(
                "n_embed ({}) must be divisible by n_head ({})",
                self.n_embed, self.n_head
            )));
        }
        if self.n_layer == 0 {
            return Err(ConfigError::Validation(
                "n_layer must be greater than 0".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Validation(
                "block_size must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.num_steps == 0 {
            return Err(ConfigError::Validation(
                "num_steps must be greater than 0".to_string(),
            ));
        }
        if !self.init_std.is_finite() || self.init_std < 0.0 {
            return Err(ConfigError::Validation(
                "init_std must be finite and non-negative".to_string(),
            ));
        }
        if self.temperature <= 0.0 || self.temperature > 1.0 {
            return Err(ConfigError::Validation(
                "temperature must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Head dimension (`n_embed / n_head`).
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.n_embed / self.n_head
    }
}
