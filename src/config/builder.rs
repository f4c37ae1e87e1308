//! Build [`Config`] from environment variables.
//!
//! Uses [`env_string`] and [`env_parsed`] to read env vars with a single
//! place for key names (see [`crate::config`] constants) and typed errors
//! ([`ConfigError`]).

use std::path::PathBuf;

use super::constants::{
    ENV_BATCH_SIZE, ENV_BETA1, ENV_BETA2, ENV_BLOCK_SIZE, ENV_EPSILON, ENV_GRAD_CLIP,
    ENV_INIT_STD, ENV_INPUT_PATH, ENV_LEARNING_RATE, ENV_LOSS_LOG_EVERY, ENV_NUM_STEPS,
    ENV_N_EMBED, ENV_N_HEAD, ENV_N_LAYER, ENV_PREFIX, ENV_QUANT, ENV_SAMPLE_SIZE, ENV_SEED,
    ENV_TEMPERATURE, ENV_WEIGHTS_IN, ENV_WEIGHTS_OUT,
};
use super::{Config, ConfigError};
use crate::weights::Quant;

/// Returns the full environment variable key for a suffix (e.g. `SEED` → `PICOGPT_SEED`).
#[must_use]
pub fn env_key(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

/// Reads an environment variable as a string.
///
/// Returns `Some(value)` if the variable is set and valid UTF-8, `None` if
/// unset.
///
/// # Errors
///
/// Returns [`ConfigError::EnvVar`] if the variable is set but invalid (e.g.
/// not Unicode).
pub fn env_string(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(s) => Ok(Some(s)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::EnvVar {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Reads an environment variable and parses it into type `T`.
///
/// Returns `Ok(Some(value))` if set and parse succeeds, `Ok(None)` if unset.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if set but parsing fails (e.g. `SEED=abc`
/// for `u64`).
pub fn env_parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let s = match env_string(key)? {
        Some(s) => s,
        None => return Ok(None),
    };
    match s.parse() {
        Ok(t) => Ok(Some(t)),
        Err(e) => Err(ConfigError::Parse {
            key: key.to_string(),
            value: s,
            message: e.to_string(),
        }),
    }
}

/// Builds [`Config`] from environment variables, falling back to
/// [`Config::default`] for unset values.
///
/// # Errors
///
/// Returns [`ConfigError`] if any *set* variable fails to parse (e.g.
/// `PICOGPT_QUANT=int5`).
pub fn from_env() -> Result<Config, ConfigError> {
    let default = Config::default();

    let seed = env_parsed::<u64>(&env_key(ENV_SEED))?.unwrap_or(default.seed);
    let input_path = env_string(&env_key(ENV_INPUT_PATH))?
        .map(PathBuf::from)
        .unwrap_or(default.input_path);
    let weights_in = env_string(&env_key(ENV_WEIGHTS_IN))?.map(PathBuf::from);
    let weights_out = env_string(&env_key(ENV_WEIGHTS_OUT))?.map(PathBuf::from);
    let quant = env_parsed::<Quant>(&env_key(ENV_QUANT))?.unwrap_or(default.quant);
    let n_embed = env_parsed::<usize>(&env_key(ENV_N_EMBED))?.unwrap_or(default.n_embed);
    let n_head = env_parsed::<usize>(&env_key(ENV_N_HEAD))?.unwrap_or(default.n_head);
    let n_layer = env_parsed::<usize>(&env_key(ENV_N_LAYER))?.unwrap_or(default.n_layer);
    let block_size = env_parsed::<usize>(&env_key(ENV_BLOCK_SIZE))?.unwrap_or(default.block_size);
    let init_std = env_parsed::<f64>(&env_key(ENV_INIT_STD))?.unwrap_or(default.init_std);
    let learning_rate =
        env_parsed::<f64>(&env_key(ENV_LEARNING_RATE))?.unwrap_or(default.learning_rate);
    let beta1 = env_parsed::<f64>(&env_key(ENV_BETA1))?.unwrap_or(default.beta1);
    let beta2 = env_parsed::<f64>(&env_key(ENV_BETA2))?.unwrap_or(default.beta2);
    let epsilon = env_parsed::<f64>(&env_key(ENV_EPSILON))?.unwrap_or(default.epsilon);
    let grad_clip = env_parsed::<f64>(&env_key(ENV_GRAD_CLIP))?.unwrap_or(default.grad_clip);
    let num_steps = env_parsed::<usize>(&env_key(ENV_NUM_STEPS))?.unwrap_or(default.num_steps);
    let batch_size = env_parsed::<usize>(&env_key(ENV_BATCH_SIZE))?.unwrap_or(default.batch_size);
    let loss_log_every =
        env_parsed::<usize>(&env_key(ENV_LOSS_LOG_EVERY))?.unwrap_or(default.loss_log_every);
    let temperature = env_parsed::<f64>(&env_key(ENV_TEMPERATURE))?.unwrap_or(default.temperature);
    let sample_size =
        env_parsed::<usize>(&env_key(ENV_SAMPLE_SIZE))?.unwrap_or(default.sample_size);

    Ok(Config {
        seed,
        input_path,
        weights_in,
        weights_out,
        quant,
        n_embed,
        n_head,
        n_layer,
        block_size,
        init_std,
        learning_rate,
        beta1,
        beta2,
        epsilon,
        grad_clip,
        num_steps,
        batch_size,
        loss_log_every,
        temperature,
        sample_size,
    })
}
