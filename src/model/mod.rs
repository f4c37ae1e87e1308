//! Model state: named parameter matrices and the persisted settings.
//!
//! [`StateDict`] holds every parameter tensor of the transformer by name;
//! [`StateDict::zeros_like`] produces the identically-shaped gradient store.
//! [`Settings`] is the persisted subset of configuration that a weight file
//! carries so a model can be rebuilt without the original environment.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// A named parameter tensor: rows of `f64` in `[out][in]` orientation.
pub type Matrix = Vec<Vec<f64>>;

/// Model dimensions persisted alongside the weights.
///
/// Serialized as JSON into the weight file header, so `load` can rebuild the
/// exact architecture. `dataset` labels the corpus the model was trained on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Embedding dimension.
    pub n_embed: usize,
    /// Number of attention heads.
    pub n_head: usize,
    /// Number of transformer layers.
    pub n_layer: usize,
    /// Maximum context length.
    pub block_size: usize,
    /// Vocabulary size, sentinel included.
    pub vocab_size: usize,
    /// Label of the corpus the model was trained on.
    #[serde(default)]
    pub dataset: String,
}

impl Settings {
    /// Derives settings from the runtime configuration and a built vocabulary.
    #[must_use]
    pub fn from_config(config: &Config, vocab_size: usize, dataset: String) -> Self {
        Settings {
            n_embed: config.n_embed,
            n_head: config.n_head,
            n_layer: config.n_layer,
            block_size: config.block_size,
            vocab_size,
            dataset,
        }
    }

    /// Head dimension (`n_embed / n_head`).
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.n_embed / self.n_head
    }
}

/// Per-layer weight matrices.
#[derive(Clone, Debug)]
pub struct LayerWeights {
    /// Query projection, embd×embd.
    pub attn_wq: Matrix,
    /// Key projection, embd×embd.
    pub attn_wk: Matrix,
    /// Value projection, embd×embd.
    pub attn_wv: Matrix,
    /// Attention output projection, embd×embd.
    pub attn_wo: Matrix,
    /// MLP up-projection, 4·embd×embd.
    pub mlp_fc1: Matrix,
    /// MLP down-projection, embd×4·embd.
    pub mlp_fc2: Matrix,
}

/// All model parameters (or, with the same shapes, all gradients).
///
/// Tensor names and traversal order are fixed: `wte`, `wpe`, `lm_head`, then
/// per layer `layer{i}.attn_wq/wk/wv/wo`, `layer{i}.mlp_fc1/fc2`. The
/// optimizer's flat moment buffers and the weight file index both rely on
/// this order.
#[derive(Clone, Debug)]
pub struct StateDict {
    /// Token embedding, vocab×embd.
    pub wte: Matrix,
    /// Position embedding, block×embd.
    pub wpe: Matrix,
    /// Output head, vocab×embd.
    pub lm_head: Matrix,
    /// Per-layer attention and MLP weights.
    pub layers: Vec<LayerWeights>,
}

fn zero_matrix(nout: usize, nin: usize) -> Matrix {
    vec![vec![0.0; nin]; nout]
}

impl StateDict {
    /// Gaussian-initialized parameters.
    ///
    /// Every tensor uses `Normal(0, init_std)` except the two output
    /// projections (`attn_wo`, `mlp_fc2`), which start at zero so each block
    /// initially contributes nothing to its residual stream.
    #[must_use]
    pub fn init(settings: &Settings, init_std: f64, rng: &mut StdRng) -> Self {
        let normal = Normal::new(0.0, init_std).expect("init_std is finite and non-negative");
        let mut matrix = |nout: usize, nin: usize| -> Matrix {
            (0..nout)
                .map(|_| (0..nin).map(|_| normal.sample(rng)).collect())
                .collect()
        };

        let n_embed = settings.n_embed;
        let wte = matrix(settings.vocab_size, n_embed);
        let wpe = matrix(settings.block_size, n_embed);
        let lm_head = matrix(settings.vocab_size, n_embed);
        let layers = (0..settings.n_layer)
            .map(|_| LayerWeights {
                attn_wq: matrix(n_embed, n_embed),
                attn_wk: matrix(n_embed, n_embed),
                attn_wv: matrix(n_embed, n_embed),
                attn_wo: zero_matrix(n_embed, n_embed),
                mlp_fc1: matrix(4 * n_embed, n_embed),
                mlp_fc2: zero_matrix(n_embed, 4 * n_embed),
            })
            .collect();

        StateDict {
            wte,
            wpe,
            lm_head,
            layers,
        }
    }

    /// All-zero tensors of the shapes `settings` implies (a gradient store).
    #[must_use]
    pub fn zeros(settings: &Settings) -> Self {
        let n_embed = settings.n_embed;
        StateDict {
            wte: zero_matrix(settings.vocab_size, n_embed),
            wpe: zero_matrix(settings.block_size, n_embed),
            lm_head: zero_matrix(settings.vocab_size, n_embed),
            layers: (0..settings.n_layer)
                .map(|_| LayerWeights {
                    attn_wq: zero_matrix(n_embed, n_embed),
                    attn_wk: zero_matrix(n_embed, n_embed),
                    attn_wv: zero_matrix(n_embed, n_embed),
                    attn_wo: zero_matrix(n_embed, n_embed),
                    mlp_fc1: zero_matrix(4 * n_embed, n_embed),
                    mlp_fc2: zero_matrix(n_embed, 4 * n_embed),
                })
                .collect(),
        }
    }

    /// A same-shaped all-zero mirror of `self`.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        let like = |m: &Matrix| -> Matrix { m.iter().map(|row| vec![0.0; row.len()]).collect() };
        StateDict {
            wte: like(&self.wte),
            wpe: like(&self.wpe),
            lm_head: like(&self.lm_head),
            layers: self
                .layers
                .iter()
                .map(|l| LayerWeights {
                    attn_wq: like(&l.attn_wq),
                    attn_wk: like(&l.attn_wk),
                    attn_wv: like(&l.attn_wv),
                    attn_wo: like(&l.attn_wo),
                    mlp_fc1: like(&l.mlp_fc1),
                    mlp_fc2: like(&l.mlp_fc2),
                })
                .collect(),
        }
    }

    /// Resets every value to zero in place (start of a training step).
    pub fn zero(&mut self) {
        for (_, m) in self.tensors_mut() {
            for row in m.iter_mut() {
                for v in row.iter_mut() {
                    *v = 0.0;
                }
            }
        }
    }

    /// Named tensors in the fixed traversal order.
    #[must_use]
    pub fn tensors(&self) -> Vec<(String, &Matrix)> {
        let mut out: Vec<(String, &Matrix)> = vec![
            ("wte".to_string(), &self.wte),
            ("wpe".to_string(), &self.wpe),
            ("lm_head".to_string(), &self.lm_head),
        ];
        for (i, l) in self.layers.iter().enumerate() {
            out.push((format!("layer{i}.attn_wq"), &l.attn_wq));
            out.push((format!("layer{i}.attn_wk"), &l.attn_wk));
            out.push((format!("layer{i}.attn_wv"), &l.attn_wv));
            out.push((format!("layer{i}.attn_wo"), &l.attn_wo));
            out.push((format!("layer{i}.mlp_fc1"), &l.mlp_fc1));
            out.push((format!("layer{i}.mlp_fc2"), &l.mlp_fc2));
        }
        out
    }

    /// Named mutable tensors in the same fixed traversal order.
    pub fn tensors_mut(&mut self) -> Vec<(String, &mut Matrix)> {
        let mut out: Vec<(String, &mut Matrix)> = vec![
            ("wte".to_string(), &mut self.wte),
            ("wpe".to_string(), &mut self.wpe),
            ("lm_head".to_string(), &mut self.lm_head),
        ];
        for (i, l) in self.layers.iter_mut().enumerate() {
            out.push((format!("layer{i}.attn_wq"), &mut l.attn_wq));
            out.push((format!("layer{i}.attn_wk"), &mut l.attn_wk));
            out.push((format!("layer{i}.attn_wv"), &mut l.attn_wv));
            out.push((format!("layer{i}.attn_wo"), &mut l.attn_wo));
            out.push((format!("layer{i}.mlp_fc1"), &mut l.mlp_fc1));
            out.push((format!("layer{i}.mlp_fc2"), &mut l.mlp_fc2));
        }
        out
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn n_params(&self) -> usize {
        self.tensors()
            .iter()
            .map(|(_, m)| m.iter().map(Vec::len).sum::<usize>())
            .sum()
    }
}

/// The owned aggregate of mutable model state: settings, parameters, and the
/// shape-mirrored gradient store.
///
/// Passing this by reference (instead of keeping globals) lets several
/// independent models coexist in one process, which the gradient-check tests
/// rely on.
#[derive(Clone, Debug)]
pub struct Model {
    /// Architecture dimensions, as persisted.
    pub settings: Settings,
    /// Parameter store.
    pub params: StateDict,
    /// Gradient store, same shapes as `params`.
    pub grads: StateDict,
}

impl Model {
    /// A freshly initialized model.
    #[must_use]
    pub fn new(settings: Settings, init_std: f64, rng: &mut StdRng) -> Self {
        let params = StateDict::init(&settings, init_std, rng);
        let grads = params.zeros_like();
        Model {
            settings,
            params,
            grads,
        }
    }

    /// A model around loaded parameters (e.g. from a weight file).
    #[must_use]
    pub fn from_parts(settings: Settings, params: StateDict) -> Self {
        let grads = params.zeros_like();
        Model {
            settings,
            params,
            grads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn settings() -> Settings {
        Settings {
            n_embed: 8,
            n_head: 2,
            n_layer: 2,
            block_size: 4,
            vocab_size: 5,
            dataset: String::new(),
        }
    }

    #[test]
    fn n_params_matches_shape_arithmetic() {
        let s = settings();
        let mut rng = StdRng::seed_from_u64(1);
        let sd = StateDict::init(&s, 0.02, &mut rng);
        let expected = s.n_embed
            * (s.block_size + 2 * s.vocab_size + 12 * s.n_layer * s.n_embed);
        assert_eq!(sd.n_params(), expected);
    }

    #[test]
    fn zeros_like_mirrors_every_tensor_shape() {
        let s = settings();
        let mut rng = StdRng::seed_from_u64(1);
        let sd = StateDict::init(&s, 0.02, &mut rng);
        let grads = sd.zeros_like();
        for ((name, p), (gname, g)) in sd.tensors().iter().zip(grads.tensors().iter()) {
            assert_eq!(name, gname);
            assert_eq!(p.len(), g.len());
            for (pr, gr) in p.iter().zip(g.iter()) {
                assert_eq!(pr.len(), gr.len());
                assert!(gr.iter().all(|&v| v == 0.0));
            }
        }
    }

    #[test]
    fn traversal_order_is_fixed() {
        let s = settings();
        let sd = StateDict::zeros(&s);
        let names: Vec<String> = sd.tensors().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "wte",
                "wpe",
                "lm_head",
                "layer0.attn_wq",
                "layer0.attn_wk",
                "layer0.attn_wv",
                "layer0.attn_wo",
                "layer0.mlp_fc1",
                "layer0.mlp_fc2",
                "layer1.attn_wq",
                "layer1.attn_wk",
                "layer1.attn_wv",
                "layer1.attn_wo",
                "layer1.mlp_fc1",
                "layer1.mlp_fc2",
            ]
        );
    }

    #[test]
    fn output_projections_start_at_zero() {
        let s = settings();
        let mut rng = StdRng::seed_from_u64(7);
        let sd = StateDict::init(&s, 0.02, &mut rng);
        for l in &sd.layers {
            assert!(l.attn_wo.iter().flatten().all(|&v| v == 0.0));
            assert!(l.mlp_fc2.iter().flatten().all(|&v| v == 0.0));
            assert!(l.attn_wq.iter().flatten().any(|&v| v != 0.0));
        }
    }

    #[test]
    fn init_is_deterministic_for_a_seed() {
        let s = settings();
        let a = StateDict::init(&s, 0.02, &mut StdRng::seed_from_u64(3));
        let b = StateDict::init(&s, 0.02, &mut StdRng::seed_from_u64(3));
        assert_eq!(a.wte, b.wte);
        assert_eq!(a.layers[0].mlp_fc1, b.layers[0].mlp_fc1);
    }

    #[test]
    fn zero_resets_in_place() {
        let s = settings();
        let mut sd = StateDict::init(&s, 0.02, &mut StdRng::seed_from_u64(3));
        sd.zero();
        assert!(sd.tensors().iter().all(|(_, m)| m
            .iter()
            .flatten()
            .all(|&v| v == 0.0)));
    }

    #[test]
    fn settings_json_round_trip() {
        let s = settings();
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
