//! Forward pass: one token at one position, through the KV cache.
//!
//! Causality falls out of the cache: at any position it holds exactly the
//! keys and values of the positions processed so far, so attention can only
//! look backward. Training passes `Some(&mut ActivationCache)` to record the
//! intermediates the backward pass consumes; inference records nothing.

use crate::model::{Settings, StateDict};

use super::{linear, rmsnorm, softmax};

/// Per-layer key/value vectors for every position processed so far in the
/// current sequence. Created fresh per sequence, never shared.
#[derive(Clone, Debug)]
pub struct KvCache {
    pub(crate) keys: Vec<Vec<Vec<f64>>>,
    pub(crate) values: Vec<Vec<Vec<f64>>>,
}

impl KvCache {
    /// An empty cache for `n_layer` layers.
    #[must_use]
    pub fn new(n_layer: usize) -> Self {
        KvCache {
            keys: vec![Vec::new(); n_layer],
            values: vec![Vec::new(); n_layer],
        }
    }

    /// Number of cached positions in `layer`.
    #[must_use]
    pub fn len(&self, layer: usize) -> usize {
        self.keys[layer].len()
    }

    /// `true` when no position has been processed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.iter().all(Vec::is_empty)
    }
}

/// An RMS-normalized vector together with its inverse-RMS scale.
#[derive(Clone, Debug)]
pub struct NormRecord {
    /// The normalized output.
    pub normed: Vec<f64>,
    /// `1/√(mean_sq + ε)`, needed by the backward Jacobian.
    pub inv_rms: f64,
}

/// Intermediates of one layer at one position.
#[derive(Clone, Debug)]
pub struct LayerRecord {
    /// Pre-attention normalized input (the K/V projection input, revisited
    /// by later positions' backward passes).
    pub attn_norm: NormRecord,
    /// Query vector.
    pub q: Vec<f64>,
    /// Softmax attention weights per head, over the cached positions.
    pub attn_weights: Vec<Vec<f64>>,
    /// Concatenated head outputs, before the output projection.
    pub attn_ctx: Vec<f64>,
    /// Pre-MLP normalized input.
    pub mlp_norm: NormRecord,
    /// MLP hidden after ReLU, before squaring.
    pub relu: Vec<f64>,
}

/// Intermediates of one position across all layers.
#[derive(Clone, Debug)]
pub struct PosRecord {
    /// Normalized embedding sum (the layer-0 input).
    pub embed_norm: NormRecord,
    /// Per-layer records.
    pub layers: Vec<LayerRecord>,
    /// Final residual output, input of the head projection.
    pub x_final: Vec<f64>,
}

/// Everything the backward pass needs, keyed by position. Lives for one
/// training example and is dropped afterwards.
#[derive(Debug, Default)]
pub struct ActivationCache {
    pub(crate) positions: Vec<PosRecord>,
}

impl ActivationCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        ActivationCache::default()
    }

    /// The record for `pos` (panics if that position was not recorded).
    #[must_use]
    pub fn position(&self, pos: usize) -> &PosRecord {
        &self.positions[pos]
    }
}

/// Computes next-token logits for `token_id` at `pos_id`.
///
/// Appends this position's K/V vectors to `kv`; attention scores are taken
/// against every cached position up to and including this one. With
/// `record` set, stores every intermediate listed in [`PosRecord`].
/// Deterministic for fixed parameters, cache contents, and position.
pub fn forward(
    settings: &Settings,
    params: &StateDict,
    token_id: usize,
    pos_id: usize,
    kv: &mut KvCache,
    record: Option<&mut ActivationCache>,
) -> Vec<f64> {
    let n_embed = settings.n_embed;
    let head_dim = settings.head_dim();
    let scale = 1.0 / (head_dim as f64).sqrt();
    let recording = record.is_some();

    // Embedding stage: token + position, then normalize.
    let emb_sum: Vec<f64> = (0..n_embed)
        .map(|j| params.wte[token_id][j] + params.wpe[pos_id][j])
        .collect();
    let (normed, inv_rms) = rmsnorm(&emb_sum);
    let embed_norm = NormRecord {
        normed: if recording { normed.clone() } else { Vec::new() },
        inv_rms,
    };
    let mut x = normed;

    let mut layer_records = Vec::with_capacity(if recording { settings.n_layer } else { 0 });
    for (li, lw) in params.layers.iter().enumerate() {
        // Attention block.
        let x_residual = x.clone();
        let (xn, inv_a) = rmsnorm(&x);
        let q = linear(&xn, &lw.attn_wq);
        let k = linear(&xn, &lw.attn_wk);
        let v = linear(&xn, &lw.attn_wv);
        kv.keys[li].push(k);
        kv.values[li].push(v);
        let t_len = kv.keys[li].len();

        let mut attn_ctx = vec![0.0; n_embed];
        let mut attn_weights = Vec::with_capacity(settings.n_head);
        for h in 0..settings.n_head {
            let hs = h * head_dim;
            let scores: Vec<f64> = kv.keys[li]
                .iter()
                .map(|k_t| {
                    let dot: f64 = (0..head_dim).map(|j| q[hs + j] * k_t[hs + j]).sum();
                    dot * scale
                })
                .collect();
            let weights = softmax(&scores);
            for j in 0..head_dim {
                attn_ctx[hs + j] = (0..t_len)
                    .map(|t| weights[t] * kv.values[li][t][hs + j])
                    .sum();
            }
            attn_weights.push(weights);
        }

        let x_proj = linear(&attn_ctx, &lw.attn_wo);
        x = x_residual.iter().zip(&x_proj).map(|(a, b)| a + b).collect();

        // MLP block: 4x up, ReLU², down.
        let x_residual = x.clone();
        let (xn_mlp, inv_m) = rmsnorm(&x);
        let hidden = linear(&xn_mlp, &lw.mlp_fc1);
        let relu: Vec<f64> = hidden.iter().map(|&h| h.max(0.0)).collect();
        let squared: Vec<f64> = relu.iter().map(|&r| r * r).collect();
        let h_proj = linear(&squared, &lw.mlp_fc2);
        x = x_residual.iter().zip(&h_proj).map(|(a, b)| a + b).collect();

        if recording {
            layer_records.push(LayerRecord {
                attn_norm: NormRecord {
                    normed: xn,
                    inv_rms: inv_a,
                },
                q,
                attn_weights,
                attn_ctx,
                mlp_norm: NormRecord {
                    normed: xn_mlp,
                    inv_rms: inv_m,
                },
                relu,
            });
        }
    }

    if let Some(cache) = record {
        cache.positions.push(PosRecord {
            embed_norm,
            layers: layer_records,
            x_final: x.clone(),
        });
    }

    linear(&x, &params.lm_head)
}
