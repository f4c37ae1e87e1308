//! Hand-derived backward pass: gradients with no computation graph.
//!
//! Every local derivative (softmax Jacobian, attention weighted sums,
//! linear outer products, RMSNorm, and the cross-time dependencies the KV
//! cache introduces) is coded analytically. Layers run in reverse order
//! within reverse position order.
//!
//! The K/V weight gradients at a position revisit the cached normalized
//! input of *every* earlier position (backpropagation through time); the
//! nested loop over cached positions is the O(n²) cost the algorithm
//! requires, mirroring the O(n²) forward attention. The gradient propagated
//! to the layer input, in contrast, takes only the current position's own
//! K/V contribution, a known simplification that undercounts embedding and
//! earlier-layer gradients on multi-position sequences, kept because
//! changing it changes training dynamics.

use crate::model::{Settings, StateDict};

use super::forward::{ActivationCache, KvCache};
use super::{
    forward, linear_bwd_input, linear_bwd_weight, rmsnorm_bwd, softmax, BackwardStrategy,
};

/// Backward through one layer at one position.
///
/// `d_x` is the gradient arriving at this layer's output (from the next
/// layer, or from the head projection for the top layer). Weight gradients
/// accumulate into `grads`; the return value is the gradient with respect to
/// this layer's input, to be passed to the previous layer or, for layer 0,
/// into the embedding stage.
pub fn backward_layer(
    settings: &Settings,
    params: &StateDict,
    grads: &mut StateDict,
    d_x: &[f64],
    li: usize,
    pos_id: usize,
    kv: &KvCache,
    acts: &ActivationCache,
) -> Vec<f64> {
    let n_embed = settings.n_embed;
    let head_dim = settings.head_dim();
    let scale = 1.0 / (head_dim as f64).sqrt();
    let lw = &params.layers[li];
    let rec = &acts.positions[pos_id].layers[li];
    let lg = &mut grads.layers[li];

    // MLP block: fc2 ← ReLU² ← fc1 ← RMSNorm, plus the residual path.
    let squared: Vec<f64> = rec.relu.iter().map(|&r| r * r).collect();
    linear_bwd_weight(&mut lg.mlp_fc2, d_x, &squared);
    let d_hidden = linear_bwd_input(d_x, &lw.mlp_fc2);
    let d_pre: Vec<f64> = d_hidden
        .iter()
        .zip(&rec.relu)
        .map(|(dh, &r)| if r > 0.0 { dh * 2.0 * r } else { 0.0 })
        .collect();
    linear_bwd_weight(&mut lg.mlp_fc1, &d_pre, &rec.mlp_norm.normed);
    let d_norm_mlp = linear_bwd_input(&d_pre, &lw.mlp_fc1);
    let d_mlp_in = rmsnorm_bwd(&d_norm_mlp, &rec.mlp_norm);
    let d_after_attn: Vec<f64> = d_x.iter().zip(&d_mlp_in).map(|(a, b)| a + b).collect();

    // Attention block: output projection, then per-head softmax Jacobian.
    linear_bwd_weight(&mut lg.attn_wo, &d_after_attn, &rec.attn_ctx);
    let d_ctx = linear_bwd_input(&d_after_attn, &lw.attn_wo);

    let t_len = kv.len(li).min(pos_id + 1);
    let mut d_q = vec![0.0; n_embed];
    let mut d_k_cur = vec![0.0; n_embed];
    let mut d_v_cur = vec![0.0; n_embed];
    for h in 0..settings.n_head {
        let hs = h * head_dim;
        let weights = &rec.attn_weights[h];
        let d_head = &d_ctx[hs..hs + head_dim];

        // Gradient on each attention weight: dot of d_head with that value.
        let d_weights: Vec<f64> = (0..t_len)
            .map(|t| {
                let v_t = &kv.values[li][t];
                (0..head_dim).map(|j| d_head[j] * v_t[hs + j]).sum()
            })
            .collect();
        // Softmax Jacobian: d_score[t] = w[t]·(d_w[t] − Σ w·d_w).
        let dot: f64 = weights.iter().zip(&d_weights).map(|(w, d)| w * d).sum();
        let d_scores: Vec<f64> = weights
            .iter()
            .zip(&d_weights)
            .map(|(w, d)| w * (d - dot))
            .collect();

        // BPTT across the KV cache: the query gradient sums over every
        // cached position, and each position t's K/V gradient lands in the
        // projection weight gradients against t's cached input.
        for t in 0..t_len {
            let k_t = &kv.keys[li][t];
            let x_t = &acts.positions[t].layers[li].attn_norm.normed;
            for j in 0..head_dim {
                d_q[hs + j] += d_scores[t] * scale * k_t[hs + j];
            }
            for j in 0..head_dim {
                let d_k = d_scores[t] * scale * rec.q[hs + j];
                let d_v = weights[t] * d_head[j];
                let row_k = &mut lg.attn_wk[hs + j];
                let row_v = &mut lg.attn_wv[hs + j];
                for (col, &xv) in x_t.iter().enumerate() {
                    row_k[col] += d_k * xv;
                    row_v[col] += d_v * xv;
                }
            }
        }

        // Only the current position's own K/V pair feeds the input gradient.
        let last = t_len - 1;
        for j in 0..head_dim {
            d_k_cur[hs + j] = d_scores[last] * scale * rec.q[hs + j];
            d_v_cur[hs + j] = weights[last] * d_head[j];
        }
    }

    linear_bwd_weight(&mut lg.attn_wq, &d_q, &rec.attn_norm.normed);
    let d_from_q = linear_bwd_input(&d_q, &lw.attn_wq);
    let d_from_k = linear_bwd_input(&d_k_cur, &lw.attn_wk);
    let d_from_v = linear_bwd_input(&d_v_cur, &lw.attn_wv);
    let d_norm_attn: Vec<f64> = (0..n_embed)
        .map(|i| d_from_q[i] + d_from_k[i] + d_from_v[i])
        .collect();
    let d_attn_in = rmsnorm_bwd(&d_norm_attn, &rec.attn_norm);
    d_after_attn
        .iter()
        .zip(&d_attn_in)
        .map(|(a, b)| a + b)
        .collect()
}

/// The graph-free differentiation strategy: forward with recording, then the
/// analytic backward above, position by position in reverse.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManualBackward;

impl BackwardStrategy for ManualBackward {
    fn accumulate(
        &self,
        settings: &Settings,
        params: &StateDict,
        tokens: &[usize],
        grads: &mut StateDict,
    ) -> f64 {
        let n = (tokens.len() - 1).min(settings.block_size);
        let mut kv = KvCache::new(settings.n_layer);
        let mut acts = ActivationCache::new();
        let mut probs_by_pos = Vec::with_capacity(n);
        let mut loss = 0.0;

        for pos in 0..n {
            let logits = forward(settings, params, tokens[pos], pos, &mut kv, Some(&mut acts));
            let probs = softmax(&logits);
            loss -= probs[tokens[pos + 1]].ln();
            probs_by_pos.push(probs);
        }

        for pos in (0..n).rev() {
            // Cross-entropy head: d_logits = (softmax − onehot) / n.
            let mut d_logits = probs_by_pos[pos].clone();
            d_logits[tokens[pos + 1]] -= 1.0;
            for d in d_logits.iter_mut() {
                *d /= n as f64;
            }

            let rec = acts.position(pos);
            linear_bwd_weight(&mut grads.lm_head, &d_logits, &rec.x_final);
            let mut d_x = linear_bwd_input(&d_logits, &params.lm_head);

            for li in (0..settings.n_layer).rev() {
                d_x = backward_layer(settings, params, grads, &d_x, li, pos, &kv, &acts);
            }

            // Embedding stage: back through the initial norm, then the sum
            // itself is identity into both embedding rows.
            let d_emb = rmsnorm_bwd(&d_x, &acts.position(pos).embed_norm);
            for (j, d) in d_emb.iter().enumerate() {
                grads.wte[tokens[pos]][j] += d;
                grads.wpe[pos][j] += d;
            }
        }

        loss / n as f64
    }
}
