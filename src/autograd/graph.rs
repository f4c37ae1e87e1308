//! The transformer built as an expression graph, for gradient cross-checks.
//!
//! [`GraphBackward`] implements [`BackwardStrategy`] by mirroring the manual
//! engine's architecture node for node on a [`Tape`], letting generic
//! reverse-mode differentiation produce the reference gradients.

use crate::engine::BackwardStrategy;
use crate::model::{Matrix, Settings, StateDict};

use super::{NodeId, Tape};

fn matrix_nodes(tape: &mut Tape, m: &Matrix) -> Vec<Vec<NodeId>> {
    m.iter()
        .map(|row| row.iter().map(|&v| tape.leaf(v)).collect())
        .collect()
}

fn add_matrix_grads(tape: &Tape, ids: &[Vec<NodeId>], grads: &mut Matrix) {
    for (grow, irow) in grads.iter_mut().zip(ids) {
        for (g, &id) in grow.iter_mut().zip(irow) {
            *g += tape.grad(id);
        }
    }
}

struct GraphLayer {
    attn_wq: Vec<Vec<NodeId>>,
    attn_wk: Vec<Vec<NodeId>>,
    attn_wv: Vec<Vec<NodeId>>,
    attn_wo: Vec<Vec<NodeId>>,
    mlp_fc1: Vec<Vec<NodeId>>,
    mlp_fc2: Vec<Vec<NodeId>>,
}

/// Parameter leaves on the tape, shaped like the [`StateDict`].
struct GraphParams {
    wte: Vec<Vec<NodeId>>,
    wpe: Vec<Vec<NodeId>>,
    lm_head: Vec<Vec<NodeId>>,
    layers: Vec<GraphLayer>,
}

impl GraphParams {
    fn from_state(tape: &mut Tape, params: &StateDict) -> Self {
        GraphParams {
            wte: matrix_nodes(tape, &params.wte),
            wpe: matrix_nodes(tape, &params.wpe),
            lm_head: matrix_nodes(tape, &params.lm_head),
            layers: params
                .layers
                .iter()
                .map(|l| GraphLayer {
                    attn_wq: matrix_nodes(tape, &l.attn_wq),
                    attn_wk: matrix_nodes(tape, &l.attn_wk),
                    attn_wv: matrix_nodes(tape, &l.attn_wv),
                    attn_wo: matrix_nodes(tape, &l.attn_wo),
                    mlp_fc1: matrix_nodes(tape, &l.mlp_fc1),
                    mlp_fc2: matrix_nodes(tape, &l.mlp_fc2),
                })
                .collect(),
        }
    }

    fn add_grads_into(&self, tape: &Tape, grads: &mut StateDict) {
        add_matrix_grads(tape, &self.wte, &mut grads.wte);
        add_matrix_grads(tape, &self.wpe, &mut grads.wpe);
        add_matrix_grads(tape, &self.lm_head, &mut grads.lm_head);
        for (gl, l) in self.layers.iter().zip(grads.layers.iter_mut()) {
            add_matrix_grads(tape, &gl.attn_wq, &mut l.attn_wq);
            add_matrix_grads(tape, &gl.attn_wk, &mut l.attn_wk);
            add_matrix_grads(tape, &gl.attn_wv, &mut l.attn_wv);
            add_matrix_grads(tape, &gl.attn_wo, &mut l.attn_wo);
            add_matrix_grads(tape, &gl.mlp_fc1, &mut l.mlp_fc1);
            add_matrix_grads(tape, &gl.mlp_fc2, &mut l.mlp_fc2);
        }
    }
}

pub(crate) fn linear_nodes(tape: &mut Tape, x: &[NodeId], w: &[Vec<NodeId>]) -> Vec<NodeId> {
    w.iter()
        .map(|row| {
            let products: Vec<NodeId> = row
                .iter()
                .zip(x)
                .map(|(&wi, &xi)| tape.mul(wi, xi))
                .collect();
            tape.sum(&products)
        })
        .collect()
}

pub(crate) fn softmax_nodes(tape: &mut Tape, logits: &[NodeId]) -> Vec<NodeId> {
    let max_val = logits
        .iter()
        .map(|&l| tape.data(l))
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<NodeId> = logits
        .iter()
        .map(|&l| {
            let shifted = tape.add_const(l, -max_val);
            tape.exp(shifted)
        })
        .collect();
    let total = tape.sum(&exps);
    exps.iter().map(|&e| tape.div(e, total)).collect()
}

pub(crate) fn rmsnorm_nodes(tape: &mut Tape, x: &[NodeId]) -> Vec<NodeId> {
    let squares: Vec<NodeId> = x.iter().map(|&xi| tape.mul(xi, xi)).collect();
    let total = tape.sum(&squares);
    let ms = tape.div_const(total, x.len() as f64);
    let shifted = tape.add_const(ms, crate::engine::RMSNORM_EPS);
    let scale = tape.pow(shifted, -0.5);
    x.iter().map(|&xi| tape.mul(xi, scale)).collect()
}

/// One forward position on the tape: the same architecture as
/// [`crate::engine::forward`], with graph nodes instead of floats.
fn graph_forward(
    tape: &mut Tape,
    settings: &Settings,
    params: &GraphParams,
    token_id: usize,
    pos_id: usize,
    keys: &mut [Vec<Vec<NodeId>>],
    values: &mut [Vec<Vec<NodeId>>],
) -> Vec<NodeId> {
    let n_embed = settings.n_embed;
    let head_dim = settings.head_dim();
    let scale = (head_dim as f64).sqrt();

    let mut x: Vec<NodeId> = (0..n_embed)
        .map(|j| tape.add(params.wte[token_id][j], params.wpe[pos_id][j]))
        .collect();
    x = rmsnorm_nodes(tape, &x);

    for (li, lw) in params.layers.iter().enumerate() {
        let x_residual = x.clone();
        x = rmsnorm_nodes(tape, &x);
        let q = linear_nodes(tape, &x, &lw.attn_wq);
        let k = linear_nodes(tape, &x, &lw.attn_wk);
        let v = linear_nodes(tape, &x, &lw.attn_wv);
        keys[li].push(k);
        values[li].push(v);
        let t_len = keys[li].len();

        let mut x_attn = Vec::with_capacity(n_embed);
        for h in 0..settings.n_head {
            let hs = h * head_dim;
            let mut scores = Vec::with_capacity(t_len);
            for t in 0..t_len {
                let products: Vec<NodeId> = (0..head_dim)
                    .map(|j| tape.mul(q[hs + j], keys[li][t][hs + j]))
                    .collect();
                let dot = tape.sum(&products);
                scores.push(tape.div_const(dot, scale));
            }
            let weights = softmax_nodes(tape, &scores);
            for j in 0..head_dim {
                let terms: Vec<NodeId> = (0..t_len)
                    .map(|t| tape.mul(weights[t], values[li][t][hs + j]))
                    .collect();
                x_attn.push(tape.sum(&terms));
            }
        }

        let x_proj = linear_nodes(tape, &x_attn, &lw.attn_wo);
        x = x_residual
            .iter()
            .zip(&x_proj)
            .map(|(&a, &b)| tape.add(a, b))
            .collect();

        let x_residual = x.clone();
        x = rmsnorm_nodes(tape, &x);
        x = linear_nodes(tape, &x, &lw.mlp_fc1);
        x = x
            .iter()
            .map(|&xi| {
                let r = tape.relu(xi);
                tape.mul(r, r)
            })
            .collect();
        x = linear_nodes(tape, &x, &lw.mlp_fc2);
        x = x_residual
            .iter()
            .zip(&x)
            .map(|(&a, &b)| tape.add(a, b))
            .collect();
    }

    linear_nodes(tape, &x, &params.lm_head)
}

/// Differentiation through the dynamic graph: builds the example's full
/// computation as tape nodes and lets [`Tape::backward`] do the rest.
///
/// Exact for every parameter, including the cross-position K/V paths into
/// embeddings that the manual engine's documented shortcut drops. That is
/// what makes it the reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct GraphBackward;

impl BackwardStrategy for GraphBackward {
    fn accumulate(
        &self,
        settings: &Settings,
        params: &StateDict,
        tokens: &[usize],
        grads: &mut StateDict,
    ) -> f64 {
        let n = (tokens.len() - 1).min(settings.block_size);
        let mut tape = Tape::new();
        let graph_params = GraphParams::from_state(&mut tape, params);

        let mut keys = vec![Vec::new(); settings.n_layer];
        let mut values = vec![Vec::new(); settings.n_layer];
        let mut losses = Vec::with_capacity(n);
        for pos in 0..n {
            let logits = graph_forward(
                &mut tape,
                settings,
                &graph_params,
                tokens[pos],
                pos,
                &mut keys,
                &mut values,
            );
            let probs = softmax_nodes(&mut tape, &logits);
            let log_p = tape.ln(probs[tokens[pos + 1]]);
            losses.push(tape.neg(log_p));
        }

        let total = tape.sum(&losses);
        let loss = tape.div_const(total, n as f64);
        tape.backward(loss);
        graph_params.add_grads_into(&tape, grads);
        tape.data(loss)
    }
}
