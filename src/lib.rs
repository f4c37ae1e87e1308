//! # picogpt
//!
//! A character-level GPT that trains and samples entirely on its own engine:
//! tokenization, parameter storage, forward/backward computation, Adam, and a
//! compact quantized weight format, with no tensor library underneath.
//!
//! Two independent differentiation strategies implement the same math behind
//! the [`engine::BackwardStrategy`] seam:
//!
//! - [`engine::ManualBackward`]: hand-derived, graph-free gradients through
//!   attention, projections, normalization, and embeddings, including the
//!   O(n²) backpropagation through time across the KV cache. This is the
//!   performance-oriented default.
//! - [`autograd::GraphBackward`]: a generic reverse-mode engine over a
//!   dynamic expression graph, used as the reference to cross-check the
//!   manual gradients in tests.
//!
//! The binary wires them into a full pipeline: corpus → vocabulary → training
//! loop → quantized weight file → sampling.

pub mod autograd;
pub mod config;
pub mod data;
pub mod engine;
pub mod infer;
pub mod model;
pub mod optim;
pub mod tokenizer;
pub mod train;
pub mod weights;

pub use autograd::GraphBackward;
pub use config::Config;
pub use data::Corpus;
pub use engine::{BackwardStrategy, KvCache, ManualBackward};
pub use infer::Sampler;
pub use model::{Model, Settings, StateDict};
pub use optim::Adam;
pub use tokenizer::CharVocab;
pub use train::Trainer;
pub use weights::Quant;
