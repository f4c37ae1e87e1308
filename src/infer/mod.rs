//! Inference sampler: a lazy, finite sequence of generated strings.
//!
//! Each sample runs the forward engine autoregressively over a fresh KV
//! cache, starting from the sentinel and drawing tokens from the
//! temperature-scaled categorical distribution until the sentinel reappears
//! or the context length is exhausted. Samples are independent; a fixed seed
//! reproduces the whole sequence.

use rand::rngs::StdRng;
use rand_distr::{weighted::WeightedIndex, Distribution};

use crate::engine::{forward, softmax, KvCache};
use crate::model::Model;
use crate::tokenizer::CharVocab;

/// Lazy iterator of `(sample_index, generated_string)` pairs, bounded by the
/// configured sample count. Reads the model; never mutates it.
pub struct Sampler<'a> {
    model: &'a Model,
    vocab: &'a CharVocab,
    temperature: f64,
    sample_size: usize,
    rng: StdRng,
    produced: usize,
}

impl<'a> Sampler<'a> {
    /// A sampler producing `sample_size` independent samples with the given
    /// temperature, drawing randomness from `rng`.
    #[must_use]
    pub fn new(
        model: &'a Model,
        vocab: &'a CharVocab,
        temperature: f64,
        sample_size: usize,
        rng: StdRng,
    ) -> Self {
        Sampler {
            model,
            vocab,
            temperature,
            sample_size,
            rng,
            produced: 0,
        }
    }
}

impl Iterator for Sampler<'_> {
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.produced >= self.sample_size {
            return None;
        }
        let settings = &self.model.settings;
        let mut kv = KvCache::new(settings.n_layer);
        let mut token = self.vocab.bos_id();
        let mut out = String::new();

        for pos in 0..settings.block_size {
            let logits = forward(settings, &self.model.params, token, pos, &mut kv, None);
            let scaled: Vec<f64> = logits.iter().map(|l| l / self.temperature).collect();
            let probs = softmax(&scaled);
            token = WeightedIndex::new(&probs)
                .ok()
                .map(|dist| dist.sample(&mut self.rng))
                .unwrap_or_else(|| self.vocab.bos_id());
            if token == self.vocab.bos_id() {
                break;
            }
            if let Some(ch) = self.vocab.char_for(token) {
                out.push(ch);
            }
        }

        let idx = self.produced;
        self.produced += 1;
        Some((idx, out))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sample_size - self.produced;
        (remaining, Some(remaining))
    }
}
