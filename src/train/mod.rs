//! Training driver: a lazy sequence of `(step, loss)` pairs.
//!
//! Nothing runs until the caller pulls; each pull performs exactly one
//! optimizer step (gradient zeroing, one or more accumulated examples, Adam
//! update) and commits it before yielding. Dropping the iterator mid-run
//! leaves the model at the last completed step; there is no partial state.

use crate::config::Config;
use crate::data::Document;
use crate::engine::BackwardStrategy;
use crate::model::Model;
use crate::optim::Adam;
use crate::tokenizer::{CharVocab, TokenizerError};

/// Lazy training loop over a tokenized corpus.
///
/// Documents are consumed cyclically in the order given (shuffle first if
/// desired, with a seeded RNG). The generic parameter selects the
/// differentiation strategy; [`crate::engine::ManualBackward`] is the
/// intended default.
pub struct Trainer<'a, S: BackwardStrategy> {
    model: &'a mut Model,
    examples: Vec<Vec<usize>>,
    strategy: S,
    optimizer: Adam,
    num_steps: usize,
    batch_size: usize,
    step: usize,
}

impl<'a, S: BackwardStrategy> Trainer<'a, S> {
    /// Prepares a training run: tokenizes every document with
    /// sentinel-wrapped boundaries and sets up fresh optimizer state.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizerError::UnknownToken`] if a document contains a
    /// character outside `vocab` (cannot happen when the vocabulary was
    /// built from the same corpus).
    pub fn new(
        model: &'a mut Model,
        vocab: &CharVocab,
        docs: &[Document],
        config: &Config,
        strategy: S,
    ) -> Result<Self, TokenizerError> {
        let examples = docs
            .iter()
            .map(|d| vocab.tokenize(d.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let optimizer = Adam::new(model.params.n_params(), config);
        Ok(Trainer {
            model,
            examples,
            strategy,
            optimizer,
            num_steps: config.num_steps,
            batch_size: config.batch_size,
            step: 0,
        })
    }
}

impl<S: BackwardStrategy> Iterator for Trainer<'_, S> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.step >= self.num_steps {
            return None;
        }

        self.model.grads.zero();
        let mut loss_sum = 0.0;
        for b in 0..self.batch_size {
            let idx = (self.step * self.batch_size + b) % self.examples.len();
            loss_sum += self.strategy.accumulate(
                &self.model.settings,
                &self.model.params,
                &self.examples[idx],
                &mut self.model.grads,
            );
        }

        self.optimizer
            .step(&mut self.model.params, &mut self.model.grads, self.step);

        let step = self.step;
        self.step += 1;
        Some((step, loss_sum / self.batch_size as f64))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.num_steps - self.step;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Corpus;
    use crate::engine::ManualBackward;
    use crate::model::Settings;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_config(num_steps: usize) -> Config {
        Config {
            n_embed: 8,
            n_head: 2,
            n_layer: 1,
            block_size: 8,
            num_steps,
            ..Config::default()
        }
    }

    fn tiny_run(num_steps: usize) -> (Model, CharVocab, Corpus, Config) {
        let corpus = Corpus::new(
            ["ab", "ba", "aab", "bba", "ab"]
                .iter()
                .map(|s| Document::new(s).unwrap())
                .collect(),
        )
        .unwrap();
        let vocab = CharVocab::build(corpus.lines());
        let config = tiny_config(num_steps);
        let settings = Settings::from_config(&config, vocab.size(), "test".to_string());
        let mut rng = StdRng::seed_from_u64(42);
        let model = Model::new(settings, config.init_std, &mut rng);
        (model, vocab, corpus, config)
    }

    #[test]
    fn yields_sequential_steps_and_stops() {
        let (mut model, vocab, corpus, config) = tiny_run(5);
        let trainer = Trainer::new(
            &mut model,
            &vocab,
            corpus.documents(),
            &config,
            ManualBackward,
        )
        .unwrap();
        let steps: Vec<usize> = trainer.map(|(s, _)| s).collect();
        assert_eq!(steps, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn is_lazy_one_pull_one_step() {
        let (mut model, vocab, corpus, config) = tiny_run(1000);
        let mut trainer = Trainer::new(
            &mut model,
            &vocab,
            corpus.documents(),
            &config,
            ManualBackward,
        )
        .unwrap();
        // A 1000-step run must cost nothing beyond the pulls taken.
        let first = trainer.next().unwrap();
        let second = trainer.next().unwrap();
        assert_eq!(first.0, 0);
        assert_eq!(second.0, 1);
        assert_eq!(trainer.size_hint(), (998, Some(998)));
    }

    #[test]
    fn loss_decreases_over_training() {
        let (mut model, vocab, corpus, config) = tiny_run(100);
        let trainer = Trainer::new(
            &mut model,
            &vocab,
            corpus.documents(),
            &config,
            ManualBackward,
        )
        .unwrap();
        let losses: Vec<f64> = trainer.map(|(_, l)| l).collect();
        assert_eq!(losses.len(), 100);
        let first = losses[0];
        let tail = &losses[losses.len() - 10..];
        let tail_mean: f64 = tail.iter().sum::<f64>() / tail.len() as f64;
        assert!(
            tail_mean < first,
            "loss should fall: step 0 = {first:.4}, final window mean = {tail_mean:.4}"
        );
        assert!(losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn batch_accumulation_still_converges() {
        let (mut model, vocab, corpus, mut config) = tiny_run(50);
        config.batch_size = 2;
        let trainer = Trainer::new(
            &mut model,
            &vocab,
            corpus.documents(),
            &config,
            ManualBackward,
        )
        .unwrap();
        let losses: Vec<f64> = trainer.map(|(_, l)| l).collect();
        let tail_mean: f64 = losses[40..].iter().sum::<f64>() / 10.0;
        assert!(tail_mean < losses[0]);
    }

    #[test]
    fn rejects_documents_outside_the_vocabulary() {
        let (mut model, _, corpus, config) = tiny_run(5);
        let foreign = CharVocab::build(["xy"]);
        let result = Trainer::new(
            &mut model,
            &foreign,
            corpus.documents(),
            &config,
            ManualBackward,
        );
        assert!(matches!(result, Err(TokenizerError::UnknownToken(_))));
    }
}
