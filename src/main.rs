//! Train a character-level GPT on a line-per-document corpus, optionally
//! persist the weights, and sample from the result.
//!
//! Everything is driven by `PICOGPT_*` environment variables (see the
//! config module): corpus path, model dimensions, training length,
//! quantization, and the weight file paths. With `PICOGPT_WEIGHTS_IN` set,
//! training is skipped and the persisted model is sampled directly.

use rand::prelude::*;
use rand::rngs::StdRng;

use picogpt::data::Document;
use picogpt::model::Settings;
use picogpt::{config, weights, CharVocab, Corpus, ManualBackward, Model, Sampler, Trainer};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::from_env()?;
    cfg.validate()?;
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let corpus = Corpus::load(&cfg.input_path)?;
    let mut docs: Vec<Document> = corpus.documents().to_vec();
    docs.shuffle(&mut rng);
    println!("num docs: {}", docs.len());

    let vocab = CharVocab::build(docs.iter().map(Document::as_str));
    println!("vocab size: {}", vocab.size());

    let mut model = if let Some(path) = &cfg.weights_in {
        let (settings, params) = weights::load(path)?;
        if settings.vocab_size != vocab.size() {
            return Err(format!(
                "weight file was built for vocab size {}, corpus has {}",
                settings.vocab_size,
                vocab.size()
            )
            .into());
        }
        println!("loaded weights from {}", path.display());
        Model::from_parts(settings, params)
    } else {
        let dataset = cfg
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let settings = Settings::from_config(&cfg, vocab.size(), dataset);
        Model::new(settings, cfg.init_std, &mut rng)
    };
    println!("num params: {}", model.params.n_params());

    if cfg.weights_in.is_none() {
        let trainer = Trainer::new(&mut model, &vocab, &docs, &cfg, ManualBackward)?;
        for (step, loss) in trainer {
            if (step + 1) % cfg.loss_log_every == 0 || step == 0 {
                println!("step {:4} / {:4} | loss {:.4}", step + 1, cfg.num_steps, loss);
            }
        }

        if let Some(path) = &cfg.weights_out {
            weights::save(path, &model.settings, &model.params, cfg.quant)?;
            println!("saved {} weights to {}", cfg.quant, path.display());
        }
    }

    println!("\n--- inference ---");
    let sampler = Sampler::new(
        &model,
        &vocab,
        cfg.temperature,
        cfg.sample_size,
        StdRng::from_rng(&mut rng),
    );
    for (i, sample) in sampler {
        println!("sample {:2}: {}", i + 1, sample);
    }
    Ok(())
}
