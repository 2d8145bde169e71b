//! Command-line front end for ORGAN sampling and rollout rewards.
//!
//! Provides subcommands:
//! - init-config: Write the default configuration
//! - vocab: Build a vocabulary from a SMILES corpus
//! - sample: Sample strings from the generator
//! - rollout: Run one rollout pass and print the reward trace

use anyhow::Context;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use organ_core::{AppConfig, Corpus, Vocab};
use organ_rl::logging::{init_console_logging, init_logging, log_sampling};
use organ_rl::{
    CharRnnGenerator, CnnDiscriminator, DiscriminatorReward, MetricRewardSource, NoMetric,
    RolloutEstimator, Sampler,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "organ")]
#[command(about = "Sampling and Monte-Carlo rollout rewards for SMILES generation", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit JSON log lines instead of compact console output
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    InitConfig {
        /// Output TOML path
        #[arg(short, long, default_value = "organ.toml")]
        out: PathBuf,
    },

    /// Build a vocabulary from every SMILES string in a corpus
    Vocab {
        /// Corpus CSV with SMILES and SPLIT columns
        #[arg(short, long)]
        data: PathBuf,

        /// Output JSON path
        #[arg(short, long, default_value = "vocab.json")]
        out: PathBuf,
    },

    /// Sample strings from the generator
    Sample {
        /// Configuration TOML
        #[arg(short, long)]
        config: PathBuf,

        /// Vocabulary JSON
        #[arg(short, long)]
        vocab: PathBuf,

        /// Generator weights (safetensors); random init when absent
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Number of strings
        #[arg(short, long, default_value = "10")]
        n_samples: usize,

        /// Maximum generated characters per string (defaults to rollout.max_length)
        #[arg(long)]
        max_length: Option<usize>,

        /// RNG seed (overrides the configuration)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run one rollout pass and print per-step rewards
    Rollout {
        /// Configuration TOML
        #[arg(short, long)]
        config: PathBuf,

        /// Vocabulary JSON
        #[arg(short, long)]
        vocab: PathBuf,

        /// Corpus CSV; the train split is the metric reference set
        #[arg(short, long)]
        data: PathBuf,

        /// Generator weights (safetensors)
        #[arg(long)]
        generator_weights: Option<PathBuf>,

        /// Discriminator weights (safetensors)
        #[arg(long)]
        discriminator_weights: Option<PathBuf>,

        /// Number of sequences
        #[arg(short, long, default_value = "4")]
        n_samples: usize,

        /// RNG seed (overrides the configuration)
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_json = cli.log_json;

    match cli.command {
        Commands::InitConfig { out } => init_config(&out, log_json)?,

        Commands::Vocab { data, out } => build_vocab(&data, &out, log_json)?,

        Commands::Sample {
            config,
            vocab,
            weights,
            n_samples,
            max_length,
            seed,
        } => run_sample(
            &config,
            &vocab,
            weights.as_deref(),
            n_samples,
            max_length,
            seed,
            log_json,
        )?,

        Commands::Rollout {
            config,
            vocab,
            data,
            generator_weights,
            discriminator_weights,
            n_samples,
            seed,
        } => run_rollout(
            &config,
            &vocab,
            &data,
            generator_weights.as_deref(),
            discriminator_weights.as_deref(),
            n_samples,
            seed,
            log_json,
        )?,
    }

    Ok(())
}

fn start_logging(log_json: bool, level: &str) {
    if log_json {
        init_logging(level);
    } else {
        init_console_logging(level);
    }
}

fn init_config(out: &Path, log_json: bool) -> anyhow::Result<()> {
    start_logging(log_json, "info");
    AppConfig::default()
        .save(out)
        .with_context(|| format!("writing config to {}", out.display()))?;
    info!(path = %out.display(), "Default configuration written");
    Ok(())
}

fn build_vocab(data: &Path, out: &Path, log_json: bool) -> anyhow::Result<()> {
    start_logging(log_json, "info");
    let corpus = Corpus::from_csv(data)
        .with_context(|| format!("loading corpus from {}", data.display()))?;
    let vocab = corpus.vocab();
    vocab
        .save(out)
        .with_context(|| format!("writing vocabulary to {}", out.display()))?;
    info!(
        strings = corpus.len(),
        symbols = vocab.len(),
        path = %out.display(),
        "Vocabulary written"
    );
    Ok(())
}

/// Load config and vocabulary, start logging and seed the RNG.
fn setup(
    config: &Path,
    vocab: &Path,
    seed: Option<u64>,
    log_json: bool,
) -> anyhow::Result<(AppConfig, Vocab, StdRng)> {
    let config = AppConfig::from_file(config)
        .with_context(|| format!("loading config from {}", config.display()))?;
    start_logging(log_json, &config.log_level);

    let vocab = Vocab::load(vocab)
        .with_context(|| format!("loading vocabulary from {}", vocab.display()))?;
    let rng = match seed.or(config.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Ok((config, vocab, rng))
}

fn load_generator(
    config: &AppConfig,
    vocab: &Vocab,
    weights: Option<&Path>,
    device: &Device,
) -> anyhow::Result<(VarMap, CharRnnGenerator)> {
    let mut varmap = VarMap::new();
    let generator = {
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        CharRnnGenerator::new(vocab.len(), &config.generator, vb.pp("generator"))?
    };
    match weights {
        Some(path) => {
            varmap
                .load(path)
                .with_context(|| format!("loading generator weights from {}", path.display()))?;
            info!(path = %path.display(), "Generator weights loaded");
        }
        None => warn!("No generator weights given; using random initialization"),
    }
    Ok((varmap, generator))
}

fn load_discriminator(
    config: &AppConfig,
    vocab: &Vocab,
    weights: Option<&Path>,
    device: &Device,
) -> anyhow::Result<(VarMap, CnnDiscriminator)> {
    let mut varmap = VarMap::new();
    let discriminator = {
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        CnnDiscriminator::new(
            vocab.len(),
            vocab.special_ids().pad,
            &config.discriminator,
            vb.pp("discriminator"),
        )?
    };
    match weights {
        Some(path) => {
            varmap
                .load(path)
                .with_context(|| format!("loading discriminator weights from {}", path.display()))?;
            info!(path = %path.display(), "Discriminator weights loaded");
        }
        None => warn!("No discriminator weights given; using random initialization"),
    }
    Ok((varmap, discriminator))
}

fn run_sample(
    config_path: &Path,
    vocab_path: &Path,
    weights: Option<&Path>,
    n_samples: usize,
    max_length: Option<usize>,
    seed: Option<u64>,
    log_json: bool,
) -> anyhow::Result<()> {
    let (config, vocab, mut rng) = setup(config_path, vocab_path, seed, log_json)?;
    let device = Device::Cpu;
    let (_varmap, generator) = load_generator(&config, &vocab, weights, &device)?;

    let max_length = max_length.unwrap_or(config.rollout.max_length);
    let sampler = Sampler::new(&generator, vocab.special_ids());
    let batch = sampler.sample(n_samples, max_length, &mut rng)?;

    let mean_length = if n_samples == 0 {
        0.0
    } else {
        batch.lengths.iter().sum::<usize>() as f64 / n_samples as f64
    };
    log_sampling(n_samples, max_length, mean_length);

    for s in batch.to_strings(&vocab)? {
        println!("{s}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_rollout(
    config_path: &Path,
    vocab_path: &Path,
    data_path: &Path,
    generator_weights: Option<&Path>,
    discriminator_weights: Option<&Path>,
    n_samples: usize,
    seed: Option<u64>,
    log_json: bool,
) -> anyhow::Result<()> {
    let (config, vocab, mut rng) = setup(config_path, vocab_path, seed, log_json)?;
    let corpus = Corpus::from_csv(data_path)
        .with_context(|| format!("loading corpus from {}", data_path.display()))?;

    let device = Device::Cpu;
    let (_gen_vars, generator) = load_generator(&config, &vocab, generator_weights, &device)?;
    let (_disc_vars, discriminator) =
        load_discriminator(&config, &vocab, discriminator_weights, &device)?;

    let weight = config.rollout.reward_weight;
    if weight > 0.0 {
        warn!(
            reward_weight = weight,
            "No metric scorer is wired in; the metric share of the reward is zero"
        );
    }
    let estimator = RolloutEstimator::blended(
        &generator,
        vocab.special_ids(),
        DiscriminatorReward::new(&discriminator),
        MetricRewardSource::new(&NoMetric, &vocab, &corpus.train, &[]),
        config.rollout.clone(),
    )?;
    let outcome = estimator.rollout(n_samples, &mut rng)?;

    for (row, (ids, &len)) in outcome
        .sequences
        .rows()
        .zip(&outcome.lengths)
        .enumerate()
    {
        let text = vocab.decode(&ids[..len], true, true)?;
        let rewards: Vec<String> = outcome
            .trace
            .row_rewards(row)
            .iter()
            .map(|r| format!("{r:.4}"))
            .collect();
        let status = if outcome.trace.finish_step(row).is_some() {
            "done"
        } else {
            "open"
        };
        println!("{row:>3} [{status}] {text:<24} {}", rewards.join(" "));
    }
    Ok(())
}
