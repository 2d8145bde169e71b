//! Integration tests for rollout reward estimation.
//!
//! Drives the estimator with scripted models and recording reward sources,
//! then the candle generator and discriminator end to end.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use organ_core::{
    ConvSpec, DiscriminatorConfig, FinishThreshold, GeneratorConfig, RolloutConfig, Vocab,
};
use organ_rl::testing::{FnDiscriminator, RecordingReward, ScriptedModel};
use organ_rl::{
    CharRnnGenerator, CnnDiscriminator, DiscriminatorReward, FnMetric, MetricRewardSource,
    RolloutEstimator,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn ab_vocab() -> Vocab {
    Vocab::from_corpus(["AB"])
}

fn rollout_config(k: usize) -> RolloutConfig {
    RolloutConfig {
        n_rollouts: k,
        step_budget: 10,
        max_length: 10,
        reward_weight: 0.0,
        finish_threshold: FinishThreshold::Fraction(1.0),
    }
}

// ============================================================
// Averaging over k rollouts
// ============================================================

#[test]
fn test_reward_is_mean_of_row_rollouts() {
    let vocab = ab_vocab();
    let sp = vocab.special_ids();
    let (a, b) = (vocab.char_to_id('A'), vocab.char_to_id('B'));
    // Four free A/B choices, then <eos>: every row is <bos> + 4 + <eos>.
    let model = ScriptedModel::branching(
        vocab.len(),
        vec![vec![vec![a, b], vec![a, b], vec![a, b], vec![a, b], vec![sp.eos]]],
        sp.pad,
    );
    let disc = FnDiscriminator::new(move |row: &[u32]| {
        row.iter()
            .enumerate()
            .filter(|(_, id)| **id == a)
            .map(|(i, _)| i as f32)
            .sum()
    });
    let recorder = RecordingReward::new(DiscriminatorReward::new(&disc));
    let estimator = RolloutEstimator::new(&model, sp, &recorder, rollout_config(4)).unwrap();

    let outcome = estimator.rollout(2, &mut StdRng::seed_from_u64(42)).unwrap();
    let calls = recorder.calls();
    assert_eq!(outcome.trace.steps_written(), 5);
    assert_eq!(calls.len(), 5);

    for (step, call) in calls.iter().enumerate() {
        assert_eq!(call.sequences.n_rows(), 8);
        assert!(call.lengths.iter().all(|&len| len == 6));
        for row in 0..2 {
            // Tiled expansion: rollout j belongs to row j % 2.
            let mine: Vec<f32> = (0..8).filter(|j| j % 2 == row).map(|j| call.scores[j]).collect();
            let mean = mine.iter().sum::<f32>() / 4.0;
            let got = outcome.trace.get(row, step).unwrap();
            assert!((got - mean).abs() < 1e-5, "step {step} row {row}: {got} vs {mean}");

            // Each rollout starts from its own row's prefix.
            for j in (0..8).filter(|j| j % 2 == row) {
                assert_eq!(
                    &call.sequences.row(j)[..step + 2],
                    &outcome.sequences.row(row)[..step + 2]
                );
            }
        }
    }
}

// ============================================================
// State replication stays in lockstep with the ids
// ============================================================

#[test]
fn test_rollouts_follow_their_source_row_state() {
    let vocab = ab_vocab();
    let sp = vocab.special_ids();
    let (a, b) = (vocab.char_to_id('A'), vocab.char_to_id('B'));
    let model = ScriptedModel::per_row(
        vocab.len(),
        vec![vec![sp.eos], vec![a, a, a, sp.eos], vec![b, b, b, sp.eos]],
        sp.pad,
    );
    let disc = FnDiscriminator::new(|_: &[u32]| 1.0);
    let recorder = RecordingReward::new(DiscriminatorReward::new(&disc));
    let estimator = RolloutEstimator::new(&model, sp, &recorder, rollout_config(3)).unwrap();

    let outcome = estimator.rollout(3, &mut StdRng::seed_from_u64(0)).unwrap();
    let calls = recorder.calls();

    // Step 0 scores all three rows; row 0 finished there and drops out afterwards.
    assert_eq!(calls[0].sequences.n_rows(), 9);
    assert_eq!(calls[1].sequences.n_rows(), 6);
    let expected = [
        vec![sp.bos, a, a, a, sp.eos],
        vec![sp.bos, b, b, b, sp.eos],
    ];
    for (j, (row, &len)) in calls[1].sequences.rows().zip(&calls[1].lengths).enumerate() {
        assert_eq!(&row[..len], expected[j % 2].as_slice());
    }

    assert_eq!(outcome.trace.row_rewards(0), vec![1.0]);
    assert_eq!(outcome.trace.to_rows()[0], vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(outcome.trace.finish_step(1), Some(3));
}

// ============================================================
// Configuration errors surface before any model call
// ============================================================

#[test]
fn test_invalid_rollout_config_rejected_eagerly() {
    let vocab = ab_vocab();
    let sp = vocab.special_ids();
    let model = ScriptedModel::uniform(vocab.len(), vec![sp.eos], sp.pad);
    let disc = FnDiscriminator::new(|_: &[u32]| 1.0);

    for config in [
        rollout_config(0),
        RolloutConfig {
            step_budget: 0,
            ..rollout_config(2)
        },
        RolloutConfig {
            reward_weight: 1.5,
            ..rollout_config(2)
        },
    ] {
        let result = RolloutEstimator::new(&model, sp, DiscriminatorReward::new(&disc), config);
        assert!(result.is_err_and(|e| e.is_config_error()));
    }
    assert_eq!(model.calls(), 0);
}

// ============================================================
// Blend endpoints through the full loop
// ============================================================

#[test]
fn test_blend_weight_selects_signal() {
    let vocab = ab_vocab();
    let sp = vocab.special_ids();
    let (a, b) = (vocab.char_to_id('A'), vocab.char_to_id('B'));
    let model = ScriptedModel::per_row(
        vocab.len(),
        vec![vec![a, b, sp.eos], vec![b, sp.eos]],
        sp.pad,
    );
    let disc = FnDiscriminator::new(|_: &[u32]| 1.0);
    let metric = FnMetric(|samples: &[String], _: &[String]| -> anyhow::Result<Vec<f32>> {
        Ok(samples.iter().map(|s| s.len() as f32).collect())
    });
    let refs = vec!["AB".to_string()];

    let run = |weight: f32| {
        let config = RolloutConfig {
            reward_weight: weight,
            ..rollout_config(2)
        };
        let estimator = RolloutEstimator::blended(
            &model,
            sp,
            DiscriminatorReward::new(&disc),
            MetricRewardSource::new(&metric, &vocab, &refs, &[]),
            config,
        )
        .unwrap();
        assert_eq!(estimator.reward_weight(), weight);
        estimator.rollout(2, &mut StdRng::seed_from_u64(9)).unwrap().trace
    };

    let metric_only = run(1.0);
    assert_eq!(metric_only.to_rows(), vec![vec![2.0, 2.0, 2.0], vec![1.0, 1.0, 0.0]]);

    let disc_only = run(0.0);
    assert_eq!(disc_only.to_rows(), vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 0.0]]);

    let mixed = run(0.5);
    assert_eq!(mixed.row_rewards(0), vec![1.5, 1.5, 1.5]);
    assert_eq!(mixed.row_rewards(1), vec![1.0, 1.0]);
}

// ============================================================
// Candle models end to end
// ============================================================

#[test]
fn test_candle_models_end_to_end() -> organ_core::Result<()> {
    let vocab = Vocab::from_corpus(["CC(=O)O", "c1ccccc1", "CCN"]);
    let sp = vocab.special_ids();
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let generator = CharRnnGenerator::new(
        vocab.len(),
        &GeneratorConfig {
            embedding_dim: 8,
            hidden_size: 16,
            num_layers: 2,
        },
        vb.pp("generator"),
    )?;
    let discriminator = CnnDiscriminator::new(
        vocab.len(),
        sp.pad,
        &DiscriminatorConfig {
            embedding_dim: 8,
            convs: vec![ConvSpec::new(4, 1), ConvSpec::new(4, 3), ConvSpec::new(4, 5)],
        },
        vb.pp("discriminator"),
    )?;

    let config = RolloutConfig {
        n_rollouts: 2,
        step_budget: 4,
        max_length: 6,
        ..RolloutConfig::default()
    };
    let estimator = RolloutEstimator::new(
        &generator,
        sp,
        DiscriminatorReward::new(&discriminator),
        config,
    )?;
    let outcome = estimator.rollout(3, &mut StdRng::seed_from_u64(1))?;

    let trace = &outcome.trace;
    assert!(trace.steps_written() >= 1 && trace.steps_written() <= 4);
    assert_eq!(outcome.sequences.width(), trace.steps_written() + 1);
    for row in trace.to_rows() {
        assert!(row.iter().all(|r| (0.0..=1.0).contains(r)));
    }
    assert_eq!(trace.to_tensor(&device)?.dims(), &[3, trace.steps_written()]);
    Ok(())
}
