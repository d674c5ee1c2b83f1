//! Integration tests for the surrogate crate: training on synthetic tasks,
//! ensembles over bootstraps, and checkpoint resume.

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use rand::rngs::StdRng;
use rand::SeedableRng;

use surrogate::model::bridge::{rows_to_tensor, tensor_to_vec};
use surrogate::training::metrics::spearman;
use surrogate::{
    CheckpointError, CheckpointManager, Checkpointable, ConservativeTrainer, DesignSpace, Ensemble,
    ForwardModelConfig, PerturbConfig, Relaxation, TrainError, TrainerConfig,
};
use task::{build_pipeline, CategoryCountTask, QuadraticTask, Task};
use trajectory::MemoryLogger;

type B = Autodiff<NdArray<f32>>;

fn model_config() -> ForwardModelConfig {
    ForwardModelConfig::new(0).with_hidden_size(32)
}

fn trainer_config() -> TrainerConfig {
    TrainerConfig::new()
        .with_forward_model_lr(3e-3)
        .with_perturb(PerturbConfig::new().with_num_steps(2))
}

#[test]
fn test_conservative_training_learns_ranking() {
    let task = QuadraticTask::new(4, 400, 100.0, 0).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let pipeline = build_pipeline(task.dataset(), 32, 100, 0, &mut rng).unwrap();
    let space = DesignSpace::new(task.shape(), Relaxation::LogOdds, 0.6);
    let mut trainer = ConservativeTrainer::<B>::new(&model_config(), &trainer_config(), space, &Default::default());
    let mut logger = MemoryLogger::new();

    let history = trainer
        .fit(&pipeline, 0, 20, &mut rng, &mut logger, "oracle_0/")
        .unwrap();

    let val = &pipeline.val;
    let x = rows_to_tensor::<B>(&val.x, &Default::default());
    let pred = tensor_to_vec(trainer.mean(x).detach());
    let rho = spearman(&pred, &val.y);
    assert!(rho > 0.5, "validation rank correlation too low: {rho}");
    assert_eq!(history.len(), 20);
    assert_eq!(logger.series("oracle_0/train/alpha").len(), 20);
}

#[test]
fn test_discrete_training_runs_on_simplices() {
    let task = CategoryCountTask::new(6, 3, 300, 100.0, 1).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let pipeline = build_pipeline(task.dataset(), 32, 60, 0, &mut rng).unwrap();
    let space = DesignSpace::new(task.shape(), Relaxation::LogOdds, 0.6);
    let mut trainer = ConservativeTrainer::<B>::new(&model_config(), &trainer_config(), space, &Default::default());
    let mut logger = MemoryLogger::new();

    let history = trainer
        .fit(&pipeline, 0, 5, &mut rng, &mut logger, "")
        .unwrap();
    let last = history.last().unwrap();
    assert!(last.train.loss.is_finite());
    assert!(last.val.gap.is_finite());
}

#[test]
fn test_ensemble_fits_bootstraps() {
    let task = QuadraticTask::new(3, 200, 100.0, 2).unwrap();
    let mut rng = StdRng::seed_from_u64(2);
    let pipeline = build_pipeline(task.dataset(), 32, 40, 3, &mut rng).unwrap();
    let space = DesignSpace::new(task.shape(), Relaxation::LogOdds, 0.6);
    let mut ensemble = Ensemble::<B>::new(3, &model_config(), &trainer_config(), space, &Default::default());
    let mut logger = MemoryLogger::new();

    let histories = ensemble.fit(&pipeline, 2, &mut rng, &mut logger).unwrap();
    assert_eq!(histories.len(), 3);
    for i in 0..3 {
        assert_eq!(logger.series(&format!("oracle_{i}/train/loss")).len(), 2);
    }
    let x = rows_to_tensor::<B>(&pipeline.val.x, &Default::default());
    let pred = ensemble.predict(x);
    assert_eq!(pred.mean.dims(), [40]);
    assert!(tensor_to_vec(pred.std.detach()).iter().all(|s| *s > 0.0));
}

#[test]
fn test_checkpoint_resume_reproduces_training() {
    let task = QuadraticTask::new(3, 120, 100.0, 3).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let pipeline = build_pipeline(task.dataset(), 16, 20, 0, &mut rng).unwrap();
    let space = DesignSpace::new(task.shape(), Relaxation::LogOdds, 0.6);
    let device = Default::default();
    let tmp = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(tmp.path());

    let mut original = ConservativeTrainer::<B>::new(&model_config(), &trainer_config(), space, &device);
    let mut logger = MemoryLogger::new();
    original
        .fit(&pipeline, 0, 2, &mut rng, &mut logger, "")
        .unwrap();
    manager.save(&original.export_state().unwrap()).unwrap();

    let mut resumed = ConservativeTrainer::<B>::new(&model_config(), &trainer_config(), space, &device);
    assert!(resumed.restore_or_initialize(&manager).unwrap());
    assert_eq!(resumed.epoch(), 2);
    assert_eq!(resumed.step(), original.step());

    // Same data order from here on gives identical metrics
    let mut rng_a = StdRng::seed_from_u64(99);
    let mut rng_b = StdRng::seed_from_u64(99);
    let a = original.train_epoch(&pipeline, 0, &mut rng_a).unwrap();
    let b = resumed.train_epoch(&pipeline, 0, &mut rng_b).unwrap();
    assert_eq!(a, b);
    assert_eq!(original.validate(&pipeline).unwrap(), resumed.validate(&pipeline).unwrap());
}

#[test]
fn test_restore_with_wrong_ensemble_size_fails() {
    let space = DesignSpace::Continuous { dim: 2 };
    let device = Default::default();
    let tmp = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(tmp.path());

    let two = Ensemble::<B>::new(2, &model_config(), &trainer_config(), space, &device);
    manager.save(&two.export_state().unwrap()).unwrap();

    let mut three = Ensemble::<B>::new(3, &model_config(), &trainer_config(), space, &device);
    let err = three.restore_or_initialize(&manager).unwrap_err();
    assert!(matches!(
        err,
        TrainError::Checkpoint(CheckpointError::Incompatible(_))
    ));

    let mut fresh = Ensemble::<B>::new(2, &model_config(), &trainer_config(), space, &device);
    assert!(fresh.restore_or_initialize(&manager).unwrap());
}

#[test]
fn test_corrupt_record_falls_back_to_fresh_init() {
    let space = DesignSpace::Continuous { dim: 2 };
    let device = Default::default();
    let tmp = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(tmp.path());

    let trainer = ConservativeTrainer::<B>::new(&model_config(), &trainer_config(), space, &device);
    manager.save(&trainer.export_state().unwrap()).unwrap();
    std::fs::remove_file(manager.checkpoint_path().join("member_0").join("model.bin")).unwrap();

    let mut fresh = ConservativeTrainer::<B>::new(&model_config(), &trainer_config(), space, &device);
    assert!(!fresh.restore_or_initialize(&manager).unwrap());
    assert_eq!(fresh.step(), 0);
}
