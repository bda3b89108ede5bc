use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use pinn::burgers::{BurgersConfig, BurgersProblem};
use pinn::data::{Inputs, Target};
use pinn::error::PinnError;
use pinn::model::{Functional, FunctionalConfig};
use pinn::training::{StopReason, TrainingConfig, train};

type TrainBackend = Autodiff<NdArray<f32>>;

fn small_functional(device: &NdArrayDevice) -> Functional<TrainBackend> {
    FunctionalConfig::new(2)
        .with_hidden(vec![10, 10])
        .init::<TrainBackend>(device)
}

#[test]
fn short_burgers_run_reduces_loss() {
    let problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
    let grid = problem.grid(11, 21);
    let device = Default::default();
    let config = TrainingConfig::new(AdamConfig::new())
        .with_epochs(150)
        .with_learning_rate(5e-3);

    let output = train(
        &problem.model,
        small_functional(&device),
        &grid.inputs(),
        &problem.targets(),
        &config,
        &device,
    )
    .unwrap();

    let losses = output.history.losses();
    assert_eq!(output.stop_reason, StopReason::MaxEpochs);
    assert_eq!(losses.len(), 150);
    assert!(losses[149] < losses[0]);
    assert_eq!(
        output.history.term_names(),
        ["pde", "initial", "left", "right"]
    );

    // 学習率は単調非増加
    let learning_rates = output.history.learning_rates();
    assert!(learning_rates.windows(2).all(|w| w[1] <= w[0]));

    // 各エポックの総損失は残差ごとの損失の和
    for record in output.history.records() {
        let sum: f32 = record.term_losses.iter().sum();
        approx::assert_relative_eq!(record.loss, sum, max_relative = 1e-4);
    }
}

#[test]
fn trained_field_evaluation_is_deterministic() {
    let problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
    let device = Default::default();
    let config = TrainingConfig::new(AdamConfig::new()).with_epochs(5);
    let output = train(
        &problem.model,
        small_functional(&device),
        &problem.grid(6, 6).inputs(),
        &problem.targets(),
        &config,
        &device,
    )
    .unwrap();

    let trained = output.functional.valid();
    let inputs = problem.grid(7, 9).inputs();
    let inner_device = Default::default();
    let first = problem
        .model
        .evaluate_field(&trained, &inputs, &inner_device)
        .unwrap();
    let second = problem
        .model
        .evaluate_field(&trained, &inputs, &inner_device)
        .unwrap();
    assert_eq!(first.len(), 63);
    assert_eq!(first, second);
}

#[test]
fn coordinate_order_does_not_matter() {
    let problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
    let device = Default::default();
    let functional = small_functional(&device).valid();
    let inner_device = Default::default();

    let ts = vec![0.0, 0.3, 0.9];
    let xs = vec![-0.4, 0.1, 0.8];
    let t_first = Inputs::new()
        .with(&problem.t, ts.clone())
        .and_then(|i| i.with(&problem.x, xs.clone()))
        .unwrap();
    let x_first = Inputs::new()
        .with(&problem.x, xs)
        .and_then(|i| i.with(&problem.t, ts))
        .unwrap();

    assert_eq!(
        problem
            .model
            .evaluate_field(&functional, &t_first, &inner_device)
            .unwrap(),
        problem
            .model
            .evaluate_field(&functional, &x_first, &inner_device)
            .unwrap()
    );
}

#[test]
fn user_supplied_targets_are_length_checked() {
    let problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
    let grid = problem.grid(4, 4);
    let device = Default::default();
    let config = TrainingConfig::new(AdamConfig::new()).with_epochs(1);
    let mut targets = problem.targets();
    targets[0] = Target::Values(vec![0.0; 3]);

    let err = train(
        &problem.model,
        small_functional(&device),
        &grid.inputs(),
        &targets,
        &config,
        &device,
    )
    .unwrap_err();
    assert!(matches!(err, PinnError::LengthMismatch { expected: 16, found: 3, .. }));
}
