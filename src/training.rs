use std::path::Path;
use std::time::Instant;

use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::{ElementConversion, Tensor};
use burn::tensor::backend::{AutodiffBackend, Backend};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::burgers::{BurgersConfig, BurgersProblem};
use crate::cli::TrainArgs;
use crate::data::{Inputs, Target};
use crate::error::PinnError;
use crate::model::{Functional, FunctionalConfig};
use crate::pinn::{BoundInputs, PinnModel};
use crate::{CONFIG_FILENAME, LOSS_GRAPH_FILENAME, MODEL_FILENAME, plot};

type MyBackend = Autodiff<NdArray<f32>>;

/// 学習ループの設定。
#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 5000)]
    pub epochs: usize,
    #[config(default = 2e-3)]
    pub learning_rate: f64,
    /// `None` なら全点を1バッチとして扱う
    #[config(default = "None")]
    pub batch_size: Option<usize>,
    #[config(default = true)]
    pub shuffle: bool,
    #[config(default = 42)]
    pub seed: u64,
    /// 停滞時に学習率へ掛ける係数
    #[config(default = 0.5)]
    pub lr_factor: f64,
    #[config(default = 100)]
    pub reduce_lr_after: usize,
    #[config(default = 0.0)]
    pub reduce_lr_min_delta: f64,
    #[config(default = 1e-8)]
    pub min_learning_rate: f64,
    #[config(default = "Some(500)")]
    pub stop_after: Option<usize>,
    #[config(default = 1e-8)]
    pub stop_loss_value: f64,
    #[config(default = 100)]
    pub log_every: usize,
}

impl TrainingConfig {
    fn validate(&self) -> Result<(), PinnError> {
        let invalid = |reason: &str| {
            Err(PinnError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid("learning_rate は正の有限値でなければなりません");
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return invalid("lr_factor は (0, 1) の範囲でなければなりません");
        }
        if self.batch_size == Some(0) {
            return invalid("batch_size は1以上でなければなりません");
        }
        if self.reduce_lr_after == 0 || self.stop_after == Some(0) {
            return invalid("reduce_lr_after と stop_after は1以上でなければなりません");
        }
        Ok(())
    }
}

/// 保存・読み込みされる実験全体の設定。
#[derive(Config)]
pub struct ExperimentConfig {
    pub burgers: BurgersConfig,
    pub functional: FunctionalConfig,
    pub training: TrainingConfig,
    #[config(default = 100)]
    pub grid_t: usize,
    #[config(default = 100)]
    pub grid_x: usize,
}

impl ExperimentConfig {
    pub fn from_args(args: &TrainArgs) -> Self {
        let burgers = BurgersConfig::new().with_tol(args.tol);
        let functional = FunctionalConfig::new(2)
            .with_hidden(vec![args.width; args.layers])
            .with_activation(args.activation.into());
        let training = TrainingConfig::new(AdamConfig::new())
            .with_epochs(args.epochs)
            .with_learning_rate(args.learning_rate)
            .with_batch_size(args.batch_size)
            .with_seed(args.seed)
            .with_reduce_lr_after(args.reduce_lr_after)
            .with_stop_after(Some(args.stop_after));
        ExperimentConfig::new(burgers, functional, training)
            .with_grid_t(args.grid_t)
            .with_grid_x(args.grid_x)
    }

    /// 設定からBurgers問題を組み立て、ネットワークの入力幅と整合するか確認します。
    pub fn problem(&self) -> Result<BurgersProblem, PinnError> {
        let problem = BurgersProblem::new(self.burgers.clone())?;
        let expected = problem.model.field().inputs().len();
        if self.functional.d_input != expected {
            return Err(PinnError::InputWidth {
                expected,
                found: self.functional.d_input,
            });
        }
        Ok(problem)
    }
}

/// 学習を終了した理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxEpochs,
    /// 損失が `stop_after` エポック改善しなかった
    NoImprovement,
    /// 損失が `stop_loss_value` 以下になった
    LossThreshold,
    /// 学習率が下限に達した後も停滞した
    LearningRateFloor,
}

/// 損失の停滞を検出して学習率を下げるスケジューラ。
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    learning_rate: f64,
    factor: f64,
    patience: usize,
    min_delta: f64,
    min_learning_rate: f64,
    best: f64,
    wait: usize,
}

/// [`PlateauScheduler::step`] の結果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlateauAction {
    None,
    Reduced(f64),
    /// 停滞したが学習率はすでに下限
    Floor,
}

impl PlateauScheduler {
    pub fn new(
        learning_rate: f64,
        factor: f64,
        patience: usize,
        min_delta: f64,
        min_learning_rate: f64,
    ) -> Self {
        Self {
            learning_rate,
            factor,
            patience,
            min_delta,
            min_learning_rate,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// エポックの損失を与えて状態を更新します。
    pub fn step(&mut self, loss: f64) -> PlateauAction {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.wait = 0;
            return PlateauAction::None;
        }
        self.wait += 1;
        if self.wait < self.patience {
            return PlateauAction::None;
        }
        self.wait = 0;
        if self.learning_rate <= self.min_learning_rate {
            return PlateauAction::Floor;
        }
        self.learning_rate = (self.learning_rate * self.factor).max(self.min_learning_rate);
        PlateauAction::Reduced(self.learning_rate)
    }
}

/// 改善のないエポックが続いたら学習を打ち切ります。
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// 打ち切るべきなら `true` を返します。
    pub fn step(&mut self, loss: f64) -> bool {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.wait = 0;
            false
        } else {
            self.wait += 1;
            self.wait >= self.patience
        }
    }
}

/// 1エポック分の記録。
#[derive(Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f32,
    /// 残差ごとの損失（[`History::term_names`] と同じ順）
    pub term_losses: Vec<f32>,
    pub learning_rate: f64,
}

/// 学習履歴。
#[derive(Debug, Clone, Default)]
pub struct History {
    term_names: Vec<String>,
    records: Vec<EpochRecord>,
}

impl History {
    pub fn new(term_names: Vec<String>) -> Self {
        Self {
            term_names,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn term_names(&self) -> &[String] {
        &self.term_names
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    pub fn losses(&self) -> Vec<f32> {
        self.records.iter().map(|r| r.loss).collect()
    }

    pub fn term_losses(&self, term: usize) -> Vec<f32> {
        self.records.iter().map(|r| r.term_losses[term]).collect()
    }

    pub fn learning_rates(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.learning_rate).collect()
    }

    pub fn best_loss(&self) -> Option<f32> {
        self.records.iter().map(|r| r.loss).reduce(f32::min)
    }
}

/// 学習の結果。
#[derive(Debug)]
pub struct TrainingOutput<B: AutodiffBackend> {
    pub functional: Functional<B>,
    pub history: History,
    pub stop_reason: StopReason,
}

/// 残差の二乗和を最小化するように `functional` を学習します。
///
/// 初期パラメータは引数の `functional` で、シャッフルの乱数は `config.seed` で
/// 明示的に与えます。座標は `inputs` から変数名で引き当てられます。
pub fn train<B: AutodiffBackend>(
    model: &PinnModel,
    functional: Functional<B>,
    inputs: &Inputs,
    targets: &[Target],
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingOutput<B>, PinnError> {
    config.validate()?;
    model.check_width(&functional)?;
    let n = inputs.len();
    if n == 0 {
        return Err(PinnError::EmptyDataset);
    }
    if targets.len() != model.residuals().len() {
        return Err(PinnError::TargetCount {
            residuals: model.residuals().len(),
            targets: targets.len(),
        });
    }
    for target in targets {
        target.resolve(n)?;
    }

    let batch_size = config.batch_size.unwrap_or(n).min(n);
    // 全点を1バッチで扱う場合はテンソル化を一度だけ行う
    let full_batch = if batch_size == n {
        let bound = model.bind::<B>(inputs, device)?;
        let bound_targets = model.bind_targets::<B>(targets, n, device)?;
        Some((bound, bound_targets))
    } else {
        // 列名の検証のみ
        model.bind::<B>(&inputs.select(&[0]), device)?;
        None
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..n).collect();
    let mut optim = config.optimizer.init::<B, Functional<B>>();
    let mut scheduler = PlateauScheduler::new(
        config.learning_rate,
        config.lr_factor,
        config.reduce_lr_after,
        config.reduce_lr_min_delta,
        config.min_learning_rate,
    );
    let mut early_stopping = config
        .stop_after
        .map(|patience| EarlyStopping::new(patience, config.reduce_lr_min_delta));

    let term_names: Vec<String> = model.residuals().iter().map(|r| r.name.clone()).collect();
    let mut history = History::new(term_names);
    let mut functional = functional;
    let mut stop_reason = StopReason::MaxEpochs;

    info!(
        points = n,
        batch_size,
        epochs = config.epochs,
        "学習を開始します"
    );

    for epoch in 1..=config.epochs {
        let learning_rate = scheduler.learning_rate();
        let mut loss_sum = 0.0f64;
        let mut term_sums = vec![0.0f64; model.residuals().len()];

        if let Some((bound, bound_targets)) = &full_batch {
            let step = optimize_step(
                model,
                functional,
                &mut optim,
                bound,
                bound_targets,
                learning_rate,
                epoch,
            )?;
            functional = step.functional;
            loss_sum += step.loss as f64 * n as f64;
            for (sum, term) in term_sums.iter_mut().zip(step.terms) {
                *sum += term as f64 * n as f64;
            }
        } else {
            if config.shuffle {
                indices.shuffle(&mut rng);
            }
            for chunk in indices.chunks(batch_size) {
                let bound = model.bind::<B>(&inputs.select(chunk), device)?;
                let batch_targets: Vec<Target> =
                    targets.iter().map(|t| t.select(chunk)).collect();
                let bound_targets =
                    model.bind_targets::<B>(&batch_targets, chunk.len(), device)?;
                let step = optimize_step(
                    model,
                    functional,
                    &mut optim,
                    &bound,
                    &bound_targets,
                    learning_rate,
                    epoch,
                )?;
                functional = step.functional;
                loss_sum += step.loss as f64 * chunk.len() as f64;
                for (sum, term) in term_sums.iter_mut().zip(step.terms) {
                    *sum += term as f64 * chunk.len() as f64;
                }
            }
        }

        let loss = loss_sum / n as f64;
        history.push(EpochRecord {
            epoch,
            loss: loss as f32,
            term_losses: term_sums.iter().map(|s| (s / n as f64) as f32).collect(),
            learning_rate,
        });

        if epoch == 1 || epoch % config.log_every.max(1) == 0 {
            info!(epoch, loss, learning_rate, "学習中");
        }

        if loss <= config.stop_loss_value {
            stop_reason = StopReason::LossThreshold;
            break;
        }
        match scheduler.step(loss) {
            PlateauAction::Reduced(lr) => debug!(epoch, learning_rate = lr, "学習率を下げました"),
            PlateauAction::Floor => {
                stop_reason = StopReason::LearningRateFloor;
                break;
            }
            PlateauAction::None => {}
        }
        if early_stopping.as_mut().is_some_and(|es| es.step(loss)) {
            stop_reason = StopReason::NoImprovement;
            break;
        }
    }

    info!(
        epochs = history.len(),
        reason = ?stop_reason,
        loss = history.last().map(|r| r.loss),
        "学習が終了しました"
    );

    Ok(TrainingOutput {
        functional,
        history,
        stop_reason,
    })
}

struct Step<B: AutodiffBackend> {
    functional: Functional<B>,
    loss: f32,
    terms: Vec<f32>,
}

fn optimize_step<B: AutodiffBackend, O: Optimizer<Functional<B>, B>>(
    model: &PinnModel,
    functional: Functional<B>,
    optim: &mut O,
    bound: &BoundInputs<B>,
    targets: &[Tensor<B, 2>],
    learning_rate: f64,
    epoch: usize,
) -> Result<Step<B>, PinnError> {
    let losses = model.losses(&functional, bound, targets)?;
    let loss = losses.total.clone().into_scalar().elem::<f32>();
    if !loss.is_finite() {
        warn!(epoch, "損失が発散しました");
        return Err(PinnError::NonFiniteLoss { epoch });
    }
    let terms = losses
        .terms
        .iter()
        .map(|t| t.clone().into_scalar().elem::<f32>())
        .collect();

    let grads = losses.total.backward();
    let grads = GradientsParams::from_grads(grads, &functional);
    let functional = optim.step(learning_rate, functional, grads);
    Ok(Step {
        functional,
        loss,
        terms,
    })
}

/// `train`サブコマンドを実行します。
///
/// Burgers方程式のPINNを学習し、設定・学習済みモデル・損失グラフを
/// `artifact_dir` に保存します。
pub fn run(args: &TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();

    let config = match &args.config {
        Some(path) => {
            ExperimentConfig::load(path).map_err(|e| PinnError::Config(e.to_string()))?
        }
        None => ExperimentConfig::from_args(args),
    };
    let problem = config.problem()?;
    let grid = problem.grid(config.grid_t, config.grid_x);

    std::fs::create_dir_all(&args.artifact_dir)?;
    config.save(args.artifact_dir.join(CONFIG_FILENAME))?;

    // --- モデルの初期化 ---
    MyBackend::seed(config.training.seed);
    let functional = config.functional.init::<MyBackend>(&device);

    println!("学習を開始します (Burgers方程式) - バックエンド: NdArray (CPU)");
    for residual in problem.model.residuals() {
        println!("  残差 {}: {}", residual.name, residual.expr);
    }
    println!(
        "  格子: {}x{}={} 点, 最大エポック数: {}",
        config.grid_t,
        config.grid_x,
        grid.len(),
        config.training.epochs
    );

    let training_start = Instant::now();
    let output = train(
        &problem.model,
        functional,
        &grid.inputs(),
        &problem.targets(),
        &config.training,
        &device,
    )?;
    let training_duration = training_start.elapsed();

    println!("学習が完了しました。");
    println!("=> 学習時間: {:.2?}", training_duration);
    println!(
        "=> エポック数: {}, 終了理由: {:?}, 最終損失: {:.6}, 最小損失: {:.6}",
        output.history.len(),
        output.stop_reason,
        output.history.last().map_or(f32::NAN, |r| r.loss),
        output.history.best_loss().unwrap_or(f32::NAN)
    );

    // --- 結果の保存と描画 ---
    let graph_path = args.artifact_dir.join(LOSS_GRAPH_FILENAME);
    plot::loss_history(&output.history, &graph_path)?;
    println!("=> 損失グラフを '{}' に保存しました。", graph_path.display());

    println!("学習済みモデルを保存中...");
    save_functional(output.functional.valid(), &args.artifact_dir)?;
    println!(
        "=> モデルを '{}' に保存しました。",
        args.artifact_dir.join(MODEL_FILENAME).display()
    );

    Ok(())
}

fn save_functional<B: Backend>(functional: Functional<B>, dir: &Path) -> Result<(), PinnError> {
    functional.save_file(
        dir.join(MODEL_FILENAME),
        &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Grid;
    use crate::expr::{Field, Variable};
    use crate::pinn::Residual;

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn plateau_halves_after_patience() {
        let mut scheduler = PlateauScheduler::new(1e-2, 0.5, 2, 0.0, 1e-3);
        assert_eq!(scheduler.step(1.0), PlateauAction::None);
        assert_eq!(scheduler.step(1.0), PlateauAction::None);
        assert_eq!(scheduler.step(1.0), PlateauAction::Reduced(5e-3));
        assert_eq!(scheduler.step(0.5), PlateauAction::None);
        assert_eq!(scheduler.learning_rate(), 5e-3);
    }

    #[test]
    fn plateau_clamps_to_floor_then_reports_it() {
        let mut scheduler = PlateauScheduler::new(1e-2, 0.5, 1, 0.0, 4e-3);
        scheduler.step(1.0);
        assert_eq!(scheduler.step(1.0), PlateauAction::Reduced(5e-3));
        assert_eq!(scheduler.step(1.0), PlateauAction::Reduced(4e-3));
        assert_eq!(scheduler.step(1.0), PlateauAction::Floor);
    }

    #[test]
    fn early_stopping_counts_only_non_improving_epochs() {
        let mut stopping = EarlyStopping::new(3, 0.0);
        assert!(!stopping.step(1.0));
        assert!(!stopping.step(1.0));
        assert!(!stopping.step(0.9));
        assert!(!stopping.step(0.95));
        assert!(!stopping.step(0.95));
        assert!(stopping.step(0.95));
    }

    #[test]
    fn rejects_invalid_config() {
        let config = TrainingConfig::new(AdamConfig::new()).with_batch_size(Some(0));
        assert!(matches!(
            config.validate(),
            Err(PinnError::InvalidConfig { .. })
        ));
        let config = TrainingConfig::new(AdamConfig::new()).with_lr_factor(1.5);
        assert!(config.validate().is_err());
    }

    fn fit_problem() -> (PinnModel, Inputs) {
        // u(x) = sin(x) を直接当てはめる単純な問題
        let x = Variable::new("x");
        let u = Field::new("u", vec![x.clone()]);
        let model = PinnModel::new(
            vec![x.clone()],
            u.clone(),
            vec![Residual::new("fit", u.expr() - crate::expr::sin(x.expr()))],
        )
        .unwrap();
        let inputs = Grid::new(vec![(x, crate::data::linspace(-1.0, 1.0, 16))]).inputs();
        (model, inputs)
    }

    #[test]
    fn training_reduces_loss_with_mini_batches() {
        let (model, inputs) = fit_problem();
        let device = Default::default();
        let functional = FunctionalConfig::new(1)
            .with_hidden(vec![8])
            .init::<TestBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new())
            .with_epochs(200)
            .with_learning_rate(1e-2)
            .with_batch_size(Some(4));

        let output =
            train(&model, functional, &inputs, &[Target::Zero], &config, &device).unwrap();
        let losses = output.history.losses();
        assert_eq!(output.stop_reason, StopReason::MaxEpochs);
        assert_eq!(losses.len(), 200);
        assert!(losses[losses.len() - 1] < losses[0]);
        assert_eq!(output.history.term_names(), ["fit"]);
    }

    #[test]
    fn stops_when_loss_threshold_reached() {
        let (model, inputs) = fit_problem();
        let device = Default::default();
        let functional = FunctionalConfig::new(1)
            .with_hidden(vec![4])
            .init::<TestBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new())
            .with_epochs(50)
            .with_stop_loss_value(1e9);

        let output =
            train(&model, functional, &inputs, &[Target::Zero], &config, &device).unwrap();
        assert_eq!(output.stop_reason, StopReason::LossThreshold);
        assert_eq!(output.history.len(), 1);
    }

    #[test]
    fn same_seed_and_parameters_reproduce_history() {
        let (model, inputs) = fit_problem();
        let device = Default::default();
        let functional = FunctionalConfig::new(1)
            .with_hidden(vec![6])
            .init::<TestBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new())
            .with_epochs(20)
            .with_learning_rate(1e-2)
            .with_batch_size(Some(4))
            .with_shuffle(true)
            .with_seed(7);

        let first = train(
            &model,
            functional.clone(),
            &inputs,
            &[Target::Zero],
            &config,
            &device,
        )
        .unwrap();
        let second =
            train(&model, functional, &inputs, &[Target::Zero], &config, &device).unwrap();
        assert_eq!(first.history.losses(), second.history.losses());
        assert_eq!(first.stop_reason, second.stop_reason);
        assert_eq!(
            first.history.best_loss(),
            first.history.losses().into_iter().reduce(f32::min)
        );
    }

    #[test]
    fn rejects_functional_of_wrong_width() {
        let (model, inputs) = fit_problem();
        let device = Default::default();
        let functional = FunctionalConfig::new(2)
            .with_hidden(vec![4])
            .init::<TestBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new()).with_epochs(1);
        let err =
            train(&model, functional, &inputs, &[Target::Zero], &config, &device).unwrap_err();
        assert!(matches!(err, PinnError::InputWidth { expected: 1, found: 2 }));
    }

    #[test]
    fn experiment_config_checks_network_width() {
        let config = ExperimentConfig::new(
            BurgersConfig::new(),
            FunctionalConfig::new(3),
            TrainingConfig::new(AdamConfig::new()),
        );
        assert!(matches!(
            config.problem(),
            Err(PinnError::InputWidth { expected: 2, found: 3 })
        ));

        let config = ExperimentConfig::new(
            BurgersConfig::new(),
            FunctionalConfig::new(2),
            TrainingConfig::new(AdamConfig::new()),
        );
        assert!(config.problem().is_ok());
    }

    #[test]
    fn rejects_mismatched_targets() {
        let (model, inputs) = fit_problem();
        let device = Default::default();
        let functional = FunctionalConfig::new(1)
            .with_hidden(vec![4])
            .init::<TestBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new());
        let err = train(&model, functional, &inputs, &[], &config, &device).unwrap_err();
        assert!(matches!(err, PinnError::TargetCount { .. }));
    }
}
