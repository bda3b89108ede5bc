use std::time::Instant;

use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::burgers::{BurgersProblem, PDE_RESIDUAL, initial_condition};
use crate::cli::InferArgs;
use crate::data::{Grid, Inputs, linspace};
use crate::error::PinnError;
use crate::model::Functional;
use crate::training::ExperimentConfig;
use crate::{CONFIG_FILENAME, FIELD_GRAPH_FILENAME, MODEL_FILENAME, plot};

type MyBackend = NdArray<f32>;

/// 学習済みの場が初期・境界条件と支配方程式をどれだけ満たしているか。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDiagnostics {
    /// `max |u(t_min, x) - u0(x)|`
    pub initial_max_error: f32,
    /// `max |u(t, x_min)|, |u(t, x_max)|`
    pub boundary_max_abs: f32,
    /// 内部点での支配方程式の残差の二乗平均平方根
    pub pde_rms: f32,
}

impl FieldDiagnostics {
    /// 各方向 `n` 点の格子で診断値を計算します。
    pub fn compute<B: Backend>(
        problem: &BurgersProblem,
        functional: &Functional<B>,
        n: usize,
        device: &B::Device,
    ) -> Result<Self, PinnError> {
        if n < 3 {
            return Err(PinnError::InvalidConfig {
                reason: "診断には各方向3点以上が必要です".to_string(),
            });
        }
        let config = problem.config();
        let model = &problem.model;
        let ts = linspace(config.t_min as f32, config.t_max as f32, n);
        let xs = linspace(config.x_min as f32, config.x_max as f32, n);

        let initial = Inputs::new()
            .with(&problem.t, vec![config.t_min as f32; n])?
            .with(&problem.x, xs.clone())?;
        let u0 = model.evaluate_field(functional, &initial, device)?;
        let initial_max_error = u0
            .iter()
            .zip(&xs)
            .map(|(u, &x)| (u - initial_condition(x)).abs())
            .fold(0.0, f32::max);

        let mut boundary_max_abs = 0.0f32;
        for x in [config.x_min as f32, config.x_max as f32] {
            let boundary = Inputs::new()
                .with(&problem.t, ts.clone())?
                .with(&problem.x, vec![x; n])?;
            let u = model.evaluate_field(functional, &boundary, device)?;
            boundary_max_abs = u.iter().map(|v| v.abs()).fold(boundary_max_abs, f32::max);
        }

        let interior = Grid::new(vec![
            (problem.t.clone(), ts[1..].to_vec()),
            (problem.x.clone(), xs[1..n - 1].to_vec()),
        ]);
        let pde_index = model
            .residuals()
            .iter()
            .position(|r| r.name == PDE_RESIDUAL)
            .ok_or_else(|| PinnError::UnknownResidual {
                name: PDE_RESIDUAL.to_string(),
            })?;
        let bound = model.bind(&interior.inputs(), device)?;
        let residuals = model.evaluate_residuals(functional, &bound)?;
        let pde: Vec<f32> = residuals[pde_index]
            .clone()
            .into_data()
            .iter::<f32>()
            .collect();
        let pde_rms = (pde.iter().map(|r| r * r).sum::<f32>() / pde.len() as f32).sqrt();

        Ok(Self {
            initial_max_error,
            boundary_max_abs,
            pde_rms,
        })
    }
}

/// `infer`サブコマンドを実行します。
///
/// 保存された設定とモデルを読み込み、評価格子上で場を予測してヒートマップを保存します。
pub fn run(args: &InferArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let config_path = args.artifact_dir.join(CONFIG_FILENAME);
    let model_path = args.artifact_dir.join(MODEL_FILENAME);

    if !model_path.exists() || !config_path.exists() {
        return Err(format!(
            "モデルファイル '{}' が見つかりません。\n最初に 'train' コマンドでモデルを学習・保存してください。",
            model_path.display()
        )
        .into());
    }

    println!("\n推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    let config =
        ExperimentConfig::load(&config_path).map_err(|e| PinnError::Config(e.to_string()))?;
    let problem = config.problem()?;

    println!("保存済みモデルを '{}' からロード中...", model_path.display());
    let functional = config
        .functional
        .init::<MyBackend>(&device)
        .load_file(
            model_path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            &device,
        )
        .map_err(PinnError::from)?;

    let grid = problem.grid(args.grid, args.grid);
    let predictions = problem
        .model
        .evaluate_field(&functional, &grid.inputs(), &device)?;
    let inference_duration = inference_start.elapsed();

    println!(
        "推論が完了しました。入力グリッド数: {}x{}={}, 出力数: {}",
        args.grid,
        args.grid,
        grid.len(),
        predictions.len()
    );
    println!("=> 推論時間: {:.2?}", inference_duration);

    let diagnostics = FieldDiagnostics::compute(&problem, &functional, 101, &device)?;
    println!(
        "=> 初期条件の最大誤差: {:.3e}, 境界での最大値: {:.3e}, 方程式残差 (RMS): {:.3e}",
        diagnostics.initial_max_error, diagnostics.boundary_max_abs, diagnostics.pde_rms
    );

    let t_axis = grid.axis(problem.t.name()).unwrap_or_default();
    let x_axis = grid.axis(problem.x.name()).unwrap_or_default();
    let field_path = args.artifact_dir.join(FIELD_GRAPH_FILENAME);
    plot::field_heatmap(t_axis, x_axis, &predictions, &field_path)?;
    println!("=> 予測した場を '{}' に保存しました。", field_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burgers::BurgersConfig;
    use crate::model::FunctionalConfig;
    use crate::pinn::{PinnModel, Residual};

    #[test]
    fn diagnostics_are_finite_for_untrained_model() {
        let problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
        let device = Default::default();
        let functional = FunctionalConfig::new(2)
            .with_hidden(vec![5, 5])
            .init::<MyBackend>(&device);
        let diagnostics = FieldDiagnostics::compute(&problem, &functional, 11, &device).unwrap();
        assert!(diagnostics.initial_max_error.is_finite());
        assert!(diagnostics.boundary_max_abs >= 0.0);
        assert!(diagnostics.pde_rms.is_finite());
    }

    #[test]
    fn diagnostics_need_interior_points() {
        let problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
        let device = Default::default();
        let functional = FunctionalConfig::new(2)
            .with_hidden(vec![3])
            .init::<MyBackend>(&device);
        assert!(FieldDiagnostics::compute(&problem, &functional, 2, &device).is_err());
    }

    #[test]
    fn diagnostics_require_pde_residual() {
        let mut problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
        problem.model = PinnModel::new(
            vec![problem.t.clone(), problem.x.clone()],
            problem.u.clone(),
            vec![Residual::new("initial", problem.u.expr())],
        )
        .unwrap();
        let device = Default::default();
        let functional = FunctionalConfig::new(2)
            .with_hidden(vec![3])
            .init::<MyBackend>(&device);
        let err = FieldDiagnostics::compute(&problem, &functional, 5, &device).unwrap_err();
        assert!(matches!(err, PinnError::UnknownResidual { name } if name == PDE_RESIDUAL));
    }

    #[test]
    fn diagnostics_reject_network_of_wrong_width() {
        let problem = BurgersProblem::new(BurgersConfig::new()).unwrap();
        let device = Default::default();
        let functional = FunctionalConfig::new(3)
            .with_hidden(vec![3])
            .init::<MyBackend>(&device);
        let err = FieldDiagnostics::compute(&problem, &functional, 5, &device).unwrap_err();
        assert!(matches!(err, PinnError::InputWidth { expected: 2, found: 3 }));
    }
}
