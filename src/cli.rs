use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::Activation;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Burgers方程式を解く物理情報ニューラルネットワーク (PINN)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train または infer）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// PINNモデルを学習し、結果をファイルに保存します
    Train(TrainArgs),
    /// 保存されたPINNモデルを使い、推論と可視化を実行します
    Infer(InferArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// 学習結果を保存するディレクトリ
    #[arg(long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,
    /// 設定ファイル (JSON)。指定した場合は他のオプションより優先されます
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// 最大エポック数
    #[arg(long, default_value_t = 5000)]
    pub epochs: usize,
    /// 初期学習率
    #[arg(long, default_value_t = 2e-3)]
    pub learning_rate: f64,
    /// ミニバッチの大きさ（省略時は全点を1バッチとして扱います）
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// 乱数シード（パラメータ初期化とシャッフル）
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// 学習格子の t 方向の点数
    #[arg(long, default_value_t = 100)]
    pub grid_t: usize,
    /// 学習格子の x 方向の点数
    #[arg(long, default_value_t = 100)]
    pub grid_x: usize,
    /// 隠れ層の数
    #[arg(long, default_value_t = 8)]
    pub layers: usize,
    /// 隠れ層の幅
    #[arg(long, default_value_t = 20)]
    pub width: usize,
    #[arg(long, value_enum, default_value_t = ActivationArg::Tanh)]
    pub activation: ActivationArg,
    /// 初期・境界条件の許容幅
    #[arg(long, default_value_t = 1e-3)]
    pub tol: f64,
    /// 学習率を半減させるまでの停滞エポック数
    #[arg(long, default_value_t = 100)]
    pub reduce_lr_after: usize,
    /// 改善が見られない場合に学習を打ち切るまでのエポック数
    #[arg(long, default_value_t = 500)]
    pub stop_after: usize,
}

#[derive(Args, Debug, Clone)]
pub struct InferArgs {
    /// 学習結果が保存されたディレクトリ
    #[arg(long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,
    /// 評価格子の各方向の点数
    #[arg(long, default_value_t = 200)]
    pub grid: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationArg {
    Tanh,
    Sigmoid,
    Sin,
}

impl From<ActivationArg> for Activation {
    fn from(arg: ActivationArg) -> Self {
        match arg {
            ActivationArg::Tanh => Activation::Tanh,
            ActivationArg::Sigmoid => Activation::Sigmoid,
            ActivationArg::Sin => Activation::Sin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_train_overrides() {
        let cli = Cli::parse_from([
            "pinn-burgers",
            "train",
            "--epochs",
            "10",
            "--batch-size",
            "64",
            "--activation",
            "sin",
        ]);
        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.epochs, 10);
        assert_eq!(args.batch_size, Some(64));
        assert_eq!(Activation::from(args.activation), Activation::Sin);
        assert_eq!(args.grid_t, 100);
    }

    #[test]
    fn parses_infer_defaults() {
        let cli = Cli::parse_from(["pinn-burgers", "infer"]);
        let Commands::Infer(args) = cli.command else {
            panic!("expected infer");
        };
        assert_eq!(args.grid, 200);
        assert_eq!(args.artifact_dir, PathBuf::from("artifacts"));
    }
}
