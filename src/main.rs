//! # 物理情報ニューラルネットワーク (PINN) サンプルプログラム
//!
//! `burn` フレームワークを使用して、物理情報ニューラルネットワーク（PINN）を構築し、
//! 粘性Burgers方程式 `u_t + u u_x - (0.01/π) u_xx = 0` を解くサンプルです。
//!
//! `clap` クレートを利用して、コマンドラインから`train`（学習）と`infer`（推論）の
//! 機能を個別に実行できます。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --epochs 5000
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --grid 200
//! ```
//!
//! ログの詳細度は `RUST_LOG` で変更できます（例: `RUST_LOG=pinn=debug`）。

use clap::Parser;
use pinn::cli::{Cli, Commands};
use pinn::{inference, training};
use tracing_subscriber::EnvFilter;

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、`train`または`infer`の処理に振り分けます。
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Train(args) => training::run(args),
        Commands::Infer(args) => inference::run(args),
    }
}
