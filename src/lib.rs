//! # 物理情報ニューラルネットワーク (PINN) ライブラリ
//!
//! `burn` フレームワークを使用して、物理情報ニューラルネットワーク（PINN）を構築し、
//! 1次元の粘性Burgers方程式を解くための主要なコンポーネントを提供します。
//!
//! 残差式は [`expr`] で記号的に組み立て、[`pinn`] の評価器がネットワークの
//! 入力微分（[`model::Functional::forward_jet`]）を使って数値化します。

pub mod burgers;
pub mod cli;
pub mod data;
pub mod error;
pub mod expr;
pub mod inference;
pub mod model;
pub mod pinn;
pub mod plot;
pub mod training;

/// モデルを保存するファイル名
pub const MODEL_FILENAME: &str = "model.mpk";
/// 実験設定を保存するファイル名
pub const CONFIG_FILENAME: &str = "config.json";
/// 損失グラフのファイル名
pub const LOSS_GRAPH_FILENAME: &str = "loss_graph.png";
/// 予測した場のヒートマップのファイル名
pub const FIELD_GRAPH_FILENAME: &str = "field.png";
