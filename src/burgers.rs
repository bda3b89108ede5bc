//! # 粘性Burgers方程式
//!
//! `u_t + u u_x - ν u_xx = 0` （`t ∈ [0, 1]`, `x ∈ [-1, 1]`）を、
//! 初期条件 `u(0, x) = -sin(πx)` と境界条件 `u(t, ±1) = 0` のもとで解きます。
//!
//! 初期条件と境界条件は、符号関数で作った指示関数を掛けた残差として表し、
//! 支配方程式の残差と同じ一様格子上で評価します。指示関数は許容幅 `tol` の帯の中でだけ
//! 0でない値を持つため、境界用に別の点集合を用意する必要がありません。

use std::f64::consts::PI;

use burn::config::Config;

use crate::data::{Grid, Target, linspace};
use crate::error::PinnError;
use crate::expr::{Field, Variable, diff, sign, sin};
use crate::pinn::{PinnModel, Residual};

/// 支配方程式の残差名。
pub const PDE_RESIDUAL: &str = "pde";

/// 問題の物理パラメータと領域。
#[derive(Config, Debug)]
pub struct BurgersConfig {
    /// 粘性係数 ν
    #[config(default = "0.01 / std::f64::consts::PI")]
    pub nu: f64,
    /// 初期・境界条件の許容幅
    #[config(default = 1e-3)]
    pub tol: f64,
    #[config(default = 0.0)]
    pub t_min: f64,
    #[config(default = 1.0)]
    pub t_max: f64,
    #[config(default = "-1.0")]
    pub x_min: f64,
    #[config(default = 1.0)]
    pub x_max: f64,
}

/// Burgers方程式のPINN定義。
#[derive(Debug, Clone)]
pub struct BurgersProblem {
    pub t: Variable,
    pub x: Variable,
    pub u: Field,
    pub model: PinnModel,
    config: BurgersConfig,
}

impl BurgersProblem {
    pub fn new(config: BurgersConfig) -> Result<Self, PinnError> {
        if !(config.t_min < config.t_max && config.x_min < config.x_max) {
            return Err(PinnError::InvalidConfig {
                reason: "領域の下限は上限より小さくなければなりません".to_string(),
            });
        }
        if !(config.tol > 0.0 && config.nu >= 0.0) {
            return Err(PinnError::InvalidConfig {
                reason: "tol は正、nu は非負でなければなりません".to_string(),
            });
        }

        let t = Variable::new("t");
        let x = Variable::new("x");
        let u = Field::new("u", vec![t.clone(), x.clone()]);
        let tol = config.tol;

        let pde = diff(&u, &t, 1) + u.expr() * diff(&u, &x, 1) - config.nu * diff(&u, &x, 2);
        let initial =
            (1.0 - sign(t.expr() - (config.t_min + tol))) * (u.expr() + sin(PI * x.expr()));
        let left = (1.0 - sign(x.expr() - (config.x_min + tol))) * u.expr();
        let right = (1.0 + sign(x.expr() - (config.x_max - tol))) * u.expr();

        let model = PinnModel::new(
            vec![t.clone(), x.clone()],
            u.clone(),
            vec![
                Residual::new(PDE_RESIDUAL, pde),
                Residual::new("initial", initial),
                Residual::new("left", left),
                Residual::new("right", right),
            ],
        )?;

        Ok(Self {
            t,
            x,
            u,
            model,
            config,
        })
    }

    pub fn config(&self) -> &BurgersConfig {
        &self.config
    }

    /// `n_t × n_x` の一様格子を返します（`x` が最も速く変化します）。
    pub fn grid(&self, n_t: usize, n_x: usize) -> Grid {
        Grid::new(vec![
            (
                self.t.clone(),
                linspace(self.config.t_min as f32, self.config.t_max as f32, n_t),
            ),
            (
                self.x.clone(),
                linspace(self.config.x_min as f32, self.config.x_max as f32, n_x),
            ),
        ])
    }

    /// すべての残差の教師値（0）。
    pub fn targets(&self) -> Vec<Target> {
        vec![Target::Zero; self.model.residuals().len()]
    }
}

/// 初期条件 `u(0, x) = -sin(πx)`。
pub fn initial_condition(x: f32) -> f32 {
    -(std::f32::consts::PI * x).sin()
}
