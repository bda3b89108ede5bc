use std::collections::BTreeMap;

use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::sigmoid;
use serde::{Deserialize, Serialize};

/// 隠れ層の活性化関数。
///
/// 入力についての2階微分まで伝播させるため、各関数の1階・2階導関数も提供します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Tanh,
    Sigmoid,
    Sin,
}

impl Activation {
    pub fn forward<B: Backend>(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Activation::Tanh => z.tanh(),
            Activation::Sigmoid => sigmoid(z),
            Activation::Sin => z.sin(),
        }
    }

    /// `(σ(z), σ'(z), σ''(z))` を返します。
    pub fn forward_with_derivatives<B: Backend>(
        &self,
        z: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
        match self {
            Activation::Tanh => {
                let y = z.tanh();
                let d1 = y.clone().powf_scalar(2.0).neg().add_scalar(1.0);
                let d2 = y.clone().mul(d1.clone()).mul_scalar(-2.0);
                (y, d1, d2)
            }
            Activation::Sigmoid => {
                let s = sigmoid(z);
                let d1 = s.clone().mul(s.clone().neg().add_scalar(1.0));
                let d2 = d1.clone().mul(s.clone().mul_scalar(-2.0).add_scalar(1.0));
                (s, d1, d2)
            }
            Activation::Sin => {
                let y = z.clone().sin();
                let d1 = z.cos();
                let d2 = y.clone().neg();
                (y, d1, d2)
            }
        }
    }
}

/// 場の近似関数（Functional）の構成。
#[derive(Config, Debug)]
pub struct FunctionalConfig {
    /// 入力変数の数
    pub d_input: usize,
    /// 隠れ層の幅
    #[config(default = "vec![20; 8]")]
    pub hidden: Vec<usize>,
    #[config(default = "Activation::Tanh")]
    pub activation: Activation,
    #[config(default = "Initializer::XavierNormal { gain: 1.0 }")]
    pub initializer: Initializer,
}

impl FunctionalConfig {
    /// 新しいモデルを初期化します。
    ///
    /// パラメータの乱数はバックエンドのシードに従います。再現性が必要な場合は
    /// 呼び出し前に `B::seed` を設定してください。
    pub fn init<B: Backend>(&self, device: &B::Device) -> Functional<B> {
        let mut widths = Vec::with_capacity(self.hidden.len() + 2);
        widths.push(self.d_input);
        widths.extend(self.hidden.iter().copied());
        widths.push(1);

        let linears = widths
            .windows(2)
            .map(|pair| {
                LinearConfig::new(pair[0], pair[1])
                    .with_initializer(self.initializer.clone())
                    .init(device)
            })
            .collect();

        Functional {
            linears,
            activation: Ignored(self.activation),
        }
    }
}

/// PINNの本体となるニューラルネットワークモデル。
///
/// 座標を入力とし、その点における物理量uを予測する多層パーセプトロン（MLP）です。
#[derive(Module, Debug)]
pub struct Functional<B: Backend> {
    linears: Vec<Linear<B>>,
    activation: Ignored<Activation>,
}

/// [`Functional::forward_jet`] で求める入力微分の指定。
///
/// 添字は入力列の番号です。2階微分 `(i, j)` は `i <= j` で指定します。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JetRequest {
    pub first: Vec<usize>,
    pub second: Vec<(usize, usize)>,
}

impl JetRequest {
    /// 微分変数の添字列（0〜2個）から要求を追加します。
    pub fn add(&mut self, partials: &[usize]) {
        match *partials {
            [] => {}
            [i] => self.push_first(i),
            [a, b] => {
                let pair = (a.min(b), a.max(b));
                self.push_first(pair.0);
                self.push_first(pair.1);
                if !self.second.contains(&pair) {
                    self.second.push(pair);
                }
            }
            _ => {}
        }
    }

    fn push_first(&mut self, i: usize) {
        if !self.first.contains(&i) {
            self.first.push(i);
        }
    }
}

/// 出力値と入力についての偏微分（いずれも `[N, 1]`）。
#[derive(Debug, Clone)]
pub struct Jet<B: Backend> {
    pub value: Tensor<B, 2>,
    pub first: BTreeMap<usize, Tensor<B, 2>>,
    pub second: BTreeMap<(usize, usize), Tensor<B, 2>>,
}

impl<B: Backend> Jet<B> {
    /// 添字列で指定した偏微分を取り出します。
    pub fn partial(&self, partials: &[usize]) -> Option<Tensor<B, 2>> {
        match *partials {
            [] => Some(self.value.clone()),
            [i] => self.first.get(&i).cloned(),
            [a, b] => self.second.get(&(a.min(b), a.max(b))).cloned(),
            _ => None,
        }
    }
}

impl<B: Backend> Functional<B> {
    pub fn d_input(&self) -> usize {
        self.linears.first().map_or(0, |l| l.weight.dims()[0])
    }

    pub fn activation(&self) -> Activation {
        self.activation.0
    }

    /// モデルの順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.linears.len() - 1;
        let mut x = input;
        for (i, linear) in self.linears.iter().enumerate() {
            x = linear.forward(x);
            if i < last {
                x = self.activation.forward(x);
            }
        }
        x
    }

    /// 順伝播と同時に、入力についての1階・2階偏微分を層ごとに伝播させます。
    ///
    /// 線形層 `z = aW + b` では `z' = a'W`, `z'' = a''W`、
    /// 活性化 `y = σ(z)` では `y'_i = σ'(z) z'_i`,
    /// `y''_ij = σ'(z) z''_ij + σ''(z) z'_i z'_j` となります。
    /// すべてテンソル演算で書かれているため、自動微分バックエンドでは
    /// 結果をパラメータについてさらに微分できます。
    pub fn forward_jet(&self, input: Tensor<B, 2>, request: &JetRequest) -> Jet<B> {
        let [n, d] = input.dims();
        let device = input.device();

        let mut first: BTreeMap<usize, Tensor<B, 2>> = request
            .first
            .iter()
            .map(|&i| {
                let column = Tensor::<B, 2>::zeros([n, d], &device)
                    .slice_assign([0..n, i..i + 1], Tensor::ones([n, 1], &device));
                (i, column)
            })
            .collect();
        let mut second: BTreeMap<(usize, usize), Tensor<B, 2>> = request
            .second
            .iter()
            .map(|&pair| (pair, Tensor::zeros([n, d], &device)))
            .collect();

        let last = self.linears.len() - 1;
        let mut value = input;
        for (layer, linear) in self.linears.iter().enumerate() {
            let weight = linear.weight.val();
            value = linear.forward(value);
            for t in first.values_mut() {
                *t = t.clone().matmul(weight.clone());
            }
            for t in second.values_mut() {
                *t = t.clone().matmul(weight.clone());
            }
            if layer == last {
                break;
            }

            let (y, d1, d2) = self.activation.forward_with_derivatives(value);
            // 2階微分は活性化前の1階微分 z' を使うため先に更新する
            for (&(i, j), t) in second.iter_mut() {
                let zi = first[&i].clone();
                let zj = first[&j].clone();
                *t = d1.clone().mul(t.clone()) + d2.clone().mul(zi).mul(zj);
            }
            for t in first.values_mut() {
                *t = d1.clone().mul(t.clone());
            }
            value = y;
        }

        Jet {
            value,
            first,
            second,
        }
    }
}
