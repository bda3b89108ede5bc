use std::collections::BTreeMap;

use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::data::{Inputs, Target};
use crate::error::PinnError;
use crate::expr::{Expr, Field, Variable};
use crate::model::{Functional, JetRequest};

/// 名前付きの残差式。学習ではこの値が教師値（通常は0）に近づくよう最適化されます。
#[derive(Debug, Clone, PartialEq)]
pub struct Residual {
    pub name: String,
    pub expr: Expr,
}

impl Residual {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// 入力変数・場・残差式をまとめた記号モデル。
///
/// 構築時にすべての残差式を展開・検証するため、評価時には
/// 「未知の変数」や「3階以上の微分」は発生しません。
#[derive(Debug, Clone)]
pub struct PinnModel {
    inputs: Vec<Variable>,
    field: Field,
    residuals: Vec<Residual>,
    request: JetRequest,
}

impl PinnModel {
    pub fn new(
        inputs: Vec<Variable>,
        field: Field,
        residuals: Vec<Residual>,
    ) -> Result<Self, PinnError> {
        for (i, v) in inputs.iter().enumerate() {
            if inputs[..i].contains(v) {
                return Err(PinnError::DuplicateVariable {
                    name: v.name().to_string(),
                });
            }
        }
        for v in field.inputs() {
            if !inputs.contains(v) {
                return Err(PinnError::UnknownVariable {
                    name: v.name().to_string(),
                });
            }
        }

        let residuals: Vec<Residual> = residuals
            .into_iter()
            .map(|r| Residual::new(r.name, r.expr.lower()))
            .collect();

        let mut request = JetRequest::default();
        for residual in &residuals {
            for v in residual.expr.variables() {
                if !inputs.contains(&v) {
                    return Err(PinnError::UnknownVariable {
                        name: v.name().to_string(),
                    });
                }
            }
            for (name, partials) in residual.expr.field_partials() {
                if name != field.name() {
                    return Err(PinnError::UnknownField {
                        expected: field.name().to_string(),
                        found: name,
                    });
                }
                if partials.len() > 2 {
                    return Err(PinnError::UnsupportedOrder {
                        order: partials.len(),
                    });
                }
                request.add(&partial_positions(&field, &partials)?);
            }
        }

        Ok(Self {
            inputs,
            field,
            residuals,
            request,
        })
    }

    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn residuals(&self) -> &[Residual] {
        &self.residuals
    }

    /// 座標列を変数名で引き当て、デバイス上のテンソルに変換します。
    pub fn bind<B: Backend>(
        &self,
        inputs: &Inputs,
        device: &B::Device,
    ) -> Result<BoundInputs<B>, PinnError> {
        for name in inputs.names() {
            if !self.inputs.iter().any(|v| v.name() == name) {
                return Err(PinnError::UnexpectedInput {
                    name: name.to_string(),
                });
            }
        }
        let len = inputs.len();
        if len == 0 {
            return Err(PinnError::EmptyDataset);
        }

        let mut columns = BTreeMap::new();
        for variable in &self.inputs {
            let values = inputs
                .get(variable.name())
                .ok_or_else(|| PinnError::MissingInput {
                    name: variable.name().to_string(),
                })?;
            columns.insert(variable.clone(), column::<B>(values, device));
        }
        Ok(BoundInputs { columns, len })
    }

    /// すべての残差式を評価します。各要素の形状は `[N, 1]` です。
    pub fn evaluate_residuals<B: Backend>(
        &self,
        functional: &Functional<B>,
        bound: &BoundInputs<B>,
    ) -> Result<Vec<Tensor<B, 2>>, PinnError> {
        self.check_width(functional)?;
        let input = self.field_input(bound)?;
        let jet = functional.forward_jet(input, &self.request);
        let device = jet.value.device();

        let mut partials = BTreeMap::new();
        for (_, vars) in self.residuals.iter().flat_map(|r| r.expr.field_partials()) {
            let positions = partial_positions(&self.field, &vars)?;
            let value = jet
                .partial(&positions)
                .ok_or(PinnError::UnsupportedOrder { order: vars.len() })?;
            partials.insert(vars, value);
        }

        let ctx = EvalContext {
            coords: &bound.columns,
            partials: &partials,
        };
        self.residuals
            .iter()
            .map(|r| {
                Ok(ctx
                    .eval(&r.expr)?
                    .into_tensor(bound.len, &device))
            })
            .collect()
    }

    /// 残差ごとの平均二乗誤差と、その総和を計算します。
    pub fn losses<B: Backend>(
        &self,
        functional: &Functional<B>,
        bound: &BoundInputs<B>,
        targets: &[Tensor<B, 2>],
    ) -> Result<ResidualLosses<B>, PinnError> {
        if targets.len() != self.residuals.len() {
            return Err(PinnError::TargetCount {
                residuals: self.residuals.len(),
                targets: targets.len(),
            });
        }
        let mse = MseLoss::new();
        let terms: Vec<Tensor<B, 1>> = self
            .evaluate_residuals(functional, bound)?
            .into_iter()
            .zip(targets)
            .map(|(residual, target)| mse.forward(residual, target.clone(), Reduction::Mean))
            .collect();
        let total = terms
            .iter()
            .cloned()
            .reduce(|a, b| a + b)
            .ok_or(PinnError::EmptyDataset)?;
        Ok(ResidualLosses { total, terms })
    }

    /// 残差ごとの教師値をテンソルに変換します。
    pub fn bind_targets<B: Backend>(
        &self,
        targets: &[Target],
        len: usize,
        device: &B::Device,
    ) -> Result<Vec<Tensor<B, 2>>, PinnError> {
        if targets.len() != self.residuals.len() {
            return Err(PinnError::TargetCount {
                residuals: self.residuals.len(),
                targets: targets.len(),
            });
        }
        targets
            .iter()
            .map(|t| Ok(column::<B>(&t.resolve(len)?, device)))
            .collect()
    }

    /// 学習済みの場を与えられた座標で評価します（1回の順伝播）。
    pub fn evaluate_field<B: Backend>(
        &self,
        functional: &Functional<B>,
        inputs: &Inputs,
        device: &B::Device,
    ) -> Result<Vec<f32>, PinnError> {
        self.check_width(functional)?;
        let bound = self.bind(inputs, device)?;
        let output = functional.forward(self.field_input(&bound)?);
        Ok(output.into_data().iter::<f32>().collect())
    }

    /// ネットワークの入力幅が場の入力数と一致するか確認します。
    pub fn check_width<B: Backend>(&self, functional: &Functional<B>) -> Result<(), PinnError> {
        let expected = self.field.inputs().len();
        let found = functional.d_input();
        if expected != found {
            return Err(PinnError::InputWidth { expected, found });
        }
        Ok(())
    }

    /// 場の宣言順に入力列を連結します。
    fn field_input<B: Backend>(&self, bound: &BoundInputs<B>) -> Result<Tensor<B, 2>, PinnError> {
        let columns = self
            .field
            .inputs()
            .iter()
            .map(|v| {
                bound
                    .columns
                    .get(v)
                    .cloned()
                    .ok_or_else(|| PinnError::MissingInput {
                        name: v.name().to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tensor::cat(columns, 1))
    }
}

/// デバイス上に配置済みの座標列（各 `[N, 1]`）。
#[derive(Debug, Clone)]
pub struct BoundInputs<B: Backend> {
    columns: BTreeMap<Variable, Tensor<B, 2>>,
    len: usize,
}

impl<B: Backend> BoundInputs<B> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 損失の内訳。
#[derive(Debug, Clone)]
pub struct ResidualLosses<B: Backend> {
    pub total: Tensor<B, 1>,
    pub terms: Vec<Tensor<B, 1>>,
}

fn column<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 2> {
    let data = TensorData::new(values.to_vec(), [values.len(), 1]).convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

fn partial_positions(field: &Field, partials: &[Variable]) -> Result<Vec<usize>, PinnError> {
    partials
        .iter()
        .map(|v| {
            field.position(v).ok_or_else(|| PinnError::UnknownVariable {
                name: v.name().to_string(),
            })
        })
        .collect()
}

/// 評価途中の値。定数は必要になるまでテンソル化しません。
enum Value<B: Backend> {
    Scalar(f64),
    Tensor(Tensor<B, 2>),
}

impl<B: Backend> Value<B> {
    fn into_tensor(self, len: usize, device: &B::Device) -> Tensor<B, 2> {
        match self {
            Value::Scalar(c) => Tensor::full([len, 1], c, device),
            Value::Tensor(t) => t,
        }
    }
}

struct EvalContext<'a, B: Backend> {
    coords: &'a BTreeMap<Variable, Tensor<B, 2>>,
    partials: &'a BTreeMap<Vec<Variable>, Tensor<B, 2>>,
}

impl<B: Backend> EvalContext<'_, B> {
    fn eval(&self, expr: &Expr) -> Result<Value<B>, PinnError> {
        use Value::{Scalar, Tensor as T};

        Ok(match expr {
            Expr::Const(c) => Scalar(*c),
            Expr::Var(v) => T(self
                .coords
                .get(v)
                .cloned()
                .ok_or_else(|| PinnError::UnknownVariable {
                    name: v.name().to_string(),
                })?),
            Expr::Field { partials, .. } => T(self
                .partials
                .get(partials)
                .cloned()
                .ok_or(PinnError::UnsupportedOrder {
                    order: partials.len(),
                })?),
            Expr::Add(a, b) => match (self.eval(a)?, self.eval(b)?) {
                (Scalar(x), Scalar(y)) => Scalar(x + y),
                (Scalar(c), T(t)) | (T(t), Scalar(c)) => T(t.add_scalar(c)),
                (T(x), T(y)) => T(x + y),
            },
            Expr::Mul(a, b) => match (self.eval(a)?, self.eval(b)?) {
                (Scalar(x), Scalar(y)) => Scalar(x * y),
                (Scalar(c), T(t)) | (T(t), Scalar(c)) => T(t.mul_scalar(c)),
                (T(x), T(y)) => T(x * y),
            },
            Expr::Neg(a) => match self.eval(a)? {
                Scalar(x) => Scalar(-x),
                T(t) => T(t.neg()),
            },
            Expr::Sign(a) => match self.eval(a)? {
                Scalar(x) => Scalar(if x == 0.0 { 0.0 } else { x.signum() }),
                // 比較から組み立てるため勾配は流れない (sign' = 0)
                T(t) => {
                    let positive = t.clone().greater_elem(0.0).float();
                    let negative = t.lower_elem(0.0).float();
                    T(positive - negative)
                }
            },
            Expr::Sin(a) => match self.eval(a)? {
                Scalar(x) => Scalar(x.sin()),
                T(t) => T(t.sin()),
            },
            Expr::Cos(a) => match self.eval(a)? {
                Scalar(x) => Scalar(x.cos()),
                T(t) => T(t.cos()),
            },
            Expr::Diff { .. } => return self.eval(&expr.lower()),
        })
    }
}
