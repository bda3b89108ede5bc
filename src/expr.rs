//! # 記号表現
//!
//! PINNの残差式を、演算子を直接評価する代わりに明示的な式木として組み立てます。
//! 式の構築（このモジュール）と評価（[`crate::pinn`]）を分離することで、
//! 偏微分は評価前に記号的に展開され、評価器は関数 `u` の偏微分値だけを扱えば済みます。

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// 名前付きのスカラー入力変数（空間座標 `x`、時間座標 `t` など）。
///
/// 変数の同一性は名前だけで決まります。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable {
    name: String,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// この変数を葉とする式を返します。
    pub fn expr(&self) -> Expr {
        Expr::Var(self.clone())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// ニューラルネットワークで近似する場 `u(t, x)` の記号。
///
/// `inputs` の並びがネットワークの入力列の並びになります。
/// 座標は常に変数名で引き当てるため、呼び出し側が並びを意識する必要はありません。
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    inputs: Vec<Variable>,
}

impl Field {
    pub fn new(name: impl Into<String>, inputs: Vec<Variable>) -> Self {
        Self {
            name: name.into(),
            inputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Variable] {
        &self.inputs
    }

    /// 入力変数の列番号を返します。
    pub fn position(&self, variable: &Variable) -> Option<usize> {
        self.inputs.iter().position(|v| v == variable)
    }

    /// 場そのもの（0階の偏微分）を表す式を返します。
    pub fn expr(&self) -> Expr {
        Expr::Field {
            name: self.name.clone(),
            partials: Vec::new(),
        }
    }
}

/// 残差式の式木。
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    /// 入力変数の葉
    Var(Variable),
    /// 場 `name` の偏微分。`partials` は微分変数の多重集合（整列済み）で、空なら場そのもの。
    Field { name: String, partials: Vec<Variable> },
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sign(Box<Expr>),
    Sin(Box<Expr>),
    Cos(Box<Expr>),
    /// 未展開の偏微分 `∂^order expr / ∂variable^order`
    Diff {
        expr: Box<Expr>,
        variable: Variable,
        order: usize,
    },
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(value) => Some(*value),
            _ => None,
        }
    }

    /// `a + b`。定数同士や `0` との和は畳み込みます。
    pub fn sum(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::Const(x + y),
            (Some(z), _) if z == 0.0 => b,
            (_, Some(z)) if z == 0.0 => a,
            _ => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    /// `a * b`。定数同士、`0` や `1` との積は畳み込みます。
    pub fn product(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::Const(x * y),
            (Some(z), _) | (_, Some(z)) if z == 0.0 => Expr::Const(0.0),
            (Some(one), _) if one == 1.0 => b,
            (_, Some(one)) if one == 1.0 => a,
            _ => Expr::Mul(Box::new(a), Box::new(b)),
        }
    }

    pub fn negate(a: Expr) -> Expr {
        match a {
            Expr::Const(value) => Expr::Const(-value),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }

    /// 変数 `variable` についての1階偏微分を記号的に求めます。
    ///
    /// `sign` の導関数はほとんど至る所で0として扱います。
    /// 場の偏微分は `partials` に変数を追加するだけで、数値的な評価は評価器に委ねます。
    pub fn derivative(&self, variable: &Variable) -> Expr {
        match self {
            Expr::Const(_) => Expr::Const(0.0),
            Expr::Var(v) => Expr::Const(if v == variable { 1.0 } else { 0.0 }),
            Expr::Field { name, partials } => {
                let mut partials = partials.clone();
                partials.push(variable.clone());
                partials.sort();
                Expr::Field {
                    name: name.clone(),
                    partials,
                }
            }
            Expr::Add(a, b) => Expr::sum(a.derivative(variable), b.derivative(variable)),
            Expr::Mul(a, b) => Expr::sum(
                Expr::product(a.derivative(variable), (**b).clone()),
                Expr::product((**a).clone(), b.derivative(variable)),
            ),
            Expr::Neg(a) => Expr::negate(a.derivative(variable)),
            Expr::Sign(_) => Expr::Const(0.0),
            Expr::Sin(a) => Expr::product(cos((**a).clone()), a.derivative(variable)),
            Expr::Cos(a) => Expr::negate(Expr::product(
                sin((**a).clone()),
                a.derivative(variable),
            )),
            Expr::Diff { .. } => self.lower().derivative(variable),
        }
    }

    /// すべての `Diff` ノードを記号的に展開した式を返します。
    pub fn lower(&self) -> Expr {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::Field { .. } => self.clone(),
            Expr::Add(a, b) => Expr::sum(a.lower(), b.lower()),
            Expr::Mul(a, b) => Expr::product(a.lower(), b.lower()),
            Expr::Neg(a) => Expr::negate(a.lower()),
            Expr::Sign(a) => sign(a.lower()),
            Expr::Sin(a) => sin(a.lower()),
            Expr::Cos(a) => cos(a.lower()),
            Expr::Diff {
                expr,
                variable,
                order,
            } => {
                let mut lowered = expr.lower();
                for _ in 0..*order {
                    lowered = lowered.derivative(variable);
                }
                lowered
            }
        }
    }

    /// 式が参照するすべての変数（葉と微分変数）を集めます。
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut out = BTreeSet::new();
        self.visit(&mut |expr| match expr {
            Expr::Var(v) => {
                out.insert(v.clone());
            }
            Expr::Field { partials, .. } => out.extend(partials.iter().cloned()),
            Expr::Diff { variable, .. } => {
                out.insert(variable.clone());
            }
            _ => {}
        });
        out
    }

    /// 式が参照する場の偏微分 `(場の名前, 微分変数)` を集めます。
    pub fn field_partials(&self) -> BTreeSet<(String, Vec<Variable>)> {
        let mut out = BTreeSet::new();
        self.visit(&mut |expr| {
            if let Expr::Field { name, partials } = expr {
                out.insert((name.clone(), partials.clone()));
            }
        });
        out
    }

    fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::Field { .. } => {}
            Expr::Add(a, b) | Expr::Mul(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Expr::Neg(a) | Expr::Sign(a) | Expr::Sin(a) | Expr::Cos(a) => a.visit(f),
            Expr::Diff { expr, .. } => expr.visit(f),
        }
    }
}

pub fn sign(expr: impl Into<Expr>) -> Expr {
    match expr.into() {
        Expr::Const(value) => Expr::Const(if value == 0.0 { 0.0 } else { value.signum() }),
        other => Expr::Sign(Box::new(other)),
    }
}

pub fn sin(expr: impl Into<Expr>) -> Expr {
    match expr.into() {
        Expr::Const(value) => Expr::Const(value.sin()),
        other => Expr::Sin(Box::new(other)),
    }
}

pub fn cos(expr: impl Into<Expr>) -> Expr {
    match expr.into() {
        Expr::Const(value) => Expr::Const(value.cos()),
        other => Expr::Cos(Box::new(other)),
    }
}

/// 未展開の偏微分ノード `∂^order expr / ∂variable^order` を作ります。
pub fn diff(expr: impl Into<Expr>, variable: &Variable, order: usize) -> Expr {
    let expr = expr.into();
    if order == 0 {
        return expr;
    }
    Expr::Diff {
        expr: Box::new(expr),
        variable: variable.clone(),
        order,
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<Variable> for Expr {
    fn from(variable: Variable) -> Self {
        Expr::Var(variable)
    }
}

impl From<&Variable> for Expr {
    fn from(variable: &Variable) -> Self {
        variable.expr()
    }
}

impl From<&Field> for Expr {
    fn from(field: &Field) -> Self {
        field.expr()
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

impl<T: Into<Expr>> Add<T> for Expr {
    type Output = Expr;

    fn add(self, rhs: T) -> Expr {
        Expr::sum(self, rhs.into())
    }
}

impl<T: Into<Expr>> Sub<T> for Expr {
    type Output = Expr;

    fn sub(self, rhs: T) -> Expr {
        Expr::sum(self, Expr::negate(rhs.into()))
    }
}

impl<T: Into<Expr>> Mul<T> for Expr {
    type Output = Expr;

    fn mul(self, rhs: T) -> Expr {
        Expr::product(self, rhs.into())
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::negate(self)
    }
}

impl Add<Expr> for f64 {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::sum(Expr::Const(self), rhs)
    }
}

impl Sub<Expr> for f64 {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum(Expr::Const(self), Expr::negate(rhs))
    }
}

impl Mul<Expr> for f64 {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(Expr::Const(self), rhs)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(value) => write!(f, "{value}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Field { name, partials } if partials.is_empty() => f.write_str(name),
            Expr::Field { name, partials } => {
                write!(f, "{name}_")?;
                for v in partials {
                    write!(f, "{v}")?;
                }
                Ok(())
            }
            Expr::Add(a, b) => match &**b {
                Expr::Neg(inner) => write!(f, "({a} - {inner})"),
                _ => write!(f, "({a} + {b})"),
            },
            Expr::Mul(a, b) => write!(f, "{a}*{b}"),
            Expr::Neg(a) => write!(f, "-{a}"),
            Expr::Sign(a) => write!(f, "sign({a})"),
            Expr::Sin(a) => write!(f, "sin({a})"),
            Expr::Cos(a) => write!(f, "cos({a})"),
            Expr::Diff {
                expr,
                variable,
                order,
            } => write!(f, "d{order}({expr})/d{variable}{order}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> (Variable, Variable, Field) {
        let t = Variable::new("t");
        let x = Variable::new("x");
        let u = Field::new("u", vec![t.clone(), x.clone()]);
        (t, x, u)
    }

    fn partial(name: &str, partials: &[&Variable]) -> Expr {
        Expr::Field {
            name: name.to_string(),
            partials: partials.iter().map(|v| (*v).clone()).collect(),
        }
    }

    #[test]
    fn constants_fold() {
        let (_, x, _) = vars();
        assert_eq!(Expr::constant(2.0) + 3.0, Expr::Const(5.0));
        assert_eq!(x.expr() * 0.0, Expr::Const(0.0));
        assert_eq!(1.0 * x.expr(), x.expr());
        assert_eq!(x.expr() + 0.0, x.expr());
        assert_eq!(-(-x.expr()), x.expr());
        assert_eq!(sign(-3.0), Expr::Const(-1.0));
        assert_eq!(sign(0.0), Expr::Const(0.0));
    }

    #[test]
    fn diff_of_field_lowers_to_partial() {
        let (_, x, u) = vars();
        let u_xx = diff(&u, &x, 2).lower();
        assert_eq!(u_xx, partial("u", &[&x, &x]));
    }

    #[test]
    fn mixed_partials_are_order_independent() {
        let (t, x, u) = vars();
        let tx = diff(diff(&u, &t, 1), &x, 1).lower();
        let xt = diff(diff(&u, &x, 1), &t, 1).lower();
        assert_eq!(tx, xt);
    }

    #[test]
    fn product_rule_on_field_and_variable() {
        let (_, x, u) = vars();
        // d/dx (x * u) = u + x * u_x
        let lowered = diff(x.expr() * u.expr(), &x, 1).lower();
        let expected = u.expr() + x.expr() * partial("u", &[&x]);
        assert_eq!(lowered, expected);
    }

    #[test]
    fn chain_rule_through_sin() {
        let (_, x, _) = vars();
        let lowered = diff(sin(3.0 * x.expr()), &x, 1).lower();
        assert_eq!(lowered, cos(3.0 * x.expr()) * 3.0);
    }

    #[test]
    fn sign_has_zero_derivative() {
        let (t, _, _) = vars();
        assert_eq!(diff(sign(t.expr() - 0.5), &t, 1).lower(), Expr::Const(0.0));
    }

    #[test]
    fn lowering_is_idempotent() {
        let (t, x, u) = vars();
        let pde = diff(&u, &t, 1) + u.expr() * diff(&u, &x, 1) - 0.1 * diff(&u, &x, 2);
        let once = pde.lower();
        assert_eq!(once.lower(), once);
        assert!(once.variables().iter().all(|v| v == &t || v == &x));
    }

    #[test]
    fn collects_field_partials() {
        let (t, x, u) = vars();
        let pde = diff(&u, &t, 1) + u.expr() * diff(&u, &x, 1) - 0.1 * diff(&u, &x, 2);
        let partials: Vec<_> = pde
            .lower()
            .field_partials()
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(
            partials,
            vec![vec![], vec![t.clone()], vec![x.clone()], vec![x.clone(), x.clone()]]
        );
    }

    #[test]
    fn displays_infix() {
        let (_, x, u) = vars();
        let expr = (u.expr() - diff(&u, &x, 1)).lower();
        assert_eq!(expr.to_string(), "(u - u_x)");
    }
}
