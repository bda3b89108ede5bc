//! # コロケーションデータ
//!
//! 座標列は常に変数名をキーにして保持します。モデルへの入力順は
//! [`crate::expr::Field`] の宣言順で決まり、呼び出し側の並びには依存しません。

use std::collections::BTreeMap;

use crate::error::PinnError;
use crate::expr::Variable;

/// `[start, end]` を両端を含めて `n` 等分した点列を返します。
pub fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f32;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + i as f32 * step })
                .collect()
        }
    }
}

/// 変数名から座標列への対応。すべての列は同じ長さを持ちます。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    columns: BTreeMap<String, Vec<f32>>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 変数 `variable` の座標列を追加します。
    pub fn insert(&mut self, variable: &Variable, values: Vec<f32>) -> Result<(), PinnError> {
        if let Some(expected) = self.columns.values().next().map(Vec::len) {
            if values.len() != expected {
                return Err(PinnError::LengthMismatch {
                    name: variable.name().to_string(),
                    expected,
                    found: values.len(),
                });
            }
        }
        self.columns.insert(variable.name().to_string(), values);
        Ok(())
    }

    pub fn with(mut self, variable: &Variable, values: Vec<f32>) -> Result<Self, PinnError> {
        self.insert(variable, values)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// 点の数。
    pub fn len(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 指定した点だけを取り出します（ミニバッチ用）。
    pub fn select(&self, indices: &[usize]) -> Inputs {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| (name.clone(), indices.iter().map(|&i| values[i]).collect()))
            .collect();
        Inputs { columns }
    }
}

/// 残差ごとの教師値。
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// すべての点で0
    Zero,
    Values(Vec<f32>),
}

impl Target {
    /// `len` 点分の教師値を返します。
    pub fn resolve(&self, len: usize) -> Result<Vec<f32>, PinnError> {
        match self {
            Target::Zero => Ok(vec![0.0; len]),
            Target::Values(values) if values.len() == len => Ok(values.clone()),
            Target::Values(values) => Err(PinnError::LengthMismatch {
                name: "target".to_string(),
                expected: len,
                found: values.len(),
            }),
        }
    }

    /// 指定した点の教師値だけを取り出します。
    pub fn select(&self, indices: &[usize]) -> Target {
        match self {
            Target::Zero => Target::Zero,
            Target::Values(values) => Target::Values(indices.iter().map(|&i| values[i]).collect()),
        }
    }
}

/// 軸ごとの点列の直積で作る一様格子。最後の軸が最も速く変化します。
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    axes: Vec<(Variable, Vec<f32>)>,
}

impl Grid {
    pub fn new(axes: Vec<(Variable, Vec<f32>)>) -> Self {
        Self { axes }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(|(_, values)| values.len()).collect()
    }

    pub fn len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|(_, values)| values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn axis(&self, name: &str) -> Option<&[f32]> {
        self.axes
            .iter()
            .find(|(v, _)| v.name() == name)
            .map(|(_, values)| values.as_slice())
    }

    /// 格子のすべての点を変数名付きの座標列として返します。
    pub fn inputs(&self) -> Inputs {
        let len = self.len();
        let mut columns = BTreeMap::new();
        let mut stride = len;
        for (variable, values) in &self.axes {
            stride /= values.len().max(1);
            let column = (0..len)
                .map(|k| values[(k / stride) % values.len()])
                .collect();
            columns.insert(variable.name().to_string(), column);
        }
        Inputs { columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linspace_includes_both_ends() {
        let xs = linspace(-1.0, 1.0, 5);
        assert_eq!(xs.len(), 5);
        assert_eq!(xs[0], -1.0);
        assert_eq!(xs[4], 1.0);
        assert_relative_eq!(xs[1], -0.5);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn grid_is_cartesian_product_last_axis_fastest() {
        let t = Variable::new("t");
        let x = Variable::new("x");
        let grid = Grid::new(vec![(t, vec![0.0, 1.0]), (x, vec![-1.0, 0.0, 1.0])]);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid.shape(), vec![2, 3]);

        let inputs = grid.inputs();
        assert_eq!(inputs.get("t").unwrap(), &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(inputs.get("x").unwrap(), &[-1.0, 0.0, 1.0, -1.0, 0.0, 1.0]);
    }

    #[test]
    fn inputs_reject_length_mismatch() {
        let t = Variable::new("t");
        let x = Variable::new("x");
        let inputs = Inputs::new().with(&t, vec![0.0, 1.0]).unwrap();
        let err = inputs.with(&x, vec![0.0]).unwrap_err();
        assert!(matches!(err, PinnError::LengthMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn select_keeps_columns_aligned() {
        let t = Variable::new("t");
        let x = Variable::new("x");
        let inputs = Inputs::new()
            .with(&t, vec![0.0, 0.5, 1.0])
            .and_then(|i| i.with(&x, vec![-1.0, 0.0, 1.0]))
            .unwrap();
        let batch = inputs.select(&[2, 0]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get("t").unwrap(), &[1.0, 0.0]);
        assert_eq!(batch.get("x").unwrap(), &[1.0, -1.0]);
    }

    #[test]
    fn target_values_must_match_length() {
        assert_eq!(Target::Zero.resolve(3).unwrap(), vec![0.0; 3]);
        assert!(Target::Values(vec![1.0]).resolve(2).is_err());
    }
}
