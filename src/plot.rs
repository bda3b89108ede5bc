use std::path::Path;

use plotters::prelude::*;

use crate::training::History;

/// 学習過程の損失をグラフとしてPNGファイルに出力します。
///
/// 総損失に加え、残差ごとの損失も対数軸で重ねて描画します。
pub fn loss_history(history: &History, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let total = history.losses();
    let terms: Vec<Vec<f32>> = (0..history.term_names().len())
        .map(|i| history.term_losses(i))
        .collect();
    let log_values: Vec<f32> = total
        .iter()
        .chain(terms.iter().flatten())
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| v.log10())
        .collect();
    let max_log_loss = log_values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let min_log_loss = log_values.iter().copied().fold(f32::INFINITY, f32::min);
    let (min_log_loss, max_log_loss) = if log_values.is_empty() {
        (-6.0, 0.0)
    } else {
        (min_log_loss - 0.5, max_log_loss + 0.5)
    };

    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..total.len().max(1), min_log_loss..max_log_loss)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Epochs")
        .draw()?;

    let log_series = |values: &[f32]| -> Vec<(usize, f32)> {
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite() && **v > 0.0)
            .map(|(i, v)| (i, v.log10()))
            .collect()
    };

    chart
        .draw_series(LineSeries::new(log_series(&total), &RED))?
        .label("Total Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    for (i, (name, values)) in history.term_names().iter().zip(&terms).enumerate() {
        let style = Palette99::pick(i + 1).stroke_width(1);
        chart
            .draw_series(LineSeries::new(log_series(values), style))?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 格子上の場の値をカラーバー付きのヒートマップとして出力します。
///
/// `values` は `t` 方向を外側、`x` 方向を内側とする並び（`values[i * x.len() + j]`）です。
/// 横軸が `t`、縦軸が `x` になります。
pub fn field_heatmap(
    t: &[f32],
    x: &[f32],
    values: &[f32],
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if t.len() < 2 || x.len() < 2 || values.len() != t.len() * x.len() {
        return Err("ヒートマップには2x2以上の格子と同じ数の値が必要です".into());
    }
    let (v_min, v_max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let (v_min, v_max) = if v_min < v_max {
        (v_min, v_max)
    } else {
        (v_min - 0.5, v_min + 0.5)
    };

    let root = BitMapBackend::new(path, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (main, bar) = root.split_horizontally(780);

    let mut chart = ChartBuilder::on(&main)
        .caption("u(t, x)", ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(t[0]..t[t.len() - 1], x[0]..x[x.len() - 1])?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("t")
        .y_desc("x")
        .draw()?;

    // 各セルは標本点を中心に置く（端のセルは半分の幅）
    let n_x = x.len();
    let t_edges = cell_edges(t);
    let x_edges = cell_edges(x);
    chart.draw_series(
        (0..t.len())
            .flat_map(|i| (0..n_x).map(move |j| (i, j)))
            .map(|(i, j)| {
                let color = colormap(values[i * n_x + j], v_min, v_max);
                Rectangle::new(
                    [(t_edges[i], x_edges[j]), (t_edges[i + 1], x_edges[j + 1])],
                    color.filled(),
                )
            }),
    )?;

    let mut colorbar = ChartBuilder::on(&bar)
        .margin_top(50)
        .margin_bottom(50)
        .margin_right(10)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0f32..1.0f32, v_min..v_max)?;
    colorbar
        .configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .draw()?;
    let steps = 100;
    colorbar.draw_series((0..steps).map(|k| {
        let lo = v_min + (v_max - v_min) * k as f32 / steps as f32;
        let hi = v_min + (v_max - v_min) * (k + 1) as f32 / steps as f32;
        let color = colormap(0.5 * (lo + hi), v_min, v_max);
        Rectangle::new([(0.0, lo), (1.0, hi)], color.filled())
    }))?;

    root.present()?;
    Ok(())
}

/// 隣り合う標本点の中点をセル境界とします。両端は軸の端点です。
fn cell_edges(axis: &[f32]) -> Vec<f32> {
    let mut edges = Vec::with_capacity(axis.len() + 1);
    edges.push(axis[0]);
    edges.extend(axis.windows(2).map(|w| 0.5 * (w[0] + w[1])));
    edges.push(axis[axis.len() - 1]);
    edges
}

/// 青（最小）から赤（最大）への色対応。
fn colormap(value: f32, v_min: f32, v_max: f32) -> HSLColor {
    let s = ((value - v_min) / (v_max - v_min)).clamp(0.0, 1.0) as f64;
    HSLColor(240.0 / 360.0 * (1.0 - s), 0.85, 0.5)
}
