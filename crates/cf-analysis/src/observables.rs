//! Summary statistics derived from dataset outputs.
//!
//! - **Yields**: cut-flow content at the final selection bin, raw and
//!   normalized to a luminosity.
//! - **Acceptance**: selected over total, from the same cut-flow counter.
//! - **Forward-backward asymmetry** from the `cosThetac` distribution, by
//!   counting and by a weighted least-squares fit of
//!   `N * (3 (1 + x^2) / 8 + A x)`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use cf_core::{Error, Result};
use cf_frame::{DatasetOutput, Histogram, normalization_scale};

/// Cut-flow histogram name used by the bundled analyses.
pub const CUT_FLOW: &str = "cutFlow";

/// Event yield of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Yield {
    /// Process name.
    pub process: String,
    /// Cross section (pb).
    pub cross_section: f64,
    /// Generated events.
    pub events_generated: u64,
    /// Raw selected count.
    pub bare: f64,
    /// Selected count expected at `lumi`.
    pub normalized: f64,
    /// Luminosity used for `normalized` (pb^-1).
    pub lumi: f64,
}

/// Yields at cut-flow bin `bin` for every output.
pub fn yields(outputs: &[DatasetOutput], lumi: f64, bin: usize) -> Result<Vec<Yield>> {
    outputs
        .iter()
        .map(|out| {
            let cut_flow = out.result.histogram(CUT_FLOW)?;
            check_bin(cut_flow, bin)?;
            let bare = cut_flow.content(bin) / out.applied_scale()?;
            let norm = normalization_scale(lumi, out.cross_section, out.events_generated)?;
            Ok(Yield {
                process: out.process.clone(),
                cross_section: out.cross_section,
                events_generated: out.events_generated,
                bare,
                normalized: bare * norm,
                lumi,
            })
        })
        .collect()
}

/// Cut-flow content at `selected` over content at `total`.
pub fn acceptance(out: &DatasetOutput, total: usize, selected: usize) -> Result<f64> {
    let cut_flow = out.result.histogram(CUT_FLOW)?;
    check_bin(cut_flow, total)?;
    check_bin(cut_flow, selected)?;
    let n_tot = cut_flow.content(total);
    if n_tot <= 0.0 {
        return Err(Error::Computation(format!(
            "'{}': empty cut-flow bin {total}, acceptance undefined",
            out.process
        )));
    }
    Ok(cut_flow.content(selected) / n_tot)
}

fn check_bin(h: &Histogram, bin: usize) -> Result<()> {
    if bin >= h.axis.n_bins {
        return Err(Error::Validation(format!(
            "bin {bin} out of range for '{}' ({} bins)",
            h.name, h.axis.n_bins
        )));
    }
    Ok(())
}

/// `(center, content)` for every in-range bin with `abs_min <= |center| <= abs_max`.
pub fn afb_points(h: &Histogram, abs_min: f64, abs_max: f64) -> Vec<(f64, f64)> {
    (0..h.axis.n_bins)
        .map(|i| (h.axis.center(i), h.content(i)))
        .filter(|(x, _)| (abs_min..=abs_max).contains(&x.abs()))
        .collect()
}

/// Asymmetry by counting forward and backward events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AfbMeasurement {
    /// Events with `cos theta >= 0`.
    pub n_forward: f64,
    /// Events with `cos theta < 0`.
    pub n_backward: f64,
    /// `N_F + N_B`.
    pub n_total: f64,
    /// `(N_F - N_B) / (N_F + N_B)`.
    pub afb: f64,
    /// Binomial error `sqrt(4 N_F N_B / N^3)`.
    pub error: f64,
}

/// Count forward and backward events over `points`.
pub fn afb_count(points: &[(f64, f64)]) -> Result<AfbMeasurement> {
    let (n_f, n_b) = points.iter().fold((0.0, 0.0), |(f, b), &(x, y)| {
        if x < 0.0 { (f, b + y) } else { (f + y, b) }
    });
    let n = n_f + n_b;
    if n <= 0.0 {
        return Err(Error::Computation("no events in the asymmetry window".into()));
    }
    Ok(AfbMeasurement {
        n_forward: n_f,
        n_backward: n_b,
        n_total: n,
        afb: (n_f - n_b) / n,
        error: (4.0 * n_f * n_b / n.powi(3)).sqrt(),
    })
}

/// Result of the angular fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AfbFit {
    /// Fitted normalization `N`.
    pub norm: f64,
    /// Error on `N`.
    pub norm_error: f64,
    /// Fitted asymmetry `A`.
    pub afb: f64,
    /// Error on `A`.
    pub error: f64,
    /// Weighted sum of squared residuals.
    pub chi2: f64,
    /// Points used minus two.
    pub ndf: usize,
}

/// Fit `y = N (3 (1 + x^2) / 8 + A x)` to `points`, with `sigma_i = sqrt(y_i)`.
///
/// The model is linear in `(N, N A)`; `A` and its error follow from the 2x2
/// covariance of that pair. Points with `y <= 0` carry no weight and are
/// skipped.
pub fn afb_fit(points: &[(f64, f64)]) -> Result<AfbFit> {
    let used: Vec<(f64, f64)> = points.iter().copied().filter(|&(_, y)| y > 0.0).collect();
    let n = used.len();
    if n < 2 {
        return Err(Error::Computation(format!("need at least 2 populated points, got {n}")));
    }

    // Rows scaled by 1/sigma: design [f(x), x], target y.
    let mut x_data = Vec::with_capacity(n * 2);
    let mut y_data = Vec::with_capacity(n);
    for &(x, y) in &used {
        let inv_sigma = 1.0 / y.sqrt();
        x_data.push(3.0 * (1.0 + x * x) / 8.0 * inv_sigma);
        x_data.push(x * inv_sigma);
        y_data.push(y * inv_sigma);
    }
    let x_mat = DMatrix::from_row_slice(n, 2, &x_data);
    let y_vec = DVector::from_column_slice(&y_data);

    let xtx = x_mat.transpose() * &x_mat;
    let cov = xtx
        .try_inverse()
        .ok_or_else(|| Error::Computation("singular normal matrix in asymmetry fit".into()))?;
    let beta = &cov * (x_mat.transpose() * &y_vec);
    let (a, b) = (beta[0], beta[1]);
    if a == 0.0 {
        return Err(Error::Computation("fitted normalization is zero".into()));
    }

    let resid = &y_vec - &x_mat * &beta;
    let chi2 = resid.iter().map(|r| r * r).sum();

    // A = b / a; gradient (-b / a^2, 1 / a).
    let afb = b / a;
    let (ga, gb) = (-b / (a * a), 1.0 / a);
    let var_afb = ga * ga * cov[(0, 0)] + gb * gb * cov[(1, 1)] + 2.0 * ga * gb * cov[(0, 1)];

    Ok(AfbFit {
        norm: a,
        norm_error: cov[(0, 0)].sqrt(),
        afb,
        error: var_afb.max(0.0).sqrt(),
        chi2,
        ndf: n - 2,
    })
}
