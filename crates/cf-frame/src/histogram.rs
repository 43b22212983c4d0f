//! Weighted 1D histogram accumulator.
//!
//! Binning is fixed when the histogram is declared. Values below the lower
//! edge go to the underflow bin; values at or above the upper edge, and NaN,
//! go to the overflow bin. Nothing is ever dropped.

use cf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Uniform binning: `n_bins` bins over `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Number of in-range bins.
    pub n_bins: usize,
    /// Lower edge of the first bin.
    pub lo: f64,
    /// Upper edge of the last bin.
    pub hi: f64,
}

impl Axis {
    /// New axis. Validated by [`Axis::validate`] when a pipeline is built.
    pub const fn new(n_bins: usize, lo: f64, hi: f64) -> Self {
        Axis { n_bins, lo, hi }
    }

    /// Check the axis is usable.
    pub fn validate(&self) -> Result<()> {
        if self.n_bins == 0 {
            return Err(Error::Config("axis needs at least one bin".into()));
        }
        if !self.lo.is_finite() || !self.hi.is_finite() || self.lo >= self.hi {
            return Err(Error::Config(format!(
                "invalid axis range: expected finite lo < hi, got ({}, {})",
                self.lo, self.hi
            )));
        }
        Ok(())
    }

    /// Bin width.
    #[inline]
    pub fn width(&self) -> f64 {
        (self.hi - self.lo) / self.n_bins as f64
    }

    /// Bin edges (length `n_bins + 1`).
    pub fn edges(&self) -> Vec<f64> {
        let w = self.width();
        (0..=self.n_bins)
            .map(|i| if i == self.n_bins { self.hi } else { self.lo + i as f64 * w })
            .collect()
    }

    /// Center of in-range bin `i`.
    #[inline]
    pub fn center(&self, i: usize) -> f64 {
        self.lo + (i as f64 + 0.5) * self.width()
    }

    /// Where `x` lands.
    pub fn locate(&self, x: f64) -> Slot {
        if x < self.lo {
            Slot::Underflow
        } else if x < self.hi {
            let b = ((x - self.lo) / (self.hi - self.lo) * self.n_bins as f64) as usize;
            // Rounding can push values just below `hi` onto n_bins.
            Slot::Bin(b.min(self.n_bins - 1))
        } else {
            Slot::Overflow
        }
    }
}

/// Destination of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Below the lower edge.
    Underflow,
    /// In-range bin index.
    Bin(usize),
    /// At or above the upper edge, or NaN.
    Overflow,
}

/// A filled 1D histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Binning.
    pub axis: Axis,
    /// Bin contents (sum of weights per bin, excluding under/overflow).
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights.
    pub underflow: f64,
    /// Overflow sum of weights.
    pub overflow: f64,
    /// Underflow sum of weights squared.
    pub underflow_sumw2: f64,
    /// Overflow sum of weights squared.
    pub overflow_sumw2: f64,
    /// Number of fills, flow bins included.
    pub entries: u64,
}

impl Histogram {
    /// Empty histogram. The axis must already be valid.
    pub fn new(name: impl Into<String>, axis: Axis) -> Self {
        Histogram {
            name: name.into(),
            axis,
            bin_content: vec![0.0; axis.n_bins],
            sumw2: vec![0.0; axis.n_bins],
            underflow: 0.0,
            overflow: 0.0,
            underflow_sumw2: 0.0,
            overflow_sumw2: 0.0,
            entries: 0,
        }
    }

    /// Add `weight` to the bin containing `x`.
    pub fn fill(&mut self, x: f64, weight: f64) {
        let w2 = weight * weight;
        match self.axis.locate(x) {
            Slot::Underflow => {
                self.underflow += weight;
                self.underflow_sumw2 += w2;
            }
            Slot::Overflow => {
                self.overflow += weight;
                self.overflow_sumw2 += w2;
            }
            Slot::Bin(b) => {
                self.bin_content[b] += weight;
                self.sumw2[b] += w2;
            }
        }
        self.entries += 1;
    }

    /// Add another accumulator of the same name and binning, bin by bin.
    pub fn merge(&mut self, other: &Histogram) -> Result<()> {
        if self.name != other.name {
            return Err(Error::MergeMismatch {
                name: self.name.clone(),
                reason: format!("other histogram is named '{}'", other.name),
            });
        }
        if self.axis != other.axis {
            return Err(Error::MergeMismatch {
                name: self.name.clone(),
                reason: format!(
                    "binning ({}, {}, {}) vs ({}, {}, {})",
                    self.axis.n_bins,
                    self.axis.lo,
                    self.axis.hi,
                    other.axis.n_bins,
                    other.axis.lo,
                    other.axis.hi
                ),
            });
        }
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.underflow_sumw2 += other.underflow_sumw2;
        self.overflow_sumw2 += other.overflow_sumw2;
        self.entries += other.entries;
        Ok(())
    }

    /// Multiply contents by `s` and variances by `s^2`.
    pub fn scale(&mut self, s: f64) {
        let s2 = s * s;
        self.bin_content.iter_mut().for_each(|c| *c *= s);
        self.sumw2.iter_mut().for_each(|v| *v *= s2);
        self.underflow *= s;
        self.overflow *= s;
        self.underflow_sumw2 *= s2;
        self.overflow_sumw2 *= s2;
    }

    /// Merge groups of `k` adjacent bins. `k` must divide the bin count.
    pub fn rebin(&self, k: usize) -> Result<Histogram> {
        if k == 0 || self.axis.n_bins % k != 0 {
            return Err(Error::Validation(format!(
                "cannot rebin '{}' ({} bins) by {}",
                self.name, self.axis.n_bins, k
            )));
        }
        let group = |v: &[f64]| v.chunks(k).map(|c| c.iter().sum()).collect::<Vec<f64>>();
        Ok(Histogram {
            name: self.name.clone(),
            axis: Axis::new(self.axis.n_bins / k, self.axis.lo, self.axis.hi),
            bin_content: group(&self.bin_content),
            sumw2: group(&self.sumw2),
            ..self.clone()
        })
    }

    /// Content of in-range bin `i`; 0 past the end.
    pub fn content(&self, i: usize) -> f64 {
        self.bin_content.get(i).copied().unwrap_or(0.0)
    }

    /// Statistical error per in-range bin, `sqrt(sumw2)`.
    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|v| v.sqrt()).collect()
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn filled(name: &str, axis: Axis, xs: &[(f64, f64)]) -> Histogram {
        let mut h = Histogram::new(name, axis);
        for &(x, w) in xs {
            h.fill(x, w);
        }
        h
    }

    #[test]
    fn flow_convention() {
        let h = filled(
            "h",
            Axis::new(10, 0.0, 10.0),
            &[(-1.0, 1.0), (0.0, 1.0), (5.0, 1.0), (9.0, 1.0), (10.0, 1.0), (15.0, 1.0)],
        );
        assert_eq!(h.underflow, 1.0);
        assert_eq!(h.overflow, 2.0);
        let mut expected = vec![0.0; 10];
        expected[0] = 1.0;
        expected[5] = 1.0;
        expected[9] = 1.0;
        assert_eq!(h.bin_content, expected);
        assert_eq!(h.entries, 6);
    }

    #[test]
    fn nan_goes_to_overflow() {
        let h = filled("h", Axis::new(2, 0.0, 1.0), &[(f64::NAN, 2.0)]);
        assert_eq!(h.overflow, 2.0);
        assert_eq!(h.overflow_sumw2, 4.0);
    }

    #[test]
    fn just_below_upper_edge_stays_in_range() {
        let axis = Axis::new(3, 0.0, 0.3);
        let below = f64::from_bits(0.3f64.to_bits() - 1);
        assert_eq!(axis.locate(below), Slot::Bin(2));
        assert_eq!(axis.locate(0.3), Slot::Overflow);
    }

    #[test]
    fn weighted_fill_tracks_sumw2() {
        let h = filled("h", Axis::new(2, 0.0, 2.0), &[(0.5, 2.0), (1.5, 3.0), (0.5, 1.0)]);
        assert_eq!(h.bin_content, vec![3.0, 3.0]);
        assert_eq!(h.sumw2, vec![5.0, 9.0]);
        assert_relative_eq!(h.errors()[1], 3.0);
    }

    #[test]
    fn scale_multiplies_content_and_variance() {
        let mut h = filled("h", Axis::new(2, 0.0, 2.0), &[(0.5, 2.0), (-1.0, 1.0), (3.0, 1.0)]);
        h.scale(3.0);
        assert_eq!(h.bin_content, vec![6.0, 0.0]);
        assert_eq!(h.sumw2, vec![36.0, 0.0]);
        assert_eq!(h.underflow, 3.0);
        assert_eq!(h.overflow_sumw2, 9.0);
    }

    #[test]
    fn merge_rejects_different_binning_or_name() {
        let mut a = Histogram::new("h", Axis::new(2, 0.0, 2.0));
        let b = Histogram::new("h", Axis::new(3, 0.0, 2.0));
        assert!(matches!(a.merge(&b), Err(Error::MergeMismatch { .. })));
        let c = Histogram::new("g", Axis::new(2, 0.0, 2.0));
        assert!(matches!(a.merge(&c), Err(Error::MergeMismatch { .. })));
    }

    #[test]
    fn rebin_groups_adjacent_bins() {
        let h = filled("h", Axis::new(4, 0.0, 4.0), &[(0.5, 1.0), (1.5, 2.0), (3.5, 3.0)]);
        let r = h.rebin(2).unwrap();
        assert_eq!(r.axis, Axis::new(2, 0.0, 4.0));
        assert_eq!(r.bin_content, vec![3.0, 3.0]);
        assert_eq!(r.sumw2, vec![5.0, 9.0]);
        assert!(h.rebin(3).is_err());
    }

    #[test]
    fn axis_validation_and_edges() {
        assert!(Axis::new(0, 0.0, 1.0).validate().is_err());
        assert!(Axis::new(1, 1.0, 1.0).validate().is_err());
        assert!(Axis::new(1, 0.0, f64::INFINITY).validate().is_err());
        let a = Axis::new(4, -1.0, 1.0);
        assert!(a.validate().is_ok());
        assert_eq!(a.edges(), vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_relative_eq!(a.center(0), -0.75);
    }

    fn arb_fills() -> impl Strategy<Value = Vec<(f64, f64)>> {
        proptest::collection::vec((-2.0f64..12.0, 0.0f64..5.0), 0..40)
    }

    proptest! {
        #[test]
        fn merging_empty_is_identity(xs in arb_fills()) {
            let axis = Axis::new(10, 0.0, 10.0);
            let h = filled("h", axis, &xs);
            let mut m = h.clone();
            m.merge(&Histogram::new("h", axis)).unwrap();
            prop_assert_eq!(m, h);
        }

        #[test]
        fn merge_is_commutative_and_associative(
            a in arb_fills(),
            b in arb_fills(),
            c in arb_fills(),
        ) {
            let axis = Axis::new(10, 0.0, 10.0);
            let (ha, hb, hc) = (filled("h", axis, &a), filled("h", axis, &b), filled("h", axis, &c));

            let mut ab = ha.clone();
            ab.merge(&hb).unwrap();
            let mut ba = hb.clone();
            ba.merge(&ha).unwrap();
            prop_assert_eq!(&ab, &ba);

            let mut ab_c = ab.clone();
            ab_c.merge(&hc).unwrap();
            let mut bc = hb.clone();
            bc.merge(&hc).unwrap();
            let mut a_bc = ha.clone();
            a_bc.merge(&bc).unwrap();
            for i in 0..axis.n_bins {
                prop_assert!((ab_c.bin_content[i] - a_bc.bin_content[i]).abs() < 1e-9);
                prop_assert!((ab_c.sumw2[i] - a_bc.sumw2[i]).abs() < 1e-9);
            }
            prop_assert_eq!(ab_c.entries, a_bc.entries);
        }
    }
}
