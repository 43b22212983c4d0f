//! # cf-analysis
//!
//! Physics content on top of `cf-frame`: particle-collection helpers, the
//! bundled Z -> mu mu selections, and the arithmetic that turns filled
//! histograms into yields, acceptances and forward-backward asymmetries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kinematics;
pub mod observables;
pub mod zmumu;

pub use observables::{AfbFit, AfbMeasurement, Yield, acceptance, afb_count, afb_fit, afb_points, yields};
pub use zmumu::Analysis;
