//! # cf-core
//!
//! Core types shared by the cutflow crates: the error taxonomy, the event
//! record model and the Lorentz-vector arithmetic used by derived columns.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod lorentz;

pub use error::{Error, EvalError, EvalResult, Result};
pub use event::{Event, Particle, Value};
pub use lorentz::LorentzVector;
