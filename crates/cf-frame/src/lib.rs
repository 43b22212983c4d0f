//! # cf-frame
//!
//! Declarative event-selection pipelines: an ordered chain of column
//! definitions, filters and histogram fills executed per event, with
//! partition-parallel execution and mergeable histogram accumulators.
//!
//! ## Example
//!
//! ```
//! use cf_core::Event;
//! use cf_frame::{Axis, Driver, Pipeline, VecPartition};
//!
//! let pipeline = Pipeline::builder()
//!     .define_expr("weight", "1.0")
//!     .weight_sum("weight")
//!     .define_expr("x2", "x * x")
//!     .filter_expr("x > 0")
//!     .histo1d("x2", Axis::new(10, 0.0, 100.0), "x2")
//!     .build()
//!     .unwrap();
//!
//! let events: Vec<Event> =
//!     (0..5).map(|i| Event::new().with_scalar("x", i as f64 - 1.0)).collect();
//! let result = Driver::new(2).run(&pipeline, &[VecPartition::new("all", events)]).unwrap();
//! assert_eq!(result.weight_sum, 5.0);
//! assert_eq!(result.histograms["x2"].entries, 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod driver;
pub mod expr;
pub mod histogram;
pub mod output;
pub mod pipeline;
pub mod row;

pub use driver::{Driver, Partition, VecPartition, split_rows};
pub use expr::CompiledExpr;
pub use histogram::{Axis, Histogram};
pub use output::{DatasetOutput, PipelineResult, normalization_scale};
pub use pipeline::{Accumulator, EventStatus, Pipeline, PipelineBuilder, StepError};
pub use row::{Columns, Row};
