//! Ordered define/filter/fill pipelines.
//!
//! A [`Pipeline`] is built once from a list of steps and then executed per
//! event. Steps run in declaration order; a failing filter ends the event,
//! and an evaluation error drops the event from every accumulator.
//!
//! ```
//! use cf_core::{Event, Value};
//! use cf_frame::{Axis, Pipeline};
//!
//! let pipeline = Pipeline::builder()
//!     .define_expr("weight", "1.0")
//!     .weight_sum("weight")
//!     .define("n", |row| Ok(Value::Scalar(row.values("pt")?.len() as f64)))
//!     .histo1d("cutFlow", Axis::new(3, 0.0, 3.0), "n")
//!     .build()
//!     .unwrap();
//!
//! let mut acc = pipeline.accumulator();
//! let ev = Event::new().with_values("pt", vec![10.0, 20.0]);
//! pipeline.run_event(&ev, &mut acc).unwrap();
//! assert_eq!(acc.weight_sum, 1.0);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cf_core::{Error, EvalError, EvalResult, Event, Result, Value};

use crate::expr::CompiledExpr;
use crate::histogram::{Axis, Histogram};
use crate::output::PipelineResult;
use crate::row::{Columns, Row};

type DeriveFn = dyn for<'p, 'e> Fn(&Row<'p, 'e>) -> EvalResult<Value> + Send + Sync;
type PredicateFn = dyn for<'p, 'e> Fn(&Row<'p, 'e>) -> EvalResult<bool> + Send + Sync;

/// How a derived column is computed.
#[derive(Clone)]
enum Derivation {
    Expr(CompiledExpr),
    Func(Arc<DeriveFn>),
}

impl Derivation {
    fn eval(&self, row: &Row<'_, '_>) -> EvalResult<Value> {
        match self {
            Derivation::Expr(e) => e.eval(row).map(Value::Scalar),
            Derivation::Func(f) => f(row),
        }
    }
}

/// How a filter decides.
#[derive(Clone)]
enum Predicate {
    Expr(CompiledExpr),
    Func(Arc<PredicateFn>),
}

impl Predicate {
    fn test(&self, row: &Row<'_, '_>) -> EvalResult<bool> {
        match self {
            Predicate::Expr(e) => e.eval_bool(row),
            Predicate::Func(f) => f(row),
        }
    }
}

#[derive(Clone)]
enum Step {
    Alias { name: String, target: String },
    Define { name: String, derivation: Derivation },
    Filter { label: String, predicate: Predicate },
    Fill { slot: usize, column: String, weight: Option<String> },
    WeightSum { column: String },
}

impl Step {
    fn label(&self, histograms: &[(String, Axis)]) -> String {
        match self {
            Step::Alias { name, target } => format!("alias {name} -> {target}"),
            Step::Define { name, .. } => format!("define {name}"),
            Step::Filter { label, .. } => format!("filter {label}"),
            Step::Fill { slot, column, .. } => format!("fill {} <- {column}", histograms[*slot].0),
            Step::WeightSum { column } => format!("weight sum {column}"),
        }
    }
}

/// Per-event failure, located at the step that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepError {
    /// Position of the step in declaration order.
    pub step: usize,
    /// Human-readable description of the step.
    pub label: String,
    /// What went wrong.
    pub source: EvalError,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}): {}", self.step, self.label, self.source)
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Outcome of a successfully processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Reached the end of the pipeline.
    Passed,
    /// Stopped by the filter at this step position.
    Rejected {
        /// Step position of the failing filter.
        step: usize,
    },
}

/// Partition-local accumulator state for one pipeline.
#[derive(Debug, Clone)]
pub struct Accumulator {
    /// One histogram per distinct name, in declaration order.
    pub histograms: Vec<Histogram>,
    /// Sum of weights of every event that completed without error.
    pub weight_sum: f64,
    /// Events that completed without error (passed or rejected).
    pub events_processed: u64,
    /// Events that reached the end of the pipeline.
    pub events_passed: u64,
    /// Events dropped because of an evaluation error.
    pub events_dropped: u64,
    staged: Vec<(usize, f64, f64)>,
}

impl Accumulator {
    /// Add another accumulator built from the same pipeline.
    pub fn merge(&mut self, other: &Accumulator) -> Result<()> {
        if self.histograms.len() != other.histograms.len() {
            return Err(Error::MergeMismatch {
                name: "<pipeline>".into(),
                reason: format!(
                    "{} histograms vs {}",
                    self.histograms.len(),
                    other.histograms.len()
                ),
            });
        }
        for (a, b) in self.histograms.iter_mut().zip(&other.histograms) {
            a.merge(b)?;
        }
        self.weight_sum += other.weight_sum;
        self.events_processed += other.events_processed;
        self.events_passed += other.events_passed;
        self.events_dropped += other.events_dropped;
        Ok(())
    }

    /// Freeze into a name-keyed result.
    pub fn into_result(self) -> PipelineResult {
        PipelineResult {
            histograms: self.histograms.into_iter().map(|h| (h.name.clone(), h)).collect(),
            weight_sum: self.weight_sum,
            events_processed: self.events_processed,
            events_passed: self.events_passed,
            events_dropped: self.events_dropped,
        }
    }
}

/// Builder for a [`Pipeline`].
///
/// Methods record steps in call order. Definition-time problems (bad
/// expression, invalid axis, conflicting binning) are collected and reported
/// by [`PipelineBuilder::build`].
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
    histograms: Vec<(String, Axis)>,
    errors: Vec<Error>,
}

impl PipelineBuilder {
    /// Make `name` another name for the column `target`.
    pub fn alias(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.steps.push(Step::Alias { name: name.into(), target: target.into() });
        self
    }

    /// Define a column with a Rust function of the current row.
    pub fn define<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: for<'p, 'e> Fn(&Row<'p, 'e>) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.steps.push(Step::Define { name: name.into(), derivation: Derivation::Func(Arc::new(f)) });
        self
    }

    /// Define a scalar column from an expression string.
    pub fn define_expr(mut self, name: impl Into<String>, expr: &str) -> Self {
        let name = name.into();
        match CompiledExpr::compile(expr) {
            Ok(e) => self.steps.push(Step::Define { name, derivation: Derivation::Expr(e) }),
            Err(e) => self
                .errors
                .push(Error::Config(format!("define '{name}': cannot compile '{expr}': {e}"))),
        }
        self
    }

    /// Keep only events for which `f` returns true.
    pub fn filter<F>(mut self, label: impl Into<String>, f: F) -> Self
    where
        F: for<'p, 'e> Fn(&Row<'p, 'e>) -> EvalResult<bool> + Send + Sync + 'static,
    {
        self.steps.push(Step::Filter { label: label.into(), predicate: Predicate::Func(Arc::new(f)) });
        self
    }

    /// Keep only events for which the expression is true (`> 0`).
    pub fn filter_expr(mut self, expr: &str) -> Self {
        match CompiledExpr::compile(expr) {
            Ok(e) => self.steps.push(Step::Filter {
                label: e.source().to_string(),
                predicate: Predicate::Expr(e),
            }),
            Err(e) => {
                self.errors.push(Error::Config(format!("filter: cannot compile '{expr}': {e}")))
            }
        }
        self
    }

    /// Fill histogram `name` from `column` with unit weight.
    ///
    /// Scalars fill once; numeric sequences fill once per element. Repeated
    /// declarations of the same name share one accumulator and must use the
    /// same axis.
    pub fn histo1d(self, name: impl Into<String>, axis: Axis, column: impl Into<String>) -> Self {
        self.fill_point(name.into(), axis, column.into(), None)
    }

    /// Like [`PipelineBuilder::histo1d`], weighting each fill by the scalar column `weight`.
    pub fn histo1d_weighted(
        self,
        name: impl Into<String>,
        axis: Axis,
        column: impl Into<String>,
        weight: impl Into<String>,
    ) -> Self {
        self.fill_point(name.into(), axis, column.into(), Some(weight.into()))
    }

    fn fill_point(mut self, name: String, axis: Axis, column: String, weight: Option<String>) -> Self {
        if let Err(e) = axis.validate() {
            self.errors.push(Error::Config(format!("histogram '{name}': {e}")));
            return self;
        }
        let slot = match self.histograms.iter().position(|(n, _)| *n == name) {
            Some(i) if self.histograms[i].1 != axis => {
                let prev = self.histograms[i].1;
                self.errors.push(Error::Config(format!(
                    "histogram '{name}' redeclared with binning ({}, {}, {}), first declared as ({}, {}, {})",
                    axis.n_bins, axis.lo, axis.hi, prev.n_bins, prev.lo, prev.hi
                )));
                return self;
            }
            Some(i) => i,
            None => {
                self.histograms.push((name, axis));
                self.histograms.len() - 1
            }
        };
        self.steps.push(Step::Fill { slot, column, weight });
        self
    }

    /// Accumulate the scalar column `column` into the weight sum.
    ///
    /// Must come before any filter so every input event contributes.
    pub fn weight_sum(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if self.steps.iter().any(|s| matches!(s, Step::WeightSum { .. })) {
            self.errors.push(Error::Config("weight sum declared twice".into()));
        } else if self.steps.iter().any(|s| matches!(s, Step::Filter { .. })) {
            self.errors.push(Error::Config(format!(
                "weight sum of '{column}' must be declared before the first filter"
            )));
        } else {
            self.steps.push(Step::WeightSum { column });
        }
        self
    }

    /// Finish the definition.
    pub fn build(mut self) -> Result<Pipeline> {
        if !self.errors.is_empty() {
            return Err(self.errors.swap_remove(0));
        }
        let labels = self.steps.iter().map(|s| s.label(&self.histograms)).collect();
        Ok(Pipeline { steps: self.steps, histograms: self.histograms, labels })
    }
}

/// A validated, immutable pipeline definition.
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Step>,
    histograms: Vec<(String, Axis)>,
    labels: Vec<String>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("steps", &self.labels).finish()
    }
}

impl Pipeline {
    /// Start a new definition.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Step descriptions in declaration order.
    pub fn step_labels(&self) -> &[String] {
        &self.labels
    }

    /// Declared histogram binnings, keyed by name.
    pub fn histogram_axes(&self) -> BTreeMap<&str, Axis> {
        self.histograms.iter().map(|(n, a)| (n.as_str(), *a)).collect()
    }

    /// Fresh, empty accumulator for this pipeline.
    pub fn accumulator(&self) -> Accumulator {
        Accumulator {
            histograms: self.histograms.iter().map(|(n, a)| Histogram::new(n.clone(), *a)).collect(),
            weight_sum: 0.0,
            events_processed: 0,
            events_passed: 0,
            events_dropped: 0,
            staged: Vec::new(),
        }
    }

    /// Run one event through every step.
    ///
    /// Fills and the weight sum are staged and only committed to `acc` when
    /// the event finishes (passed or rejected). On error nothing is
    /// committed and `events_dropped` is incremented.
    pub fn run_event(
        &self,
        event: &Event,
        acc: &mut Accumulator,
    ) -> std::result::Result<EventStatus, StepError> {
        acc.staged.clear();
        match self.execute(event, &mut acc.staged) {
            Ok((status, weight)) => {
                for &(slot, x, w) in &acc.staged {
                    acc.histograms[slot].fill(x, w);
                }
                acc.weight_sum += weight.unwrap_or(0.0);
                acc.events_processed += 1;
                if status == EventStatus::Passed {
                    acc.events_passed += 1;
                }
                Ok(status)
            }
            Err(e) => {
                acc.events_dropped += 1;
                Err(e)
            }
        }
    }

    fn execute<'p>(
        &'p self,
        event: &Event,
        staged: &mut Vec<(usize, f64, f64)>,
    ) -> std::result::Result<(EventStatus, Option<f64>), StepError> {
        let mut row: Row<'p, '_> = Row::new(event);
        let mut weight = None;

        for (pos, step) in self.steps.iter().enumerate() {
            let at = |source: EvalError| StepError {
                step: pos,
                label: self.labels[pos].clone(),
                source,
            };
            match step {
                Step::Alias { name, target } => {
                    let v = row.column(target).map_err(at)?.clone();
                    row.bind(name, v);
                }
                Step::Define { name, derivation } => {
                    let v = derivation.eval(&row).map_err(at)?;
                    row.bind(name, v);
                }
                Step::Filter { predicate, .. } => {
                    if !predicate.test(&row).map_err(at)? {
                        return Ok((EventStatus::Rejected { step: pos }, weight));
                    }
                }
                Step::Fill { slot, column, weight: wcol } => {
                    let w = match wcol {
                        Some(c) => row.scalar(c).map_err(at)?,
                        None => 1.0,
                    };
                    let value = row.column(column).map_err(at)?;
                    let xs = value.numbers().ok_or_else(|| {
                        at(EvalError::TypeMismatch {
                            column: column.clone(),
                            expected: "scalar or values",
                            found: value.kind(),
                        })
                    })?;
                    staged.extend(xs.into_iter().map(|x| (*slot, x, w)));
                }
                Step::WeightSum { column } => {
                    weight = Some(row.scalar(column).map_err(at)?);
                }
            }
        }
        Ok((EventStatus::Passed, weight))
    }

    /// Run a slice of events sequentially, logging and skipping dropped ones.
    pub fn run_events(&self, events: &[Event]) -> PipelineResult {
        let mut acc = self.accumulator();
        for (i, ev) in events.iter().enumerate() {
            if let Err(e) = self.run_event(ev, &mut acc) {
                log::warn!("dropping event {i}: {e}");
            }
        }
        acc.into_result()
    }
}
