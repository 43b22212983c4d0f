//! Per-event column bindings.
//!
//! A [`Row`] is the state of one event part-way through a pipeline: the input
//! event plus every column bound so far, in binding order. Bindings are never
//! mutated; rebinding a name pushes a new entry that shadows the old one for
//! later lookups only.

use cf_core::{EvalError, EvalResult, Event, LorentzVector, Particle, Value};

/// Named column lookup.
pub trait Columns {
    /// Resolve a column by name.
    fn lookup(&self, name: &str) -> Option<&Value>;

    /// Resolve a column or fail with [`EvalError::UndefinedColumn`].
    fn column(&self, name: &str) -> EvalResult<&Value> {
        self.lookup(name).ok_or_else(|| EvalError::UndefinedColumn(name.to_string()))
    }
}

impl Columns for Event {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.field(name)
    }
}

/// Event plus the columns derived so far.
pub struct Row<'p, 'e> {
    event: &'e Event,
    names: Vec<&'p str>,
    values: Vec<Value>,
}

impl<'p, 'e> Row<'p, 'e> {
    /// Fresh row with no derived columns.
    pub fn new(event: &'e Event) -> Self {
        Self { event, names: Vec::new(), values: Vec::new() }
    }

    /// The underlying input event.
    pub fn event(&self) -> &'e Event {
        self.event
    }

    /// Bind `name` to `value`, shadowing any earlier binding.
    pub fn bind(&mut self, name: &'p str, value: Value) {
        self.names.push(name);
        self.values.push(value);
    }

    /// Number of bindings made so far (shadowed ones included).
    pub fn n_bindings(&self) -> usize {
        self.names.len()
    }

    /// Scalar column.
    pub fn scalar(&self, name: &str) -> EvalResult<f64> {
        match self.column(name)? {
            Value::Scalar(x) => Ok(*x),
            other => Err(mismatch(name, "scalar", other)),
        }
    }

    /// Numeric sequence column.
    pub fn values(&self, name: &str) -> EvalResult<&[f64]> {
        match self.column(name)? {
            Value::Values(v) => Ok(v),
            other => Err(mismatch(name, "values", other)),
        }
    }

    /// Index collection column.
    pub fn indices(&self, name: &str) -> EvalResult<&[usize]> {
        match self.column(name)? {
            Value::Indices(v) => Ok(v),
            other => Err(mismatch(name, "indices", other)),
        }
    }

    /// Particle collection column.
    pub fn particles(&self, name: &str) -> EvalResult<&[Particle]> {
        match self.column(name)? {
            Value::Particles(v) => Ok(v),
            other => Err(mismatch(name, "particles", other)),
        }
    }

    /// Four-vector sequence column.
    pub fn four_vectors(&self, name: &str) -> EvalResult<&[LorentzVector]> {
        match self.column(name)? {
            Value::FourVectors(v) => Ok(v),
            other => Err(mismatch(name, "four_vectors", other)),
        }
    }
}

impl Columns for Row<'_, '_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        // Newest binding wins.
        self.names
            .iter()
            .rposition(|n| *n == name)
            .map(|i| &self.values[i])
            .or_else(|| self.event.field(name))
    }
}

fn mismatch(column: &str, expected: &'static str, found: &Value) -> EvalError {
    EvalError::TypeMismatch { column: column.to_string(), expected, found: found.kind() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_newest_binding_then_event() {
        let ev = Event::new().with_scalar("x", 1.0).with_scalar("y", 7.0);
        let mut row = Row::new(&ev);
        assert_eq!(row.scalar("x").unwrap(), 1.0);

        row.bind("x", Value::Scalar(2.0));
        row.bind("x", Value::Scalar(3.0));
        assert_eq!(row.scalar("x").unwrap(), 3.0);
        assert_eq!(row.scalar("y").unwrap(), 7.0);
        assert_eq!(row.n_bindings(), 2);
    }

    #[test]
    fn undefined_and_mismatched_columns() {
        let ev = Event::new().with_values("v", vec![1.0]);
        let row = Row::new(&ev);
        assert_eq!(row.scalar("nope"), Err(EvalError::UndefinedColumn("nope".into())));
        assert_eq!(
            row.scalar("v"),
            Err(EvalError::TypeMismatch { column: "v".into(), expected: "scalar", found: "values" })
        );
        assert_eq!(row.values("v").unwrap(), &[1.0]);
    }
}
