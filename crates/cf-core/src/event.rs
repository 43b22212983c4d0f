//! Event record model.
//!
//! An [`Event`] is one row of the input dataset: a set of named fields, each
//! holding a [`Value`]. Reconstructed and generator-level particles are both
//! plain particle collections; the reco-to-truth association is carried as two
//! parallel index collections, so it is a relation and never ownership.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lorentz::LorentzVector;

/// One reconstructed or generator-level particle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// x momentum (GeV).
    pub px: f64,
    /// y momentum (GeV).
    pub py: f64,
    /// z momentum (GeV).
    pub pz: f64,
    /// Energy (GeV).
    #[serde(default)]
    pub energy: f64,
    /// Mass (GeV).
    #[serde(default)]
    pub mass: f64,
    /// Electric charge in units of e.
    #[serde(default)]
    pub charge: f64,
    /// PDG particle-type code.
    #[serde(default)]
    pub pdg: i32,
    /// Position inside the collection the particle was read from.
    ///
    /// Set by [`Event::assign_particle_indices`]; association lookups key on it.
    #[serde(default)]
    pub index: usize,
}

impl Particle {
    /// Particle with the given momentum, mass and charge; energy from `p` and `m`.
    pub fn new(px: f64, py: f64, pz: f64, mass: f64, charge: f64) -> Self {
        let energy = (px * px + py * py + pz * pz + mass * mass).sqrt();
        Particle { px, py, pz, energy, mass, charge, pdg: 0, index: 0 }
    }

    /// Set the PDG code.
    pub fn with_pdg(mut self, pdg: i32) -> Self {
        self.pdg = pdg;
        self
    }

    /// Four-vector built from momentum and mass.
    #[inline]
    pub fn p4(&self) -> LorentzVector {
        LorentzVector::from_xyzm(self.px, self.py, self.pz, self.mass)
    }

    /// Momentum magnitude.
    #[inline]
    pub fn p(&self) -> f64 {
        (self.px * self.px + self.py * self.py + self.pz * self.pz).sqrt()
    }

    /// Polar angle.
    #[inline]
    pub fn theta(&self) -> f64 {
        self.p4().theta()
    }

    /// Azimuthal angle.
    #[inline]
    pub fn phi(&self) -> f64 {
        self.p4().phi()
    }

    /// `cos(theta)`.
    #[inline]
    pub fn cos_theta(&self) -> f64 {
        self.p4().cos_theta()
    }
}

/// Value of a column: an input field or a derived quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// A single number.
    Scalar(f64),
    /// A sequence of numbers.
    Values(Vec<f64>),
    /// A sequence of collection indices.
    Indices(Vec<usize>),
    /// A particle collection.
    Particles(Vec<Particle>),
    /// A sequence of four-vectors.
    FourVectors(Vec<LorentzVector>),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Values(_) => "values",
            Value::Indices(_) => "indices",
            Value::Particles(_) => "particles",
            Value::FourVectors(_) => "four_vectors",
        }
    }

    /// Number of elements; `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Scalar(_) => None,
            Value::Values(v) => Some(v.len()),
            Value::Indices(v) => Some(v.len()),
            Value::Particles(v) => Some(v.len()),
            Value::FourVectors(v) => Some(v.len()),
        }
    }

    /// `true` for an empty sequence.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Scalar content, if this is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(x) => Some(*x),
            _ => None,
        }
    }

    /// Numeric element `i` of a `Values` or `Indices` column.
    ///
    /// Returns `None` for non-numeric sequences, `Some(None)` when out of range.
    pub fn numeric_element(&self, i: usize) -> Option<Option<f64>> {
        match self {
            Value::Values(v) => Some(v.get(i).copied()),
            Value::Indices(v) => Some(v.get(i).map(|&x| x as f64)),
            _ => None,
        }
    }

    /// Numbers carried by this value: one for a scalar, every element for
    /// numeric sequences, `None` otherwise.
    pub fn numbers(&self) -> Option<Vec<f64>> {
        match self {
            Value::Scalar(x) => Some(vec![*x]),
            Value::Values(v) => Some(v.clone()),
            Value::Indices(v) => Some(v.iter().map(|&i| i as f64).collect()),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(if b { 1.0 } else { 0.0 })
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Values(v)
    }
}

impl From<Vec<usize>> for Value {
    fn from(v: Vec<usize>) -> Self {
        Value::Indices(v)
    }
}

impl From<Vec<Particle>> for Value {
    fn from(v: Vec<Particle>) -> Self {
        Value::Particles(v)
    }
}

impl From<Vec<LorentzVector>> for Value {
    fn from(v: Vec<LorentzVector>) -> Self {
        Value::FourVectors(v)
    }
}

/// One collision event: named input fields.
///
/// Serialized as a JSON object mapping field names to externally tagged
/// values, e.g. `{"Muon#0.index": {"indices": [0, 2]}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: BTreeMap<String, Value>,
}

impl Event {
    /// Empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an input field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Add a particle collection.
    pub fn with_particles(mut self, name: impl Into<String>, particles: Vec<Particle>) -> Self {
        self.insert(name, particles);
        self.assign_particle_indices();
        self
    }

    /// Add an index collection.
    pub fn with_indices(mut self, name: impl Into<String>, indices: Vec<usize>) -> Self {
        self.insert(name, indices);
        self
    }

    /// Add a scalar field.
    pub fn with_scalar(mut self, name: impl Into<String>, x: f64) -> Self {
        self.insert(name, x);
        self
    }

    /// Add a numeric sequence field.
    pub fn with_values(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.insert(name, values);
        self
    }

    /// Set every particle's `index` to its position in its collection.
    pub fn assign_particle_indices(&mut self) {
        for value in self.fields.values_mut() {
            if let Value::Particles(ps) = value {
                for (i, p) in ps.iter_mut().enumerate() {
                    p.index = i;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn event_json_roundtrip_shape() {
        let json = r#"{
            "ReconstructedParticles": {"particles": [
                {"px": 0.0, "py": 3.0, "pz": 4.0, "energy": 5.0, "charge": -1.0, "pdg": 13},
                {"px": 1.0, "py": 0.0, "pz": 0.0, "energy": 1.0}
            ]},
            "Muon#0.index": {"indices": [0]},
            "ecm": {"scalar": 91.2}
        }"#;
        let mut ev: Event = serde_json::from_str(json).unwrap();
        ev.assign_particle_indices();

        let Some(Value::Particles(ps)) = ev.field("ReconstructedParticles") else {
            panic!("expected particles");
        };
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[1].index, 1);
        assert_relative_eq!(ps[0].p(), 5.0);
        assert_eq!(ps[0].pdg, 13);
        assert_eq!(ev.field("Muon#0.index"), Some(&Value::Indices(vec![0])));
        assert_eq!(ev.field("ecm").and_then(Value::as_scalar), Some(91.2));
        assert!(ev.field("missing").is_none());
    }

    #[test]
    fn value_numbers() {
        assert_eq!(Value::Scalar(2.0).numbers(), Some(vec![2.0]));
        assert_eq!(Value::Indices(vec![1, 3]).numbers(), Some(vec![1.0, 3.0]));
        assert_eq!(Value::Particles(vec![]).numbers(), None);
        assert_eq!(Value::Values(vec![1.0]).numeric_element(1), Some(None));
        assert_eq!(Value::Scalar(1.0).len(), None);
        assert!(Value::Values(vec![]).is_empty());
        assert_eq!(Value::from(true), Value::Scalar(1.0));
    }

    #[test]
    fn particle_kinematics() {
        let p = Particle::new(0.0, 0.0, -10.0, 0.0, 1.0);
        assert_relative_eq!(p.energy, 10.0);
        assert_relative_eq!(p.theta(), std::f64::consts::PI);
        assert_relative_eq!(p.cos_theta(), -1.0);
    }
}
