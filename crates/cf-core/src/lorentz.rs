//! Minimal four-vector type for derived kinematic columns.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Energy-momentum four-vector `(t, x, y, z) = (E, px, py, pz)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LorentzVector {
    /// Energy component.
    pub t: f64,
    /// x momentum.
    pub x: f64,
    /// y momentum.
    pub y: f64,
    /// z momentum.
    pub z: f64,
}

impl LorentzVector {
    /// Build from explicit components.
    #[inline]
    pub fn from_args(t: f64, x: f64, y: f64, z: f64) -> Self {
        LorentzVector { t, x, y, z }
    }

    /// Build from momentum and mass; the energy is `sqrt(p^2 + m^2)`.
    #[inline]
    pub fn from_xyzm(x: f64, y: f64, z: f64, m: f64) -> Self {
        let e = (x * x + y * y + z * z + m * m).sqrt();
        LorentzVector { t: e, x, y, z }
    }

    /// Minkowski square `t^2 - |p|^2`.
    #[inline]
    pub fn square(&self) -> f64 {
        self.t * self.t - self.spatial_squared()
    }

    /// `|p|^2`.
    #[inline]
    pub fn spatial_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Three-vector dot product.
    #[inline]
    pub fn spatial_dot(&self, other: &LorentzVector) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Invariant mass. Space-like vectors return `-sqrt(-m^2)`.
    pub fn mass(&self) -> f64 {
        let m2 = self.square();
        if m2 < 0.0 { -(-m2).sqrt() } else { m2.sqrt() }
    }

    /// Momentum magnitude.
    #[inline]
    pub fn p(&self) -> f64 {
        self.spatial_squared().sqrt()
    }

    /// Transverse momentum.
    #[inline]
    pub fn pt(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Polar angle in `[0, pi]`; 0 for the null vector.
    pub fn theta(&self) -> f64 {
        if self.x == 0.0 && self.y == 0.0 && self.z == 0.0 {
            0.0
        } else {
            self.pt().atan2(self.z)
        }
    }

    /// Azimuthal angle in `(-pi, pi]`.
    pub fn phi(&self) -> f64 {
        if self.x == 0.0 && self.y == 0.0 { 0.0 } else { self.y.atan2(self.x) }
    }

    /// `cos(theta)`; 1 for the null vector.
    pub fn cos_theta(&self) -> f64 {
        let p = self.p();
        if p == 0.0 { 1.0 } else { self.z / p }
    }
}

impl Neg for LorentzVector {
    type Output = LorentzVector;

    fn neg(self) -> LorentzVector {
        LorentzVector { t: -self.t, x: -self.x, y: -self.y, z: -self.z }
    }
}

impl Add for LorentzVector {
    type Output = LorentzVector;

    #[inline]
    fn add(self, other: LorentzVector) -> LorentzVector {
        LorentzVector {
            t: self.t + other.t,
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl<'a> Add<&'a LorentzVector> for &'a LorentzVector {
    type Output = LorentzVector;

    #[inline]
    fn add(self, other: &'a LorentzVector) -> LorentzVector {
        *self + *other
    }
}

impl AddAssign for LorentzVector {
    #[inline]
    fn add_assign(&mut self, other: LorentzVector) {
        *self = *self + other;
    }
}

impl Sub for LorentzVector {
    type Output = LorentzVector;

    #[inline]
    fn sub(self, other: LorentzVector) -> LorentzVector {
        self + (-other)
    }
}

impl SubAssign for LorentzVector {
    #[inline]
    fn sub_assign(&mut self, other: LorentzVector) {
        *self = *self - other;
    }
}
