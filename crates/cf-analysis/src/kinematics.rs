//! Particle-collection helpers used as derived columns.
//!
//! All functions are pure. Those that can fail return [`EvalResult`] so a
//! malformed event is dropped by the pipeline instead of aborting the run.

use cf_core::{EvalError, EvalResult, LorentzVector, Particle};

/// Gather `collection[i]` for every `i` in `indices`.
///
/// `column` names the collection in the error when an index is out of range.
pub fn select(indices: &[usize], collection: &[Particle], column: &str) -> EvalResult<Vec<Particle>> {
    indices
        .iter()
        .map(|&i| {
            collection.get(i).copied().ok_or_else(|| EvalError::IndexOutOfRange {
                column: column.to_string(),
                index: i,
                len: collection.len(),
            })
        })
        .collect()
}

/// Momentum magnitudes.
pub fn momenta(ps: &[Particle]) -> Vec<f64> {
    ps.iter().map(Particle::p).collect()
}

/// Polar angles.
pub fn thetas(ps: &[Particle]) -> Vec<f64> {
    ps.iter().map(Particle::theta).collect()
}

/// Azimuthal angles.
pub fn phis(ps: &[Particle]) -> Vec<f64> {
    ps.iter().map(Particle::phi).collect()
}

/// `cos(theta)` per particle.
pub fn cos_thetas(ps: &[Particle]) -> Vec<f64> {
    ps.iter().map(Particle::cos_theta).collect()
}

/// Charges.
pub fn charges(ps: &[Particle]) -> Vec<f64> {
    ps.iter().map(|p| p.charge).collect()
}

/// Keep particles whose `prop` value lies strictly inside `(min, max)`.
///
/// With `abs`, the absolute value of `prop` is compared. `prop` is parallel
/// to `particles`; a shorter `prop` is an index error.
pub fn sel_range(
    min: f64,
    max: f64,
    abs: bool,
    particles: &[Particle],
    prop: &[f64],
    column: &str,
) -> EvalResult<Vec<Particle>> {
    if prop.len() < particles.len() {
        return Err(EvalError::IndexOutOfRange {
            column: column.to_string(),
            index: prop.len(),
            len: prop.len(),
        });
    }
    Ok(particles
        .iter()
        .zip(prop)
        .filter(|(_, v)| {
            let v = if abs { v.abs() } else { **v };
            v > min && v < max
        })
        .map(|(p, _)| *p)
        .collect())
}

/// Four-vectors from momentum and mass.
pub fn lorentz_vectors(ps: &[Particle]) -> Vec<LorentzVector> {
    ps.iter().map(Particle::p4).collect()
}

/// Acolinearity of the first two particles: `pi` minus their opening angle.
///
/// 0 for exactly back-to-back momenta.
pub fn acolinearity(ps: &[Particle], column: &str) -> EvalResult<f64> {
    let [a, b, ..] = ps else {
        return Err(EvalError::IndexOutOfRange {
            column: column.to_string(),
            index: 1,
            len: ps.len(),
        });
    };
    let (va, vb) = (a.p4(), b.p4());
    let norm = va.p() * vb.p();
    if norm == 0.0 {
        return Err(EvalError::Derivation(format!(
            "acolinearity of '{column}': zero-momentum particle"
        )));
    }
    Ok((-va.spatial_dot(&vb) / norm).clamp(-1.0, 1.0).acos())
}

/// Follow the reco-to-truth association for each particle in `selected`.
///
/// `recind[k]` and `mcind[k]` form one association: reconstructed particle
/// `recind[k]` matches generator particle `mcind[k]`. Particles are matched
/// on [`Particle::index`]. Unmatched particles, or associations pointing
/// past the end of `mc`, are skipped.
pub fn rp2mc(selected: &[Particle], recind: &[usize], mcind: &[usize], mc: &[Particle]) -> Vec<Particle> {
    selected
        .iter()
        .filter_map(|p| {
            let found = recind
                .iter()
                .zip(mcind)
                .find(|&(&r, _)| r == p.index)
                .and_then(|(_, &m)| mc.get(m).copied());
            if found.is_none() {
                log::debug!("no generator match for reconstructed particle {}", p.index);
            }
            found
        })
        .collect()
}
