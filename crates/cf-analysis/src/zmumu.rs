//! Bundled e+e- -> Z -> mu+ mu- selections.
//!
//! Both pipelines share the muon selection and the first five cut-flow
//! steps:
//!
//! | bin | requirement                                   |
//! |-----|-----------------------------------------------|
//! | 0   | all events                                    |
//! | 1   | at least one muon with `abs(cos theta) < 0.97`|
//! | 2   | at least two such muons                       |
//! | 3   | exactly two, with opposite charge             |
//! | 4   | leading muon momentum / 45.6 GeV > 0.6        |
//!
//! The asymmetry pipeline adds an acolinearity cut (bin 5) and the
//! generator-level angles reached through the reco-to-truth association.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cf_core::{Error, EvalError, Particle, Result, Value};
use cf_frame::{Axis, Pipeline, PipelineBuilder};

use crate::kinematics;

/// Reconstructed particle collection.
pub const RECO_PARTICLES: &str = "ReconstructedParticles";
/// Generator-level particle collection.
pub const GEN_PARTICLES: &str = "Particle";
/// Muon indices into [`RECO_PARTICLES`].
pub const MUON_INDEX: &str = "Muon#0.index";
/// Reconstructed side of the reco-to-truth association.
pub const ASSOC_RECO_INDEX: &str = "MCRecoAssociations#0.index";
/// Generator side of the reco-to-truth association.
pub const ASSOC_GEN_INDEX: &str = "MCRecoAssociations#1.index";

/// Half the Z mass, the nominal muon momentum at the pole (GeV).
pub const BEAM_MOMENTUM: f64 = 45.6;
/// Maximum acolinearity kept by the asymmetry selection: 15 degrees.
pub const MAX_ACOLINEARITY: f64 = 0.261799388;

/// Histogram binnings of a bundled analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binnings {
    /// Muon momentum.
    pub p_mu: Axis,
    /// Dimuon invariant mass.
    pub m_ll: Axis,
    /// Polar angles.
    pub theta: Axis,
    /// Azimuthal angles.
    pub phi: Axis,
    /// Cut-flow counter.
    pub count: Axis,
    /// Cosines.
    pub cos: Axis,
    /// Normalized momentum.
    pub norm: Axis,
    /// Acolinearity.
    pub aco: Axis,
}

impl Binnings {
    /// 1 GeV momentum and mass bins.
    pub const COARSE: Binnings = Binnings {
        p_mu: Axis::new(200, 0.0, 200.0),
        m_ll: Axis::new(200, 0.0, 200.0),
        theta: Axis::new(500, -5.0, 5.0),
        phi: Axis::new(500, -5.0, 5.0),
        count: Axis::new(50, 0.0, 50.0),
        cos: Axis::new(100, -1.0, 1.0),
        norm: Axis::new(200, 0.0, 2.0),
        aco: Axis::new(800, -4.0, 4.0),
    };

    /// 10 MeV momentum and mass bins.
    pub const FINE: Binnings = Binnings {
        p_mu: Axis::new(20000, 0.0, 200.0),
        m_ll: Axis::new(20000, 0.0, 200.0),
        ..Binnings::COARSE
    };
}

/// A bundled analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analysis {
    /// Cross-section selection (cuts 0-4).
    ZmumuXsec,
    /// Forward-backward asymmetry selection (cuts 0-5, reco and gen angles).
    ZmumuAfb,
}

impl Analysis {
    /// Every bundled analysis.
    pub const ALL: [Analysis; 2] = [Analysis::ZmumuXsec, Analysis::ZmumuAfb];

    /// Configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            Analysis::ZmumuXsec => "zmumu_xsec",
            Analysis::ZmumuAfb => "zmumu_afb",
        }
    }

    /// Build the pipeline.
    pub fn pipeline(&self) -> Result<Pipeline> {
        match self {
            Analysis::ZmumuXsec => xsec_pipeline(),
            Analysis::ZmumuAfb => afb_pipeline(),
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Analysis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Analysis::ALL.into_iter().find(|a| a.name() == s).ok_or_else(|| {
            let known: Vec<&str> = Analysis::ALL.iter().map(Analysis::name).collect();
            Error::Config(format!("unknown analysis '{s}' (known: {})", known.join(", ")))
        })
    }
}

/// Define `name` as `f` applied to the particle column `source`.
fn per_particle(
    b: PipelineBuilder,
    name: &str,
    source: &str,
    f: fn(&[Particle]) -> Vec<f64>,
) -> PipelineBuilder {
    let source = source.to_string();
    b.define(name, move |row| Ok(Value::Values(f(row.particles(&source)?))))
}

/// Define `name` as the number of particles in `source`.
fn count(b: PipelineBuilder, name: &str, source: &str) -> PipelineBuilder {
    let source = source.to_string();
    b.define(name, move |row| Ok(Value::Scalar(row.particles(&source)?.len() as f64)))
}

fn cut(b: PipelineBuilder, k: usize, axis: Axis) -> PipelineBuilder {
    let name = format!("cut{k}");
    b.define_expr(name.clone(), &k.to_string()).histo1d("cutFlow", axis, name)
}

/// Muon selection and cuts 0-4.
fn muon_selection(bins: &Binnings) -> PipelineBuilder {
    let mut b = Pipeline::builder()
        .define_expr("weight", "1.0")
        .weight_sum("weight")
        .alias("Muons", MUON_INDEX)
        .define("muons_all", |row| {
            let idx = row.indices("Muons")?;
            let reco = row.particles(RECO_PARTICLES)?;
            Ok(Value::Particles(kinematics::select(idx, reco, RECO_PARTICLES)?))
        });
    b = per_particle(b, "muons_all_p", "muons_all", kinematics::momenta);
    b = per_particle(b, "muons_all_theta", "muons_all", kinematics::thetas);
    b = per_particle(b, "muons_all_costheta", "muons_all", kinematics::cos_thetas);
    b = per_particle(b, "muons_all_phi", "muons_all", kinematics::phis);
    b = per_particle(b, "muons_all_q", "muons_all", kinematics::charges);
    b = count(b, "muons_all_no", "muons_all");
    b = b
        .histo1d("muons_all_costheta", bins.cos, "muons_all_costheta")
        .histo1d("muons_all_no", bins.count, "muons_all_no")
        .define("muons", |row| {
            let muons = row.particles("muons_all")?;
            let cos = row.values("muons_all_costheta")?;
            Ok(Value::Particles(kinematics::sel_range(0.0, 0.97, true, muons, cos, "muons_all_costheta")?))
        });
    b = per_particle(b, "muons_p", "muons", kinematics::momenta);
    b = per_particle(b, "muons_theta", "muons", kinematics::thetas);
    b = per_particle(b, "muons_phi", "muons", kinematics::phis);
    b = per_particle(b, "muons_q", "muons", kinematics::charges);
    b = count(b, "muons_no", "muons");

    b = cut(b, 0, bins.count);
    b = b.histo1d("muons_no", bins.count, "muons_no").filter_expr("muons_no >= 1");
    b = cut(b, 1, bins.count);
    b = b.filter_expr("muons_no >= 2");
    b = cut(b, 2, bins.count);
    b = b.filter_expr("muons_no == 2 && (muons_q[0] + muons_q[1]) == 0");
    b = cut(b, 3, bins.count);
    b = b
        .histo1d("muons_p", bins.p_mu, "muons_p")
        .histo1d("muons_theta", bins.theta, "muons_theta")
        .histo1d("muons_phi", bins.phi, "muons_phi")
        .define_expr("muon_max_p", "(muons_p[0] > muons_p[1]) ? muons_p[0] : muons_p[1]")
        .define_expr("muon_max_p_norm", &format!("muon_max_p / {BEAM_MOMENTUM}"))
        .histo1d("muon_max_p_norm", bins.norm, "muon_max_p_norm")
        .filter_expr("muon_max_p_norm > 0.6");
    cut(b, 4, bins.count)
}

fn acolinearity(b: PipelineBuilder, bins: &Binnings) -> PipelineBuilder {
    b.define("acolinearity", |row| {
        Ok(Value::Scalar(kinematics::acolinearity(row.particles("muons")?, "muons")?))
    })
    .histo1d("acolinearity", bins.aco, "acolinearity")
}

fn invariant_mass(b: PipelineBuilder, bins: &Binnings, prefix: &str, muons: &str) -> PipelineBuilder {
    let tlv = format!("{prefix}leps_tlv");
    let mass = format!("{prefix}invariant_mass");
    let muons = muons.to_string();
    let tlv_in = tlv.clone();
    b.define(tlv.clone(), move |row| Ok(Value::FourVectors(kinematics::lorentz_vectors(row.particles(&muons)?))))
        .define(mass.clone(), move |row| match row.four_vectors(&tlv_in)? {
            [l1, l2, ..] => Ok(Value::Scalar((l1 + l2).mass())),
            short => Err(EvalError::IndexOutOfRange {
                column: tlv_in.clone(),
                index: 1,
                len: short.len(),
            }),
        })
        .histo1d(mass.clone(), bins.m_ll, mass)
}

/// `theta_plus`, `theta_minus`, their cosines and `cosThetac`, prefixed.
fn angles(b: PipelineBuilder, bins: &Binnings, prefix: &str, theta: &str, q: &str) -> PipelineBuilder {
    let tp = format!("{prefix}theta_plus");
    let tm = format!("{prefix}theta_minus");
    let b = b
        .define_expr(tp.clone(), &format!("({q}[0] > 0) ? {theta}[0] : {theta}[1]"))
        .define_expr(tm.clone(), &format!("({q}[0] < 0) ? {theta}[0] : {theta}[1]"))
        .define_expr(format!("{prefix}cos_theta_plus"), &format!("cos({tp})"))
        .define_expr(format!("{prefix}cos_theta_minus"), &format!("cos({tm})"))
        .define_expr(
            format!("{prefix}cosThetac"),
            &format!("sin({tp} - {tm}) / (sin({tp}) + sin({tm}))"),
        );
    [
        ("theta_plus", bins.theta),
        ("theta_minus", bins.theta),
        ("cos_theta_plus", bins.cos),
        ("cos_theta_minus", bins.cos),
        ("cosThetac", bins.cos),
    ]
    .into_iter()
    .fold(b, |b, (name, axis)| {
        let col = format!("{prefix}{name}");
        b.histo1d(col.clone(), axis, col)
    })
}

/// Cross-section selection with 1 GeV mass bins.
pub fn xsec_pipeline() -> Result<Pipeline> {
    let bins = Binnings::COARSE;
    let b = acolinearity(muon_selection(&bins), &bins);
    invariant_mass(b, &bins, "", "muons").build()
}

/// Asymmetry selection with 10 MeV mass bins and generator-level angles.
pub fn afb_pipeline() -> Result<Pipeline> {
    let bins = Binnings::FINE;
    let mut b = acolinearity(muon_selection(&bins), &bins)
        .filter_expr(&format!("acolinearity < {MAX_ACOLINEARITY}"));
    b = cut(b, 5, bins.count);
    b = invariant_mass(b, &bins, "", "muons");
    b = angles(b, &bins, "", "muons_theta", "muons_q");

    b = b
        .alias("MCRecoAssociations0", ASSOC_RECO_INDEX)
        .alias("MCRecoAssociations1", ASSOC_GEN_INDEX)
        .define("muons_gen", |row| {
            Ok(Value::Particles(kinematics::rp2mc(
                row.particles("muons")?,
                row.indices("MCRecoAssociations0")?,
                row.indices("MCRecoAssociations1")?,
                row.particles(GEN_PARTICLES)?,
            )))
        });
    b = per_particle(b, "gen_muons_p", "muons_gen", kinematics::momenta);
    b = per_particle(b, "gen_muons_theta", "muons_gen", kinematics::thetas);
    b = per_particle(b, "gen_muons_phi", "muons_gen", kinematics::phis);
    b = per_particle(b, "gen_muons_q", "muons_gen", kinematics::charges);
    b = count(b, "gen_muons_no", "muons_gen");
    b = b
        .histo1d("gen_muons_no", bins.count, "gen_muons_no")
        .histo1d("gen_muons_p", bins.p_mu, "gen_muons_p");
    b = invariant_mass(b, &bins, "gen_", "muons_gen");
    angles(b, &bins, "gen_", "gen_muons_theta", "gen_muons_q").build()
}
