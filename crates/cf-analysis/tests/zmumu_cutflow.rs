use approx::assert_relative_eq;
use cf_analysis::Analysis;
use cf_core::{Event, Particle};
use cf_frame::{Driver, VecPartition, split_rows};

const MU_MASS: f64 = 0.105_658;

fn mu(px: f64, py: f64, pz: f64, q: f64) -> Particle {
    Particle::new(px, py, pz, MU_MASS, q).with_pdg(13 * -(q as i32))
}

fn photon() -> Particle {
    Particle::new(0.0, 5.0, 1.0, 0.0, 0.0).with_pdg(22)
}

/// Reco event: a photon at index 0 followed by `muons`.
fn event(muons: Vec<Particle>) -> Event {
    let n = muons.len();
    let mut reco = vec![photon()];
    reco.extend(muons);
    Event::new()
        .with_particles("ReconstructedParticles", reco)
        .with_indices("Muon#0.index", (1..=n).collect())
}

/// Same as [`event`] plus a one-to-one truth association for every muon.
fn event_with_truth(muons: Vec<Particle>) -> Event {
    let n = muons.len();
    let gen_muons = muons.clone();
    event(muons)
        .with_particles("Particle", gen_muons)
        .with_indices("MCRecoAssociations#0.index", (1..=n).collect())
        .with_indices("MCRecoAssociations#1.index", (0..n).collect())
}

/// 10 events: 6 with exactly two opposite-sign central muons, 3 of them
/// energetic enough for the momentum cut.
fn ten_events() -> Vec<Event> {
    let mut evs = vec![
        event(vec![]),
        event(vec![]),
        // second muon too forward: one selected muon
        event(vec![mu(30.0, 0.0, 5.0, 1.0), mu(0.0, 1.0, -40.0, -1.0)]),
        // three muons
        event(vec![mu(40.0, 0.0, 3.0, 1.0), mu(-40.0, 0.0, -3.0, -1.0), mu(0.0, 10.0, 2.0, 1.0)]),
    ];
    for k in 0..3 {
        let p = 40.0 + k as f64;
        evs.push(event_with_truth(vec![mu(p, 0.0, 3.0, 1.0), mu(-p, 0.0, -3.0, -1.0)]));
    }
    for k in 0..3 {
        let p = 15.0 + k as f64;
        evs.push(event(vec![mu(0.0, p, 1.0, -1.0), mu(0.0, -p, -1.0, 1.0)]));
    }
    evs
}

#[test]
fn xsec_cut_flow_on_ten_events() {
    let pipeline = Analysis::ZmumuXsec.pipeline().unwrap();
    let r = Driver::new(2).run(&pipeline, &[VecPartition::new("ten", ten_events())]).unwrap();

    let cf = &r.histograms["cutFlow"];
    assert_eq!(&cf.bin_content[..6], &[10.0, 8.0, 7.0, 6.0, 3.0, 0.0]);
    assert_eq!(r.weight_sum, 10.0);
    assert_eq!(r.events_dropped, 0);
    assert_eq!(r.events_passed, 3);
    for k in 1..cf.bin_content.len() {
        assert!(cf.bin_content[k] <= cf.bin_content[k - 1]);
    }

    // Invariant mass of the three selected back-to-back pairs lands near 2 p.
    let m = &r.histograms["invariant_mass"];
    assert_eq!(m.entries, 3);
    assert_relative_eq!(m.integral(), 3.0);
    assert_eq!(r.histograms["acolinearity"].entries, 3);

    // Every input event fills the pre-selection histograms.
    assert_eq!(r.histograms["muons_all_no"].entries, 10);
}

#[test]
fn partitioning_does_not_change_results() {
    let pipeline = Analysis::ZmumuXsec.pipeline().unwrap();
    let evs = ten_events();
    let whole = Driver::new(1).run(&pipeline, &[VecPartition::new("all", evs.clone())]).unwrap();
    let parts: Vec<VecPartition> = split_rows(evs.len(), 3)
        .into_iter()
        .map(|r| VecPartition::new(format!("{r:?}"), evs[r].to_vec()))
        .collect();
    let split = Driver::new(3).run(&pipeline, &parts).unwrap();
    assert_eq!(whole, split);
}

#[test]
fn afb_selection_and_truth_angles() {
    let pipeline = Analysis::ZmumuAfb.pipeline().unwrap();
    let r = Driver::new(1).run(&pipeline, &[VecPartition::new("ten", ten_events())]).unwrap();

    let cf = &r.histograms["cutFlow"];
    assert_eq!(&cf.bin_content[..7], &[10.0, 8.0, 7.0, 6.0, 3.0, 3.0, 0.0]);
    assert_eq!(r.histograms["cosThetac"].entries, 3);
    assert_eq!(r.histograms["gen_cosThetac"].entries, 3);
    assert_eq!(r.histograms["invariant_mass"].axis.n_bins, 20000);
}

#[test]
fn missing_truth_drops_the_event_everywhere() {
    let pipeline = Analysis::ZmumuAfb.pipeline().unwrap();
    let mut evs = ten_events();
    // A selected event without association columns.
    evs.push(event(vec![mu(42.0, 0.0, 2.0, 1.0), mu(-42.0, 0.0, -2.0, -1.0)]));
    let r = Driver::new(1).run(&pipeline, &[VecPartition::new("eleven", evs)]).unwrap();

    assert_eq!(r.events_dropped, 1);
    assert_eq!(r.weight_sum, 10.0);
    assert_eq!(r.histograms["cutFlow"].content(0), 10.0);
    assert_eq!(r.histograms["cutFlow"].content(5), 3.0);
}

#[test]
fn muons_on_the_acceptance_edges_fail_the_first_cut() {
    // |cos theta| == 0 and >= 0.97 both fall outside the open window (0, 0.97).
    let edge = event(vec![
        mu(40.0, 0.0, 0.0, 1.0),
        mu(0.0, -40.0, 0.0, -1.0),
        mu(0.0, 0.0, 40.0, 1.0),
        mu(2.0, 0.0, -40.0, -1.0),
    ]);
    let pipeline = Analysis::ZmumuXsec.pipeline().unwrap();
    let r = Driver::new(1).run(&pipeline, &[VecPartition::new("edge", vec![edge])]).unwrap();

    let cf = &r.histograms["cutFlow"];
    assert_eq!(&cf.bin_content[..3], &[1.0, 0.0, 0.0]);
    assert_eq!(r.events_dropped, 0);
    assert_eq!(r.histograms["muons_all_no"].entries, 1);
    assert_eq!(r.histograms["muons_no"].bin_content[0], 1.0);
}
