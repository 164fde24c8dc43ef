use std::f64::consts::{PI, TAU};
use std::sync::Arc;

use anyhow::{Context, Result};

use super::{book_histogram, Plotter};
use crate::aggregate::{Aggregate, AggregateStore, Axis, Histogram};
use crate::collections::{Collection, EventRecord};

struct Booked {
    pt_res: Arc<Histogram>,
    energy_res: Arc<Histogram>,
    pt_res_v_eta: Arc<Histogram>,
    energy_res_v_eta: Arc<Histogram>,
}

/// Kinematic columns every matched collection must provide.
struct Kinematics<'a> {
    pt: &'a [f64],
    energy: &'a [f64],
    eta: &'a [f64],
    phi: &'a [f64],
}

impl<'a> Kinematics<'a> {
    fn of(collection: &'a Collection) -> Result<Self> {
        Ok(Self {
            pt: collection.column("pt")?,
            energy: collection.column("energy")?,
            eta: collection.column("eta")?,
            phi: collection.column("phi")?,
        })
    }

    fn delta_r(&self, i: usize, other: &Kinematics<'_>, j: usize) -> f64 {
        let d_eta = self.eta[i] - other.eta[j];
        let d_phi = wrap_phi(self.phi[i] - other.phi[j]);
        d_eta.hypot(d_phi)
    }
}

/// Folds an azimuthal difference into [-pi, pi].
fn wrap_phi(d: f64) -> f64 {
    let d = d % TAU;
    if d > PI {
        d - TAU
    } else if d < -PI {
        d + TAU
    } else {
        d
    }
}

/// Response of a target collection against a reference collection.
///
/// Every reference object is matched to the closest target object in
/// (eta, phi) within `max_dr`; unmatched reference objects fill nothing.
pub struct ResolutionPlotter {
    reference: String,
    target: String,
    label: String,
    max_dr: f64,
    booked: Option<Booked>,
}

impl ResolutionPlotter {
    pub fn new(reference: &str, target: &str, label: &str, max_dr: f64) -> Self {
        Self {
            reference: reference.to_string(),
            target: target.to_string(),
            label: label.to_string(),
            max_dr,
            booked: None,
        }
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}_{}", self.label, suffix)
    }
}

impl Plotter for ResolutionPlotter {
    fn book(&mut self, store: &mut AggregateStore) -> Result<()> {
        let eta = Axis::new(100, -3.5, 3.5)?;
        let pt_res = Axis::new(100, -10.0, 10.0)?;
        let energy_res = Axis::new(200, -100.0, 100.0)?;

        self.booked = Some(Booked {
            pt_res: book_histogram(
                store,
                Histogram::h1(&self.name("ptRes"), "Pt reso (GeV)", pt_res),
            )?,
            energy_res: book_histogram(
                store,
                Histogram::h1(&self.name("energyRes"), "Energy reso (GeV)", energy_res),
            )?,
            pt_res_v_eta: book_histogram(
                store,
                Histogram::h2(&self.name("ptResVeta"), "Pt reso (GeV) vs eta", eta, pt_res),
            )?,
            energy_res_v_eta: book_histogram(
                store,
                Histogram::h2(
                    &self.name("energyResVeta"),
                    "Energy reso (GeV) vs eta",
                    eta,
                    energy_res,
                ),
            )?,
        });
        Ok(())
    }

    fn fill(&mut self, record: &EventRecord) -> Result<()> {
        let h = self
            .booked
            .as_ref()
            .context("resolution plotter filled before booking")?;
        let reference = Kinematics::of(record.collection(&self.reference)?)
            .with_context(|| format!("reference collection {:?}", self.reference))?;
        let target = Kinematics::of(record.collection(&self.target)?)
            .with_context(|| format!("target collection {:?}", self.target))?;
        let w = record.weight;

        for r in 0..reference.pt.len() {
            let best = (0..target.pt.len())
                .map(|t| (t, reference.delta_r(r, &target, t)))
                .filter(|(_, dr)| *dr <= self.max_dr)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            let Some((t, _)) = best else {
                continue;
            };

            let d_pt = target.pt[t] - reference.pt[r];
            let d_energy = target.energy[t] - reference.energy[r];
            h.pt_res.fill(&[d_pt], w)?;
            h.energy_res.fill(&[d_energy], w)?;
            h.pt_res_v_eta.fill(&[reference.eta[r], d_pt], w)?;
            h.energy_res_v_eta.fill(&[reference.eta[r], d_energy], w)?;
        }
        Ok(())
    }
}
