use serde::{Deserialize, Serialize};

use super::{Aggregate, AggregateError, AggregateKind, AggregateSnapshot, ProfileSums};

/// Uniform binning along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub bins: u32,
    pub min: f64,
    pub max: f64,
}

impl Axis {
    pub fn new(bins: u32, min: f64, max: f64) -> Result<Self, AggregateError> {
        if bins == 0 || !min.is_finite() || !max.is_finite() || max <= min {
            return Err(AggregateError::InvalidAxis { bins, min, max });
        }
        Ok(Self { bins, min, max })
    }

    /// Number of storage cells including underflow and overflow.
    fn cells(&self) -> usize {
        self.bins as usize + 2
    }

    /// Cell index: 0 is underflow, 1..=bins are in range, bins+1 is overflow.
    fn cell(&self, x: f64) -> usize {
        if x < self.min {
            return 0;
        }
        if x >= self.max {
            return self.bins as usize + 1;
        }
        let width = (self.max - self.min) / f64::from(self.bins);
        let bin = ((x - self.min) / width) as usize;
        // Rounding can push values just below `max` onto the overflow edge.
        bin.min(self.bins as usize - 1) + 1
    }
}

#[derive(Debug)]
struct BinState {
    entries: u64,
    sum_weights: Vec<f64>,
    sum_weights2: Vec<f64>,
    profile: Option<ProfileSums>,
}

/// Weighted histogram or profile over zero, one or two axes.
///
/// A histogram with no axes is a plain weighted counter. A profile fills the
/// mean of an extra value coordinate per bin.
pub struct Histogram {
    name: String,
    title: String,
    kind: AggregateKind,
    axes: Vec<Axis>,
    state: parking_lot::Mutex<BinState>,
}

impl Histogram {
    fn build(name: &str, title: &str, kind: AggregateKind, axes: Vec<Axis>) -> Self {
        let cells = axes.iter().map(Axis::cells).product::<usize>();
        let profile = matches!(kind, AggregateKind::Profile).then(|| ProfileSums {
            sum_wy: vec![0.0; cells],
            sum_wy2: vec![0.0; cells],
        });
        Self {
            name: name.to_string(),
            title: title.to_string(),
            kind,
            axes,
            state: parking_lot::Mutex::new(BinState {
                entries: 0,
                sum_weights: vec![0.0; cells],
                sum_weights2: vec![0.0; cells],
                profile,
            }),
        }
    }

    /// Weighted event counter.
    pub fn counter(name: &str, title: &str) -> Self {
        Self::build(name, title, AggregateKind::Histogram, Vec::new())
    }

    pub fn h1(name: &str, title: &str, x: Axis) -> Self {
        Self::build(name, title, AggregateKind::Histogram, vec![x])
    }

    pub fn h2(name: &str, title: &str, x: Axis, y: Axis) -> Self {
        Self::build(name, title, AggregateKind::Histogram, vec![x, y])
    }

    /// Mean of a value per `x` bin.
    pub fn profile1(name: &str, title: &str, x: Axis) -> Self {
        Self::build(name, title, AggregateKind::Profile, vec![x])
    }

    /// Mean of a value per `(x, y)` bin.
    pub fn profile2(name: &str, title: &str, x: Axis, y: Axis) -> Self {
        Self::build(name, title, AggregateKind::Profile, vec![x, y])
    }

    pub fn kind(&self) -> AggregateKind {
        self.kind
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Coordinates expected by `fill`: one per axis, plus the value for profiles.
    pub fn dimension(&self) -> usize {
        self.axes.len() + usize::from(matches!(self.kind, AggregateKind::Profile))
    }

    /// Number of fills so far.
    pub fn entries(&self) -> u64 {
        self.state.lock().entries
    }

    fn cell_index(&self, coords: &[f64]) -> usize {
        let mut index = 0usize;
        let mut stride = 1usize;
        for (axis, &x) in self.axes.iter().zip(coords) {
            index += axis.cell(x) * stride;
            stride *= axis.cells();
        }
        index
    }
}

impl Aggregate for Histogram {
    fn name(&self) -> &str {
        &self.name
    }

    fn fill(&self, coords: &[f64], weight: f64) -> Result<(), AggregateError> {
        if coords.len() != self.dimension() {
            return Err(AggregateError::DimensionMismatch {
                name: self.name.clone(),
                expected: self.dimension(),
                found: coords.len(),
            });
        }
        if let Some(position) = coords.iter().position(|c| !c.is_finite()) {
            return Err(AggregateError::NonFinite {
                name: self.name.clone(),
                position,
            });
        }
        if !weight.is_finite() {
            return Err(AggregateError::NonFiniteWeight {
                name: self.name.clone(),
            });
        }

        let cell = self.cell_index(coords);
        let mut state = self.state.lock();
        state.entries += 1;
        state.sum_weights[cell] += weight;
        state.sum_weights2[cell] += weight * weight;
        if let Some(profile) = state.profile.as_mut() {
            let y = coords[self.axes.len()];
            profile.sum_wy[cell] += weight * y;
            profile.sum_wy2[cell] += weight * y * y;
        }
        Ok(())
    }

    fn finalize(&self) -> AggregateSnapshot {
        let state = self.state.lock();
        AggregateSnapshot {
            name: self.name.clone(),
            title: self.title.clone(),
            kind: self.kind,
            axes: self.axes.clone(),
            entries: state.entries,
            sum_weights: state.sum_weights.clone(),
            sum_weights2: state.sum_weights2.clone(),
            profile: state.profile.clone(),
        }
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("axes", &self.axes)
            .field("entries", &self.entries())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(bins: u32, min: f64, max: f64) -> Axis {
        Axis::new(bins, min, max).expect("valid axis")
    }

    #[test]
    fn test_axis_cells() {
        let a = axis(10, 0.0, 10.0);
        assert_eq!(a.cell(-0.1), 0);
        assert_eq!(a.cell(0.0), 1);
        assert_eq!(a.cell(0.99), 1);
        assert_eq!(a.cell(9.999_999), 10);
        assert_eq!(a.cell(10.0), 11);
        assert_eq!(a.cell(1e9), 11);
    }

    #[test]
    fn test_axis_validation() {
        assert!(Axis::new(0, 0.0, 1.0).is_err());
        assert!(Axis::new(10, 1.0, 1.0).is_err());
        assert!(Axis::new(10, 0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_h1_fill_and_overflow() {
        let h = Histogram::h1("pt", "pt", axis(4, 0.0, 4.0));
        h.fill(&[0.5], 1.0).expect("fill");
        h.fill(&[0.5], 2.0).expect("fill");
        h.fill(&[3.5], 1.0).expect("fill");
        h.fill(&[7.0], 1.0).expect("fill");
        h.fill(&[-1.0], 1.0).expect("fill");

        let snap = h.finalize();
        assert_eq!(snap.entries, 5);
        assert_eq!(snap.sum_weights, vec![1.0, 3.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(snap.sum_weights2[1], 5.0);
        assert_eq!(snap.integral(), 4.0);
    }

    #[test]
    fn test_h2_cell_layout() {
        let h = Histogram::h2("xy", "xy", axis(2, 0.0, 2.0), axis(2, 0.0, 2.0));
        h.fill(&[1.5, 0.5], 1.0).expect("fill");
        let snap = h.finalize();
        // x cell 2, y cell 1, x stride 1, y stride 4.
        assert_eq!(snap.sum_weights[2 + 4], 1.0);
        assert_eq!(snap.sum_weights.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_profile_tracks_mean() {
        let p = Histogram::profile1("layer", "counts per layer", axis(3, 0.0, 3.0));
        p.fill(&[1.0, 10.0], 1.0).expect("fill");
        p.fill(&[1.0, 20.0], 1.0).expect("fill");
        let snap = p.finalize();
        let sums = snap.profile.as_ref().expect("profile sums");
        assert_eq!(snap.sum_weights[2], 2.0);
        assert_eq!(sums.sum_wy[2], 30.0);
        assert_eq!(snap.bin_mean(2), Some(15.0));
        assert_eq!(snap.bin_mean(1), None);
    }

    #[test]
    fn test_counter_has_no_axes() {
        let c = Histogram::counter("events", "events");
        assert_eq!(c.finalize().integral(), 0.0);
        c.fill(&[], 1.0).expect("fill");
        c.fill(&[], 0.5).expect("fill");
        let snap = c.finalize();
        assert_eq!(snap.entries, 2);
        assert_eq!(snap.sum_weights, vec![1.5]);
    }

    #[test]
    fn test_fill_rejects_bad_input() {
        let h = Histogram::h2("xy", "xy", axis(2, 0.0, 2.0), axis(2, 0.0, 2.0));
        assert!(matches!(
            h.fill(&[1.0], 1.0),
            Err(AggregateError::DimensionMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
        assert!(matches!(
            h.fill(&[1.0, f64::NAN], 1.0),
            Err(AggregateError::NonFinite { position: 1, .. })
        ));
        assert!(matches!(
            h.fill(&[1.0, 1.0], f64::INFINITY),
            Err(AggregateError::NonFiniteWeight { .. })
        ));
        assert_eq!(h.entries(), 0, "rejected fills leave the histogram untouched");
    }
}
