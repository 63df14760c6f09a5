//! Reference star ownership: acquisition, loss detection and reacquisition.

use serde::Serialize;

use crate::detection::{brightest, nearest, StarCandidate};
use crate::error::DetectionError;

/// Where the selector stands with respect to its reference star.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrackState {
    NoReference,
    Tracking { reference: (f64, f64) },
    Lost,
}

impl TrackState {
    /// The reference position; `None` exactly when not tracking.
    pub fn reference(&self) -> Option<(f64, f64)> {
        match self {
            TrackState::Tracking { reference } => Some(*reference),
            TrackState::NoReference | TrackState::Lost => None,
        }
    }
}

/// What one call to [`StarSelector::observe`] did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SelectionEvent {
    /// First reference picked from the brightest candidate.
    Acquired { reference: (f64, f64) },
    /// The star is still where it was expected; `nearest` is the closest candidate.
    Held { nearest: (f64, f64) },
    /// Reference lost and nothing to pick instead.
    Lost,
    /// Reference replaced after a loss.
    Reacquired { reference: (f64, f64) },
    /// No reference and no candidate to start from.
    NoCandidates,
}

/// True when no candidate lies strictly closer than `radius` to `position`.
pub fn is_lost(candidates: &[StarCandidate], position: (f64, f64), radius: f64) -> bool {
    !candidates
        .iter()
        .any(|c| c.distance_to(position.0, position.1) < radius)
}

#[derive(Debug, Clone)]
pub struct StarSelector {
    state: TrackState,
    loss_radius: f64,
    max_secondary: usize,
    manual_radius: f64,
}

impl StarSelector {
    pub fn new(loss_radius: f64, max_secondary: usize, manual_radius: f64) -> Self {
        Self {
            state: TrackState::NoReference,
            loss_radius,
            max_secondary,
            manual_radius,
        }
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn reference(&self) -> Option<(f64, f64)> {
        self.state.reference()
    }

    /// Pick the brightest candidate as the reference, if there is one.
    pub fn select_best(&mut self, candidates: &[StarCandidate]) -> Option<(f64, f64)> {
        let best = brightest(candidates).ok()?.centroid;
        self.state = TrackState::Tracking { reference: best };
        Some(best)
    }

    /// Advance the state machine with this frame's candidates.
    ///
    /// `expected_offset` is the current dither offset: while tracking, the star
    /// is looked for at `reference + expected_offset`. A loss and an immediate
    /// reacquisition in the same call report [`SelectionEvent::Reacquired`].
    pub fn observe(
        &mut self,
        candidates: &[StarCandidate],
        expected_offset: (f64, f64),
    ) -> SelectionEvent {
        match self.state {
            TrackState::NoReference => match self.select_best(candidates) {
                Some(reference) => {
                    tracing::info!(
                        "Reference star acquired at ({:.2}, {:.2})",
                        reference.0,
                        reference.1
                    );
                    SelectionEvent::Acquired { reference }
                }
                None => SelectionEvent::NoCandidates,
            },
            TrackState::Tracking { reference } => {
                let expected = (reference.0 + expected_offset.0, reference.1 + expected_offset.1);
                if let Ok(star) = nearest(candidates, expected.0, expected.1, self.loss_radius) {
                    if star.distance_to(expected.0, expected.1) < self.loss_radius {
                        return SelectionEvent::Held { nearest: star.centroid };
                    }
                }
                tracing::warn!(
                    "Reference star lost: nothing within {:.1} px of ({:.2}, {:.2})",
                    self.loss_radius,
                    expected.0,
                    expected.1
                );
                self.state = TrackState::Lost;
                self.reacquire(candidates)
            }
            TrackState::Lost => self.reacquire(candidates),
        }
    }

    fn reacquire(&mut self, candidates: &[StarCandidate]) -> SelectionEvent {
        match self.select_best(candidates) {
            Some(reference) => {
                tracing::info!(
                    "Reference star reacquired at ({:.2}, {:.2})",
                    reference.0,
                    reference.1
                );
                SelectionEvent::Reacquired { reference }
            }
            None => SelectionEvent::Lost,
        }
    }

    /// Use the candidate nearest to a user-chosen point (within the manual radius, inclusive).
    pub fn select_manual(
        &mut self,
        x: f64,
        y: f64,
        candidates: &[StarCandidate],
    ) -> Result<(f64, f64), DetectionError> {
        let star = nearest(candidates, x, y, self.manual_radius)?.centroid;
        tracing::info!("Reference star selected manually at ({:.2}, {:.2})", star.0, star.1);
        self.state = TrackState::Tracking { reference: star };
        Ok(star)
    }

    pub fn reset(&mut self) {
        self.state = TrackState::NoReference;
    }

    /// Up to `max_secondary` other candidates, brightest first. Advisory only.
    ///
    /// The primary is the candidate nearest the reference, when it lies inside
    /// the loss radius.
    pub fn secondary_stars(&self, candidates: &[StarCandidate]) -> Vec<(f64, f64)> {
        let primary = self.reference().and_then(|(x, y)| {
            candidates
                .iter()
                .enumerate()
                .map(|(i, c)| (i, c.distance_to(x, y)))
                .filter(|(_, d)| *d < self.loss_radius)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
        });

        let mut others: Vec<&StarCandidate> = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != primary)
            .map(|(_, c)| c)
            .collect();
        others.sort_by(|a, b| b.mean_intensity.total_cmp(&a.mean_intensity));
        others
            .into_iter()
            .take(self.max_secondary)
            .map(|c| c.centroid)
            .collect()
    }
}
