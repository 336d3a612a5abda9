//! Per-characteristic rolling window of recent control-chart points.

use crate::types::{SubgroupMode, WindowPoint, Zone, ZoneBoundaries};
use std::collections::VecDeque;

/// Bounded history of `WindowPoint`s for one characteristic, plus the
/// boundaries currently used to classify new points.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    points: VecDeque<WindowPoint>,
    capacity: usize,
    boundaries: Option<ZoneBoundaries>,
}

/// Points beyond this are dropped from the front of the window; this is a
/// generous cap on in-memory history depth, independent of the window
/// manager's LRU cache capacity (which bounds the *number of
/// characteristics* kept hydrated, not points per characteristic).
const DEFAULT_POINT_CAPACITY: usize = 500;

impl RollingWindow {
    pub fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(DEFAULT_POINT_CAPACITY),
            capacity: DEFAULT_POINT_CAPACITY,
            boundaries: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
            boundaries: None,
        }
    }

    pub fn append(&mut self, point: WindowPoint) {
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn samples(&self) -> &VecDeque<WindowPoint> {
        &self.points
    }

    /// The most recent `n` points, oldest first, matching the order rule
    /// evaluation expects.
    pub fn recent(&self, n: usize) -> Vec<WindowPoint> {
        let len = self.points.len();
        let start = len.saturating_sub(n);
        self.points.iter().skip(start).copied().collect()
    }

    pub fn set_boundaries(&mut self, boundaries: ZoneBoundaries) {
        self.boundaries = Some(boundaries);
    }

    pub fn boundaries(&self) -> Option<ZoneBoundaries> {
        self.boundaries
    }

    /// Classify a value against the currently stored boundaries. Returns
    /// `None` if no boundaries have been set yet (characteristic has no
    /// calculated or manually set limits).
    pub fn classify(&self, value: f64) -> Option<Zone> {
        self.boundaries.map(|b| b.classify(value))
    }

    /// Classify a value for a given subgroup mode and this sample's actual
    /// subgroup size. In `NominalTolerance` mode the stored boundaries are
    /// used as-is. In `Standardized`/`VariableLimits` mode the boundaries'
    /// sigma-of-the-mean is rescaled to this sample's own `actual_n` before
    /// classifying, since `sigma_of_mean` was stored for a reference `n`.
    pub fn classify_for_mode(&self, value: f64, actual_n: u32, mode: SubgroupMode) -> Option<Zone> {
        let boundaries = self.boundaries?;
        match mode {
            SubgroupMode::NominalTolerance => Some(boundaries.classify(value)),
            SubgroupMode::Standardized | SubgroupMode::VariableLimits => {
                Some(boundaries.rescale_to(actual_n).classify(value))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleId;
    use chrono::Utc;

    fn point(mean: f64) -> WindowPoint {
        WindowPoint {
            sample_id: SampleId(1),
            timestamp: Utc::now(),
            mean,
            range: None,
            actual_n: 1,
            zone: Zone::ZoneCUpper,
        }
    }

    #[test]
    fn append_respects_capacity() {
        let mut window = RollingWindow::with_capacity(3);
        for i in 0..5 {
            window.append(point(i as f64));
        }
        assert_eq!(window.len(), 3);
        let recent = window.recent(3);
        assert_eq!(recent[0].mean, 2.0);
        assert_eq!(recent[2].mean, 4.0);
    }

    #[test]
    fn recent_caps_at_available_points() {
        let mut window = RollingWindow::new();
        window.append(point(1.0));
        let recent = window.recent(10);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn classify_uses_stored_boundaries() {
        let mut window = RollingWindow::new();
        window.set_boundaries(ZoneBoundaries::new(10.0, 1.0));
        assert_eq!(window.classify(13.5), Some(Zone::BeyondUcl));
    }
}
