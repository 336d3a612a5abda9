use serde::{Deserialize, Serialize};

/// One of the eight control-chart regions a sample's value falls into
/// relative to a characteristic's center line and sigma.
///
/// Zones are ordered outward from the center line; `BeyondUcl`/`BeyondLcl`
/// are the "out of control" boundary zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    BeyondUcl,
    ZoneAUpper,
    ZoneBUpper,
    ZoneCUpper,
    ZoneCLower,
    ZoneBLower,
    ZoneALower,
    BeyondLcl,
}

impl Zone {
    /// True for the two boundary-violation zones (beyond 3 sigma).
    pub fn is_beyond_limits(self) -> bool {
        matches!(self, Zone::BeyondUcl | Zone::BeyondLcl)
    }

    /// True for any zone on the upper side of the center line. The center
    /// line itself is treated as the upper side for "same side" rule ties.
    pub fn is_upper_side(self) -> bool {
        matches!(
            self,
            Zone::BeyondUcl | Zone::ZoneAUpper | Zone::ZoneBUpper | Zone::ZoneCUpper
        )
    }

    /// Number of sigma-of-the-mean units this zone's inner edge sits from
    /// the center line (1, 2, or 3). Zone C returns 1.
    pub fn sigma_band(self) -> u8 {
        match self {
            Zone::BeyondUcl | Zone::BeyondLcl => 3,
            Zone::ZoneAUpper | Zone::ZoneALower => 2,
            Zone::ZoneBUpper | Zone::ZoneBLower => 1,
            Zone::ZoneCUpper | Zone::ZoneCLower => 0,
        }
    }
}

/// The eight control-chart boundaries derived from a center line and
/// sigma-of-the-mean. Always computed from sigma-of-the-mean, never raw
/// process sigma, regardless of subgroup mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBoundaries {
    pub center_line: f64,
    /// sigma / sqrt(reference_n) for the subgroup size these boundaries
    /// were built for.
    pub sigma_of_mean: f64,
    /// The subgroup size `sigma_of_mean` was computed against. Needed to
    /// recover process sigma when rescaling to a different sample's
    /// `actual_n` (Standardized/VariableLimits modes).
    pub reference_n: u32,
}

impl ZoneBoundaries {
    pub fn new(center_line: f64, sigma_of_mean: f64) -> Self {
        Self {
            center_line,
            sigma_of_mean,
            reference_n: 1,
        }
    }

    pub fn with_reference_n(center_line: f64, sigma_of_mean: f64, reference_n: u32) -> Self {
        Self {
            center_line,
            sigma_of_mean,
            reference_n: reference_n.max(1),
        }
    }

    /// Recover process sigma (undoing the `/ sqrt(reference_n)` division).
    pub fn process_sigma(&self) -> f64 {
        self.sigma_of_mean * (self.reference_n as f64).sqrt()
    }

    /// Rescale these boundaries' sigma-of-the-mean to a different subgroup
    /// size, keeping the same center line and underlying process sigma.
    pub fn rescale_to(&self, actual_n: u32) -> Self {
        let process_sigma = self.process_sigma();
        let actual_n = actual_n.max(1);
        Self::with_reference_n(self.center_line, process_sigma / (actual_n as f64).sqrt(), actual_n)
    }

    pub fn ucl(&self) -> f64 {
        self.center_line + 3.0 * self.sigma_of_mean
    }

    pub fn lcl(&self) -> f64 {
        self.center_line - 3.0 * self.sigma_of_mean
    }

    /// Classify a value into one of the eight zones against these boundaries.
    pub fn classify(&self, value: f64) -> Zone {
        let offset = value - self.center_line;
        if self.sigma_of_mean <= 0.0 {
            // Degenerate boundaries (zero spread): anything off-center reads
            // as a hard limit violation rather than dividing by zero.
            return if offset > 0.0 {
                Zone::BeyondUcl
            } else {
                Zone::BeyondLcl
            };
        }
        let sigmas = offset / self.sigma_of_mean;
        if sigmas >= 3.0 {
            Zone::BeyondUcl
        } else if sigmas >= 2.0 {
            Zone::ZoneAUpper
        } else if sigmas >= 1.0 {
            Zone::ZoneBUpper
        } else if sigmas >= 0.0 {
            Zone::ZoneCUpper
        } else if sigmas > -1.0 {
            Zone::ZoneCLower
        } else if sigmas > -2.0 {
            Zone::ZoneBLower
        } else if sigmas > -3.0 {
            Zone::ZoneALower
        } else {
            Zone::BeyondLcl
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_center_as_zone_c_upper() {
        let b = ZoneBoundaries::new(10.0, 1.0);
        assert_eq!(b.classify(10.0), Zone::ZoneCUpper);
    }

    #[test]
    fn classifies_beyond_ucl() {
        let b = ZoneBoundaries::new(10.0, 1.0);
        assert_eq!(b.classify(13.5), Zone::BeyondUcl);
        assert_eq!(b.classify(13.0), Zone::BeyondUcl);
    }

    #[test]
    fn classifies_zone_a_lower() {
        let b = ZoneBoundaries::new(10.0, 1.0);
        assert_eq!(b.classify(7.5), Zone::ZoneALower);
    }

    #[test]
    fn degenerate_sigma_reads_as_limit_violation() {
        let b = ZoneBoundaries::new(10.0, 0.0);
        assert_eq!(b.classify(10.5), Zone::BeyondUcl);
        assert_eq!(b.classify(9.5), Zone::BeyondLcl);
    }
}
