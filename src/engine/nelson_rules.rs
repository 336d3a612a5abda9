//! The eight Nelson Rules.
//!
//! Dispatch is a tagged enum over the eight fixed rule variants rather than
//! dynamic dispatch through a trait object per rule — there are exactly
//! eight rules, they never change shape at runtime, and a `match` is both
//! cheaper and easier to audit against the rule table than a `Vec<Box<dyn
//! Rule>>` would be.

use crate::types::{Characteristic, RuleConfig, Severity, Violation, ViolationId, WindowPoint, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NelsonRule {
    Beyond3Sigma = 1,
    NineSameSide = 2,
    SixTrending = 3,
    FourteenAlternating = 4,
    TwoOfThreeBeyond2Sigma = 5,
    FourOfFiveBeyond1Sigma = 6,
    FifteenWithin1Sigma = 7,
    EightBeyond1SigmaNeitherSide = 8,
}

impl NelsonRule {
    pub const ALL: [NelsonRule; 8] = [
        NelsonRule::Beyond3Sigma,
        NelsonRule::NineSameSide,
        NelsonRule::SixTrending,
        NelsonRule::FourteenAlternating,
        NelsonRule::TwoOfThreeBeyond2Sigma,
        NelsonRule::FourOfFiveBeyond1Sigma,
        NelsonRule::FifteenWithin1Sigma,
        NelsonRule::EightBeyond1SigmaNeitherSide,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        NelsonRule::ALL.into_iter().find(|r| r.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            NelsonRule::Beyond3Sigma => "Beyond 3 Sigma",
            NelsonRule::NineSameSide => "Nine Points Same Side",
            NelsonRule::SixTrending => "Six Points Trending",
            NelsonRule::FourteenAlternating => "Fourteen Points Alternating",
            NelsonRule::TwoOfThreeBeyond2Sigma => "Two of Three Beyond 2 Sigma",
            NelsonRule::FourOfFiveBeyond1Sigma => "Four of Five Beyond 1 Sigma",
            NelsonRule::FifteenWithin1Sigma => "Fifteen Points Within 1 Sigma",
            NelsonRule::EightBeyond1SigmaNeitherSide => "Eight Points Beyond 1 Sigma Neither Side",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            NelsonRule::Beyond3Sigma => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    /// Number of trailing window points this rule needs to evaluate.
    pub fn needed_depth(self) -> usize {
        match self {
            NelsonRule::Beyond3Sigma => 1,
            NelsonRule::NineSameSide => 9,
            NelsonRule::SixTrending => 6,
            NelsonRule::FourteenAlternating => 14,
            NelsonRule::TwoOfThreeBeyond2Sigma => 3,
            NelsonRule::FourOfFiveBeyond1Sigma => 5,
            NelsonRule::FifteenWithin1Sigma => 15,
            NelsonRule::EightBeyond1SigmaNeitherSide => 8,
        }
    }

    /// Evaluate this rule against a window's trailing points (oldest
    /// first). Returns `true` if the most recent point completes a
    /// trigger for this rule.
    fn triggers(self, points: &[WindowPoint]) -> bool {
        if points.len() < self.needed_depth() {
            return false;
        }
        let window = &points[points.len() - self.needed_depth()..];
        match self {
            NelsonRule::Beyond3Sigma => window[0].zone.is_beyond_limits(),
            NelsonRule::NineSameSide => {
                let upper = window[0].zone.is_upper_side();
                window.iter().all(|p| p.zone.is_upper_side() == upper)
            }
            NelsonRule::SixTrending => {
                let increasing = window.windows(2).all(|w| w[1].mean > w[0].mean);
                let decreasing = window.windows(2).all(|w| w[1].mean < w[0].mean);
                increasing || decreasing
            }
            NelsonRule::FourteenAlternating => {
                let directions: Vec<bool> = window.windows(2).map(|w| w[1].mean > w[0].mean).collect();
                // Strict alternation: every consecutive pair of direction
                // steps must flip. A run with two same-direction steps in
                // a row disqualifies the whole 14-point window.
                directions.windows(2).all(|d| d[0] != d[1])
            }
            NelsonRule::TwoOfThreeBeyond2Sigma => {
                let upper_count = window.iter().filter(|p| beyond_band(p.zone, 2, true)).count();
                let lower_count = window.iter().filter(|p| beyond_band(p.zone, 2, false)).count();
                upper_count >= 2 || lower_count >= 2
            }
            NelsonRule::FourOfFiveBeyond1Sigma => {
                let upper_count = window.iter().filter(|p| beyond_band(p.zone, 1, true)).count();
                let lower_count = window.iter().filter(|p| beyond_band(p.zone, 1, false)).count();
                upper_count >= 4 || lower_count >= 4
            }
            NelsonRule::FifteenWithin1Sigma => window.iter().all(|p| p.zone.sigma_band() == 0),
            NelsonRule::EightBeyond1SigmaNeitherSide => {
                window.iter().all(|p| p.zone.sigma_band() >= 1)
            }
        }
    }
}

/// True if `zone` is at or beyond `band` sigma on the requested side.
/// "Same side" ties (a point exactly on the center line) count as upper,
/// matching the center-line-is-upper tie-break used elsewhere.
fn beyond_band(zone: Zone, band: u8, upper: bool) -> bool {
    if zone.is_upper_side() != upper {
        return false;
    }
    zone.sigma_band() >= band
}

/// Tagged-enum rule library. Stateless — all state needed to evaluate a
/// rule lives in the window passed to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NelsonRuleLibrary;

impl NelsonRuleLibrary {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every enabled rule for `characteristic` against `points`
    /// (oldest first, ending with the newly appended point), returning a
    /// `Violation` for each rule that fires. `sample_id`/`characteristic_id`
    /// are attached to each violation; `next_id` assigns violation ids.
    pub fn check_all(
        &self,
        characteristic: &Characteristic,
        points: &[WindowPoint],
        mut next_id: impl FnMut() -> ViolationId,
    ) -> Vec<Violation> {
        let sample_id = match points.last() {
            Some(p) => p.sample_id,
            None => return Vec::new(),
        };
        NelsonRule::ALL
            .into_iter()
            .filter(|rule| characteristic.rule_config(rule.id()).is_enabled)
            .filter_map(|rule| {
                rule.triggers(points).then(|| {
                    Violation::new(
                        next_id(),
                        sample_id,
                        characteristic.id,
                        rule.id(),
                        rule.name(),
                        rule.severity(),
                    )
                })
            })
            .collect()
    }

    /// Evaluate a single rule by id, honoring its enablement on
    /// `characteristic`. Returns `None` if the rule is unknown, disabled,
    /// or did not trigger.
    pub fn check_one(
        &self,
        characteristic: &Characteristic,
        rule_id: u8,
        points: &[WindowPoint],
        next_id: impl FnOnce() -> ViolationId,
    ) -> Option<Violation> {
        let rule = NelsonRule::from_id(rule_id)?;
        if !characteristic.rule_config(rule_id).is_enabled {
            return None;
        }
        let sample_id = points.last()?.sample_id;
        if rule.triggers(points) {
            Some(Violation::new(
                next_id(),
                sample_id,
                characteristic.id,
                rule.id(),
                rule.name(),
                rule.severity(),
            ))
        } else {
            None
        }
    }
}
