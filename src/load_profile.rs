//! Load profiles: the shape of request arrival over time.
//!
//! Generalizes the source's rps-ramp arithmetic (originally scattered across
//! a handful of ad hoc load models) into the five variants the scenario file
//! can name on the wire (§6.1's `loadSimulation.type`).

use std::time::Duration;

/// The shape of request arrival over time for a scenario run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProfile {
    ConstantRate {
        rps: f64,
        duration: Duration,
        ramp_up: Duration,
    },
    RampUp {
        start_rps: f64,
        end_rps: f64,
        duration: Duration,
    },
    Spike {
        base_rps: f64,
        spike_rps: f64,
        spike_duration: Duration,
        duration: Duration,
    },
    Stress {
        max_concurrency: usize,
        duration: Duration,
    },
    Soak {
        rps: f64,
        duration: Duration,
    },
}

impl LoadProfile {
    /// Tolerant parse of the `loadSimulation.type` wire value.
    pub fn type_name(s: &str) -> Option<&'static str> {
        match s.to_ascii_lowercase().as_str() {
            "constantrate" | "constant" => Some("ConstantRate"),
            "rampup" | "ramp" => Some("RampUp"),
            "spike" => Some("Spike"),
            "stress" => Some("Stress"),
            "soak" => Some("Soak"),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::ConstantRate { duration, .. }
            | Self::RampUp { duration, .. }
            | Self::Spike { duration, .. }
            | Self::Stress { duration, .. }
            | Self::Soak { duration, .. } => *duration,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.duration().is_zero() {
            return Err("load profile duration must be > 0".into());
        }
        match self {
            Self::ConstantRate { rps, .. } | Self::Soak { rps, .. } => {
                if *rps < 0.0 {
                    return Err("rps must be >= 0".into());
                }
            }
            Self::RampUp {
                start_rps, end_rps, ..
            } => {
                if *start_rps < 0.0 || *end_rps < 0.0 {
                    return Err("rps must be >= 0".into());
                }
            }
            Self::Spike {
                base_rps,
                spike_rps,
                spike_duration,
                duration,
            } => {
                if *base_rps < 0.0 || *spike_rps < 0.0 {
                    return Err("rps must be >= 0".into());
                }
                if spike_duration > duration {
                    return Err("spike duration must not exceed overall duration".into());
                }
            }
            Self::Stress { .. } => {}
        }
        Ok(())
    }

    /// The instantaneous target rps at `elapsed` seconds into the run,
    /// folding in the common ramp-up scaling for rate-based profiles
    /// (§4.4's "During ramp-up..." rule). `Stress` has no rate — callers
    /// must check for it separately and issue unthrottled.
    pub fn target_rps(&self, elapsed: Duration, ramp_up: Duration) -> f64 {
        let base = match self {
            Self::ConstantRate { rps, .. } => *rps,
            Self::Soak { rps, .. } => *rps,
            Self::RampUp {
                start_rps,
                end_rps,
                duration,
            } => {
                let t = (elapsed.as_secs_f64() / duration.as_secs_f64().max(f64::EPSILON)).min(1.0);
                start_rps + (end_rps - start_rps) * t
            }
            Self::Spike {
                base_rps,
                spike_rps,
                spike_duration,
                duration,
            } => {
                let spike_start = duration.as_secs_f64() / 2.0;
                let spike_end = spike_start + spike_duration.as_secs_f64();
                let t = elapsed.as_secs_f64();
                if t >= spike_start && t <= spike_end {
                    *spike_rps
                } else {
                    *base_rps
                }
            }
            Self::Stress { .. } => return f64::INFINITY,
        };

        if ramp_up.is_zero() {
            return base;
        }
        let ramp_scale = (elapsed.as_secs_f64() / ramp_up.as_secs_f64()).min(1.0);
        base * ramp_scale
    }

    pub fn is_unthrottled(&self) -> bool {
        matches!(self, Self::Stress { .. })
    }

    /// Worker-pool size derivation for Stress (§4.4: `W = MaxConcurrency`);
    /// other profiles leave sizing to the scenario's `concurrentUsers`.
    pub fn stress_concurrency(&self) -> Option<usize> {
        match self {
            Self::Stress { max_concurrency, .. } => Some(*max_concurrency),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_rate_target_rps_is_flat_after_ramp() {
        let profile = LoadProfile::ConstantRate {
            rps: 50.0,
            duration: Duration::from_secs(10),
            ramp_up: Duration::from_secs(0),
        };
        assert_eq!(profile.target_rps(Duration::from_secs(5), Duration::ZERO), 50.0);
    }

    #[test]
    fn ramp_up_scales_linearly_during_ramp() {
        let profile = LoadProfile::ConstantRate {
            rps: 100.0,
            duration: Duration::from_secs(10),
            ramp_up: Duration::from_secs(0),
        };
        let half = profile.target_rps(Duration::from_secs(1), Duration::from_secs(2));
        assert!((half - 50.0).abs() < 0.01);
    }

    #[test]
    fn rampup_profile_interpolates_between_endpoints() {
        let profile = LoadProfile::RampUp {
            start_rps: 10.0,
            end_rps: 110.0,
            duration: Duration::from_secs(100),
        };
        let mid = profile.target_rps(Duration::from_secs(50), Duration::ZERO);
        assert!((mid - 60.0).abs() < 0.01);
    }

    #[test]
    fn spike_profile_raises_rate_mid_run() {
        let profile = LoadProfile::Spike {
            base_rps: 10.0,
            spike_rps: 200.0,
            spike_duration: Duration::from_secs(2),
            duration: Duration::from_secs(10),
        };
        // spike window is centered at duration/2 = 5s, so [5,7]
        assert_eq!(profile.target_rps(Duration::from_secs(2), Duration::ZERO), 10.0);
        assert_eq!(profile.target_rps(Duration::from_secs(6), Duration::ZERO), 200.0);
        assert_eq!(profile.target_rps(Duration::from_secs(9), Duration::ZERO), 10.0);
    }

    #[test]
    fn stress_is_unthrottled() {
        let profile = LoadProfile::Stress {
            max_concurrency: 64,
            duration: Duration::from_secs(10),
        };
        assert!(profile.is_unthrottled());
        assert_eq!(profile.stress_concurrency(), Some(64));
    }

    #[test]
    fn zero_duration_fails_validation() {
        let profile = LoadProfile::ConstantRate {
            rps: 10.0,
            duration: Duration::ZERO,
            ramp_up: Duration::ZERO,
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn spike_duration_exceeding_total_fails_validation() {
        let profile = LoadProfile::Spike {
            base_rps: 1.0,
            spike_rps: 2.0,
            spike_duration: Duration::from_secs(20),
            duration: Duration::from_secs(10),
        };
        assert!(profile.validate().is_err());
    }
}
