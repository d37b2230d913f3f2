use crate::equipment::EquipmentProfile;
use rand::Rng;

/// Source of uniform draws for value generation
pub trait Sampler {
    /// Uniform draw from the closed range `[low, high]`
    fn uniform(&mut self, low: f64, high: f64) -> f64;
}

/// Adapts any `rand` generator into a [`Sampler`]
#[derive(Debug, Clone)]
pub struct RngSampler<R>(R);

impl<R: Rng> RngSampler<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl<R: Rng> Sampler for RngSampler<R> {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if low >= high {
            return low;
        }
        self.0.gen_range(low..=high)
    }
}

/// Round to 2 decimal places, half away from zero.
///
/// Rounds the scaled binary value, not its exact decimal expansion, so exact
/// ties such as `0.125` go to `0.13` where Python's `round(x, 2)` gives `0.12`.
/// Values only differ on such ties, in the last cent.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Generate one reading value for `profile`.
///
/// The baseline is always drawn first. With anomalies enabled a second draw
/// `a` in `[-1, 1]` replaces it with `max * a` (a > 0) or `min * -a` (a < 0);
/// `a == 0` keeps the baseline. Anomaly values are not clamped to the profile.
/// The previous value of the tag is never consulted.
pub fn generate_value(
    profile: &EquipmentProfile,
    anomaly_enabled: bool,
    sampler: &mut dyn Sampler,
) -> f64 {
    let baseline = round2(sampler.uniform(profile.min, profile.max));
    if !anomaly_enabled {
        return baseline;
    }

    let anomaly = sampler.uniform(-1.0, 1.0);
    if anomaly > 0.0 {
        round2(profile.max * anomaly)
    } else if anomaly < 0.0 {
        round2(profile.min * -anomaly)
    } else {
        baseline
    }
}
