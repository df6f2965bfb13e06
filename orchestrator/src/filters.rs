//! Derived filter toggles and named presets layered on top of
//! [`node_link::Filters`]'s primitives.
//!
//! The node contract has no notion of "bassboost" or "nightcore" — those are
//! expressed purely as combinations of equalizer bands / timescale / rotation.
//! This controller owns that translation and always schedules a full
//! `filters` payload, since partial filter updates aren't supported by the
//! node.

use node_link::{Equalizer, Filters, Rotation, Timescale};

use crate::Error;

const EQUALIZER_BANDS: u8 = 15;

/// Per-player filter state plus the currently-active derived toggles.
#[derive(Debug, Clone, Default)]
pub struct FiltersController {
    raw: Filters,
    bassboost: Option<f32>,
    nightcore: bool,
    vaporwave: bool,
    eight_d: bool,
}

impl FiltersController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full payload to send to the node. Cloned, since `updatePlayer`
    /// takes it by value.
    pub fn payload(&self) -> Filters {
        self.raw.clone()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// `v ∈ [0, 5]`. `None` clears the bassboost equalizer.
    pub fn set_bassboost(&mut self, v: Option<f32>) -> Result<(), Error> {
        if let Some(v) = v {
            if !(0.0..=5.0).contains(&v) {
                return Err(Error::Validation("bassboost must be in [0, 5]".into()));
            }
            let gain = (v - 1.0) * (1.25 / 9.0) - 0.25;
            self.raw.equalizer = Some(
                (0..EQUALIZER_BANDS)
                    .map(|band| Equalizer { band, gain })
                    .collect(),
            );
        } else {
            self.raw.equalizer = None;
        }
        self.bassboost = v;
        Ok(())
    }

    pub fn bassboost(&self) -> Option<f32> {
        self.bassboost
    }

    /// `nightcore` and `vaporwave` are mutually exclusive timescale presets.
    pub fn set_nightcore(&mut self, enabled: bool) {
        self.nightcore = enabled;
        self.vaporwave = false;
        self.apply_timescale();
    }

    pub fn set_vaporwave(&mut self, enabled: bool) {
        self.vaporwave = enabled;
        self.nightcore = false;
        self.apply_timescale();
    }

    fn apply_timescale(&mut self) {
        if self.nightcore {
            self.raw.timescale = Some(Timescale {
                rate: Some(1.5),
                ..Default::default()
            });
        } else if self.vaporwave {
            self.raw.timescale = Some(Timescale {
                pitch: Some(0.5),
                ..Default::default()
            });
        } else {
            self.raw.timescale = None;
        }
    }

    pub fn nightcore(&self) -> bool {
        self.nightcore
    }

    pub fn vaporwave(&self) -> bool {
        self.vaporwave
    }

    pub fn set_eight_d(&mut self, enabled: bool) {
        self.eight_d = enabled;
        self.raw.rotation = enabled.then_some(Rotation {
            rotation_hz: Some(0.2),
        });
    }

    pub fn eight_d(&self) -> bool {
        self.eight_d
    }

    /// Replaces the entire payload with a primitive block the caller built
    /// directly, clearing derived-toggle bookkeeping (the node contract has
    /// no way to tell a manual equalizer apart from a bassboost one).
    pub fn set_raw(&mut self, filters: Filters) {
        self.raw = filters;
        self.bassboost = None;
        self.nightcore = false;
        self.vaporwave = false;
        self.eight_d = false;
    }

    /// Clears current filters and applies a named preset. Unknown names are
    /// a validation error.
    pub fn apply_preset(&mut self, name: &str) -> Result<(), Error> {
        self.clear();
        match name {
            "gaming" => {
                self.set_bassboost(Some(2.5))?;
            }
            "lofi" => {
                self.raw.timescale = Some(Timescale {
                    speed: Some(0.9),
                    pitch: Some(0.95),
                    ..Default::default()
                });
                self.raw.low_pass = Some(node_link::LowPass {
                    smoothing: Some(8.0),
                });
            }
            "party" => {
                self.set_bassboost(Some(3.5))?;
                self.set_nightcore(true);
            }
            "karaoke_light" => {
                self.raw.karaoke = Some(node_link::Karaoke {
                    level: Some(0.5),
                    mono_level: Some(0.5),
                    filter_band: Some(220.0),
                    filter_width: Some(100.0),
                });
            }
            "karaoke_strong" => {
                self.raw.karaoke = Some(node_link::Karaoke {
                    level: Some(1.0),
                    mono_level: Some(1.0),
                    filter_band: Some(220.0),
                    filter_width: Some(100.0),
                });
            }
            _ => return Err(Error::Validation(format!("unknown filter preset '{name}'"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bassboost_zero_mutes_every_band() {
        let mut f = FiltersController::new();
        f.set_bassboost(Some(0.0)).unwrap();
        let bands = f.payload().equalizer.unwrap();
        assert_eq!(bands.len(), 15);
        assert!((bands[0].gain - (-1.0 * (1.25 / 9.0) - 0.25)).abs() < 1e-6);
    }

    #[test]
    fn bassboost_out_of_range_is_validation_error() {
        let mut f = FiltersController::new();
        assert!(matches!(
            f.set_bassboost(Some(5.1)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn nightcore_and_vaporwave_are_mutually_exclusive() {
        let mut f = FiltersController::new();
        f.set_nightcore(true);
        assert!(f.nightcore());
        f.set_vaporwave(true);
        assert!(!f.nightcore());
        assert!(f.vaporwave());
    }

    #[test]
    fn unknown_preset_is_validation_error() {
        let mut f = FiltersController::new();
        assert!(matches!(
            f.apply_preset("bogus"),
            Err(Error::Validation(_))
        ));
    }
}
