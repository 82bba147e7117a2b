//! Physical channel abstraction
//!
//! The radio engine never talks to hardware directly. Everything it
//! learns about the medium comes through [`ChannelModel`], so tests and
//! simulations inject deterministic models while deployments wire in
//! real front-end telemetry.

use rand::Rng;
use std::sync::Mutex;

use crate::{ChannelConditions, FrequencyBand, SpectrumReading, WeatherImpact};

/// Source of channel measurements for one radio front end.
pub trait ChannelModel: Send + Sync {
    /// Assess current conditions on `band`.
    fn assess(&self, band: FrequencyBand) -> ChannelConditions;

    /// One spectrum-sensing sample for `band`.
    fn sample_spectrum(&self, band: FrequencyBand) -> SpectrumReading;

    /// Whether a chunk transmitted at the given quality gets through.
    fn chunk_succeeds(&self, quality: f64) -> bool;
}

/// Stochastic channel driven by `rand`, with an externally settable
/// weather state shared by all bands.
pub struct SimulatedChannel {
    weather: Mutex<WeatherImpact>,
}

impl SimulatedChannel {
    pub fn new() -> Self {
        Self {
            weather: Mutex::new(WeatherImpact::Clear),
        }
    }

    pub fn set_weather(&self, weather: WeatherImpact) {
        *self.weather.lock().unwrap() = weather;
    }

    pub fn weather(&self) -> WeatherImpact {
        *self.weather.lock().unwrap()
    }
}

impl Default for SimulatedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelModel for SimulatedChannel {
    fn assess(&self, band: FrequencyBand) -> ChannelConditions {
        let mut rng = rand::thread_rng();
        let weather = self.weather();

        let mut snr_db: f64 = rng.gen_range(10.0..30.0);
        let ber: f64 = rng.gen_range(1e-9..1e-3);
        let mut atmospheric_loss_db: f64 = rng.gen_range(0.1..5.0);

        // Rain fade hits the millimeter and sub-millimeter bands hard;
        // optical is blocked by any cloud cover.
        let weather_penalty = match band {
            FrequencyBand::MillimeterWave | FrequencyBand::Terahertz
                if matches!(weather, WeatherImpact::Rain | WeatherImpact::Storm) =>
            {
                atmospheric_loss_db *= 3.0;
                snr_db *= 0.5;
                0.4
            }
            FrequencyBand::Optical
                if matches!(
                    weather,
                    WeatherImpact::Cloudy | WeatherImpact::Rain | WeatherImpact::Storm
                ) =>
            {
                atmospheric_loss_db *= 10.0;
                snr_db *= 0.1;
                0.1
            }
            _ => 1.0,
        };

        let quality_factors = [
            (snr_db / 20.0).min(1.0),
            (1e-6 / ber).min(1.0),
            (10.0 / atmospheric_loss_db).min(1.0),
        ];
        let base_quality: f64 = quality_factors.iter().sum::<f64>() / quality_factors.len() as f64;
        let link_quality_score = (base_quality * weather_penalty).clamp(0.0, 1.0);

        ChannelConditions {
            snr_db,
            ber,
            atmospheric_loss_db,
            multipath_fading: rng.gen_range(0.0..3.0),
            doppler_shift_hz: rng.gen_range(-1000.0..1000.0),
            interference_level: rng.gen_range(0.0..0.3),
            weather,
            link_quality_score,
        }
    }

    fn sample_spectrum(&self, _band: FrequencyBand) -> SpectrumReading {
        let mut rng = rand::thread_rng();
        let occupancy: f64 = rng.gen_range(0.1..0.8);
        SpectrumReading {
            occupancy,
            interference: rng.gen_range(0.0..0.3),
            signal_quality: rng.gen_range(0.6..1.0),
            available_bandwidth_mhz: (1.0 - occupancy) * 100.0,
        }
    }

    fn chunk_succeeds(&self, quality: f64) -> bool {
        rand::thread_rng().gen::<f64>() < quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_score_stays_in_unit_interval() {
        let channel = SimulatedChannel::new();
        for weather in [
            WeatherImpact::Clear,
            WeatherImpact::Cloudy,
            WeatherImpact::Rain,
            WeatherImpact::Storm,
        ] {
            channel.set_weather(weather);
            for band in FrequencyBand::ALL {
                for _ in 0..50 {
                    let c = channel.assess(band);
                    assert!((0.0..=1.0).contains(&c.link_quality_score));
                }
            }
        }
    }

    #[test]
    fn storm_blocks_optical() {
        let channel = SimulatedChannel::new();
        channel.set_weather(WeatherImpact::Storm);
        for _ in 0..200 {
            let c = channel.assess(FrequencyBand::Optical);
            assert!(c.link_quality_score < 0.2);
            assert!(c.snr_db <= 3.0);
            assert!(c.atmospheric_loss_db >= 1.0);
        }
    }

    #[test]
    fn rain_degrades_millimeter_wave() {
        let channel = SimulatedChannel::new();
        channel.set_weather(WeatherImpact::Rain);
        for _ in 0..200 {
            let c = channel.assess(FrequencyBand::MillimeterWave);
            assert!(c.snr_db <= 15.0);
            assert!(c.link_quality_score <= 0.4);
        }
    }

    #[test]
    fn spectrum_reading_bandwidth_tracks_occupancy() {
        let channel = SimulatedChannel::new();
        let r = channel.sample_spectrum(FrequencyBand::Microwave);
        assert!((0.1..0.8).contains(&r.occupancy));
        let expected = (1.0 - r.occupancy) * 100.0;
        assert!((r.available_bandwidth_mhz - expected).abs() < 1e-9);
    }

    #[test]
    fn chunk_success_follows_quality_extremes() {
        let channel = SimulatedChannel::new();
        for _ in 0..100 {
            assert!(channel.chunk_succeeds(1.0));
            assert!(!channel.chunk_succeeds(0.0));
        }
    }
}
