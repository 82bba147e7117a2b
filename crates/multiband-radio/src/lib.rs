//! Adaptive multiband radio with cognitive spectrum management
//!
//! Models a software-defined radio spanning microwave through optical
//! frequencies. Band selection, modulation choice, and chunk sizing all
//! adapt to live channel assessments supplied by a pluggable
//! [`ChannelModel`], so the same engine drives both the bundled
//! simulated channel and hardware-backed implementations.

pub mod channel;
pub mod radio;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use channel::{ChannelModel, SimulatedChannel};
pub use radio::{MultibandRadio, RadioConfig};

pub type Result<T> = std::result::Result<T, RadioError>;

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("link not found: {0}")]
    LinkNotFound(String),
}

/// Communication frequency bands, in ascending carrier frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrequencyBand {
    Microwave,
    MillimeterWave,
    Terahertz,
    Optical,
}

impl FrequencyBand {
    pub const ALL: [FrequencyBand; 4] = [
        FrequencyBand::Microwave,
        FrequencyBand::MillimeterWave,
        FrequencyBand::Terahertz,
        FrequencyBand::Optical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FrequencyBand::Microwave => "Microwave",
            FrequencyBand::MillimeterWave => "Millimeter Wave",
            FrequencyBand::Terahertz => "Terahertz",
            FrequencyBand::Optical => "Optical",
        }
    }

    /// Carrier frequency range in Hz.
    pub fn freq_range_hz(&self) -> (f64, f64) {
        match self {
            FrequencyBand::Microwave => (300e6, 30e9),
            FrequencyBand::MillimeterWave => (30e9, 300e9),
            FrequencyBand::Terahertz => (300e9, 3e12),
            FrequencyBand::Optical => (1e14, 1e15),
        }
    }

    pub fn center_freq_hz(&self) -> f64 {
        let (lo, hi) = self.freq_range_hz();
        (lo + hi) / 2.0
    }

    /// Usable channel bandwidth in Hz.
    pub fn bandwidth_hz(&self) -> f64 {
        match self {
            FrequencyBand::Microwave => 100e6,
            FrequencyBand::MillimeterWave => 1e9,
            FrequencyBand::Terahertz => 10e9,
            FrequencyBand::Optical => 100e9,
        }
    }

    /// Nominal antenna gain in dBi.
    pub fn antenna_gain_dbi(&self) -> f64 {
        match self {
            FrequencyBand::Microwave => 20.0,
            FrequencyBand::MillimeterWave => 30.0,
            FrequencyBand::Terahertz => 40.0,
            FrequencyBand::Optical => 50.0,
        }
    }

    /// Terahertz and optical links are highly directional and therefore
    /// candidates for beamforming-based interference mitigation.
    pub fn is_directional(&self) -> bool {
        matches!(self, FrequencyBand::Terahertz | FrequencyBand::Optical)
    }
}

/// Modulation schemes ordered roughly by robustness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
    Ofdm,
}

impl Modulation {
    /// SNR required for acceptable BER, in dB.
    pub fn required_snr_db(&self) -> f64 {
        match self {
            Modulation::Bpsk => 10.0,
            Modulation::Qpsk => 13.0,
            Modulation::Qam16 => 18.0,
            Modulation::Qam64 => 24.0,
            Modulation::Ofdm => 15.0,
        }
    }

    /// Spectral efficiency in bits/s/Hz.
    pub fn spectral_efficiency(&self) -> f64 {
        match self {
            Modulation::Bpsk => 1.0,
            Modulation::Qpsk => 2.0,
            Modulation::Qam16 => 4.0,
            Modulation::Qam64 => 6.0,
            Modulation::Ofdm => 3.0,
        }
    }

    /// Next more robust scheme on the fallback ladder, if any.
    pub fn step_down(&self) -> Option<Modulation> {
        match self {
            Modulation::Qam64 => Some(Modulation::Qam16),
            Modulation::Qam16 => Some(Modulation::Qpsk),
            Modulation::Qpsk | Modulation::Ofdm => Some(Modulation::Bpsk),
            Modulation::Bpsk => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherImpact {
    Clear,
    Cloudy,
    Rain,
    Storm,
}

/// Point-in-time channel assessment for a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConditions {
    pub snr_db: f64,
    pub ber: f64,
    pub atmospheric_loss_db: f64,
    pub multipath_fading: f64,
    pub doppler_shift_hz: f64,
    /// Fraction of the channel occupied by interferers, 0.0-1.0.
    pub interference_level: f64,
    pub weather: WeatherImpact,
    /// Composite quality score in [0, 1].
    pub link_quality_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioLink {
    pub link_id: String,
    pub source: String,
    pub destination: String,
    pub band: FrequencyBand,
    pub modulation: Modulation,
    pub data_rate_bps: f64,
    pub power_level_dbm: f64,
    pub antenna_gain_dbi: f64,
    pub is_active: bool,
    pub conditions: Option<ChannelConditions>,
    pub quality_history: Vec<f64>,
    pub established_at: chrono::DateTime<chrono::Utc>,
}

/// QoS constraints attached to a transmission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosRequirements {
    pub bandwidth_mbps: f64,
    pub max_ber: f64,
    pub latency_ms: f64,
    pub distance_km: f64,
}

impl Default for QosRequirements {
    fn default() -> Self {
        Self {
            bandwidth_mbps: 10.0,
            max_ber: 1e-6,
            latency_ms: 100.0,
            distance_km: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionRequest {
    pub request_id: String,
    pub source: String,
    pub destination: String,
    pub data_size: usize,
    pub qos: QosRequirements,
    /// 1-10, 10 highest.
    pub priority: u8,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    /// Empty list means any supported band may be chosen.
    pub preferred_bands: Vec<FrequencyBand>,
}

/// One spectrum-sensing sample for a band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpectrumReading {
    pub occupancy: f64,
    pub interference: f64,
    pub signal_quality: f64,
    pub available_bandwidth_mhz: f64,
}

/// Outcome of an adaptive transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionReport {
    pub success: bool,
    pub bytes_transmitted: usize,
    pub transmission_time_secs: f64,
    pub effective_data_rate_bps: f64,
    pub retransmissions: u32,
    pub final_ber: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioStatus {
    pub radio_id: String,
    pub supported_bands: Vec<String>,
    pub active_links: usize,
    pub links_per_band: HashMap<String, usize>,
    pub average_throughput_mbps: f64,
    /// Mean sensed occupancy per band name over the retained history.
    pub spectrum_occupancy: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_tables_are_monotonic() {
        let mut prev_bw = 0.0;
        let mut prev_gain = 0.0;
        for band in FrequencyBand::ALL {
            assert!(band.bandwidth_hz() > prev_bw);
            assert!(band.antenna_gain_dbi() > prev_gain);
            let (lo, hi) = band.freq_range_hz();
            assert!(lo < hi);
            assert!(band.center_freq_hz() > lo && band.center_freq_hz() < hi);
            prev_bw = band.bandwidth_hz();
            prev_gain = band.antenna_gain_dbi();
        }
    }

    #[test]
    fn only_high_bands_are_directional() {
        assert!(!FrequencyBand::Microwave.is_directional());
        assert!(!FrequencyBand::MillimeterWave.is_directional());
        assert!(FrequencyBand::Terahertz.is_directional());
        assert!(FrequencyBand::Optical.is_directional());
    }

    #[test]
    fn modulation_ladder_terminates_at_bpsk() {
        let mut m = Modulation::Qam64;
        let mut steps = 0;
        while let Some(next) = m.step_down() {
            assert!(next.required_snr_db() < m.required_snr_db());
            m = next;
            steps += 1;
            assert!(steps < 10);
        }
        assert_eq!(m, Modulation::Bpsk);
    }
}
