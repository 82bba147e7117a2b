//! Cognitive multiband radio engine
//!
//! Owns the active link table and drives spectrum sensing, band
//! selection, link budgeting, adaptive chunked transmission, and
//! interference mitigation against a [`ChannelModel`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::ChannelModel;
use crate::{
    ChannelConditions, FrequencyBand, Modulation, QosRequirements, RadioError, RadioLink,
    RadioStatus, Result, SpectrumReading, TransmissionRequest, WeatherImpact,
};

const SPECTRUM_HISTORY_LEN: usize = 100;
const BASE_CHUNK_SIZE: usize = 1024;
const MIN_CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct RadioConfig {
    pub min_snr_db: f64,
    pub max_acceptable_ber: f64,
    /// Composite quality below which links are rejected and
    /// transmissions adapt their parameters.
    pub link_quality_threshold: f64,
    /// Dwell time for one spectrum sweep.
    pub sensing_duration: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            min_snr_db: 10.0,
            max_acceptable_ber: 1e-6,
            link_quality_threshold: 0.7,
            sensing_duration: Duration::from_secs(1),
            max_consecutive_failures: 5,
        }
    }
}

struct RadioState {
    active_links: HashMap<String, RadioLink>,
    spectrum_history: HashMap<FrequencyBand, VecDeque<f64>>,
    throughput_history: Vec<f64>,
}

pub struct MultibandRadio {
    radio_id: String,
    supported_bands: Vec<FrequencyBand>,
    channel: Arc<dyn ChannelModel>,
    config: RadioConfig,
    state: Mutex<RadioState>,
}

impl MultibandRadio {
    pub fn new(
        radio_id: impl Into<String>,
        supported_bands: Vec<FrequencyBand>,
        channel: Arc<dyn ChannelModel>,
    ) -> Self {
        Self::with_config(radio_id, supported_bands, channel, RadioConfig::default())
    }

    pub fn with_config(
        radio_id: impl Into<String>,
        supported_bands: Vec<FrequencyBand>,
        channel: Arc<dyn ChannelModel>,
        config: RadioConfig,
    ) -> Self {
        let radio_id = radio_id.into();
        info!(
            radio_id = %radio_id,
            bands = supported_bands.len(),
            "multiband radio initialized"
        );
        Self {
            radio_id,
            supported_bands,
            channel,
            config,
            state: Mutex::new(RadioState {
                active_links: HashMap::new(),
                spectrum_history: HashMap::new(),
                throughput_history: Vec::new(),
            }),
        }
    }

    pub fn supported_bands(&self) -> &[FrequencyBand] {
        &self.supported_bands
    }

    /// Sweep all supported bands and record occupancy history.
    pub async fn sense_spectrum(
        &self,
        duration: Duration,
    ) -> HashMap<FrequencyBand, SpectrumReading> {
        tokio::time::sleep(duration).await;

        let mut readings = HashMap::new();
        let mut state = self.state.lock().unwrap();
        for &band in &self.supported_bands {
            let reading = self.channel.sample_spectrum(band);
            let history = state.spectrum_history.entry(band).or_default();
            history.push_back(reading.occupancy);
            if history.len() > SPECTRUM_HISTORY_LEN {
                history.pop_front();
            }
            readings.insert(band, reading);
        }
        debug!(bands = readings.len(), "spectrum sweep complete");
        readings
    }

    /// Pick the best band for a request given per-destination channel
    /// conditions. Candidates are the request's preferred bands, or all
    /// supported bands when no preference is given.
    pub async fn select_optimal_band(
        &self,
        request: &TransmissionRequest,
        conditions: &HashMap<String, ChannelConditions>,
    ) -> Option<FrequencyBand> {
        let spectrum = self.sense_spectrum(self.config.sensing_duration).await;
        let destination_conditions = conditions.get(&request.destination);

        let mut best: Option<(FrequencyBand, f64)> = None;
        for &band in &self.supported_bands {
            if !request.preferred_bands.is_empty() && !request.preferred_bands.contains(&band) {
                continue;
            }
            let Some(reading) = spectrum.get(&band) else {
                continue;
            };
            let score = self.band_score(band, request, reading, destination_conditions);
            // Strict comparison keeps the earliest band on ties.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((band, score));
            }
        }

        match best {
            Some((band, score)) => {
                info!(band = band.name(), score = %format!("{score:.2}"), "selected band");
                Some(band)
            }
            None => None,
        }
    }

    fn band_score(
        &self,
        band: FrequencyBand,
        request: &TransmissionRequest,
        reading: &SpectrumReading,
        conditions: Option<&ChannelConditions>,
    ) -> f64 {
        let mut score = 1.0;

        score *= 1.0 - reading.occupancy;
        score *= 1.0 - reading.interference;

        if let Some(cond) = conditions {
            score *= cond.link_quality_score;

            match band {
                FrequencyBand::MillimeterWave | FrequencyBand::Terahertz
                    if matches!(cond.weather, WeatherImpact::Rain | WeatherImpact::Storm) =>
                {
                    score *= 0.3;
                }
                FrequencyBand::Optical
                    if matches!(
                        cond.weather,
                        WeatherImpact::Cloudy | WeatherImpact::Rain | WeatherImpact::Storm
                    ) =>
                {
                    score *= 0.1;
                }
                _ => {}
            }
        }

        if reading.available_bandwidth_mhz >= request.qos.bandwidth_mbps {
            score *= 1.2;
        } else {
            score *= 0.5;
        }

        // Free-space optics wins on latency-critical traffic.
        if band == FrequencyBand::Optical && request.qos.latency_ms < 10.0 {
            score *= 1.5;
        }

        score.clamp(0.0, 1.0)
    }

    /// Establish a link on `band`, or return the existing link with the
    /// same id. Returns `None` when the initial channel assessment falls
    /// below the quality threshold.
    pub fn establish_link(
        &self,
        source: &str,
        destination: &str,
        band: FrequencyBand,
        qos: &QosRequirements,
    ) -> Option<RadioLink> {
        let link_id = format!("{source}-{destination}-{}", band.name());

        {
            let state = self.state.lock().unwrap();
            if let Some(existing) = state.active_links.get(&link_id) {
                return Some(existing.clone());
            }
        }

        let modulation = select_modulation(band, qos);
        let (power_level_dbm, data_rate_bps) = link_budget(band, modulation, qos);

        let conditions = self.channel.assess(band);
        if conditions.link_quality_score <= self.config.link_quality_threshold {
            warn!(
                link_id = %link_id,
                quality = %format!("{:.2}", conditions.link_quality_score),
                "link quality too low, not establishing"
            );
            return None;
        }

        let link = RadioLink {
            link_id: link_id.clone(),
            source: source.to_string(),
            destination: destination.to_string(),
            band,
            modulation,
            data_rate_bps,
            power_level_dbm,
            antenna_gain_dbi: band.antenna_gain_dbi(),
            is_active: true,
            conditions: Some(conditions),
            quality_history: Vec::new(),
            established_at: chrono::Utc::now(),
        };

        info!(
            band = band.name(),
            source,
            destination,
            rate_mbps = %format!("{:.1}", data_rate_bps / 1e6),
            "link established"
        );

        let mut state = self.state.lock().unwrap();
        state.active_links.insert(link_id, link.clone());
        Some(link)
    }

    /// Transmit `data` over an established link, reassessing the channel
    /// before every chunk and adapting rate, power, and modulation when
    /// quality drops below the threshold.
    pub async fn adaptive_transmission(
        &self,
        link_id: &str,
        data: &[u8],
    ) -> Result<crate::TransmissionReport> {
        let mut link = {
            let state = self.state.lock().unwrap();
            state
                .active_links
                .get(link_id)
                .cloned()
                .ok_or_else(|| RadioError::LinkNotFound(link_id.to_string()))?
        };

        let start = tokio::time::Instant::now();
        let mut bytes_transmitted = 0usize;
        let mut retransmissions = 0u32;
        let mut consecutive_failures = 0u32;

        while bytes_transmitted < data.len() {
            let conditions = self.channel.assess(link.band);
            let quality = conditions.link_quality_score;
            link.quality_history.push(quality);
            link.conditions = Some(conditions.clone());

            if quality < self.config.link_quality_threshold {
                self.adapt_parameters(&mut link, &conditions);
            }

            let chunk_size = (data.len() - bytes_transmitted)
                .min(MIN_CHUNK_SIZE.max((BASE_CHUNK_SIZE as f64 * quality) as usize));

            let chunk_time = chunk_size as f64 * 8.0 / link.data_rate_bps;
            tokio::time::sleep(Duration::from_secs_f64(chunk_time.min(0.001))).await;

            if self.channel.chunk_succeeds(quality) {
                bytes_transmitted += chunk_size;
                consecutive_failures = 0;
                self.state
                    .lock()
                    .unwrap()
                    .throughput_history
                    .push(link.data_rate_bps);
            } else {
                retransmissions += 1;
                consecutive_failures += 1;
                if consecutive_failures >= self.config.max_consecutive_failures {
                    warn!(link_id, retransmissions, "aborting transmission, channel unusable");
                    break;
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        let final_ber = link.conditions.as_ref().map_or(0.0, |c| c.ber);

        {
            let mut state = self.state.lock().unwrap();
            if let Some(stored) = state.active_links.get_mut(link_id) {
                *stored = link;
            }
        }

        Ok(crate::TransmissionReport {
            success: bytes_transmitted == data.len(),
            bytes_transmitted,
            transmission_time_secs: elapsed,
            effective_data_rate_bps: if elapsed > 0.0 {
                bytes_transmitted as f64 * 8.0 / elapsed
            } else {
                0.0
            },
            retransmissions,
            final_ber,
        })
    }

    fn adapt_parameters(&self, link: &mut RadioLink, conditions: &ChannelConditions) {
        if conditions.ber > self.config.max_acceptable_ber {
            link.data_rate_bps *= 0.8;
            debug!(
                link_id = %link.link_id,
                rate_mbps = %format!("{:.1}", link.data_rate_bps / 1e6),
                "reduced data rate, BER too high"
            );
        }

        if conditions.snr_db < self.config.min_snr_db {
            link.power_level_dbm += 3.0;
            debug!(
                link_id = %link.link_id,
                power_dbm = %format!("{:.1}", link.power_level_dbm),
                "increased power, SNR too low"
            );
        }

        if conditions.link_quality_score < 0.5 {
            if let Some(fallback) = link.modulation.step_down() {
                link.modulation = fallback;
                debug!(link_id = %link.link_id, ?fallback, "stepped modulation down");
            }
        }
    }

    /// Attempt to mitigate interference on each listed link. Returns
    /// per-link success; unknown link ids map to `false`.
    pub async fn cognitive_interference_mitigation(
        &self,
        link_ids: &[String],
    ) -> HashMap<String, bool> {
        let mut results = HashMap::new();

        for link_id in link_ids {
            let Some(mut link) = self
                .state
                .lock()
                .unwrap()
                .active_links
                .get(link_id)
                .cloned()
            else {
                results.insert(link_id.clone(), false);
                continue;
            };

            let conditions = match link.conditions.clone() {
                Some(c) => c,
                None => self.channel.assess(link.band),
            };

            // First matching strategy wins. Multipath fading has no
            // dedicated countermeasure and falls through to the band
            // switch, as does a link with no classified cause at all.
            let mitigated = if conditions.doppler_shift_hz.abs() > 500.0 {
                // Doppler smearing: hop the carrier.
                tokio::time::sleep(Duration::from_millis(100)).await;
                debug!(%link_id, "applied frequency hopping");
                true
            } else if conditions.interference_level > 0.2 {
                // Co-channel interference: push through it with more power.
                link.power_level_dbm += 2.0;
                debug!(%link_id, "applied power control");
                true
            } else if link.band.is_directional() {
                // Spatial interference on directional bands: beamform.
                tokio::time::sleep(Duration::from_millis(50)).await;
                debug!(%link_id, "applied beamforming");
                true
            } else if let Some(&alternative) =
                self.supported_bands.iter().find(|&&b| b != link.band)
            {
                info!(
                    %link_id,
                    from = link.band.name(),
                    to = alternative.name(),
                    "switched frequency band"
                );
                link.band = alternative;
                link.antenna_gain_dbi = alternative.antenna_gain_dbi();
                link.data_rate_bps =
                    alternative.bandwidth_hz() * link.modulation.spectral_efficiency();
                true
            } else {
                warn!(%link_id, "no mitigation strategy available");
                false
            };

            {
                let mut state = self.state.lock().unwrap();
                if let Some(stored) = state.active_links.get_mut(link_id) {
                    *stored = link;
                }
            }
            results.insert(link_id.clone(), mitigated);
        }

        results
    }

    pub fn active_link(&self, link_id: &str) -> Option<RadioLink> {
        self.state.lock().unwrap().active_links.get(link_id).cloned()
    }

    pub fn get_radio_status(&self) -> RadioStatus {
        let state = self.state.lock().unwrap();

        let mut links_per_band: HashMap<String, usize> = HashMap::new();
        for link in state.active_links.values() {
            *links_per_band.entry(link.band.name().to_string()).or_default() += 1;
        }

        let average_throughput_mbps = if state.throughput_history.is_empty() {
            0.0
        } else {
            state.throughput_history.iter().sum::<f64>()
                / state.throughput_history.len() as f64
                / 1e6
        };

        let spectrum_occupancy = state
            .spectrum_history
            .iter()
            .map(|(band, history)| {
                let mean = if history.is_empty() {
                    0.0
                } else {
                    history.iter().sum::<f64>() / history.len() as f64
                };
                (band.name().to_string(), mean)
            })
            .collect();

        RadioStatus {
            radio_id: self.radio_id.clone(),
            supported_bands: self.supported_bands.iter().map(|b| b.name().to_string()).collect(),
            active_links: state.active_links.len(),
            links_per_band,
            average_throughput_mbps,
            spectrum_occupancy,
        }
    }
}

/// Modulation choice by band capability and QoS targets.
fn select_modulation(band: FrequencyBand, qos: &QosRequirements) -> Modulation {
    let required_throughput_bps = qos.bandwidth_mbps * 1e6;

    if matches!(
        band,
        FrequencyBand::MillimeterWave | FrequencyBand::Terahertz | FrequencyBand::Optical
    ) {
        if qos.max_ber < 1e-9 {
            Modulation::Qpsk
        } else if required_throughput_bps > 100e6 {
            Modulation::Qam64
        } else {
            Modulation::Qam16
        }
    } else if qos.max_ber < 1e-9 {
        Modulation::Bpsk
    } else {
        Modulation::Qpsk
    }
}

/// Free-space link budget: transmit power to close the link at the
/// modulation's required SNR, plus the achievable data rate.
fn link_budget(band: FrequencyBand, modulation: Modulation, qos: &QosRequirements) -> (f64, f64) {
    let distance_m = qos.distance_km * 1000.0;
    let path_loss_db =
        20.0 * distance_m.log10() + 20.0 * band.center_freq_hz().log10() - 147.55;

    let power_level_dbm = modulation.required_snr_db() + path_loss_db - band.antenna_gain_dbi();
    let data_rate_bps = band.bandwidth_hz() * modulation.spectral_efficiency();

    (power_level_dbm, data_rate_bps)
}
