//! Fonte de leituras e relógio do dispositivo.
//!
//! No host não há sensor nem RTC reais: o sensor é simulado e o relógio é o
//! do sistema, com a mesma checagem de sanidade que o firmware aplica ao
//! acertar o RTC.

use coletor_core::Reading;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Menor timestamp aceito como "relógio acertado".
pub const MIN_PLAUSIBLE_TIME: u32 = 1_494_614_996;
/// Maior timestamp aceito como "relógio acertado".
pub const MAX_PLAUSIBLE_TIME: u32 = 1_810_148_331;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Leitura inválida do sensor (temp={temperature_f}, umid={humidity})")]
    InvalidSample { temperature_f: f32, humidity: f32 },
}

/// Sensor de temperatura (°F) e umidade relativa (%).
pub trait Sensor {
    fn sample(&mut self) -> Result<(f32, f32), SensorError>;
}

/// Amostra o sensor e monta a leitura, aplicando o offset de calibração
/// antes do índice de calor.
pub fn take_reading(
    sensor: &mut dyn Sensor,
    capture_time: u32,
    temperature_offset_f: f32,
) -> Result<Reading, SensorError> {
    let (raw_f, humidity) = sensor.sample()?;
    if !raw_f.is_finite() || !humidity.is_finite() || !(0.0..=100.0).contains(&humidity) {
        return Err(SensorError::InvalidSample {
            temperature_f: raw_f,
            humidity,
        });
    }
    let reading = Reading::new(capture_time, raw_f + temperature_offset_f, humidity);
    debug!(
        "Leitura: {:.2}°F {:.1}% (índice de calor {:.2}°F)",
        reading.temperature_f, reading.humidity, reading.heat_index
    );
    Ok(reading)
}

/// Sensor simulado: oscilação lenta em torno de uma base.
pub struct SimulatedSensor {
    base_f: f32,
    base_humidity: f32,
    step: u32,
}

impl SimulatedSensor {
    pub fn new(base_f: f32, base_humidity: f32) -> Self {
        Self {
            base_f,
            base_humidity,
            step: 0,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(75.0, 45.0)
    }
}

impl Sensor for SimulatedSensor {
    fn sample(&mut self) -> Result<(f32, f32), SensorError> {
        let phase = self.step as f32 * 0.3;
        self.step = self.step.wrapping_add(1);
        let temperature_f = self.base_f + 6.0 * phase.sin();
        let humidity = (self.base_humidity + 10.0 * phase.cos()).clamp(0.0, 100.0);
        Ok((temperature_f, humidity))
    }
}

/// Hora atual em segundos Unix, ou `None` se o relógio não parece acertado.
pub fn now_epoch() -> Option<u32> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    u32::try_from(secs).ok().filter(|t| is_plausible_time(*t))
}

pub fn is_plausible_time(t: u32) -> bool {
    (MIN_PLAUSIBLE_TIME..=MAX_PLAUSIBLE_TIME).contains(&t)
}
