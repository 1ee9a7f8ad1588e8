//! Laço de amostragem: lê o sensor quando a leitura vence e, nos demais
//! ciclos, drena a fila de pendentes.

use crate::sensor::{Sensor, take_reading};
use coletor_core::device_config::ConfigStoreError;
use coletor_core::{Backlog, ConfigStore, Coordinator, DeliveryClient, DeviceConfig, DrainReport, FailStop, Liveness};
use tracing::{info, warn};

/// Motivo para o dispositivo parar e esperar o reset do watchdog.
#[derive(Debug, thiserror::Error)]
pub enum DeviceHalt {
    #[error(transparent)]
    Transmission(#[from] FailStop),

    #[error("Falha ao gravar configuração: {0}")]
    Config(#[from] ConfigStoreError),
}

/// O que aconteceu em um ciclo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nova leitura gravada (e possivelmente entregue)
    Sampled(DrainReport),
    /// Sem leitura neste ciclo; apenas drenagem
    Drained(DrainReport),
}

pub struct Device<B, D, L> {
    coordinator: Coordinator<B, D, L>,
    config_store: ConfigStore,
    config: DeviceConfig,
    sensor: Box<dyn Sensor>,
}

impl<B, D, L> Device<B, D, L>
where
    B: Backlog,
    D: DeliveryClient,
    L: Liveness,
{
    pub fn new(
        coordinator: Coordinator<B, D, L>,
        config_store: ConfigStore,
        config: DeviceConfig,
        sensor: Box<dyn Sensor>,
    ) -> Self {
        Self {
            coordinator,
            config_store,
            config,
            sensor,
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn coordinator(&self) -> &Coordinator<B, D, L> {
        &self.coordinator
    }

    /// Primeira passada após o boot: entrega o que sobrou do último ciclo.
    pub fn boot(&mut self) -> Result<DrainReport, DeviceHalt> {
        let report = self.coordinator.drain(&self.config)?;
        if report.delivered > 0 {
            info!("Boot: {} leituras pendentes entregues", report.delivered);
        }
        Ok(report)
    }

    /// Um ciclo do laço. `now` é `None` quando o relógio não está acertado.
    pub fn tick(&mut self, now: Option<u32>) -> Result<Tick, DeviceHalt> {
        let Some(now) = now.filter(|t| self.config.reading_due(*t)) else {
            if now.is_none() {
                warn!("Relógio não acertado – sem novas leituras");
            }
            return Ok(Tick::Drained(self.coordinator.drain(&self.config)?));
        };

        let reading = match take_reading(self.sensor.as_mut(), now, self.config.temperature_offset_f) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("{e}");
                return Ok(Tick::Drained(self.coordinator.drain(&self.config)?));
            }
        };

        let result = self.coordinator.record_sample(&self.config, reading);
        // A leitura já está no cartão, salvo falha de gravação
        if !matches!(result, Err(FailStop::Storage(_))) {
            self.config_store.update_last_reading_time(&mut self.config, now)?;
        }
        Ok(Tick::Sampled(result?))
    }
}
