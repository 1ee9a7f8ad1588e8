//! Capacidade de entrega: uma tentativa bloqueante de enviar um registro.
//!
//! Cada transporte (HTTP via Wi-Fi, HTTP via modem, UDP) implementa
//! [`DeliveryClient`]. O coordenador trata qualquer resultado diferente de
//! "200" como falha, sem distinguir a causa.

use crate::device_config::DeviceConfig;
use crate::types::Reading;
use std::io;

/// Versão reportada ao endpoint junto de cada leitura.
pub const FIRMWARE_VERSION: &str = concat!("C-", env!("CARGO_PKG_VERSION"));

/// Motivo de uma tentativa de entrega falhar.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Falha ao conectar em {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Status não-200: {0}")]
    Status(u16),

    #[error("Sem resposta dentro do timeout")]
    Timeout,

    #[error("Resposta inválida: {0}")]
    BadResponse(String),

    #[error("Erro de I/O: {0}")]
    Io(#[from] io::Error),
}

/// Dados de uma tentativa de envio.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub reading: &'a Reading,
    pub hub_id: &'a str,
    pub cell_id: &'a str,
    pub endpoint_domain: &'a str,
    pub endpoint_path: &'a str,
    pub reading_interval_s: u32,
}

impl<'a> Upload<'a> {
    pub fn new(reading: &'a Reading, config: &'a DeviceConfig) -> Self {
        Self {
            reading,
            hub_id: &config.hub_id,
            cell_id: &config.cell_id,
            endpoint_domain: &config.endpoint_domain,
            endpoint_path: &config.endpoint_path,
            reading_interval_s: config.reading_interval_s,
        }
    }

    /// Campos do POST `application/x-www-form-urlencoded`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("hub", self.hub_id.to_string()),
            ("cell", self.cell_id.to_string()),
            ("time", self.reading.capture_time.to_string()),
            ("temp", format!("{:.3}", self.reading.temperature_f)),
            ("humidity", format!("{:.3}", self.reading.humidity)),
            ("heat_index", format!("{:.3}", self.reading.heat_index)),
            ("sp", self.reading_interval_s.to_string()),
            ("cell_version", FIRMWARE_VERSION.to_string()),
        ]
    }
}

/// Um transporte capaz de entregar uma leitura ao endpoint remoto.
///
/// O endpoint deve ser idempotente por `(hub, cell, time)`: a entrega é
/// pelo menos uma vez, e reenvios acontecem após quedas de energia.
pub trait DeliveryClient {
    /// Uma única tentativa bloqueante. `Ok` só com confirmação do endpoint.
    fn attempt(&mut self, upload: &Upload<'_>) -> Result<(), DeliveryError>;

    /// Se a configuração permite tentar entregar por este transporte.
    fn is_configured(&self, config: &DeviceConfig) -> bool {
        config.cell_configured && config.endpoint_configured
    }
}

impl<T: DeliveryClient + ?Sized> DeliveryClient for Box<T> {
    fn attempt(&mut self, upload: &Upload<'_>) -> Result<(), DeliveryError> {
        (**self).attempt(upload)
    }

    fn is_configured(&self, config: &DeviceConfig) -> bool {
        (**self).is_configured(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_fields_use_three_decimals() {
        let reading = Reading {
            capture_time: 1_500_985_299,
            temperature_f: 72.5,
            humidity: 40.0,
            heat_index: 73.1,
        };
        let mut config = DeviceConfig::default();
        config.hub_id = "hub-1".into();
        config.cell_id = "cell-9".into();

        let fields = Upload::new(&reading, &config).form_fields();
        let get = |k: &str| fields.iter().find(|(n, _)| *n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("temp"), Some("72.500"));
        assert_eq!(get("humidity"), Some("40.000"));
        assert_eq!(get("time"), Some("1500985299"));
        assert_eq!(get("hub"), Some("hub-1"));
        assert_eq!(get("sp"), Some("300"));
        assert_eq!(get("cell_version"), Some(FIRMWARE_VERSION));
    }

    #[test]
    fn default_gate_needs_identity_and_endpoint() {
        struct Noop;
        impl DeliveryClient for Noop {
            fn attempt(&mut self, _: &Upload<'_>) -> Result<(), DeliveryError> {
                Ok(())
            }
        }

        let mut config = DeviceConfig::default();
        assert!(!Noop.is_configured(&config));
        config.cell_configured = true;
        assert!(Noop.is_configured(&config));
        config.endpoint_configured = false;
        assert!(!Noop.is_configured(&config));
    }
}
