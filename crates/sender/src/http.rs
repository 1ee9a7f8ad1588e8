//! Transporte HTTP: POST `application/x-www-form-urlencoded` por tentativa.

use coletor_core::delivery::{DeliveryClient, DeliveryError, Upload};
use coletor_core::DeviceConfig;
use reqwest::blocking::Client;
use reqwest::header::{CONNECTION, USER_AGENT};
use std::time::Duration;
use tracing::debug;

/// User-Agent enviado ao endpoint.
pub const USER_AGENT_HEADER: &str = concat!("coletor/", env!("CARGO_PKG_VERSION"));

/// Cliente da placa Wi-Fi.
pub struct HttpDelivery {
    client: Client,
}

impl HttpDelivery {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Connect {
                endpoint: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

/// URL de destino montada a partir do domínio e caminho configurados.
pub fn endpoint_url(domain: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("http://{domain}{path}")
    } else {
        format!("http://{domain}/{path}")
    }
}

impl DeliveryClient for HttpDelivery {
    fn attempt(&mut self, upload: &Upload<'_>) -> Result<(), DeliveryError> {
        let url = endpoint_url(upload.endpoint_domain, upload.endpoint_path);
        debug!("POST {url}");

        let response = self
            .client
            .post(&url)
            .header(USER_AGENT, USER_AGENT_HEADER)
            .header(CONNECTION, "close")
            .form(&upload.form_fields())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Connect {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(DeliveryError::Status(status));
        }
        Ok(())
    }

    /// A placa Wi-Fi também precisa de credenciais de rede.
    fn is_configured(&self, config: &DeviceConfig) -> bool {
        config.cell_configured && config.wifi_configured && config.endpoint_configured
    }
}
