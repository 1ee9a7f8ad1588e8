//! Perfil da placa/host via TOML.
//!
//! A configuração do dispositivo (identidade, endpoint) fica em `config.bin`
//! ([`crate::device_config`]); aqui ficam os parâmetros de placa e de host,
//! que no dispositivo seriam fixos em tempo de compilação.

use crate::coordinator::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao gravar o `config.toml`.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro ao gravar {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Transporte usado pelo sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// POST de formulário HTTP (placa Wi-Fi)
    Http,
    /// Frame binário com confirmação do coletor
    Udp,
}

/// Configuração do Sender (dispositivo).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Diretório que faz o papel do cartão SD
    pub storage_root: String,
    /// "http" ou "udp"
    pub transport: Transport,
    /// Endereço do coletor UDP (ip:porta)
    pub udp_collector: String,
    /// Timeout de cada tentativa de envio (segundos)
    pub request_timeout_secs: f64,
    /// Prazo do watchdog (segundos)
    pub watchdog_deadline_secs: f64,
    /// Registros da fila enviados por passada
    pub transmits_per_loop: usize,
    /// Tentativas por registro antes da parada deliberada
    pub max_attempts: u32,
    /// Espera entre tentativas (ms)
    pub retry_delay_ms: u64,
    /// Mover registros corrompidos para `corrupt/`
    pub quarantine_corrupt: bool,
    /// Intervalo do laço principal (segundos)
    pub poll_interval_secs: f64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            storage_root: "dados".into(),
            transport: Transport::Http,
            udp_collector: "127.0.0.1:5005".into(),
            request_timeout_secs: 10.0,
            watchdog_deadline_secs: 16.0,
            transmits_per_loop: 5,
            max_attempts: 4,
            retry_delay_ms: 500,
            quarantine_corrupt: true,
            poll_interval_secs: 1.0,
        }
    }
}

impl SenderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    pub fn watchdog_deadline(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_deadline_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            transmits_per_loop: self.transmits_per_loop,
            quarantine_corrupt: self.quarantine_corrupt,
        }
    }
}

/// Configuração do Receiver (coletor UDP de referência).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Porta UDP para escutar
    pub port: u16,
    /// Gravar leituras aceitas em CSV
    pub csv_enabled: bool,
    /// Arquivo CSV de histórico
    pub csv_path: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: 5005,
            csv_enabled: false,
            csv_path: "historico.csv".into(),
        }
    }
}

/// Configuração raiz do aplicativo (unifica sender e receiver).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let s = &self.sender;

        if s.storage_root.trim().is_empty() {
            errors.push("storage_root não pode ser vazio".into());
        }
        if s.transport == Transport::Udp && s.udp_collector.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("Endereço do coletor inválido: {:?}", s.udp_collector));
        }
        if !(1.0..=30.0).contains(&s.watchdog_deadline_secs) {
            errors.push(format!(
                "Prazo do watchdog inválido: {} (1.0–30.0)",
                s.watchdog_deadline_secs
            ));
        }
        // Uma tentativa bloqueante não pode passar do prazo do watchdog
        if s.request_timeout_secs <= 0.0 || s.request_timeout_secs >= s.watchdog_deadline_secs {
            errors.push(format!(
                "Timeout de envio inválido: {} (deve ficar abaixo do prazo do watchdog)",
                s.request_timeout_secs
            ));
        }
        if s.max_attempts == 0 {
            errors.push("max_attempts deve ser pelo menos 1".into());
        }
        if s.transmits_per_loop == 0 {
            errors.push("transmits_per_loop deve ser pelo menos 1".into());
        }
        if s.poll_interval_secs < 0.1 || s.poll_interval_secs > 60.0 {
            errors.push(format!(
                "Intervalo do laço inválido: {} (0.1–60.0)",
                s.poll_interval_secs
            ));
        }
        if self.receiver.port == 0 {
            errors.push("Porta do receiver não pode ser 0".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.sender.transport, parsed.sender.transport);
        assert_eq!(config.receiver.csv_path, parsed.receiver.csv_path);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[sender]
transport = "udp"
transmits_per_loop = 20
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.sender.transport, Transport::Udp);
        assert_eq!(config.sender.transmits_per_loop, 20);
        // Outros campos devem ter valor padrão
        assert_eq!(config.sender.max_attempts, 4);
        assert_eq!(config.receiver.port, 5005);
    }

    #[test]
    fn retry_policy_follows_settings() {
        let sender = SenderConfig {
            max_attempts: 2,
            retry_delay_ms: 50,
            quarantine_corrupt: false,
            ..Default::default()
        };
        let policy = sender.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.retry_delay, Duration::from_millis(50));
        assert!(!policy.quarantine_corrupt);
        assert_eq!(policy.transmits_per_loop, 5);
    }

    #[test]
    fn timeout_longer_than_watchdog_is_rejected() {
        let mut config = AppConfig::default();
        config.sender.request_timeout_secs = 20.0;
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn udp_needs_socket_address() {
        let mut config = AppConfig::default();
        config.sender.transport = Transport::Udp;
        config.sender.udp_collector = "coletor".into();
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.receiver.csv_enabled = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert!(loaded.receiver.csv_enabled);
    }
}
