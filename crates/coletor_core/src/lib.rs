//! # Coletor Core
//!
//! Crate compartilhada do Coletor: entrega durável "grava e encaminha" de
//! leituras de temperatura/umidade para um endpoint remoto, sob um link
//! instável e com o watchdog como único mecanismo de recuperação.
//!
//! ## Módulos
//! - [`types`] – Leitura, identificador de registro e índice de calor
//! - [`store`] – Fila durável de pendentes (`pending/`)
//! - [`device_config`] – Configuração do dispositivo em `config.bin`
//! - [`delivery`] – Capacidade de entrega (trait dos transportes)
//! - [`coordinator`] – Máquina de estados de transmissão
//! - [`liveness`] – Disciplina de watchdog
//! - [`protocol`] – Frames UDP de envio/confirmação
//! - [`config`] – Perfil da placa/host via TOML

pub mod types;
pub mod store;
pub mod device_config;
pub mod delivery;
pub mod coordinator;
pub mod liveness;
pub mod protocol;
pub mod config;

// Re-exports convenientes
pub use types::{Reading, RecordId};
pub use store::{Backlog, RecordStore, StoreError};
pub use device_config::{ConfigStore, DeviceConfig};
pub use delivery::{DeliveryClient, DeliveryError, Upload};
pub use coordinator::{Coordinator, DrainReport, FailStop, RetryPolicy, State};
pub use liveness::{Liveness, Watchdog};
pub use protocol::{decode_message, encode_message, Message, PROTOCOL_VERSION};
pub use config::{AppConfig, ReceiverConfig, SenderConfig, Transport};
