//! Protocolo binário do transporte UDP.
//!
//! Formato do frame:
//!
//! ```text
//! ┌──────────┬─────────┬──────────────┐
//! │ Magic(1) │ Ver.(1) │ Payload (N)  │
//! └──────────┴─────────┴──────────────┘
//! ```
//!
//! - Magic byte `0x43` ('C') identifica pacotes do Coletor
//! - Versão do protocolo (1 byte)
//! - [`Message`] serializada com bincode
//!
//! O sender envia [`Message::Upload`]; o coletor responde com
//! [`Message::Ack`] para a mesma chave `(hub, cell, capture_time)`. Sem ack,
//! a tentativa conta como falha.

use crate::delivery::{FIRMWARE_VERSION, Upload};
use serde::{Deserialize, Serialize};

/// Magic byte que identifica pacotes do Coletor.
pub const MAGIC_BYTE: u8 = 0x43; // 'C'

/// Versão atual do protocolo.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tamanho do header (magic + version).
const HEADER_SIZE: usize = 2;

/// Maior frame aceito (uma leitura cabe com folga num datagrama).
pub const MAX_FRAME_SIZE: usize = 1024;

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Pacote muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

/// Chave de idempotência de uma leitura no endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadingKey {
    pub hub_id: String,
    pub cell_id: String,
    pub capture_time: u32,
}

/// Leitura enviada ao coletor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFrame {
    pub key: ReadingKey,
    pub temperature_f: f32,
    pub humidity: f32,
    pub heat_index: f32,
    pub reading_interval_s: u32,
    pub firmware: String,
}

impl From<&Upload<'_>> for UploadFrame {
    fn from(upload: &Upload<'_>) -> Self {
        Self {
            key: ReadingKey {
                hub_id: upload.hub_id.to_string(),
                cell_id: upload.cell_id.to_string(),
                capture_time: upload.reading.capture_time,
            },
            temperature_f: upload.reading.temperature_f,
            humidity: upload.reading.humidity,
            heat_index: upload.reading.heat_index,
            reading_interval_s: upload.reading_interval_s,
            firmware: FIRMWARE_VERSION.to_string(),
        }
    }
}

/// Confirmação do coletor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    pub key: ReadingKey,
    /// A leitura já tinha sido recebida antes (reenvio)
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Upload(UploadFrame),
    Ack(AckFrame),
}

/// Codifica uma [`Message`] no formato `[MAGIC][VERSION][bincode...]`.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(message).map_err(|e| ProtocolError::Serialize(e.to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.push(MAGIC_BYTE);
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// Decodifica um datagrama recebido, validando magic e versão.
pub fn decode_message(data: &[u8]) -> Result<Message, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let magic = data[0];
    if magic != MAGIC_BYTE {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    let version = data[1];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch(version));
    }

    bincode::deserialize(&data[HEADER_SIZE..]).map_err(|e| ProtocolError::Deserialize(e.to_string()))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_config::DeviceConfig;
    use crate::types::Reading;

    fn sample_upload() -> Message {
        let reading = Reading::new(1_500_985_299, 72.5, 40.0);
        let mut config = DeviceConfig::default();
        config.hub_id = "hub-1".into();
        config.cell_id = "cell-2".into();
        Message::Upload(UploadFrame::from(&Upload::new(&reading, &config)))
    }

    #[test]
    fn upload_frame_carries_identity_and_time() {
        let encoded = encode_message(&sample_upload()).unwrap();
        match decode_message(&encoded).unwrap() {
            Message::Upload(frame) => {
                assert_eq!(frame.key.hub_id, "hub-1");
                assert_eq!(frame.key.cell_id, "cell-2");
                assert_eq!(frame.key.capture_time, 1_500_985_299);
                assert_eq!(frame.temperature_f, 72.5);
                assert_eq!(frame.firmware, FIRMWARE_VERSION);
            }
            other => panic!("esperado Upload, obtido {other:?}"),
        }
    }

    #[test]
    fn header_is_correct() {
        let encoded = encode_message(&sample_upload()).unwrap();
        assert_eq!(encoded[0], MAGIC_BYTE);
        assert_eq!(encoded[1], PROTOCOL_VERSION);
        assert!(encoded.len() < MAX_FRAME_SIZE);
    }

    #[test]
    fn rejects_invalid_magic() {
        let mut encoded = encode_message(&sample_upload()).unwrap();
        encoded[0] = 0xFF;
        assert!(matches!(
            decode_message(&encoded),
            Err(ProtocolError::InvalidMagic(0xFF))
        ));
    }

    #[test]
    fn rejects_short_packet() {
        assert!(matches!(decode_message(&[0x43]), Err(ProtocolError::TooShort(1))));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut encoded = encode_message(&sample_upload()).unwrap();
        encoded[1] = 99;
        assert!(matches!(
            decode_message(&encoded),
            Err(ProtocolError::VersionMismatch(99))
        ));
    }

    #[test]
    fn rejects_truncated_body() {
        let encoded = encode_message(&sample_upload()).unwrap();
        assert!(matches!(
            decode_message(&encoded[..encoded.len() - 3]),
            Err(ProtocolError::Deserialize(_))
        ));
    }
}
