//! Tipos de leitura e o formato em disco de cada registro pendente.
//!
//! Cada leitura vira um arquivo de 12 bytes em `pending/`. O nome do arquivo
//! é o próprio timestamp de captura, quebrado em 7 + 3 dígitos para caber
//! no esquema 8.3 de um cartão FAT:
//!
//! ```text
//! 1500985299  ->  1500985.299
//! ```
//!
//! Conteúdo (little-endian, sem padding):
//!
//! ```text
//! ┌──────────────────┬──────────────┬────────────────┐
//! │ temperature_f(4) │ humidity(4)  │ heat_index(4)  │
//! └──────────────────┴──────────────┴────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tamanho exato do payload de um registro em disco.
pub const RECORD_SIZE: usize = 12;

/// Largura do timestamp decimal antes de dividir em base + sufixo.
const TIMESTAMP_DIGITS: usize = 10;

/// Dígitos que formam o nome base (o restante vira a "extensão").
const BASE_DIGITS: usize = 7;

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Uma leitura do sensor com o instante de captura.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Segundos desde a época (chave natural do registro)
    pub capture_time: u32,
    /// Temperatura (°F)
    pub temperature_f: f32,
    /// Umidade relativa (0–100%)
    pub humidity: f32,
    /// Índice de calor (°F)
    pub heat_index: f32,
}

impl Reading {
    /// Monta uma leitura calculando o índice de calor a partir de T e UR.
    pub fn new(capture_time: u32, temperature_f: f32, humidity: f32) -> Self {
        Self {
            capture_time,
            temperature_f,
            humidity,
            heat_index: heat_index_f(temperature_f, humidity),
        }
    }

    /// Identificador do registro que guarda esta leitura.
    pub fn id(&self) -> RecordId {
        RecordId(self.capture_time)
    }

    /// Serializa campo a campo no layout fixo de 12 bytes.
    pub fn to_record_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.temperature_f.to_le_bytes());
        out[4..8].copy_from_slice(&self.humidity.to_le_bytes());
        out[8..12].copy_from_slice(&self.heat_index.to_le_bytes());
        out
    }

    /// Reconstrói a leitura a partir do conteúdo do arquivo.
    ///
    /// Retorna `None` se o tamanho não for exatamente [`RECORD_SIZE`]; bytes
    /// parciais nunca são reinterpretados.
    pub fn from_record_bytes(capture_time: u32, bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; RECORD_SIZE] = bytes.try_into().ok()?;
        let field = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            capture_time,
            temperature_f: field(0),
            humidity: field(4),
            heat_index: field(8),
        })
    }
}

// ──────────────────────────────────────────────
// Identificador / nome de arquivo
// ──────────────────────────────────────────────

/// Identificador de um registro pendente: o timestamp de captura.
///
/// A ordem de `RecordId` é a ordem cronológica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u32);

impl RecordId {
    pub fn capture_time(self) -> u32 {
        self.0
    }

    /// Nome do arquivo no formato 8.3, com o timestamp completado com zeros
    /// à esquerda para que todos os nomes tenham a mesma largura.
    pub fn file_name(self) -> String {
        let digits = format!("{:0width$}", self.0, width = TIMESTAMP_DIGITS);
        let (base, suffix) = digits.split_at(BASE_DIGITS);
        format!("{base}.{suffix}")
    }

    /// Decodifica um nome canônico (`0000012.345`) de volta no timestamp.
    ///
    /// Só aceita o nome exatamente como [`RecordId::file_name`] o produz;
    /// qualquer outra grafia geraria um caminho diferente do arquivo em disco.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::from_legacy_name(name).filter(|id| id.file_name() == name)
    }

    /// Decodifica também nomes sem zeros à esquerda (`1234567.8`, `12345`),
    /// gravados por versões antigas do firmware.
    pub fn from_legacy_name(name: &str) -> Option<Self> {
        let (base, suffix) = name.split_once('.').unwrap_or((name, ""));
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

        if base.is_empty() || !all_digits(base) || !all_digits(suffix) {
            return None;
        }
        if suffix.len() > 3 || base.len() > BASE_DIGITS {
            return None;
        }
        // Sufixo só existe quando a base está completa
        if !suffix.is_empty() && base.len() != BASE_DIGITS {
            return None;
        }

        format!("{base}{suffix}").parse::<u32>().ok().map(RecordId)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

// ──────────────────────────────────────────────
// Índice de calor
// ──────────────────────────────────────────────

/// Índice de calor (°F) pela regressão de Rothfusz do NWS.
///
/// Abaixo de ~80 °F usa a fórmula simples de Steadman.
pub fn heat_index_f(temperature_f: f32, humidity: f32) -> f32 {
    let t = temperature_f;
    let h = humidity;

    let simple = 0.5 * (t + 61.0 + ((t - 68.0) * 1.2) + (h * 0.094));
    if simple <= 79.0 {
        return simple;
    }

    let mut hi = -42.379 + 2.049_015_2 * t + 10.143_331 * h
        - 0.224_755_4 * t * h
        - 0.006_837_83 * t * t
        - 0.054_817_17 * h * h
        + 0.001_228_74 * t * t * h
        + 0.000_852_82 * t * h * h
        - 0.000_001_99 * t * t * h * h;

    if h < 13.0 && (80.0..=112.0).contains(&t) {
        hi -= ((13.0 - h) * 0.25) * ((17.0 - (t - 95.0).abs()) * 0.058_82).sqrt();
    } else if h > 85.0 && (80.0..=87.0).contains(&t) {
        hi += ((h - 85.0) * 0.1) * ((87.0 - t) * 0.2);
    }

    hi
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_splits_seven_and_three() {
        assert_eq!(RecordId(1_500_985_299).file_name(), "1500985.299");
        assert_eq!(RecordId(12_345).file_name(), "0000012.345");
        assert_eq!(RecordId(0).file_name(), "0000000.000");
        assert_eq!(RecordId(u32::MAX).file_name(), "4294967.295");
    }

    #[test]
    fn file_name_roundtrip_across_range() {
        let mut t: u64 = 0;
        while t <= u32::MAX as u64 {
            let id = RecordId(t as u32);
            assert_eq!(RecordId::from_file_name(&id.file_name()), Some(id));
            t = t * 3 + 7;
        }
        for t in [0, 1, 9, 10, 999, 1_000, 9_999_999, 10_000_000, u32::MAX - 1, u32::MAX] {
            let id = RecordId(t);
            assert_eq!(RecordId::from_file_name(&id.file_name()), Some(id));
        }
    }

    #[test]
    fn legacy_names_decode_only_through_legacy_path() {
        assert_eq!(RecordId::from_legacy_name("1234567.8"), Some(RecordId(12_345_678)));
        assert_eq!(RecordId::from_legacy_name("1500985.29"), Some(RecordId(150_098_529)));
        assert_eq!(RecordId::from_legacy_name("12345."), Some(RecordId(12_345)));
        assert_eq!(RecordId::from_legacy_name("12345"), Some(RecordId(12_345)));

        for name in ["1234567.8", "1500985.29", "12345.", "12345"] {
            assert_eq!(RecordId::from_file_name(name), None, "{name}");
        }
    }

    #[test]
    fn rejects_foreign_names() {
        assert_eq!(RecordId::from_file_name("config.bin"), None);
        assert_eq!(RecordId::from_file_name(".tmp"), None);
        assert_eq!(RecordId::from_file_name("123.456"), None);
        assert_eq!(RecordId::from_file_name("1500985.2990"), None);
        assert_eq!(RecordId::from_file_name("9999999.999"), None); // > u32::MAX
    }

    #[test]
    fn file_name_order_is_chronological() {
        let mut names: Vec<String> = [1_500_985_299u32, 99, 1_000_000_000, 7]
            .iter()
            .map(|t| RecordId(*t).file_name())
            .collect();
        names.sort();
        let ids: Vec<u32> = names
            .iter()
            .filter_map(|n| RecordId::from_file_name(n))
            .map(RecordId::capture_time)
            .collect();
        assert_eq!(ids, vec![7, 99, 1_000_000_000, 1_500_985_299]);
    }

    #[test]
    fn record_bytes_are_exact() {
        let reading = Reading {
            capture_time: 1_500_985_299,
            temperature_f: 72.5,
            humidity: 40.0,
            heat_index: 73.1,
        };
        let bytes = reading.to_record_bytes();
        assert_eq!(&bytes[0..4], &72.5f32.to_le_bytes());
        assert_eq!(
            Reading::from_record_bytes(reading.capture_time, &bytes),
            Some(reading)
        );
    }

    #[test]
    fn short_or_long_record_is_rejected() {
        let bytes = Reading::default().to_record_bytes();
        assert_eq!(Reading::from_record_bytes(0, &bytes[..11]), None);
        let mut long = bytes.to_vec();
        long.push(0);
        assert_eq!(Reading::from_record_bytes(0, &long), None);
        assert_eq!(Reading::from_record_bytes(0, &[]), None);
    }

    #[test]
    fn heat_index_uses_simple_formula_when_mild() {
        let hi = heat_index_f(72.5, 40.0);
        assert!((hi - 71.33).abs() < 0.01, "hi = {hi}");
    }

    #[test]
    fn heat_index_uses_regression_when_hot() {
        // Tabela do NWS: 90 °F com 60% UR ≈ 100 °F
        let hi = heat_index_f(90.0, 60.0);
        assert!((hi - 100.0).abs() < 1.5, "hi = {hi}");
        assert!(heat_index_f(100.0, 50.0) > 100.0);
    }
}
