//! Configuração do dispositivo persistida em `config.bin`.
//!
//! Blob binário de tamanho fixo, little-endian, sem padding:
//!
//! ```text
//! version(2) last_reading_time(4) reading_interval_s(4)
//! cell_configured(1) hub_id(50) cell_id(50)
//! wifi_configured(1) wifi_ssid(50) wifi_pass(200)
//! endpoint_configured(1) endpoint_domain(100) endpoint_path(100)
//! temperature_offset_f(4)
//! ```
//!
//! Strings são preenchidas com NUL e não têm prefixo de tamanho; o limite de
//! capacidade é garantido por quem escreve. Um blob só é aceito se o tamanho
//! e a versão baterem exatamente com o firmware atual. Não existe migração:
//! versão diferente significa descartar e voltar aos padrões.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Versão do esquema gravada no início do blob.
pub const CONFIG_VERSION: u16 = 4;

/// Nome do arquivo de configuração na raiz do meio.
pub const CONFIG_FILE: &str = "config.bin";

const CONFIG_TMP: &str = "config.tmp";

const ID_CAPACITY: usize = 50;
const SSID_CAPACITY: usize = 50;
const PASS_CAPACITY: usize = 200;
const URL_CAPACITY: usize = 100;

/// Tamanho exato do blob serializado.
pub const CONFIG_SIZE: usize = 2
    + 4
    + 4
    + 1
    + ID_CAPACITY * 2
    + 1
    + SSID_CAPACITY
    + PASS_CAPACITY
    + 1
    + URL_CAPACITY * 2
    + 4;

/// Intervalo padrão entre leituras (5 min).
pub const DEFAULT_READING_INTERVAL_S: u32 = 5 * 60;

/// Endpoint de coleta pré-configurado de fábrica.
pub const DEFAULT_ENDPOINT_DOMAIN: &str = "coletor.local";
pub const DEFAULT_ENDPOINT_PATH: &str = "/temperatures";

// ──────────────────────────────────────────────
// Erros
// ──────────────────────────────────────────────

/// Erros ao alterar um campo da configuração.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("Campo desconhecido: {0}")]
    Unknown(String),

    #[error("Campo {field} excede a capacidade ({got} bytes, máximo {max})")]
    TooLong {
        field: &'static str,
        max: usize,
        got: usize,
    },

    #[error("Valor inválido para {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

/// Erros do armazenamento de configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("Falha de armazenamento em {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Field(#[from] FieldError),
}

// ──────────────────────────────────────────────
// DeviceConfig
// ──────────────────────────────────────────────

/// Identidade, endpoint e cadência do dispositivo.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub version: u16,
    /// Instante da última leitura (segundos desde a época)
    pub last_reading_time: u32,
    /// Segundos entre leituras
    pub reading_interval_s: u32,

    pub cell_configured: bool,
    pub hub_id: String,
    pub cell_id: String,

    pub wifi_configured: bool,
    pub wifi_ssid: String,
    pub wifi_pass: String,

    pub endpoint_configured: bool,
    pub endpoint_domain: String,
    pub endpoint_path: String,

    /// Calibração somada à temperatura bruta (°F)
    pub temperature_offset_f: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            last_reading_time: 0,
            reading_interval_s: DEFAULT_READING_INTERVAL_S,
            cell_configured: false,
            hub_id: String::new(),
            cell_id: String::new(),
            wifi_configured: false,
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            endpoint_configured: true,
            endpoint_domain: DEFAULT_ENDPOINT_DOMAIN.into(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.into(),
            temperature_offset_f: 0.0,
        }
    }
}

impl DeviceConfig {
    /// Altera um campo pelo nome, validando tipo e capacidade.
    ///
    /// Campos de identidade, Wi-Fi e endpoint atualizam a flag
    /// `*_configured` correspondente.
    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        match name {
            "hub_id" => {
                self.hub_id = bounded("hub_id", value, ID_CAPACITY)?;
                self.cell_configured = !self.hub_id.is_empty() && !self.cell_id.is_empty();
            }
            "cell_id" => {
                self.cell_id = bounded("cell_id", value, ID_CAPACITY)?;
                self.cell_configured = !self.hub_id.is_empty() && !self.cell_id.is_empty();
            }
            "wifi_ssid" => {
                self.wifi_ssid = bounded("wifi_ssid", value, SSID_CAPACITY)?;
                self.wifi_configured = !self.wifi_ssid.is_empty();
            }
            "wifi_pass" => {
                self.wifi_pass = bounded("wifi_pass", value, PASS_CAPACITY)?;
            }
            "endpoint_domain" => {
                self.endpoint_domain = bounded("endpoint_domain", value, URL_CAPACITY)?;
                self.endpoint_configured = !self.endpoint_domain.is_empty();
            }
            "endpoint_path" => {
                self.endpoint_path = bounded("endpoint_path", value, URL_CAPACITY)?;
            }
            "reading_interval_s" => {
                self.reading_interval_s = value
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| invalid("reading_interval_s", value))?;
            }
            "temperature_offset_f" => {
                self.temperature_offset_f = value
                    .trim()
                    .parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| invalid("temperature_offset_f", value))?;
            }
            other => return Err(FieldError::Unknown(other.into())),
        }
        Ok(())
    }

    /// Verdadeiro quando já passou o intervalo desde a última leitura.
    ///
    /// Um relógio que voltou no tempo também conta como "vencido".
    pub fn reading_due(&self, now: u32) -> bool {
        if now < self.last_reading_time {
            return true;
        }
        now - self.last_reading_time >= self.reading_interval_s
    }

    /// Resumo legível, com a senha mascarada.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Configuração atual (versão {}):", self.version);
        if self.wifi_configured {
            let _ = writeln!(
                out,
                "  wifi ssid: {}, wifi pass: {}",
                self.wifi_ssid,
                "*".repeat(self.wifi_pass.len())
            );
        } else {
            let _ = writeln!(out, "  Wi-Fi não configurado");
        }
        if self.cell_configured {
            let _ = writeln!(out, "  hub id: {}, cell id: {}", self.hub_id, self.cell_id);
        } else {
            let _ = writeln!(out, "  hub/cell id não configurados");
        }
        if self.endpoint_configured {
            let _ = writeln!(out, "  endpoint: {}{}", self.endpoint_domain, self.endpoint_path);
        } else {
            let _ = writeln!(out, "  endpoint não configurado");
        }
        let _ = writeln!(out, "  intervalo de leitura (s): {}", self.reading_interval_s);
        let _ = writeln!(out, "  offset de temperatura (°F): {:.2}", self.temperature_offset_f);
        let _ = write!(out, "  última leitura: {}", self.last_reading_time);
        out
    }

    /// Serializa campo a campo no layout fixo.
    pub fn encode(&self) -> Result<Vec<u8>, FieldError> {
        let mut out = Vec::with_capacity(CONFIG_SIZE);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.last_reading_time.to_le_bytes());
        out.extend_from_slice(&self.reading_interval_s.to_le_bytes());
        out.push(self.cell_configured as u8);
        put_str(&mut out, "hub_id", &self.hub_id, ID_CAPACITY)?;
        put_str(&mut out, "cell_id", &self.cell_id, ID_CAPACITY)?;
        out.push(self.wifi_configured as u8);
        put_str(&mut out, "wifi_ssid", &self.wifi_ssid, SSID_CAPACITY)?;
        put_str(&mut out, "wifi_pass", &self.wifi_pass, PASS_CAPACITY)?;
        out.push(self.endpoint_configured as u8);
        put_str(&mut out, "endpoint_domain", &self.endpoint_domain, URL_CAPACITY)?;
        put_str(&mut out, "endpoint_path", &self.endpoint_path, URL_CAPACITY)?;
        out.extend_from_slice(&self.temperature_offset_f.to_le_bytes());
        debug_assert_eq!(out.len(), CONFIG_SIZE);
        Ok(out)
    }

    /// Decodifica o blob. `None` para tamanho ou versão incompatíveis.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CONFIG_SIZE {
            return None;
        }
        let mut r = Cursor { bytes, pos: 0 };
        let version = u16::from_le_bytes(r.array());
        if version != CONFIG_VERSION {
            return None;
        }
        Some(Self {
            version,
            last_reading_time: u32::from_le_bytes(r.array()),
            reading_interval_s: u32::from_le_bytes(r.array()),
            cell_configured: r.flag(),
            hub_id: r.string(ID_CAPACITY),
            cell_id: r.string(ID_CAPACITY),
            wifi_configured: r.flag(),
            wifi_ssid: r.string(SSID_CAPACITY),
            wifi_pass: r.string(PASS_CAPACITY),
            endpoint_configured: r.flag(),
            endpoint_domain: r.string(URL_CAPACITY),
            endpoint_path: r.string(URL_CAPACITY),
            temperature_offset_f: f32::from_le_bytes(r.array()),
        })
    }
}

fn bounded(field: &'static str, value: &str, capacity: usize) -> Result<String, FieldError> {
    // Um byte fica reservado para o NUL final
    if value.len() >= capacity {
        return Err(FieldError::TooLong {
            field,
            max: capacity - 1,
            got: value.len(),
        });
    }
    if value.contains('\0') {
        return Err(invalid(field, value));
    }
    Ok(value.to_string())
}

fn invalid(field: &'static str, value: &str) -> FieldError {
    FieldError::Invalid {
        field,
        value: value.into(),
    }
}

fn put_str(out: &mut Vec<u8>, field: &'static str, value: &str, capacity: usize) -> Result<(), FieldError> {
    let value = bounded(field, value, capacity)?;
    out.extend_from_slice(value.as_bytes());
    out.resize(out.len() + capacity - value.len(), 0);
    Ok(())
}

/// Leitor sequencial sobre um blob de tamanho já validado.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> &[u8] {
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N));
        out
    }

    fn flag(&mut self) -> bool {
        self.take(1)[0] != 0
    }

    fn string(&mut self, capacity: usize) -> String {
        let raw = self.take(capacity);
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

// ──────────────────────────────────────────────
// ConfigStore
// ──────────────────────────────────────────────

/// Acesso a `config.bin` na raiz do meio de armazenamento.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Lê e valida o blob.
    ///
    /// Arquivo ausente, tamanho ou versão errados resultam em `Ok(None)`:
    /// é o caminho normal no primeiro boot ou após atualizar o firmware.
    pub fn load(&self) -> Result<Option<DeviceConfig>, ConfigStoreError> {
        let path = self.path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Nenhuma configuração em {}", path.display());
                return Ok(None);
            }
            Err(source) => return Err(ConfigStoreError::Storage { path, source }),
        };

        if bytes.len() != CONFIG_SIZE {
            warn!(
                "Configuração com tamanho incorreto – esperado: {CONFIG_SIZE}, lido: {}",
                bytes.len()
            );
            return Ok(None);
        }

        match DeviceConfig::decode(&bytes) {
            Some(config) => Ok(Some(config)),
            None => {
                let found = u16::from_le_bytes([bytes[0], bytes[1]]);
                warn!("Versão de configuração incorreta – esperada: {CONFIG_VERSION}, lida: {found}");
                Ok(None)
            }
        }
    }

    /// Grava o blob inteiro de uma vez (arquivo temporário + rename).
    pub fn save(&self, config: &DeviceConfig) -> Result<(), ConfigStoreError> {
        let blob = config.encode()?;
        let tmp = self.root.join(CONFIG_TMP);
        let path = self.path();

        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&blob)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|source| ConfigStoreError::Storage {
            path: path.clone(),
            source,
        })
    }

    /// Instala e grava os padrões de fábrica.
    pub fn reset_to_defaults(&self) -> Result<DeviceConfig, ConfigStoreError> {
        let config = DeviceConfig::default();
        self.save(&config)?;
        info!("Configuração restaurada para os padrões");
        Ok(config)
    }

    /// Caminho de boot: carrega, ou instala os padrões se ausente/inválida.
    pub fn load_or_reset(&self) -> Result<DeviceConfig, ConfigStoreError> {
        match self.load()? {
            Some(config) => Ok(config),
            None => self.reset_to_defaults(),
        }
    }

    /// Aplica uma alteração e grava antes de retornar.
    ///
    /// Se a validação ou a gravação falhar, `config` fica intacta.
    pub fn edit<F>(&self, config: &mut DeviceConfig, change: F) -> Result<(), ConfigStoreError>
    where
        F: FnOnce(&mut DeviceConfig) -> Result<(), FieldError>,
    {
        let mut next = config.clone();
        change(&mut next)?;
        self.save(&next)?;
        *config = next;
        Ok(())
    }

    /// Registra o instante da última leitura de forma durável.
    pub fn update_last_reading_time(
        &self,
        config: &mut DeviceConfig,
        timestamp: u32,
    ) -> Result<(), ConfigStoreError> {
        self.edit(config, |c| {
            c.last_reading_time = timestamp;
            Ok(())
        })
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn blob_size_matches_layout() {
        assert_eq!(CONFIG_SIZE, 567);
        assert_eq!(DeviceConfig::default().encode().unwrap().len(), CONFIG_SIZE);
    }

    #[test]
    fn reset_then_load_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let reset = store.reset_to_defaults().unwrap();
        let loaded = store.load().unwrap().expect("config presente");
        assert_eq!(loaded, DeviceConfig::default());
        assert_eq!(loaded, reset);
        assert_eq!(loaded.version, CONFIG_VERSION);
        assert!(loaded.endpoint_configured);
    }

    #[test]
    fn previous_version_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let old = DeviceConfig {
            version: CONFIG_VERSION - 1,
            ..Default::default()
        };
        fs::write(store.path(), old.encode().unwrap()).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn wrong_length_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut blob = DeviceConfig::default().encode().unwrap();
        blob.pop();
        fs::write(store.path(), &blob).unwrap();
        assert_eq!(store.load().unwrap(), None);

        blob.extend_from_slice(&[0, 0]);
        fs::write(store.path(), &blob).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn missing_file_is_absent_and_boot_installs_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        assert_eq!(store.load().unwrap(), None);
        let config = store.load_or_reset().unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert!(store.path().is_file());
    }

    #[test]
    fn edit_is_flushed_immediately() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = store.load_or_reset().unwrap();

        store
            .edit(&mut config, |c| {
                c.set_field("hub_id", "hub-7")?;
                c.set_field("cell_id", "cell-42")
            })
            .unwrap();

        let reloaded = ConfigStore::new(dir.path()).load().unwrap().unwrap();
        assert!(reloaded.cell_configured);
        assert_eq!(reloaded.hub_id, "hub-7");
        assert_eq!(reloaded.cell_id, "cell-42");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn rejected_edit_leaves_config_untouched() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = store.load_or_reset().unwrap();
        let before = config.clone();

        let err = store
            .edit(&mut config, |c| c.set_field("cell_id", &"x".repeat(60)))
            .unwrap_err();
        assert!(matches!(err, ConfigStoreError::Field(FieldError::TooLong { max: 49, .. })));
        assert_eq!(config, before);
        assert_eq!(store.load().unwrap().unwrap(), before);
    }

    #[test]
    fn strings_and_numbers_roundtrip() {
        let mut config = DeviceConfig::default();
        config.set_field("wifi_ssid", "casa").unwrap();
        config.set_field("wifi_pass", &"p".repeat(199)).unwrap();
        config.set_field("endpoint_domain", "api.exemplo.com").unwrap();
        config.set_field("reading_interval_s", "600").unwrap();
        config.set_field("temperature_offset_f", "-1.5").unwrap();
        config.last_reading_time = 1_500_985_299;

        let decoded = DeviceConfig::decode(&config.encode().unwrap()).unwrap();
        assert_eq!(decoded, config);
        assert!(decoded.wifi_configured);
        assert_eq!(decoded.temperature_offset_f, -1.5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = DeviceConfig::default();
        assert!(matches!(
            config.set_field("reading_interval_s", "0"),
            Err(FieldError::Invalid { .. })
        ));
        assert!(matches!(
            config.set_field("temperature_offset_f", "abc"),
            Err(FieldError::Invalid { .. })
        ));
        assert!(matches!(config.set_field("color", "red"), Err(FieldError::Unknown(_))));
        assert!(config.set_field("wifi_pass", &"p".repeat(200)).is_err());
    }

    #[test]
    fn oversized_public_field_cannot_be_saved() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let config = DeviceConfig {
            endpoint_path: "/".repeat(150),
            ..Default::default()
        };
        assert!(matches!(store.save(&config), Err(ConfigStoreError::Field(_))));
        assert!(!store.path().exists());
    }

    #[test]
    fn reading_due_follows_interval() {
        let config = DeviceConfig {
            last_reading_time: 1_000,
            reading_interval_s: 300,
            ..Default::default()
        };
        assert!(!config.reading_due(1_299));
        assert!(config.reading_due(1_300));
        assert!(config.reading_due(500)); // relógio voltou
    }

    #[test]
    fn summary_masks_password() {
        let mut config = DeviceConfig::default();
        config.set_field("wifi_ssid", "casa").unwrap();
        config.set_field("wifi_pass", "segredo").unwrap();
        let text = config.summary();
        assert!(text.contains("casa"));
        assert!(!text.contains("segredo"));
    }
}
