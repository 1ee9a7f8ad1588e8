//! Armazenamento durável de leituras pendentes.
//!
//! Um arquivo por leitura dentro de `pending/`. A presença do arquivo é a
//! única marca de "ainda não entregue": apagar o arquivo É a confirmação.
//! Assim uma queda de energia depois de gravar e antes de enviar preserva a
//! leitura, e uma queda depois de enviar e antes de apagar só gera um reenvio.

use crate::types::{RECORD_SIZE, Reading, RecordId};
use std::fs::{self, File, ReadDir};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Diretório (relativo à raiz do meio) com as leituras pendentes.
pub const PENDING_DIR: &str = "pending";

/// Diretório para onde registros corrompidos são movidos.
pub const CORRUPT_DIR: &str = "corrupt";

/// Nome temporário usado durante a gravação de um registro.
const INCOMING_NAME: &str = "incoming.tmp";

/// Erros do armazenamento de registros.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Falha de armazenamento em {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Registro {id} corrompido: esperado {RECORD_SIZE} bytes, lido {got}")]
    Corrupt { id: RecordId, got: usize },

    #[error("Registro {0} não existe mais")]
    Missing(RecordId),
}

impl StoreError {
    fn storage(path: &Path, source: io::Error) -> Self {
        StoreError::Storage {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ──────────────────────────────────────────────
// Backlog
// ──────────────────────────────────────────────

/// Operações que o coordenador precisa sobre a fila de pendentes.
pub trait Backlog {
    /// Grava a leitura como pendente (write-ahead).
    fn enqueue(&mut self, reading: &Reading) -> Result<RecordId, StoreError>;

    /// Todos os identificadores pendentes, na ordem do meio de armazenamento.
    fn pending_ids(&self) -> Result<Vec<RecordId>, StoreError>;

    fn read(&self, id: RecordId) -> Result<Reading, StoreError>;

    /// Apaga o registro; chamado só depois de entrega confirmada.
    fn remove(&mut self, id: RecordId) -> Result<(), StoreError>;

    /// Tira um registro corrompido da fila sem destruí-lo.
    fn quarantine(&mut self, id: RecordId) -> Result<(), StoreError>;
}

// ──────────────────────────────────────────────
// RecordStore
// ──────────────────────────────────────────────

/// Fila de pendentes sobre um diretório plano.
#[derive(Debug)]
pub struct RecordStore {
    pending: PathBuf,
    corrupt: PathBuf,
}

impl RecordStore {
    /// Abre (criando se preciso) o diretório `pending/` sob `root`.
    ///
    /// Descarta um `incoming.tmp` deixado por uma gravação interrompida e
    /// adota registros com nomes antigos (ver [`RecordStore::adopt_legacy_names`]).
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let pending = root.join(PENDING_DIR);
        fs::create_dir_all(&pending).map_err(|e| StoreError::storage(&pending, e))?;

        let incoming = pending.join(INCOMING_NAME);
        match fs::remove_file(&incoming) {
            Ok(()) => warn!("Gravação interrompida descartada: {}", incoming.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::storage(&incoming, e)),
        }

        let store = Self {
            pending,
            corrupt: root.join(CORRUPT_DIR),
        };
        store.adopt_legacy_names()?;
        Ok(store)
    }

    /// Renomeia registros gravados sem zeros à esquerda para o nome canônico.
    ///
    /// Se o nome canônico já estiver ocupado, o arquivo antigo vai para
    /// `corrupt/`. Retorna quantos registros foram adotados.
    pub fn adopt_legacy_names(&self) -> Result<usize, StoreError> {
        let entries = fs::read_dir(&self.pending).map_err(|e| StoreError::storage(&self.pending, e))?;
        let mut legacy = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::storage(&self.pending, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if RecordId::from_file_name(&name).is_some() {
                continue;
            }
            if let Some(id) = RecordId::from_legacy_name(&name) {
                legacy.push((name, id));
            }
        }

        let mut adopted = 0;
        for (name, id) in legacy {
            let from = self.pending.join(&name);
            let target = self.path_of(id);
            if target.exists() {
                let to = self.move_to_corrupt(&from, &name)?;
                warn!("Registro antigo {name} conflita com {id}; movido para {}", to.display());
            } else {
                fs::rename(&from, &target).map_err(|e| StoreError::storage(&from, e))?;
                info!("Registro antigo {name} renomeado para {id}");
                adopted += 1;
            }
        }
        Ok(adopted)
    }

    /// Move `from` para `corrupt/`, sem sobrescrever cópias já isoladas.
    fn move_to_corrupt(&self, from: &Path, name: &str) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.corrupt).map_err(|e| StoreError::storage(&self.corrupt, e))?;
        let mut to = self.corrupt.join(name);
        let mut n = 1;
        while to.exists() {
            to = self.corrupt.join(format!("{name}-{n}"));
            n += 1;
        }
        fs::rename(from, &to).map_err(|e| StoreError::storage(from, e))?;
        Ok(to)
    }

    pub fn pending_dir(&self) -> &Path {
        &self.pending
    }

    fn path_of(&self, id: RecordId) -> PathBuf {
        self.pending.join(id.file_name())
    }

    /// Enumeração preguiçosa dos pendentes. Cada chamada relê o diretório.
    pub fn list_pending(&self) -> Result<PendingIter, StoreError> {
        let entries = fs::read_dir(&self.pending).map_err(|e| StoreError::storage(&self.pending, e))?;
        Ok(PendingIter {
            dir: self.pending.clone(),
            entries,
        })
    }

    /// Quantidade de leituras pendentes (diagnóstico).
    pub fn pending_count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for id in self.list_pending()? {
            id?;
            count += 1;
        }
        Ok(count)
    }
}

impl Backlog for RecordStore {
    fn enqueue(&mut self, reading: &Reading) -> Result<RecordId, StoreError> {
        let id = reading.id();
        let incoming = self.pending.join(INCOMING_NAME);
        let target = self.path_of(id);

        // O meio pode ter sido removido/reinserido desde o boot
        fs::create_dir_all(&self.pending).map_err(|e| StoreError::storage(&self.pending, e))?;

        let mut file = File::create(&incoming).map_err(|e| StoreError::storage(&incoming, e))?;
        file.write_all(&reading.to_record_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::storage(&incoming, e))?;
        drop(file);

        fs::rename(&incoming, &target).map_err(|e| StoreError::storage(&target, e))?;
        debug!("Leitura gravada em {}", target.display());
        Ok(id)
    }

    fn pending_ids(&self) -> Result<Vec<RecordId>, StoreError> {
        self.list_pending()?.collect()
    }

    fn read(&self, id: RecordId) -> Result<Reading, StoreError> {
        let path = self.path_of(id);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::Missing(id)),
            Err(e) => return Err(StoreError::storage(&path, e)),
        };

        // Lê um byte além do esperado para detectar arquivos longos demais
        let mut buf = Vec::with_capacity(RECORD_SIZE + 1);
        (&mut file)
            .take(RECORD_SIZE as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| StoreError::storage(&path, e))?;

        Reading::from_record_bytes(id.capture_time(), &buf)
            .ok_or(StoreError::Corrupt { id, got: buf.len() })
    }

    fn remove(&mut self, id: RecordId) -> Result<(), StoreError> {
        let path = self.path_of(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::storage(&path, e)),
        }
    }

    fn quarantine(&mut self, id: RecordId) -> Result<(), StoreError> {
        let to = self.move_to_corrupt(&self.path_of(id), &id.file_name())?;
        warn!("Registro {id} movido para {}", to.display());
        Ok(())
    }
}

/// Iterador sobre `pending/`. Nomes que não decodificam são ignorados.
pub struct PendingIter {
    dir: PathBuf,
    entries: ReadDir,
}

impl Iterator for PendingIter {
    type Item = Result<RecordId, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(StoreError::storage(&self.dir, e))),
            };

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == INCOMING_NAME {
                continue;
            }
            match RecordId::from_file_name(&name) {
                Some(id) => return Some(Ok(id)),
                None if RecordId::from_legacy_name(&name).is_some() => {
                    warn!("Registro com nome antigo em pending/: {name} (adotado na próxima abertura)")
                }
                None => debug!("Ignorando entrada desconhecida em pending/: {name}"),
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
