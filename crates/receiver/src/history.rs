//! Histórico CSV das leituras aceitas.
//!
//! O arquivo também serve para reconstruir o conjunto de chaves já vistas
//! quando o coletor reinicia. Campos com vírgula, aspas ou quebra de linha
//! são gravados entre aspas (aspas internas dobradas).

use coletor_core::protocol::{ReadingKey, UploadFrame};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

const HEADER: &str = "hub,cell,time,temp,humidity,heat_index,sp,cell_version";

pub struct HistoryWriter {
    out: File,
}

impl HistoryWriter {
    /// Abre em modo append, escrevendo o cabeçalho se o arquivo for novo.
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut out = OpenOptions::new().create(true).append(true).open(path)?;
        if out.metadata()?.len() == 0 {
            writeln!(out, "{HEADER}")?;
            out.sync_data()?;
        }
        info!("Histórico CSV em {}", path.display());
        Ok(Self { out })
    }

    /// Grava uma linha e só retorna depois do sync.
    pub fn append(&mut self, frame: &UploadFrame) -> io::Result<()> {
        // Linha montada antes: uma falha não deixa restos em buffer
        let line = format!(
            "{},{},{},{:.3},{:.3},{:.3},{},{}\n",
            quote(&frame.key.hub_id),
            quote(&frame.key.cell_id),
            frame.key.capture_time,
            frame.temperature_f,
            frame.humidity,
            frame.heat_index,
            frame.reading_interval_s,
            quote(&frame.firmware)
        );
        self.out.write_all(line.as_bytes())?;
        self.out.sync_data()
    }

    /// Escritor sobre um arquivo aberto só para leitura: toda gravação falha.
    #[cfg(test)]
    pub fn read_only(path: &Path) -> io::Result<Self> {
        File::create(path)?;
        Ok(Self {
            out: File::open(path)?,
        })
    }
}

fn quote(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Separa uma linha em campos, respeitando aspas. `None` se as aspas não
/// fecham.
fn split_fields(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (true, c) => field.push(c),
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => fields.push(std::mem::take(&mut field)),
            (false, c) => field.push(c),
        }
    }
    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}

fn parse_key(line: &str) -> Option<ReadingKey> {
    let fields = split_fields(line)?;
    let [hub, cell, time, ..] = fields.as_slice() else {
        return None;
    };
    Some(ReadingKey {
        hub_id: hub.clone(),
        cell_id: cell.clone(),
        capture_time: time.parse().ok()?,
    })
}

/// Chaves já registradas no CSV. Arquivo ausente ⇒ conjunto vazio.
pub fn load_seen(path: &Path) -> io::Result<HashSet<ReadingKey>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };

    let mut seen = HashSet::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if n == 0 && line == HEADER {
            continue;
        }
        match parse_key(&line) {
            Some(key) => {
                seen.insert(key);
            }
            None => warn!("Linha {} do histórico ignorada: {line:?}", n + 1),
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn frame(capture_time: u32) -> UploadFrame {
        UploadFrame {
            key: ReadingKey {
                hub_id: "hub-1".into(),
                cell_id: "cell-1".into(),
                capture_time,
            },
            temperature_f: 72.5,
            humidity: 40.0,
            heat_index: 73.0,
            reading_interval_s: 300,
            firmware: "C-test".into(),
        }
    }

    #[test]
    fn appended_rows_rebuild_seen_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("historico.csv");
        {
            let mut w = HistoryWriter::open(&path).unwrap();
            w.append(&frame(1)).unwrap();
            w.append(&frame(2)).unwrap();
        }
        // Reabrir não duplica o cabeçalho
        HistoryWriter::open(&path).unwrap().append(&frame(3)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| *l == HEADER).count(), 1);
        assert!(content.contains("hub-1,cell-1,1,72.500,40.000,73.000,300,C-test"));

        let seen = load_seen(&path).unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&frame(2).key));
    }

    #[test]
    fn ids_with_commas_and_quotes_survive_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("historico.csv");
        let mut tricky = frame(9);
        tricky.key.hub_id = "hub,1".into();
        tricky.key.cell_id = "cell \"a\"".into();
        tricky.firmware = "C,1".into();

        let mut w = HistoryWriter::open(&path).unwrap();
        w.append(&tricky).unwrap();
        w.append(&frame(9)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"hub,1\",\"cell \"\"a\"\"\",9,"));

        let seen = load_seen(&path).unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&tricky.key));
        assert!(seen.contains(&frame(9).key));
    }

    #[test]
    fn unterminated_quote_is_malformed() {
        assert!(split_fields("\"hub,cell,1").is_none());
        assert_eq!(split_fields("a,,b").unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn missing_file_means_nothing_seen() {
        let dir = TempDir::new().unwrap();
        assert!(load_seen(&dir.path().join("nada.csv")).unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("historico.csv");
        std::fs::write(&path, format!("{HEADER}\nlixo\nh,c,10,1,2,3,300,x\n")).unwrap();
        assert_eq!(load_seen(&path).unwrap().len(), 1);
    }
}
