//! # Coletor Receiver
//!
//! Endpoint de referência para o transporte UDP. Descarta reenvios pela
//! chave `(hub, cell, capture_time)` e, se habilitado, grava as leituras
//! aceitas em CSV antes de confirmá-las.

mod history;
mod net_thread;

use coletor_core::config::AppConfig;
use history::HistoryWriter;
use net_thread::Collector;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        let _ = config.save(&config_path);
    }

    let rc = &config.receiver;
    if rc.port == 0 {
        error!("Porta do receiver não pode ser 0");
        return ExitCode::FAILURE;
    }

    // ── Histórico ──
    let csv_path = Path::new(&rc.csv_path);
    let collector = if rc.csv_enabled {
        let seen = match history::load_seen(csv_path) {
            Ok(seen) => seen,
            Err(e) => {
                error!("Falha ao ler {}: {e}", csv_path.display());
                return ExitCode::FAILURE;
            }
        };
        match HistoryWriter::open(csv_path) {
            Ok(w) => Collector::with_history(seen, w),
            Err(e) => {
                error!("Falha ao abrir {}: {e}", csv_path.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        Collector::default()
    };

    // ── Thread de rede ──
    let (rx, _net) = match net_thread::spawn_collector_thread(rc.port, collector) {
        Ok(started) => started,
        Err(e) => {
            error!("Falha ao criar thread de rede: {e}");
            return ExitCode::FAILURE;
        }
    };

    for frame in rx {
        info!(
            "← {}/{} t={} {:.1}°F {:.1}% ({})",
            frame.key.hub_id,
            frame.key.cell_id,
            frame.key.capture_time,
            frame.temperature_f,
            frame.humidity,
            frame.firmware
        );
    }

    ExitCode::SUCCESS
}
