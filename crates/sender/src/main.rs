//! # Coletor Sender
//!
//! Amostra temperatura/umidade, grava cada leitura no cartão antes de
//! qualquer tentativa de rede e encaminha a fila ao endpoint. Travou ou
//! esgotou as tentativas: o watchdog reinicia o processo e a fila é
//! retomada no boot seguinte.
//!
//! ## Uso
//! ```bash
//! coletor_sender                          # Laço normal
//! coletor_sender show                     # Mostra config.bin
//! coletor_sender set hub_id=h cell_id=c   # Altera e grava
//! coletor_sender reset                    # Padrões de fábrica
//! coletor_sender clear-pending            # Apaga a fila de pendentes
//! ```

mod commands;
mod device;
mod http;
mod sensor;
mod udp;
mod watchdog;

use commands::{Command, USAGE};
use coletor_core::config::{AppConfig, SenderConfig, Transport};
use coletor_core::{ConfigStore, Coordinator, DeliveryClient, DeliveryError, DeviceConfig, Liveness, RecordStore, Watchdog};
use device::{Device, Tick};
use sensor::SimulatedSensor;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let settings = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = settings.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let problems = settings.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("Configuração inválida: {p}");
        }
        return ExitCode::FAILURE;
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match commands::parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let s = &settings.sender;
    let root = Path::new(&s.storage_root);
    if let Err(e) = std::fs::create_dir_all(root) {
        error!("Não foi possível criar {}: {e}", root.display());
        return ExitCode::FAILURE;
    }

    let config_store = ConfigStore::new(root);
    let mut config = match config_store.load_or_reset() {
        Ok(config) => config,
        Err(e) => {
            error!("Falha ao carregar configuração: {e}");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Run => run(s, root, config_store, config),
        Command::ClearPending => clear_pending(s, root),
        other => match commands::execute(&other, &config_store, &mut config) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
    }
}

fn build_client(s: &SenderConfig) -> Result<Box<dyn DeliveryClient>, DeliveryError> {
    Ok(match s.transport {
        Transport::Http => Box::new(http::HttpDelivery::new(s.request_timeout())?),
        Transport::Udp => {
            let collector = s.udp_collector.parse().map_err(|_| DeliveryError::Connect {
                endpoint: s.udp_collector.clone(),
                reason: "endereço inválido".into(),
            })?;
            Box::new(udp::UdpDelivery::new(collector, s.request_timeout())?)
        }
    })
}

fn clear_pending(s: &SenderConfig, root: &Path) -> ExitCode {
    let store = match RecordStore::open(root) {
        Ok(store) => store,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let client = match build_client(s) {
        Ok(client) => client,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut coordinator = Coordinator::new(store, client, Watchdog::new(s.watchdog_deadline()), s.retry_policy());
    match coordinator.purge_backlog() {
        Ok(removed) => {
            println!("{removed} leituras pendentes removidas");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(s: &SenderConfig, root: &Path, config_store: ConfigStore, config: DeviceConfig) -> ExitCode {
    // ── Watchdog ──
    let mut liveness = Watchdog::new(s.watchdog_deadline());
    if let Err(e) = watchdog::spawn_monitor(liveness.clone(), || std::process::abort()) {
        error!("Falha ao criar thread do watchdog: {e}");
        return ExitCode::FAILURE;
    }

    let store = match RecordStore::open(root) {
        Ok(store) => store,
        Err(e) => halt(&liveness, &e),
    };
    let client = match build_client(s) {
        Ok(client) => client,
        Err(e) => halt(&liveness, &e),
    };

    let pending = store.pending_count().unwrap_or(0);

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   COLETOR SENDER – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Transporte: {:?}", s.transport);
    println!("  Endpoint:   {}{}", config.endpoint_domain, config.endpoint_path);
    println!("  Intervalo:  {}s", config.reading_interval_s);
    println!("  Watchdog:   {:.1}s", s.watchdog_deadline_secs);
    println!("  Pendentes:  {pending}");
    println!("══════════════════════════════════════════════");
    println!();

    let coordinator = Coordinator::new(store, client, liveness.clone(), s.retry_policy());
    let mut device = Device::new(coordinator, config_store, config, Box::new(SimulatedSensor::default()));

    if let Err(e) = device.boot() {
        halt(&liveness, &e);
    }

    // ── Loop principal ──
    let poll = s.poll_interval();
    loop {
        match device.tick(sensor::now_epoch()) {
            Ok(Tick::Sampled(report)) => info!(
                "Leitura registrada – entregues: {}, pendentes: {}{}",
                report.delivered,
                report.remaining,
                if report.deferred { " (envio adiado)" } else { "" }
            ),
            Ok(Tick::Drained(report)) if report.delivered > 0 => {
                info!("Fila: {} entregues, {} restantes", report.delivered, report.remaining)
            }
            Ok(Tick::Drained(_)) => {}
            Err(e) => halt(&liveness, &e),
        }
        liveness.sleep(poll);
    }
}

/// Parada deliberada: deixa de renovar o watchdog e espera o reset.
fn halt(watchdog: &Watchdog, reason: &dyn std::fmt::Display) -> ! {
    error!("Parando: {reason}");
    watchdog.kill();
    loop {
        std::thread::park();
    }
}
