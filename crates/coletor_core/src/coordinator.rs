//! Coordenador de transmissão: grava primeiro, envia depois, apaga só após
//! confirmação.
//!
//! ```text
//! Idle → Persisting → Draining → (Delivering ⇄ RetryWait) → Idle
//!                                      │
//!                                      └─ tentativas esgotadas → Halted
//! ```
//!
//! `Halted` é terminal: o coordenador para de progredir e o watchdog
//! reinicia o dispositivo, que volta a drenar a fila desde o início.

use crate::delivery::{DeliveryClient, DeliveryError, Upload};
use crate::device_config::DeviceConfig;
use crate::liveness::Liveness;
use crate::store::{Backlog, StoreError};
use crate::types::{Reading, RecordId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Parâmetros de entrega (dependem da placa/transporte).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Tentativas por registro antes da parada deliberada
    pub max_attempts: u32,
    /// Espera fixa entre tentativas
    pub retry_delay: Duration,
    /// Registros da fila tentados por passada
    pub transmits_per_loop: usize,
    /// Mover registros corrompidos para `corrupt/`
    pub quarantine_corrupt: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retry_delay: Duration::from_millis(500),
            transmits_per_loop: 5,
            quarantine_corrupt: true,
        }
    }
}

/// Estado do coordenador.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Persisting,
    Draining,
    Delivering,
    RetryWait,
    Halted,
}

/// Motivo da parada deliberada.
#[derive(Debug, thiserror::Error)]
pub enum FailStop {
    #[error("Falha de armazenamento: {0}")]
    Storage(#[source] StoreError),

    #[error("Entrega de {id} falhou após {attempts} tentativas: {last}")]
    DeliveryExhausted {
        id: RecordId,
        attempts: u32,
        #[source]
        last: DeliveryError,
    },

    #[error("Coordenador parado, aguardando reset do watchdog")]
    Halted,
}

/// Resultado de uma passada pela fila.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entregas confirmadas
    pub delivered: usize,
    /// Registros com tamanho inválido (pulados)
    pub corrupt: usize,
    /// Registros corrompidos movidos para `corrupt/`
    pub quarantined: usize,
    /// Entregues, mas o arquivo não pôde ser apagado
    pub stuck: usize,
    /// Pendentes deixados para a próxima passada
    pub remaining: usize,
    /// Entrega adiada por falta de configuração
    pub deferred: bool,
}

enum Attempt {
    Delivered,
    Skipped,
}

/// Orquestra fila, transporte e watchdog.
pub struct Coordinator<B, D, L> {
    backlog: B,
    client: D,
    liveness: L,
    policy: RetryPolicy,
    state: State,
}

impl<B, D, L> Coordinator<B, D, L>
where
    B: Backlog,
    D: DeliveryClient,
    L: Liveness,
{
    pub fn new(backlog: B, client: D, liveness: L, policy: RetryPolicy) -> Self {
        Self {
            backlog,
            client,
            liveness,
            policy,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn backlog(&self) -> &B {
        &self.backlog
    }

    pub fn client(&self) -> &D {
        &self.client
    }

    pub fn liveness(&self) -> &L {
        &self.liveness
    }

    fn enter(&mut self, state: State) {
        if self.state != state {
            debug!("Coordenador: {:?} → {:?}", self.state, state);
            self.state = state;
        }
    }

    fn ensure_running(&self) -> Result<(), FailStop> {
        if self.state == State::Halted {
            return Err(FailStop::Halted);
        }
        Ok(())
    }

    fn halt(&mut self, reason: FailStop) -> FailStop {
        error!("{reason} – parando até o reset do watchdog");
        self.enter(State::Halted);
        reason
    }

    /// Nova leitura: grava (write-ahead), envia a própria leitura e então
    /// drena a fila.
    pub fn record_sample(&mut self, config: &DeviceConfig, reading: Reading) -> Result<DrainReport, FailStop> {
        self.ensure_running()?;
        self.liveness.refresh();

        self.enter(State::Persisting);
        let id = match self.backlog.enqueue(&reading) {
            Ok(id) => id,
            Err(e) => return Err(self.halt(FailStop::Storage(e))),
        };
        info!("Leitura gravada: {id}");
        self.liveness.refresh();

        let mut report = DrainReport::default();
        if !self.client.is_configured(config) {
            warn!("Não é possível enviar – dispositivo não configurado");
            report.deferred = true;
            self.enter(State::Idle);
            return Ok(report);
        }

        self.deliver_one(config, id, &mut report)?;
        self.drain_into(config, &mut report, Some(id))?;
        Ok(report)
    }

    /// Uma passada pela fila, do registro mais antigo ao mais novo, limitada
    /// a `transmits_per_loop` entregas.
    pub fn drain(&mut self, config: &DeviceConfig) -> Result<DrainReport, FailStop> {
        self.ensure_running()?;
        let mut report = DrainReport::default();
        self.drain_into(config, &mut report, None)?;
        Ok(report)
    }

    fn drain_into(
        &mut self,
        config: &DeviceConfig,
        report: &mut DrainReport,
        skip: Option<RecordId>,
    ) -> Result<(), FailStop> {
        self.liveness.refresh();
        self.enter(State::Draining);

        let mut ids = match self.backlog.pending_ids() {
            Ok(ids) => ids,
            Err(e) => return Err(self.halt(FailStop::Storage(e))),
        };
        ids.retain(|id| Some(*id) != skip);
        ids.sort_unstable();

        if !ids.is_empty() && !self.client.is_configured(config) {
            warn!("Não é possível enviar – dispositivo não configurado ({} pendentes)", ids.len());
            report.deferred = true;
            report.remaining += ids.len();
            self.enter(State::Idle);
            return Ok(());
        }

        let mut attempted = 0;
        for (i, id) in ids.iter().enumerate() {
            if attempted >= self.policy.transmits_per_loop {
                report.remaining += ids.len() - i;
                break;
            }
            if let Attempt::Delivered = self.deliver_one(config, *id, report)? {
                attempted += 1;
            }
        }

        if report.remaining > 0 {
            info!("{} leituras ficam para a próxima passada", report.remaining);
        }
        self.enter(State::Idle);
        Ok(())
    }

    fn deliver_one(
        &mut self,
        config: &DeviceConfig,
        id: RecordId,
        report: &mut DrainReport,
    ) -> Result<Attempt, FailStop> {
        self.liveness.refresh();
        self.enter(State::Delivering);
        info!("Transferindo: {id}");

        let reading = match self.backlog.read(id) {
            Ok(reading) => reading,
            Err(StoreError::Corrupt { got, .. }) => {
                error!("Registro {id} com tamanho incorreto ({got} bytes) – pulando");
                report.corrupt += 1;
                if self.policy.quarantine_corrupt {
                    match self.backlog.quarantine(id) {
                        Ok(()) => report.quarantined += 1,
                        Err(e) => warn!("Não foi possível isolar {id}: {e}"),
                    }
                }
                return Ok(Attempt::Skipped);
            }
            Err(StoreError::Missing(_)) => {
                warn!("Registro {id} sumiu antes do envio");
                return Ok(Attempt::Skipped);
            }
            Err(e) => return Err(self.halt(FailStop::Storage(e))),
        };

        let upload = Upload::new(&reading, config);
        let mut attempt = 1;
        loop {
            match self.client.attempt(&upload) {
                Ok(()) => break,
                Err(e) => {
                    warn!("Falha ao enviar {id}, tentativa #{attempt}: {e}");
                    if attempt >= self.policy.max_attempts {
                        return Err(self.halt(FailStop::DeliveryExhausted {
                            id,
                            attempts: attempt,
                            last: e,
                        }));
                    }
                    self.enter(State::RetryWait);
                    self.liveness.refresh();
                    self.liveness.sleep(self.policy.retry_delay);
                    self.liveness.refresh();
                    attempt += 1;
                    self.enter(State::Delivering);
                }
            }
        }
        self.liveness.refresh();
        report.delivered += 1;
        info!("Leitura {id} transferida");

        match self.backlog.remove(id) {
            Ok(()) => debug!("Registro {id} removido"),
            Err(e) => {
                error!("Falha ao remover {id} após entrega: {e}");
                report.stuck += 1;
            }
        }
        Ok(Attempt::Delivered)
    }

    /// Apaga toda a fila de pendentes, renovando o watchdog a cada arquivo.
    pub fn purge_backlog(&mut self) -> Result<usize, FailStop> {
        self.ensure_running()?;
        let ids = match self.backlog.pending_ids() {
            Ok(ids) => ids,
            Err(e) => return Err(self.halt(FailStop::Storage(e))),
        };

        info!("Removendo {} leituras pendentes", ids.len());
        let mut removed = 0;
        for id in ids {
            self.liveness.refresh();
            match self.backlog.remove(id) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Falha ao remover {id}: {e}"),
            }
        }
        self.liveness.refresh();
        Ok(removed)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
