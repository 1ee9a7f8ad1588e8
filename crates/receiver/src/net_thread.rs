//! Thread de rede: escuta UDP, grava cada leitura nova no histórico,
//! confirma e repassa as leituras novas pelo channel.

use crate::history::HistoryWriter;
use coletor_core::protocol::{
    AckFrame, MAX_FRAME_SIZE, Message, ProtocolError, ReadingKey, UploadFrame, decode_message, encode_message,
};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashSet;
use std::net::UdpSocket;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Erros ao tratar um datagrama. Nenhum deles gera ack.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Falha ao gravar histórico de {key:?}: {source}")]
    History {
        key: ReadingKey,
        #[source]
        source: std::io::Error,
    },
}

/// Resposta a um datagrama.
#[derive(Debug)]
pub struct Handled {
    /// Frame de ack a devolver ao remetente
    pub ack: Vec<u8>,
    /// Leitura inédita; `None` quando é reenvio
    pub accepted: Option<UploadFrame>,
}

/// Deduplicação por `(hub, cell, capture_time)`.
///
/// Reenvios são confirmados de novo (o sender pode ter perdido o ack), mas
/// só a primeira cópia segue adiante. Com histórico, a leitura só entra em
/// `seen` e só é confirmada depois de gravada.
#[derive(Default)]
pub struct Collector {
    seen: HashSet<ReadingKey>,
    history: Option<HistoryWriter>,
}

impl Collector {
    pub fn with_history(seen: HashSet<ReadingKey>, history: HistoryWriter) -> Self {
        Self {
            seen,
            history: Some(history),
        }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn handle_datagram(&mut self, data: &[u8]) -> Result<Option<Handled>, CollectError> {
        let frame = match decode_message(data)? {
            Message::Upload(frame) => frame,
            Message::Ack(_) => return Ok(None),
        };

        let duplicate = self.seen.contains(&frame.key);
        if !duplicate {
            if let Some(history) = self.history.as_mut() {
                history.append(&frame).map_err(|source| CollectError::History {
                    key: frame.key.clone(),
                    source,
                })?;
            }
            self.seen.insert(frame.key.clone());
        }

        let ack = encode_message(&Message::Ack(AckFrame {
            key: frame.key.clone(),
            duplicate,
        }))?;

        Ok(Some(Handled {
            ack,
            accepted: (!duplicate).then_some(frame),
        }))
    }
}

/// Inicia a thread de rede. Retorna o receiver do channel.
pub fn spawn_collector_thread(
    port: u16,
    collector: Collector,
) -> std::io::Result<(Receiver<UploadFrame>, JoinHandle<()>)> {
    let (tx, rx) = bounded::<UploadFrame>(64); // Buffer de 64 leituras

    let handle = std::thread::Builder::new()
        .name("udp-collector".into())
        .spawn(move || {
            collector_loop(&tx, port, collector);
        })?;

    Ok((rx, handle))
}

fn collector_loop(tx: &Sender<UploadFrame>, port: u16, mut collector: Collector) {
    loop {
        match UdpSocket::bind(format!("0.0.0.0:{port}")) {
            Ok(sock) => {
                info!(
                    "Coletor escutando em 0.0.0.0:{port} – {} leituras já conhecidas",
                    collector.seen_count()
                );
                if serve(&sock, tx, &mut collector).is_err() {
                    info!("Channel fechado, encerrando thread de rede");
                    return;
                }
            }
            Err(e) => {
                error!("Falha ao bind porta {port}: {e}. Tentando novamente em 2s...");
                std::thread::sleep(std::time::Duration::from_secs(2));
            }
        }
    }
}

/// Atende datagramas até o consumidor do channel desaparecer.
fn serve(sock: &UdpSocket, tx: &Sender<UploadFrame>, collector: &mut Collector) -> Result<(), ()> {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    loop {
        let (size, addr) = match sock.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                warn!("Erro ao receber UDP: {e}");
                continue;
            }
        };

        match collector.handle_datagram(&buf[..size]) {
            Ok(Some(handled)) => {
                if let Err(e) = sock.send_to(&handled.ack, addr) {
                    warn!("Falha ao enviar ack para {addr}: {e}");
                }
                if let Some(frame) = handled.accepted {
                    tx.send(frame).map_err(|_| ())?;
                }
            }
            Ok(None) => debug!("Ignorando ack recebido de {addr}"),
            Err(CollectError::Protocol(e)) => debug!("Pacote inválido de {addr}: {e}"),
            // Sem ack: o sender tenta de novo
            Err(e) => error!("{e}"),
        }
    }
}
