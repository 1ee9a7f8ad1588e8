//! Transporte UDP: envia o frame de upload e espera a confirmação do coletor.

use coletor_core::delivery::{DeliveryClient, DeliveryError, Upload};
use coletor_core::protocol::{MAX_FRAME_SIZE, Message, UploadFrame, decode_message, encode_message};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::debug;

pub struct UdpDelivery {
    sock: UdpSocket,
    collector: SocketAddr,
    timeout: Duration,
}

impl UdpDelivery {
    pub fn new(collector: SocketAddr, timeout: Duration) -> Result<Self, DeliveryError> {
        let bind = if collector.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let sock = UdpSocket::bind(bind)?;
        Ok(Self {
            sock,
            collector,
            timeout,
        })
    }
}

impl DeliveryClient for UdpDelivery {
    fn attempt(&mut self, upload: &Upload<'_>) -> Result<(), DeliveryError> {
        let frame = UploadFrame::from(upload);
        let key = frame.key.clone();
        let bytes = encode_message(&Message::Upload(frame))
            .map_err(|e| DeliveryError::BadResponse(e.to_string()))?;

        self.sock.send_to(&bytes, self.collector).map_err(|e| DeliveryError::Connect {
            endpoint: self.collector.to_string(),
            reason: e.to_string(),
        })?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; MAX_FRAME_SIZE];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(DeliveryError::Timeout);
            }
            self.sock.set_read_timeout(Some(left))?;

            match self.sock.recv_from(&mut buf) {
                Ok((size, addr)) => {
                    if addr != self.collector {
                        debug!("Ignorando pacote de {addr}");
                        continue;
                    }
                    match decode_message(&buf[..size]) {
                        Ok(Message::Ack(ack)) if ack.key == key => {
                            if ack.duplicate {
                                debug!("Coletor já tinha a leitura {}", key.capture_time);
                            }
                            return Ok(());
                        }
                        // Ack atrasado de uma tentativa anterior
                        Ok(other) => debug!("Ignorando mensagem inesperada: {other:?}"),
                        Err(e) => debug!("Pacote inválido de {addr}: {e}"),
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Err(DeliveryError::Timeout);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
