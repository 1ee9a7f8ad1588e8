//! Disciplina de watchdog.
//!
//! Existe um único prazo `D` para o processo inteiro. Todo trecho que pode
//! bloquear por mais que `D` (rede, disco, espera entre tentativas) precisa
//! renovar o watchdog em intervalos menores que `D`; caso contrário o
//! dispositivo é reiniciado. Esse reset é o único mecanismo de recuperação
//! para hardware ou transporte travados.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Prazo usado por [`Watchdog::kill`] para forçar um reset rápido.
pub const KILL_DEADLINE: Duration = Duration::from_millis(250);

/// Capacidade de manter o watchdog satisfeito.
pub trait Liveness {
    /// Sinaliza que o laço de controle continua progredindo.
    fn refresh(&mut self);

    /// Prazo máximo entre duas renovações.
    fn deadline(&self) -> Duration;

    /// Espera `duration` em fatias menores que o prazo, renovando antes,
    /// entre e depois de cada fatia.
    fn sleep(&mut self, duration: Duration) {
        let slice = (self.deadline() / 4).max(Duration::from_millis(1));
        let mut remaining = duration;

        self.refresh();
        while !remaining.is_zero() {
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
            self.refresh();
        }
    }
}

// ──────────────────────────────────────────────
// Watchdog
// ──────────────────────────────────────────────

#[derive(Debug)]
struct WatchdogState {
    origin: Instant,
    /// Milissegundos desde `origin` na última renovação
    last_feed_ms: AtomicU64,
    timeout_ms: AtomicU64,
    killed: AtomicBool,
}

/// Rastreador de prazo compartilhável entre o laço e o monitor.
///
/// Clonar devolve outro handle para o mesmo watchdog.
#[derive(Debug, Clone)]
pub struct Watchdog {
    state: Arc<WatchdogState>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(WatchdogState {
                origin: Instant::now(),
                last_feed_ms: AtomicU64::new(0),
                timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
                killed: AtomicBool::new(false),
            }),
        }
    }

    fn now_ms(&self) -> u64 {
        self.state.origin.elapsed().as_millis() as u64
    }

    /// Renova o prazo. Ignorado depois de [`Watchdog::kill`].
    pub fn feed(&self) {
        if self.state.killed.load(Ordering::SeqCst) {
            return;
        }
        self.state.last_feed_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.state.timeout_ms.load(Ordering::SeqCst))
    }

    /// Tempo restante até o reset.
    pub fn remaining(&self) -> Duration {
        let last = self.state.last_feed_ms.load(Ordering::SeqCst);
        let elapsed = self.now_ms().saturating_sub(last);
        self.timeout().saturating_sub(Duration::from_millis(elapsed))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Encurta o prazo e passa a ignorar renovações: reset deliberado.
    pub fn kill(&self) {
        self.state
            .timeout_ms
            .store(KILL_DEADLINE.as_millis() as u64, Ordering::SeqCst);
        self.state.killed.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.state.killed.load(Ordering::SeqCst)
    }
}

impl Liveness for Watchdog {
    fn refresh(&mut self) {
        self.feed();
    }

    fn deadline(&self) -> Duration {
        self.timeout()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_watchdog_is_alive() {
        let wd = Watchdog::new(Duration::from_secs(16));
        assert!(!wd.is_expired());
        assert!(wd.remaining() > Duration::from_secs(15));
    }

    #[test]
    fn expires_without_feed() {
        let wd = Watchdog::new(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));
        assert!(wd.is_expired());
        wd.feed();
        assert!(!wd.is_expired());
    }

    #[test]
    fn kill_ignores_later_feeds() {
        let wd = Watchdog::new(Duration::from_secs(30));
        wd.kill();
        assert_eq!(wd.timeout(), KILL_DEADLINE);
        std::thread::sleep(KILL_DEADLINE + Duration::from_millis(50));
        wd.feed();
        assert!(wd.is_expired());
        assert!(wd.is_killed());
    }

    #[test]
    fn clones_share_state() {
        let wd = Watchdog::new(Duration::from_millis(30));
        let monitor = wd.clone();
        std::thread::sleep(Duration::from_millis(50));
        assert!(monitor.is_expired());
        wd.feed();
        assert!(!monitor.is_expired());
    }

    #[test]
    fn sleep_refreshes_in_slices() {
        struct Counting {
            refreshes: usize,
        }
        impl Liveness for Counting {
            fn refresh(&mut self) {
                self.refreshes += 1;
            }
            fn deadline(&self) -> Duration {
                Duration::from_millis(20)
            }
        }

        let mut c = Counting { refreshes: 0 };
        c.sleep(Duration::from_millis(20));
        // fatias de 5 ms: 1 renovação inicial + 4
        assert_eq!(c.refreshes, 5);
    }

    #[test]
    fn long_sleep_keeps_watchdog_alive() {
        let mut wd = Watchdog::new(Duration::from_millis(40));
        wd.sleep(Duration::from_millis(120));
        assert!(!wd.is_expired());
    }
}
