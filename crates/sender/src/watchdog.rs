//! Emulação do watchdog de hardware.
//!
//! Uma thread confere o prazo periodicamente; vencido o prazo, executa
//! `on_expire` (no binário, abortar o processo para o supervisor reiniciá-lo).

use coletor_core::Watchdog;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::error;

/// Maior espera entre duas conferências do prazo.
const CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub fn spawn_monitor<F>(watchdog: Watchdog, on_expire: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name("watchdog".into())
        .spawn(move || {
            loop {
                let remaining = watchdog.remaining();
                if remaining.is_zero() {
                    break;
                }
                std::thread::sleep(remaining.min(CHECK_INTERVAL));
            }
            error!(
                "Watchdog expirou (prazo {:?}{}) – reiniciando",
                watchdog.timeout(),
                if watchdog.is_killed() { ", reset deliberado" } else { "" }
            );
            on_expire();
        })
}
