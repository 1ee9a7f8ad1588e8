//! Comandos avulsos de configuração (`show`, `set`, `reset`, `clear-pending`).
//!
//! Toda alteração aceita é gravada em `config.bin` antes do comando retornar.

use coletor_core::device_config::ConfigStoreError;
use coletor_core::{ConfigStore, DeviceConfig};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Uso inválido: {0}")]
    Usage(String),

    #[error(transparent)]
    Config(#[from] ConfigStoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Laço normal do dispositivo
    Run,
    Show,
    Set(Vec<(String, String)>),
    Reset,
    ClearPending,
}

pub const USAGE: &str = "uso: coletor_sender [show | set campo=valor... | reset | clear-pending]";

pub fn parse_args(args: &[String]) -> Result<Command, CommandError> {
    let Some((first, rest)) = args.split_first() else {
        return Ok(Command::Run);
    };

    let command = match first.as_str() {
        "show" => Command::Show,
        "reset" => Command::Reset,
        "clear-pending" => Command::ClearPending,
        "set" => {
            if rest.is_empty() {
                return Err(CommandError::Usage("set precisa de campo=valor".into()));
            }
            let pairs = rest
                .iter()
                .map(|arg| {
                    arg.split_once('=')
                        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                        .ok_or_else(|| CommandError::Usage(format!("esperado campo=valor, obtido {arg:?}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Command::Set(pairs));
        }
        other => return Err(CommandError::Usage(format!("comando desconhecido {other:?}"))),
    };

    if !rest.is_empty() {
        return Err(CommandError::Usage(format!("{first} não aceita argumentos")));
    }
    Ok(command)
}

/// Executa `show`, `set` ou `reset` e devolve o texto a exibir.
pub fn execute(command: &Command, store: &ConfigStore, config: &mut DeviceConfig) -> Result<String, CommandError> {
    match command {
        Command::Show => Ok(config.summary()),
        Command::Set(pairs) => {
            store.edit(config, |c| {
                pairs.iter().try_for_each(|(name, value)| c.set_field(name, value))
            })?;
            Ok(config.summary())
        }
        Command::Reset => {
            *config = store.reset_to_defaults()?;
            Ok(config.summary())
        }
        Command::Run | Command::ClearPending => {
            Err(CommandError::Usage("comando não é de configuração".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_runs_the_loop() {
        assert_eq!(parse_args(&[]).unwrap(), Command::Run);
    }

    #[test]
    fn parses_set_pairs() {
        let cmd = parse_args(&args(&["set", "hub_id=hub-1", "endpoint_path=/a=b"])).unwrap();
        assert_eq!(
            cmd,
            Command::Set(vec![
                ("hub_id".into(), "hub-1".into()),
                ("endpoint_path".into(), "/a=b".into()),
            ])
        );
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(parse_args(&args(&["set"])).is_err());
        assert!(parse_args(&args(&["set", "hub_id"])).is_err());
        assert!(parse_args(&args(&["show", "extra"])).is_err());
        assert!(parse_args(&args(&["flash"])).is_err());
    }

    #[test]
    fn set_is_flushed_before_returning() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = store.load_or_reset().unwrap();

        let cmd = Command::Set(vec![("hub_id".into(), "h".into()), ("cell_id".into(), "c".into())]);
        execute(&cmd, &store, &mut config).unwrap();

        let on_disk = store.load().unwrap().unwrap();
        assert_eq!(on_disk, config);
        assert!(on_disk.cell_configured);
    }

    #[test]
    fn rejected_set_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = store.load_or_reset().unwrap();

        let cmd = Command::Set(vec![("hub_id".into(), "h".into()), ("reading_interval_s".into(), "nunca".into())]);
        assert!(execute(&cmd, &store, &mut config).is_err());
        assert!(config.hub_id.is_empty());
        assert_eq!(store.load().unwrap().unwrap(), config);
    }

    #[test]
    fn reset_restores_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = store.load_or_reset().unwrap();
        execute(&Command::Set(vec![("cell_id".into(), "c".into())]), &store, &mut config).unwrap();

        execute(&Command::Reset, &store, &mut config).unwrap();
        assert_eq!(config, DeviceConfig::default());
    }
}
