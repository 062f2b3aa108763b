use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::providers::types::BackendError;

/// How to launch the bundled inference engine server.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub binary: PathBuf,
    pub model_path: PathBuf,
    pub port: u16,
    pub context_size: u32,
}

impl EngineConfig {
    pub fn args(&self) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.model_path.display().to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            self.port.to_string(),
            "--ctx-size".to_string(),
            self.context_size.to_string(),
        ]
    }
}

/// A running engine server. The process is killed when this is dropped.
pub struct EngineProcess {
    child: Child,
}

impl EngineProcess {
    pub fn spawn(config: &EngineConfig) -> Result<Self, BackendError> {
        let child = Command::new(&config.binary)
            .args(config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BackendError::EngineStart(format!("{}: {}", config.binary.display(), e))
            })?;

        tracing::info!(
            "Spawned inference engine (pid {:?}) on port {}",
            child.id(),
            config.port
        );
        Ok(Self { child })
    }

    /// `Some(description)` once the process has exited.
    pub fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_bind_loopback() {
        let config = EngineConfig {
            binary: PathBuf::from("llama-server"),
            model_path: PathBuf::from("/models/tiny.gguf"),
            port: 8089,
            context_size: 4096,
        };
        let args = config.args();
        let host_idx = args.iter().position(|a| a == "--host").unwrap();
        assert_eq!(args[host_idx + 1], "127.0.0.1");
        assert!(args.contains(&"/models/tiny.gguf".to_string()));
        assert!(args.contains(&"8089".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = EngineConfig {
            binary: PathBuf::from("/nonexistent/murmur-engine"),
            model_path: PathBuf::from("/models/tiny.gguf"),
            port: 8089,
            context_size: 4096,
        };
        assert!(matches!(
            EngineProcess::spawn(&config),
            Err(BackendError::EngineStart(_))
        ));
    }
}
