//! Configuração do ROLLCALL carregada a partir de `rollcall.toml`.
//!
//! A struct [`RollcallConfig`] contém todos os parâmetros do agendador:
//! limites de recursos (workers, tamanho de lote), atrasos de cortesia
//! para o recurso externo e orçamentos de retentativa.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// O que acontece com o lote em andamento quando o job ativo é cancelado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// O lote em andamento termina; nenhum lote novo é iniciado.
    FinishBatch,
    /// Os workers param de reivindicar chaves assim que veem o cancelamento.
    StopClaiming,
}

/// Configuração de nível superior carregada de `rollcall.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RollcallConfig {
    /// URL base do serviço de resultados consultado por chave.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Número de workers concorrentes por lote.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Tamanho máximo de um lote.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Quantidade máxima de chaves aceitas em um único job.
    #[serde(default = "default_max_keys_per_job")]
    pub max_keys_per_job: usize,

    /// Timeout por requisição ao recurso externo, em milissegundos.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Pausa de cortesia após cada chave, em milissegundos.
    #[serde(default = "default_key_delay_ms")]
    pub key_delay_ms: u64,

    /// Pausa entre lotes, em milissegundos.
    #[serde(default = "default_batch_cooldown_ms")]
    pub batch_cooldown_ms: u64,

    /// Tentativas de criação de um contexto de execução.
    #[serde(default = "default_context_create_attempts")]
    pub context_create_attempts: u32,

    /// Atraso base do backoff linear entre tentativas de criação de contexto.
    #[serde(default = "default_context_backoff_ms")]
    pub context_backoff_ms: u64,

    /// Recuperações toleradas por chave antes de classificá-la como não encontrada.
    #[serde(default = "default_recovery_attempts")]
    pub recovery_attempts: u32,

    /// Diretório raiz dos diretórios de staging por job.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Diretório dos artefatos combinados.
    #[serde(default = "default_merged_dir")]
    pub merged_dir: PathBuf,

    /// Prefixo da URL de download dos artefatos combinados.
    #[serde(default = "default_download_prefix")]
    pub download_prefix: String,

    /// Extensão dos artefatos baixados e combinados.
    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,

    #[serde(default = "default_cancel_policy")]
    pub cancel_policy: CancelPolicy,

    /// Janela de retenção de jobs terminados, em segundos. `None` mantém tudo.
    #[serde(default)]
    pub retention_secs: Option<u64>,
}

fn default_base_url() -> String {
    "http://localhost:8080/results".to_string()
}

fn default_max_workers() -> usize {
    3
}

fn default_max_batch_size() -> usize {
    50
}

fn default_max_keys_per_job() -> usize {
    100_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_key_delay_ms() -> u64 {
    1000
}

fn default_batch_cooldown_ms() -> u64 {
    3000
}

fn default_context_create_attempts() -> u32 {
    3
}

fn default_context_backoff_ms() -> u64 {
    1000
}

fn default_recovery_attempts() -> u32 {
    2
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_merged_dir() -> PathBuf {
    PathBuf::from("merged")
}

fn default_download_prefix() -> String {
    "/merged".to_string()
}

fn default_artifact_extension() -> String {
    "pdf".to_string()
}

fn default_cancel_policy() -> CancelPolicy {
    CancelPolicy::FinishBatch
}

impl Default for RollcallConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_workers: default_max_workers(),
            max_batch_size: default_max_batch_size(),
            max_keys_per_job: default_max_keys_per_job(),
            request_timeout_ms: default_request_timeout_ms(),
            key_delay_ms: default_key_delay_ms(),
            batch_cooldown_ms: default_batch_cooldown_ms(),
            context_create_attempts: default_context_create_attempts(),
            context_backoff_ms: default_context_backoff_ms(),
            recovery_attempts: default_recovery_attempts(),
            staging_dir: default_staging_dir(),
            merged_dir: default_merged_dir(),
            download_prefix: default_download_prefix(),
            artifact_extension: default_artifact_extension(),
            cancel_policy: default_cancel_policy(),
            retention_secs: None,
        }
    }
}

impl RollcallConfig {
    /// Carrega a configuração de `rollcall.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("rollcall.toml"), |name| std::env::var(name).ok())
    }

    /// Carrega de um caminho explícito, consultando o ambiente via `env`.
    pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<RollcallConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(env);
        Ok(config.clamped())
    }

    /// Aplica as variáveis de ambiente sobre os valores do arquivo.
    ///
    /// `DYNO` (ambiente com recursos restritos) seleciona o perfil reduzido:
    /// 1 worker, lotes de 20 e timeout de 60s.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if env("DYNO").is_some() {
            self.max_workers = 1;
            self.max_batch_size = 20;
            self.request_timeout_ms = 60_000;
        }

        if let Some(url) = env("ROLLCALL_BASE_URL")
            && !url.is_empty()
        {
            self.base_url = url;
        }
        if let Some(workers) = env("ROLLCALL_MAX_WORKERS").and_then(|v| v.parse().ok()) {
            self.max_workers = workers;
        }
        if let Some(size) = env("ROLLCALL_MAX_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.max_batch_size = size;
        }
    }

    /// Garante limites mínimos para workers, tamanho de lote e chaves por job.
    pub fn clamped(mut self) -> Self {
        self.max_workers = self.max_workers.max(1);
        self.max_batch_size = self.max_batch_size.max(1);
        self.max_keys_per_job = self.max_keys_per_job.max(1);
        self.context_create_attempts = self.context_create_attempts.max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn key_delay(&self) -> Duration {
        Duration::from_millis(self.key_delay_ms)
    }

    pub fn batch_cooldown(&self) -> Duration {
        Duration::from_millis(self.batch_cooldown_ms)
    }

    /// Backoff linear para a n-ésima tentativa (1-based) de criação de contexto.
    pub fn context_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.context_backoff_ms * u64::from(attempt))
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}
