//! Interface de linha de comando do ROLLCALL baseada em clap.
//!
//! Define a struct [`Cli`] com o subcomando [`Command::Run`] e flags globais
//! (--workers, --batch-size, --base-url, --verbose) que sobrepõem a
//! configuração carregada de `rollcall.toml`.

use std::path::Path;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::config::RollcallConfig;
use crate::error::{Result, RollcallError};
use crate::state_machine::JobConfig;

/// ROLLCALL: coleta resultados por faixa de chaves e os consolida em um único documento.
#[derive(Debug, Parser)]
#[command(name = "rollcall", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Número de workers concorrentes por lote.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Tamanho máximo de cada lote.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// URL base do serviço de resultados.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete uma faixa de chaves (ou um arquivo de jobs) e acompanha até o fim.
    Run {
        /// Primeira chave da faixa (ex.: 21UCSE4001).
        #[arg(required_unless_present = "file", requires = "end")]
        start: Option<String>,

        /// Última chave da faixa, inclusiva.
        end: Option<String>,

        /// Parâmetro repassado ao serviço, no formato chave=valor.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Caminho para um arquivo JSON ou TOML contendo definições de job.
        #[arg(long, conflicts_with = "start")]
        file: Option<String>,
    },
}

impl Cli {
    /// Aplica as flags globais sobre a configuração carregada.
    pub fn apply_overrides(&self, mut config: RollcallConfig) -> RollcallConfig {
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(size) = self.batch_size {
            config.max_batch_size = size;
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        config.clamped()
    }
}

/// Interpreta `chave=valor`.
fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

/// Conteúdo de um arquivo de jobs: `{ jobs = [ { startKey, endKey, params } ] }`.
#[derive(Debug, Deserialize)]
pub struct JobFile {
    pub jobs: Vec<JobConfig>,
}

/// Lê um arquivo de jobs; o formato é escolhido pela extensão (`.json` ou TOML).
pub fn load_job_file(path: &Path) -> Result<Vec<JobConfig>> {
    let contents = std::fs::read_to_string(path)?;
    let file: JobFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        Some("toml") | None => toml::from_str(&contents)?,
        Some(other) => {
            return Err(RollcallError::Config(format!(
                "unsupported job file extension: .{other}"
            )));
        }
    };
    Ok(file.jobs)
}
