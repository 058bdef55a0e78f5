//! Interface de terminal do ROLLCALL: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente um job
//! a partir dos snapshots de status.

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::state_machine::JobStatus;
use crate::status::Snapshot;

/// Indicador visual de progresso para um job no terminal.
///
/// A barra avança com `completed / total`; a mensagem mostra a etapa atual,
/// a velocidade e a estimativa de término.
pub struct JobProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Estilo verde para jobs concluídos.
    green: Style,
    // Estilo vermelho para jobs com erro.
    red: Style,
    // Estilo amarelo para jobs na fila ou cancelados.
    yellow: Style,
}

impl JobProgress {
    /// Cria a barra de um job dentro de um [`MultiProgress`].
    pub fn start(multi: &MultiProgress, job_id: &str, total: usize) -> Self {
        let pb = multi.add(ProgressBar::new(total as u64));
        let style = ProgressStyle::default_bar()
            .template("{prefix:.cyan} [{bar:30.green/white}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_prefix(short_id(job_id).to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(200));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a barra a partir de um snapshot.
    pub fn update(&self, snapshot: &Snapshot) {
        self.pb.set_length(snapshot.total as u64);
        self.pb.set_position(snapshot.completed as u64);
        self.pb.set_message(status_line(snapshot));
    }

    /// Finaliza a barra e exibe o resultado do job.
    ///
    /// Sucesso é mostrado em verde com checkmark; erro em vermelho com X.
    pub fn finish(&self, snapshot: &Snapshot) {
        self.update(snapshot);
        let line = match snapshot.status {
            JobStatus::Done => format!(
                "{} {} found, {} not found -> {}",
                self.green.apply_to("✓"),
                snapshot.successful_count,
                snapshot.not_found_count,
                snapshot.download_url.as_deref().unwrap_or("-")
            ),
            JobStatus::Error => format!(
                "{} {}",
                self.red.apply_to("✗"),
                snapshot.error.as_deref().unwrap_or("failed")
            ),
            status => format!("{} {status}", self.yellow.apply_to("■")),
        };
        self.pb.finish_with_message(line);
    }
}

fn short_id(job_id: &str) -> &str {
    job_id.get(..8).unwrap_or(job_id)
}

/// Mensagem exibida ao lado da barra enquanto o job está ativo.
pub fn status_line(snapshot: &Snapshot) -> String {
    match snapshot.status {
        JobStatus::Queued => match snapshot.queue_position {
            Some(position) => format!("queued (#{position})"),
            None => "queued".to_string(),
        },
        _ => {
            let mut line = format!(
                "{} {} {}/min",
                snapshot.current_step, snapshot.elapsed_time.formatted, snapshot.processing_speed.keys_per_minute
            );
            if let Some(eta) = &snapshot.estimated_time_remaining {
                line.push_str(&format!(" eta {}", eta.formatted));
            }
            line
        }
    }
}

/// Imprime os snapshots finais formatados em JSON.
pub fn print_snapshots(snapshots: &[Snapshot]) {
    println!();
    println!("{}", Style::new().bold().apply_to("─── Final Status ───"));
    println!("{}", serde_json::to_string_pretty(snapshots).unwrap_or_default());
}
