use crate::cli::args::{Cli, Commands, OverrideArgs};
use crate::error::{ProcessingError, Result};
use crate::models::PipelineStatus;
use crate::pipeline::Pipeline;
use crate::settings::Settings;
use crate::utils::keys::default_target_date;
use crate::utils::logging::init_tracing;
use crate::writers::read_summary_file;
use std::io::Read;
use std::path::Path;

/// Outcome of a subcommand, used for the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

pub async fn run(cli: Cli) -> Result<Outcome> {
    let base = Settings::load(cli.config.as_deref())?;
    let level = if cli.verbose {
        "debug"
    } else {
        base.log_level.as_str()
    };
    init_tracing(level);

    match cli.command {
        Commands::Run {
            date,
            status_out,
            overrides,
        } => {
            let pipeline = open_pipeline(base, overrides).await?.with_progress(!cli.quiet);
            let date = date.unwrap_or_else(default_target_date);

            if !cli.quiet {
                let settings = pipeline.settings();
                println!("Summarising air quality for {}", date);
                println!("Source: {}", settings.source);
                println!("Target: {}", settings.target);
                println!(
                    "Chunk size: {}, Concurrency: {}",
                    settings.chunk_size, settings.map_concurrency
                );
            }

            let status = pipeline.run(date).await;
            let report = crate::pipeline::RunReport::from_status(&status);
            println!("\n{}\n\n{}", report.subject, report.body);

            if let Some(path) = status_out {
                std::fs::write(&path, serde_json::to_vec_pretty(&status)?)?;
            }
            Ok(outcome(&status))
        }

        Commands::Partition { date, overrides } => {
            let pipeline = open_pipeline(base, overrides).await?;
            let date = date.unwrap_or_else(default_target_date);
            let status = pipeline.run_partition(PipelineStatus::new(date)).await;
            finish_stage(&status)
        }

        Commands::Transform {
            status,
            chunk,
            overrides,
        } => {
            let pipeline = open_pipeline(base, overrides).await?;
            let status = read_status(&status)?;
            if status.is_failed() {
                return pass_through(status);
            }
            let status = pipeline.run_transform(status, chunk).await;
            finish_stage(&status)
        }

        Commands::Aggregate { status, overrides } => {
            let pipeline = open_pipeline(base, overrides).await?;
            let status = join_statuses(&status)?;
            if status.is_failed() {
                return pass_through(status);
            }
            let status = pipeline.run_aggregate(status).await;
            finish_stage(&status)
        }

        Commands::Clean { status, overrides } => {
            let pipeline = open_pipeline(base, overrides).await?;
            let status = join_statuses(&status)?;
            let status = pipeline.run_clean(status).await;
            // Clean is the last stage, so it reports for the run
            pipeline.notify(&status).await;
            print_status(&status)?;
            Ok(outcome(&status))
        }

        Commands::Info { file, sample } => {
            println!("Analyzing summary file: {}", file.display());
            let (info, rows) = read_summary_file(&file)?;
            println!("\n{}", info.summary());

            if sample > 0 && !rows.is_empty() {
                println!("\nSample rows:");
                println!(
                    "{:<12} {:<30} {:<20} {:<8} {:>9} {:>9} {:>9} {:>6}",
                    "date", "location", "city", "country", "min", "max", "mean", "count"
                );
                for row in rows.iter().take(sample) {
                    println!(
                        "{:<12} {:<30} {:<20} {:<8} {:>9.2} {:>9.2} {:>9.2} {:>6}",
                        row.date.to_string(),
                        truncate(&row.location, 30),
                        truncate(&row.city, 20),
                        row.country,
                        row.min,
                        row.max,
                        row.mean,
                        row.count
                    );
                }
            }
            Ok(Outcome::Success)
        }
    }
}

async fn open_pipeline(base: Settings, overrides: OverrideArgs) -> Result<Pipeline> {
    let settings = base.with_overrides(overrides.into())?;
    Pipeline::from_settings(settings).await
}

/// A stage that failed still prints its status so the scheduler can route it to `clean`,
/// which reports the run
fn finish_stage(status: &PipelineStatus) -> Result<Outcome> {
    print_status(status)?;
    Ok(outcome(status))
}

fn pass_through(status: PipelineStatus) -> Result<Outcome> {
    print_status(&status)?;
    Ok(Outcome::Failed)
}

fn outcome(status: &PipelineStatus) -> Outcome {
    if status.is_failed() {
        Outcome::Failed
    } else {
        Outcome::Success
    }
}

fn print_status(status: &PipelineStatus) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(status)?);
    Ok(())
}

/// Read a status document from a file, or stdin for `-`
fn read_status(source: &str) -> Result<PipelineStatus> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(Path::new(source))?
    };

    serde_json::from_str(&text)
        .map_err(|e| ProcessingError::InvalidFormat(format!("Invalid status document: {}", e)))
}

/// Read one status per parallel branch and join them into a single run status
fn join_statuses(sources: &[String]) -> Result<PipelineStatus> {
    let mut statuses = sources.iter().map(|source| read_status(source));
    let first = statuses.next().ok_or_else(|| {
        ProcessingError::InvalidFormat("At least one status document is required".to_string())
    })??;
    statuses.try_fold(first, |joined, branch| joined.join(branch?))
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkCounts, ChunkExtract};

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Camden", 30), "Camden");
        assert_eq!(truncate("London Marylebone Road", 8), "London …");
    }

    #[test]
    fn test_join_status_files() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let base = PipelineStatus::new(chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .with_chunks(vec![
                Chunk::new(0, vec!["a.ndjson".to_string()]),
                Chunk::new(1, vec!["b.ndjson".to_string()]),
            ]);

        let mut paths = Vec::new();
        for index in 0..2 {
            let branch = base.clone().with_extract(ChunkExtract {
                chunk_index: index,
                key: format!("staging/chunk-{:04}.parquet", index),
                counts: ChunkCounts::default(),
            });
            let path = dir.path().join(format!("chunk-{}.json", index));
            std::fs::write(&path, serde_json::to_vec(&branch)?)?;
            paths.push(path.to_string_lossy().into_owned());
        }

        let joined = join_statuses(&paths)?;
        assert!(joined.missing_chunks().is_empty());
        assert_eq!(joined.extracts.len(), 2);
        Ok(())
    }

    #[test]
    fn test_read_status_file() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("status.json");
        let status = PipelineStatus::new(chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        std::fs::write(&path, serde_json::to_vec(&status)?)?;

        let parsed = read_status(&path.to_string_lossy())?;
        assert_eq!(parsed.run_id, status.run_id);

        std::fs::write(&path, "{}")?;
        assert!(matches!(
            read_status(&path.to_string_lossy()),
            Err(ProcessingError::InvalidFormat(_))
        ));
        Ok(())
    }
}
