//! Human-readable run output.

use std::fmt::Write as _;

use sdprompt_pipeline::orchestrator::{DryRunReport, ItemOutcome, ItemReport};
use sdprompt_pipeline::store::VerifyReport;
use sdprompt_pipeline::{RunReport, RunStatus};

pub fn run_report(report: &RunReport) -> String {
    let mut out = String::new();
    let succeeded = report.items.iter().filter(|i| i.is_success()).count();
    let _ = writeln!(
        out,
        "Run {} ({}): {}/{} image(s) stored in {}",
        report.run_id,
        status_label(report.status),
        succeeded,
        report.items.len(),
        report.output_dir.display()
    );
    for item in &report.items {
        let _ = writeln!(out, "  {}", item_line(item));
    }
    out
}

fn item_line(item: &ItemReport) -> String {
    let prefix = format!("#{} [{} attempt(s)]", item.index, item.attempts);
    match &item.outcome {
        ItemOutcome::Stored {
            image_path,
            checksum_sha256,
            ..
        } => format!(
            "{prefix} ok {} sha256:{}",
            image_path.display(),
            short(checksum_sha256)
        ),
        ItemOutcome::RenderFailed {
            kind,
            message,
            hint,
            record_path,
        } => {
            let record = record_path
                .as_ref()
                .map(|p| format!(" (record {})", p.display()))
                .unwrap_or_default();
            format!("{prefix} failed {kind}: {message}; hint: {hint}{record}")
        }
        ItemOutcome::PersistFailed { message, hint } => {
            format!("{prefix} not stored: {message}; hint: {hint}")
        }
        ItemOutcome::Skipped => format!("#{} skipped after an earlier failure", item.index),
    }
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::TotalSuccess => "success",
        RunStatus::PartialSuccess => "partial success",
        RunStatus::TotalFailure => "failure",
    }
}

fn short(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

pub fn dry_run_report(report: &DryRunReport) -> String {
    match report {
        DryRunReport::Fresh {
            rendered_prompt,
            count,
        } => format!(
            "Dry run: configuration valid, {count} image(s) would be rendered.\n\
             Rendered template:\n{rendered_prompt}\n"
        ),
        DryRunReport::Replay { spec, count } => format!(
            "Dry run: record valid, {count} image(s) would be rendered.\n\
             Prompt: {}\nParameters: {}x{}, {} steps, cfg {}, seed {}\n",
            spec.prompt,
            spec.params.width,
            spec.params.height,
            spec.params.steps,
            spec.params.cfg_scale,
            spec.params
                .seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "random".to_string()),
        ),
    }
}

pub fn verified(report: &VerifyReport) -> String {
    format!(
        "ok {} ({} bytes, sha256:{})",
        report.image_path.display(),
        report.size_bytes,
        short(&report.checksum_sha256)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sdprompt_core::remote::RemoteErrorKind;

    use super::*;

    fn report(items: Vec<ItemReport>, status: RunStatus) -> RunReport {
        RunReport {
            run_id: "run-1".into(),
            output_dir: PathBuf::from("out"),
            items,
            status,
        }
    }

    #[test]
    fn summary_lists_every_item() {
        let items = vec![
            ItemReport {
                index: 1,
                attempts: 2,
                outcome: ItemOutcome::Stored {
                    image_path: PathBuf::from("out/image_001.png"),
                    record_path: PathBuf::from("out/image_001.yaml"),
                    checksum_sha256: "abcdef0123456789".into(),
                },
            },
            ItemReport {
                index: 2,
                attempts: 1,
                outcome: ItemOutcome::RenderFailed {
                    kind: RemoteErrorKind::Authentication,
                    message: "401".into(),
                    hint: "check API key",
                    record_path: None,
                },
            },
            ItemReport {
                index: 3,
                attempts: 0,
                outcome: ItemOutcome::Skipped,
            },
        ];
        let text = run_report(&report(items, RunStatus::PartialSuccess));

        assert!(text.starts_with("Run run-1 (partial success): 1/3"));
        assert!(text.contains("#1 [2 attempt(s)] ok out/image_001.png sha256:abcdef012345"));
        assert!(text.contains("hint: check API key"));
        assert!(text.contains("#3 skipped"));
    }

    #[test]
    fn short_checksum_handles_short_input() {
        assert_eq!(short("abc"), "abc");
    }
}
