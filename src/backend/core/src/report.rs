//! Terminal-state summary reports.
//!
//! A report is a pure function of a terminal job record, written to a
//! well-known path inside the job's working directory.

use std::path::PathBuf;

use crate::error::Result;
use crate::jobs::{JobRecord, StageCommands};

/// Renders and writes the fixed-format summary artifact.
pub struct ReportGenerator;

impl ReportGenerator {
    /// Render the report text.
    pub fn render(record: &JobRecord, failed_images: &[String]) -> String {
        let start = record.started_at.unwrap_or(record.created_at);
        let end = record.ended_at.unwrap_or(start);
        let duration = end - start;
        let total_secs = duration.num_seconds().max(0);
        let (hours, minutes, seconds) =
            (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);

        let mut report = format!(
            "========================================\n\
             Mirror Job Summary Report\n\
             ========================================\n\
             Status: {status}\n\
             Component: {component}\n\
             Version: {version}\n\
             Mode: {mode}\n\
             Start Time: {start}\n\
             End Time: {end}\n\
             Duration: {hours}h {minutes}m {seconds}s\n\
             Total Images: {total}\n\
             Completed Images: {completed}\n\
             Failed: {failed}\n\
             Retries: {retries}\n\
             ========================================\n\
             \n\
             Working Directory: {work_dir}\n\
             Mapping File: {mapping}\n\
             \n",
            status = record.status,
            component = record.component,
            version = record.version,
            mode = record.mode,
            start = start.format("%Y-%m-%d %H:%M:%S"),
            end = end.format("%Y-%m-%d %H:%M:%S"),
            total = record.total_images,
            completed = record.completed_images,
            failed = failed_images.len(),
            retries = record.retry_count,
            work_dir = record.config.work_dir.display(),
            mapping = StageCommands::mapping_file(record).display(),
        );

        if let Some(detail) = &record.failure_detail {
            report.push_str(&format!("Failure Detail: {}\n\n", detail));
        }

        if !failed_images.is_empty() {
            report.push_str("Failed Images:\n");
            for image in failed_images {
                report.push_str(&format!("  {}\n", image));
            }
            report.push('\n');
        }

        report.push_str("========================================\n");
        report
    }

    /// Write the report next to the job's logs; returns the path.
    pub fn write(record: &JobRecord, failed_images: &[String]) -> Result<PathBuf> {
        let path = record.report_path();
        std::fs::create_dir_all(record.config.work_dir.as_path())?;
        std::fs::write(&path, Self::render(record, failed_images))?;
        Ok(path)
    }
}

/// Pull failed-image identifiers out of the mirror stream. Best-effort:
/// looks for error lines that reference an image digest or repository
/// path; used only for the report, never for control flow.
pub fn collect_failed_images(mirror_lines: &[String]) -> Vec<String> {
    let mut failed = Vec::new();
    for line in mirror_lines {
        let lower = line.to_ascii_lowercase();
        if !lower.contains("error") {
            continue;
        }
        if let Some(image) = line
            .split_whitespace()
            .find(|tok| tok.contains("sha256:") || (tok.contains('/') && tok.contains(':')))
        {
            let image = image.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ';'));
            if !failed.iter().any(|f| f == image) {
                failed.push(image.to_string());
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::jobs::{ConfigSnapshot, JobSpec};
    use chrono::{Duration, Utc};

    fn terminal_record() -> JobRecord {
        let spec = JobSpec {
            component: "platform-navigator".into(),
            version: "7.3.2".into(),
            name: "pn-7.3.2".into(),
            ..Default::default()
        };
        let config = ConfigSnapshot::from_spec(&spec, &MirrorConfig::default());
        let mut record = JobRecord::new(&spec, config);
        record.started_at = Some(Utc::now() - Duration::seconds(3725));
        record.total_images = 42;
        record.completed_images = 42;
        record.mark_completed();
        record
    }

    #[test]
    fn test_render_completed_report() {
        let record = terminal_record();
        let report = ReportGenerator::render(&record, &[]);
        assert!(report.contains("Status: completed"));
        assert!(report.contains("Component: platform-navigator"));
        assert!(report.contains("Total Images: 42"));
        // 3725 seconds is 1h 2m 5s.
        assert!(report.contains("Duration: 1h 2m 5s"));
        assert!(!report.contains("Failed Images:"));
    }

    #[test]
    fn test_render_failed_report_enumerates_images() {
        let mut record = terminal_record();
        record.status = crate::jobs::JobStatus::Failed;
        record.failure_detail = Some("mirror exited with code 1".into());
        let failed = vec!["cp.icr.io/cp/app@sha256:abc".to_string()];
        let report = ReportGenerator::render(&record, &failed);
        assert!(report.contains("Status: failed"));
        assert!(report.contains("Failure Detail: mirror exited with code 1"));
        assert!(report.contains("  cp.icr.io/cp/app@sha256:abc"));
    }

    #[test]
    fn test_collect_failed_images() {
        let lines = vec![
            "Copying blob sha256:aaa".to_string(),
            "error: unable to push cp.icr.io/cp/app@sha256:abc timeout".to_string(),
            "error: unable to push cp.icr.io/cp/app@sha256:abc timeout".to_string(),
            "info: Mirroring completed".to_string(),
        ];
        let failed = collect_failed_images(&lines);
        assert_eq!(failed, vec!["cp.icr.io/cp/app@sha256:abc"]);
    }

    #[test]
    fn test_write_report_to_work_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut record = terminal_record();
        record.config.work_dir = dir.path().join("pn-7.3.2");
        let path = ReportGenerator::write(&record, &[]).unwrap();
        assert!(path.ends_with("pn-7.3.2-summary-report.txt"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("Status: completed"));
    }
}
