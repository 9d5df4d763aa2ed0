//! External-tool invocations for each pipeline stage.
//!
//! The tool boundary stays narrow: these builders produce the argv for
//! each stage, and only exit codes come back. Output text is consumed
//! solely for progress estimation, never for control decisions.

use std::path::{Path, PathBuf};

use crate::config::ToolsConfig;
use crate::process::CommandSpec;

use super::record::{JobMode, JobRecord};

/// Name of the package-manager plugin of the cluster CLI.
const PAK_PLUGIN: &str = "ibm-pak";

/// Builds per-stage commands for one job.
pub struct StageCommands {
    tools: ToolsConfig,
}

impl StageCommands {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    /// Preflight probe: is the package-manager plugin installed and
    /// answering?
    pub fn plugin_probe(&self) -> CommandSpec {
        CommandSpec::new(&self.tools.cluster_cli).args([PAK_PLUGIN, "--version"])
    }

    /// Registry login. The entitlement key never appears in a printable
    /// command line.
    pub fn login(&self, record: &JobRecord, entitlement_key: &str) -> CommandSpec {
        CommandSpec::new(&self.tools.registry_cli)
            .arg("login")
            .arg(&record.config.source_registry)
            .args(["-u", "cp", "-p"])
            .secret_arg(entitlement_key)
            .env(
                "REGISTRY_AUTH_FILE",
                record.config.registry_auth_file.display().to_string(),
            )
    }

    /// Configure the OCI fallback repo for the package catalog. Used
    /// when the public catalog hosts are unreachable.
    pub fn configure_fallback_repo(&self, record: &JobRecord) -> CommandSpec {
        CommandSpec::new(&self.tools.cluster_cli)
            .args([PAK_PLUGIN, "config", "repo", "Cloud-Pak OCI registry", "-r"])
            .arg(format!("oci:{}/cpopen", record.config.source_registry))
            .arg("--enable")
            .env("IBMPAK_HOME", record.config.home_dir.display().to_string())
    }

    /// Fetch the versioned package bundle.
    pub fn fetch(&self, record: &JobRecord) -> CommandSpec {
        CommandSpec::new(&self.tools.cluster_cli)
            .args([PAK_PLUGIN, "get"])
            .arg(&record.component)
            .args(["--version"])
            .arg(&record.version)
            .arg("--skip-dependencies")
            .env("IBMPAK_HOME", record.config.home_dir.display().to_string())
    }

    /// Generate mirror manifests. Direct-to-registry jobs target the
    /// final registry with the OLM install method; filesystem jobs
    /// target the local staging scheme with `--final-registry`.
    pub fn generate_manifests(&self, record: &JobRecord) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.tools.cluster_cli)
            .args([PAK_PLUGIN, "generate", "mirror-manifests"])
            .arg(&record.component)
            .arg("--version")
            .arg(&record.version);

        if record.mode == JobMode::DirectToRegistry {
            spec = spec
                .arg(&record.config.final_registry)
                .args(["--install-method", "OLM"]);
        } else {
            spec = spec
                .arg("file://integration")
                .arg("--final-registry")
                .arg(&record.config.final_registry);
        }

        if let Some(filter) = &record.config.filter {
            spec = spec.arg("--filter").arg(filter);
        }

        spec.env("IBMPAK_HOME", record.config.home_dir.display().to_string())
    }

    /// The long-running image transfer.
    pub fn mirror(&self, record: &JobRecord, mapping_file: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.tools.cluster_cli)
            .args(["image", "mirror", "-f"])
            .arg(mapping_file.display().to_string())
            .args(["--filter-by-os", ".*", "-a"])
            .arg(record.config.registry_auth_file.display().to_string())
            .args(["--insecure", "--skip-multiple-scopes"])
            .arg(format!("--max-per-registry={}", record.config.max_per_registry));

        if record.mode.needs_local_storage() {
            spec = spec
                .arg("--dir")
                .arg(record.config.work_dir.display().to_string());
        }
        if record.mode.is_dry_run() {
            spec = spec.arg("--dry-run");
        }

        spec.env("IBMPAK_HOME", record.config.home_dir.display().to_string())
    }

    /// Where the package cache stores this component's mirror data.
    pub fn package_cache_dir(record: &JobRecord) -> PathBuf {
        record
            .config
            .home_dir
            .join(".ibm-pak")
            .join("data")
            .join("mirror")
            .join(&record.component)
            .join(&record.version)
    }

    /// Where the generated mapping file lands for this job's mode.
    pub fn mapping_file(record: &JobRecord) -> PathBuf {
        let file_name = if record.mode == JobMode::DirectToRegistry {
            "images-mapping.txt"
        } else {
            "images-mapping-to-filesystem.txt"
        };
        Self::package_cache_dir(record).join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::jobs::record::{ConfigSnapshot, JobSpec};

    fn record_with_mode(mode: JobMode) -> JobRecord {
        let spec = JobSpec {
            component: "platform-navigator".into(),
            version: "7.3.2".into(),
            name: "pn-7.3.2".into(),
            mode,
            filter: (mode == JobMode::Selective).then(|| ".*management.*".to_string()),
            ..Default::default()
        };
        let config = ConfigSnapshot::from_spec(&spec, &MirrorConfig::default());
        JobRecord::new(&spec, config)
    }

    fn commands() -> StageCommands {
        StageCommands::new(ToolsConfig::default())
    }

    #[test]
    fn test_login_redacts_key() {
        let record = record_with_mode(JobMode::Standard);
        let spec = commands().login(&record, "entitlement-123");
        let line = spec.display_line();
        assert!(line.starts_with("podman login cp.icr.io -u cp -p"));
        assert!(line.contains("********"));
        assert!(!line.contains("entitlement-123"));
    }

    #[test]
    fn test_fetch_argv() {
        let record = record_with_mode(JobMode::Standard);
        let spec = commands().fetch(&record);
        assert_eq!(
            spec.display_line(),
            "oc ibm-pak get platform-navigator --version 7.3.2 --skip-dependencies"
        );
        assert!(spec.env.iter().any(|(k, _)| k == "IBMPAK_HOME"));
    }

    #[test]
    fn test_manifests_filesystem_vs_direct() {
        let fs = commands().generate_manifests(&record_with_mode(JobMode::Standard));
        assert!(fs.display_line().contains("file://integration"));
        assert!(fs.display_line().contains("--final-registry"));

        let direct = commands().generate_manifests(&record_with_mode(JobMode::DirectToRegistry));
        assert!(direct.display_line().contains("--install-method OLM"));
        assert!(!direct.display_line().contains("file://integration"));
    }

    #[test]
    fn test_manifests_filter_flag() {
        let selective = commands().generate_manifests(&record_with_mode(JobMode::Selective));
        assert!(selective.display_line().contains("--filter .*management.*"));
    }

    #[test]
    fn test_mirror_flags_by_mode() {
        let record = record_with_mode(JobMode::Standard);
        let mapping = StageCommands::mapping_file(&record);
        let line = commands().mirror(&record, &mapping).display_line();
        assert!(line.contains("--dir"));
        assert!(!line.contains("--dry-run"));
        assert!(line.contains("--max-per-registry=2"));

        let dry = record_with_mode(JobMode::DryRun);
        let line = commands().mirror(&dry, &mapping).display_line();
        assert!(line.contains("--dry-run"));

        let direct = record_with_mode(JobMode::DirectToRegistry);
        let line = commands().mirror(&direct, &mapping).display_line();
        assert!(!line.contains("--dir"));
    }

    #[test]
    fn test_mapping_file_by_mode() {
        let record = record_with_mode(JobMode::Standard);
        assert!(StageCommands::mapping_file(&record)
            .ends_with("platform-navigator/7.3.2/images-mapping-to-filesystem.txt"));

        let direct = record_with_mode(JobMode::DirectToRegistry);
        assert!(StageCommands::mapping_file(&direct)
            .ends_with("platform-navigator/7.3.2/images-mapping.txt"));
    }
}
