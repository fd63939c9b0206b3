//! Utility functions

use serde::{Deserialize, Serialize};

use crate::exec::{CommandRunner, CommandSpec};
use crate::storage::settings::Settings;

/// Version information for the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Availability of one external tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolCheck {
    pub command: String,
    pub available: bool,

    /// First line of the tool's version output, or the failure
    pub detail: String,
}

/// Probe every external tool the agent drives
pub async fn run_diagnostic(settings: &Settings, runner: &dyn CommandRunner) -> Vec<ToolCheck> {
    let mut probes = vec![
        CommandSpec::new(&settings.tools.git).arg("--version"),
        CommandSpec::new(&settings.nginx.binary).arg("-v"),
        CommandSpec::new(&settings.tools.systemctl).arg("--version"),
        CommandSpec::new(&settings.tools.composer).arg("--version"),
        CommandSpec::new(&settings.tools.npm).arg("--version"),
    ];
    for version in &settings.php.versions {
        probes.push(CommandSpec::new(format!("{}{}", settings.tools.php, version)).arg("-v"));
    }

    let mut checks = Vec::with_capacity(probes.len());
    for probe in probes {
        let (available, detail) = match runner.run(&probe).await {
            // nginx -v prints to stderr
            Ok(output) if output.success() => {
                let text = if output.stdout.trim().is_empty() {
                    &output.stderr
                } else {
                    &output.stdout
                };
                (true, text.lines().next().unwrap_or_default().trim().to_string())
            }
            Ok(output) => (false, output.diagnostic()),
            Err(e) => (false, e.to_string()),
        };
        checks.push(ToolCheck {
            command: probe.to_string(),
            available,
            detail,
        });
    }
    checks
}
