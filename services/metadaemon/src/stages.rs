//! Convert and merge stages backed by the external SeisComP tools.
//!
//! Stages never write to the record store. Each one runs its collaborator
//! and reports a [`StageOutcome`] (or an error the driver maps to one);
//! the driver is the only writer of record status.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use metadata_common::{MetadataError, MetadataResult};

use crate::config::SeiscompConfig;
use crate::store::{MetadataRecord, RecordStatus};

/// Suffix of the staged raw inventory artifact.
pub const RAW_SUFFIX: &str = ".stationXML";
/// Suffix of the converted internal-format artifact.
pub const CONVERTED_SUFFIX: &str = ".sc3ml";

/// Result of running one stage against one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Retry this stage on a later cycle; no status write occurs.
    Unchanged,
    /// Persist the given status and move on.
    Transition(RecordStatus),
}

/// External format-conversion and merge tools, invoked as subprocesses.
///
/// The algorithms themselves are opaque; only the exit code matters.
#[async_trait]
pub trait ConversionTool: Send + Sync {
    /// Convert the record's staged raw inventory into the internal format.
    async fn convert(&self, record: &MetadataRecord) -> MetadataResult<()>;

    /// Merge the record's converted artifact into its network prototype.
    async fn merge(&self, record: &MetadataRecord) -> MetadataResult<()>;
}

/// Production tool invoking the SeisComP dispatcher.
pub struct SeiscompTool {
    executable: PathBuf,
    prototype_dir: PathBuf,
    timeout: Duration,
}

impl SeiscompTool {
    pub fn new(config: &SeiscompConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            prototype_dir: config.prototype_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Network-level baseline inventory that station files are merged into.
    fn prototype_path(&self, network: &str) -> PathBuf {
        self.prototype_dir.join(format!("{}.sc3ml", network))
    }

    /// Run the tool once and map the exit code.
    ///
    /// Any non-zero exit is failure. A hang is bounded by the configured
    /// timeout; the child is killed when the timeout future is dropped.
    pub(crate) async fn run(&self, args: &[String]) -> MetadataResult<()> {
        debug!(tool = %self.executable.display(), args = ?args, "Spawning subprocess");

        let child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MetadataError::ToolSpawnError {
                tool: self.executable.display().to_string(),
                message: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                warn!(tool = %self.executable.display(), timeout_secs = self.timeout.as_secs(), "Subprocess timed out");
                return Err(MetadataError::StageTimeout(self.timeout.as_secs()));
            }
            Ok(result) => result.map_err(|e| MetadataError::ToolSpawnError {
                tool: self.executable.display().to_string(),
                message: e.to_string(),
            })?,
        };

        if output.status.success() {
            return Ok(());
        }

        // stderr is logging-only detail; the exit code is the contract
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(MetadataError::ToolFailed {
            code: output.status.code(),
            message: stderr,
        })
    }
}

#[async_trait]
impl ConversionTool for SeiscompTool {
    async fn convert(&self, record: &MetadataRecord) -> MetadataResult<()> {
        let args = vec![
            "exec".to_string(),
            "fdsnxml2inv".to_string(),
            format!("{}{}", record.filepath, RAW_SUFFIX),
            "-f".to_string(),
            format!("{}{}", record.filepath, CONVERTED_SUFFIX),
        ];

        self.run(&args).await
    }

    async fn merge(&self, record: &MetadataRecord) -> MetadataResult<()> {
        // Merge failure does not roll back partial prototype mutation;
        // atomicity is owned by the external tool.
        let args = vec![
            "exec".to_string(),
            "scinv".to_string(),
            "merge".to_string(),
            self.prototype_path(&record.key.network)
                .display()
                .to_string(),
            format!("{}{}", record.filepath, CONVERTED_SUFFIX),
        ];

        self.run(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metadata_common::StationKey;

    fn tool_with_executable(executable: &str, timeout_secs: u64) -> SeiscompTool {
        SeiscompTool::new(&SeiscompConfig {
            executable: PathBuf::from(executable),
            prototype_dir: PathBuf::from("/tmp/prototypes"),
            timeout_secs,
            max_tool_retries: 3,
        })
    }

    fn record() -> MetadataRecord {
        MetadataRecord {
            id: 1,
            key: StationKey::new("NL", "HGN"),
            status: RecordStatus::Pending,
            filepath: "/data/metadata/NL.HGN".to_string(),
            fingerprint: "abc".to_string(),
            retry_count: 0,
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    #[test]
    fn test_prototype_path() {
        let tool = tool_with_executable("true", 10);
        assert_eq!(
            tool.prototype_path("NL"),
            PathBuf::from("/tmp/prototypes/NL.sc3ml")
        );
    }

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        // `true` ignores its arguments and exits 0
        let tool = tool_with_executable("true", 10);
        assert!(tool.convert(&record()).await.is_ok());
        assert!(tool.merge(&record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tool_failure() {
        let tool = tool_with_executable("false", 10);
        match tool.convert(&record()).await {
            Err(MetadataError::ToolFailed { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("expected ToolFailed, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let tool = tool_with_executable("/nonexistent/seiscomp", 10);
        assert!(matches!(
            tool.convert(&record()).await,
            Err(MetadataError::ToolSpawnError { .. })
        ));
    }

    #[tokio::test]
    async fn test_hung_subprocess_times_out() {
        let tool = tool_with_executable("sleep", 1);
        // `sleep 5` outlives the 1s budget
        let result = tool.run(&["5".to_string()]).await;
        assert!(matches!(result, Err(MetadataError::StageTimeout(1))));
    }
}
