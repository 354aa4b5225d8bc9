use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timing and capture options for a single render job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Global the ad runtime sets once its first frame is composed.
    pub ready_flag: String,
    pub ready_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Extra wait when the ready flag never appeared.
    pub fallback_delay_ms: u64,
    /// Final wait for in-flight transitions before capture.
    pub settle_delay_ms: u64,
    pub font_timeout_ms: u64,
    pub load_timeout_ms: u64,
    /// Slack added on top of each driver command's own timeout.
    pub command_timeout_ms: u64,
    pub transparent: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ready_flag: "creativeReady".to_owned(),
            ready_timeout_ms: 5_000,
            poll_interval_ms: 100,
            fallback_delay_ms: 1_500,
            settle_delay_ms: 250,
            font_timeout_ms: 3_000,
            load_timeout_ms: 15_000,
            command_timeout_ms: 10_000,
            transparent: false,
        }
    }
}

impl RenderConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn font_timeout(&self) -> Duration {
        Duration::from_millis(self.font_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(100))
    }

    /// Script expression testing the ready flag.
    pub fn ready_expression(&self) -> String {
        let name = serde_json::to_string(&self.ready_flag).unwrap_or_else(|_| "\"\"".to_owned());
        format!("Boolean(window[{name}])")
    }

    /// Zero-delay settings for tests and benchmarks.
    pub fn instant() -> Self {
        Self {
            ready_timeout_ms: 50,
            poll_interval_ms: 10,
            fallback_delay_ms: 0,
            settle_delay_ms: 0,
            font_timeout_ms: 50,
            load_timeout_ms: 1_000,
            ..Self::default()
        }
    }
}

/// How the Playwright driver process is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Node.js executable.
    pub node: String,
    /// Extra module search path holding the `playwright` package.
    pub node_path: Option<PathBuf>,
    /// Additional Chromium command line switches.
    pub chromium_args: Vec<String>,
    pub launch_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node: "node".to_owned(),
            node_path: None,
            chromium_args: vec!["--font-render-hinting=none".to_owned()],
            launch_timeout_ms: 30_000,
        }
    }
}

impl DriverConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }
}
