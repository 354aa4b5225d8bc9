//! Chromium via a Node.js Playwright driver.
//!
//! The driver script is embedded in the binary and written to a private
//! temporary directory at launch. Commands and responses are single JSON
//! lines over the child's stdin and stdout; a reader thread feeds responses
//! into a channel, which each command polls in short slices so it stays
//! bounded by its timeout and by the job's [`CancelToken`].

use crate::backend::{Browser, BrowserFactory, Page};
use crate::cancel::CancelToken;
use crate::config::DriverConfig;
use crate::RenderError;
use adcraft_schema::Size;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const DRIVER_SCRIPT: &str = include_str!("driver.cjs");
const DRIVER_FILE: &str = "adcraft-driver.cjs";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
const RESPONSE_SLICE: Duration = Duration::from_millis(50);

pub struct PlaywrightFactory {
    driver: DriverConfig,
    command_timeout: Duration,
}

impl PlaywrightFactory {
    pub fn new(driver: DriverConfig, command_timeout: Duration) -> Self {
        Self {
            driver,
            command_timeout,
        }
    }
}

impl BrowserFactory for PlaywrightFactory {
    fn name(&self) -> &str {
        "playwright"
    }

    fn launch(&self) -> Result<Box<dyn Browser>, RenderError> {
        Ok(Box::new(PlaywrightBrowser::launch(
            &self.driver,
            self.command_timeout,
        )?))
    }
}

pub struct PlaywrightBrowser {
    child: Child,
    stdin: Option<ChildStdin>,
    responses: Receiver<String>,
    next_id: u64,
    command_timeout: Duration,
    version: String,
    closed: bool,
    _script_dir: TempDir,
}

impl PlaywrightBrowser {
    pub fn launch(driver: &DriverConfig, command_timeout: Duration) -> Result<Self, RenderError> {
        let script_dir = tempfile::Builder::new().prefix("adcraft-driver-").tempdir()?;
        let script = script_dir.path().join(DRIVER_FILE);
        std::fs::write(&script, DRIVER_SCRIPT)?;

        let chromium_args = serde_json::to_string(&driver.chromium_args)
            .map_err(|e| RenderError::Driver(e.to_string()))?;
        let mut cmd = Command::new(&driver.node);
        cmd.arg(&script)
            .env("ADCRAFT_CHROMIUM_ARGS", chromium_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(node_path) = &driver.node_path {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd.spawn().map_err(|e| {
            RenderError::BackendUnavailable(format!("cannot start '{}': {e}", driver.node))
        })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RenderError::Driver("driver stdout unavailable".to_owned()))?;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!(target: "adcraft::driver", "{line}");
                }
            });
        }

        let mut browser = Self {
            child,
            stdin,
            responses: rx,
            next_id: 0,
            command_timeout,
            version: String::new(),
            closed: false,
            _script_dir: script_dir,
        };
        browser.await_ready(driver.launch_timeout())?;
        info!("chromium {} ready", browser.version);
        Ok(browser)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn await_ready(&mut self, timeout: Duration) -> Result<(), RenderError> {
        let hello = match self.responses.recv_timeout(timeout) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                self.kill();
                return Err(RenderError::CommandTimeout {
                    command: "launch".to_owned(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.kill();
                return Err(RenderError::BackendUnavailable(
                    "driver exited during startup".to_owned(),
                ));
            }
        };
        let hello: Value = serde_json::from_str(&hello)
            .map_err(|e| RenderError::Driver(format!("bad startup line: {e}")))?;
        if hello.get("ready").and_then(Value::as_bool) != Some(true) {
            self.kill();
            let reason = hello
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown startup failure");
            return Err(RenderError::BackendUnavailable(reason.to_owned()));
        }
        self.version = hello
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        Ok(())
    }

    /// Send one command and wait for its response. `budget` is the command's
    /// own timeout; the configured command slack is added on top. A tripped
    /// `cancel` ends the wait with [`RenderError::Cancelled`]; the driver's
    /// late answer is skipped by the next command.
    fn request(
        &mut self,
        mut command: Value,
        budget: Duration,
        cancel: &CancelToken,
    ) -> Result<Value, RenderError> {
        if self.closed {
            return Err(RenderError::Driver("browser is closed".to_owned()));
        }
        let name = command
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_owned();
        self.next_id += 1;
        let id = self.next_id;
        command["id"] = json!(id);

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RenderError::Driver("driver stdin closed".to_owned()))?;
        let mut line = command.to_string();
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|e| RenderError::Driver(format!("write to driver failed: {e}")))?;

        let timeout = budget + self.command_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.responses.recv_timeout(remaining.min(RESPONSE_SLICE)) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) if remaining.is_zero() => {
                    return Err(RenderError::CommandTimeout {
                        command: name,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        debug!("{name} abandoned: cancelled");
                        return Err(RenderError::Cancelled);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RenderError::Driver("driver exited".to_owned()));
                }
            };
            let Ok(response) = serde_json::from_str::<Value>(&line) else {
                debug!("ignoring driver output: {line}");
                continue;
            };
            if response.get("id").and_then(Value::as_u64) != Some(id) {
                // Late answer to an earlier command that timed out.
                continue;
            }
            if response.get("ok").and_then(Value::as_bool) == Some(true) {
                return Ok(response.get("result").cloned().unwrap_or(Value::Null));
            }
            let message = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown driver error");
            return Err(RenderError::Page(format!("{name}: {message}")));
        }
    }

    fn kill(&mut self) {
        self.closed = true;
        self.stdin.take();
        if let Err(e) = self.child.kill() {
            debug!("driver kill: {e}");
        }
        let _ = self.child.wait();
    }
}

impl Browser for PlaywrightBrowser {
    fn name(&self) -> &str {
        "playwright"
    }

    fn new_page(
        &mut self,
        size: Size,
        cancel: &CancelToken,
    ) -> Result<Box<dyn Page + '_>, RenderError> {
        let result = self.request(
            json!({"cmd": "newPage", "width": size.width, "height": size.height}),
            Duration::ZERO,
            cancel,
        )?;
        let id = result
            .as_u64()
            .ok_or_else(|| RenderError::Driver(format!("bad page id: {result}")))?;
        Ok(Box::new(PlaywrightPage {
            browser: self,
            id,
            cancel: cancel.clone(),
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<(), RenderError> {
        if self.closed {
            return Ok(());
        }
        let result = self.request(
            json!({"cmd": "shutdown"}),
            SHUTDOWN_GRACE,
            &CancelToken::new(),
        );
        self.closed = true;
        self.stdin.take();
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                _ => {
                    warn!("driver did not exit in time, killing it");
                    self.kill();
                    break;
                }
            }
        }
        result.map(|_| ())
    }
}

impl Drop for PlaywrightBrowser {
    fn drop(&mut self) {
        if !self.closed {
            self.kill();
        }
    }
}

struct PlaywrightPage<'a> {
    browser: &'a mut PlaywrightBrowser,
    id: u64,
    cancel: CancelToken,
    closed: bool,
}

impl Page for PlaywrightPage<'_> {
    fn set_content(&mut self, html: &str, timeout: Duration) -> Result<(), RenderError> {
        self.browser.request(
            json!({
                "cmd": "setContent",
                "page": self.id,
                "html": html,
                "timeoutMs": timeout.as_millis() as u64,
            }),
            timeout,
            &self.cancel,
        )?;
        Ok(())
    }

    fn wait_for_fonts(&mut self, timeout: Duration) -> Result<bool, RenderError> {
        let result = self.browser.request(
            json!({"cmd": "waitFonts", "page": self.id, "timeoutMs": timeout.as_millis() as u64}),
            timeout,
            &self.cancel,
        )?;
        Ok(result.as_bool().unwrap_or(false))
    }

    fn evaluate_flag(&mut self, expression: &str) -> Result<bool, RenderError> {
        let result = self.browser.request(
            json!({"cmd": "evaluate", "page": self.id, "expr": expression}),
            Duration::ZERO,
            &self.cancel,
        )?;
        Ok(result.as_bool().unwrap_or(false))
    }

    fn screenshot(&mut self, size: Size, transparent: bool) -> Result<Vec<u8>, RenderError> {
        let result = self.browser.request(
            json!({
                "cmd": "screenshot",
                "page": self.id,
                "width": size.width,
                "height": size.height,
                "transparent": transparent,
            }),
            Duration::ZERO,
            &self.cancel,
        )?;
        let data = result
            .as_str()
            .ok_or_else(|| RenderError::Driver("screenshot returned no data".to_owned()))?;
        STANDARD
            .decode(data)
            .map_err(|e| RenderError::InvalidCapture(format!("bad base64 from driver: {e}")))
    }

    fn close(&mut self) -> Result<(), RenderError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Close even after the job was cancelled.
        self.browser.request(
            json!({"cmd": "closePage", "page": self.id}),
            Duration::ZERO,
            &CancelToken::new(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_script_speaks_every_command() {
        for cmd in [
            "newPage",
            "setContent",
            "waitFonts",
            "evaluate",
            "screenshot",
            "closePage",
            "shutdown",
        ] {
            assert!(
                DRIVER_SCRIPT.contains(&format!("case '{cmd}'")),
                "driver lacks {cmd}"
            );
        }
    }

    #[test]
    fn missing_node_is_unavailable() {
        let driver = DriverConfig {
            node: "/nonexistent/adcraft-node".to_owned(),
            ..DriverConfig::default()
        };
        let err = PlaywrightBrowser::launch(&driver, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, RenderError::BackendUnavailable(_)), "{err}");
    }

    #[test]
    fn driver_that_exits_early_is_unavailable() {
        // `true` ignores the script argument and exits without a hello line.
        let driver = DriverConfig {
            node: "true".to_owned(),
            launch_timeout_ms: 5_000,
            ..DriverConfig::default()
        };
        let err = PlaywrightBrowser::launch(&driver, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, RenderError::BackendUnavailable(_)), "{err}");
    }

    /// A driver that says hello and then never answers a command.
    #[cfg(unix)]
    fn silent_driver(dir: &std::path::Path) -> DriverConfig {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("silent-node");
        std::fs::write(
            &path,
            "#!/bin/sh\necho '{\"ready\": true, \"version\": \"silent\"}'\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DriverConfig {
            node: path.to_string_lossy().into_owned(),
            launch_timeout_ms: 5_000,
            ..DriverConfig::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_job_stops_waiting_on_driver() {
        let dir = tempfile::tempdir().unwrap();
        let driver = silent_driver(dir.path());
        let mut browser = PlaywrightBrowser::launch(&driver, Duration::from_secs(30)).unwrap();
        assert_eq!(browser.version(), "silent");

        let cancel = CancelToken::with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = browser.new_page(Size::new(10, 10), &cancel).err().unwrap();
        assert!(matches!(err, RenderError::Cancelled), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn unanswered_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let driver = silent_driver(dir.path());
        let mut browser = PlaywrightBrowser::launch(&driver, Duration::from_millis(120)).unwrap();
        let err = browser
            .new_page(Size::new(10, 10), &CancelToken::new())
            .err()
            .unwrap();
        assert!(
            matches!(err, RenderError::CommandTimeout { ref command, .. } if command == "newPage"),
            "{err}"
        );
    }
}
