use crate::config::DriverConfig;
use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn node_command(driver: &DriverConfig) -> Command {
    let mut cmd = Command::new(&driver.node);
    if let Some(node_path) = &driver.node_path {
        cmd.env("NODE_PATH", node_path);
    }
    cmd
}

fn node_works(driver: &DriverConfig) -> bool {
    node_command(driver)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn playwright_resolves(driver: &DriverConfig) -> bool {
    node_command(driver)
        .args([
            "-e",
            "try { require.resolve('playwright') } catch (_) { require.resolve('playwright-core') }",
        ])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check everything the Playwright backend needs.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_render_prereqs(driver: &DriverConfig) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !node_works(driver) {
        missing.push(MissingPrereq {
            name: "node",
            purpose: "runs the headless browser driver",
            install_hint: "install Node.js 18+ (https://nodejs.org) or set driver.node in the config",
        });
        return missing;
    }

    if !playwright_resolves(driver) {
        missing.push(MissingPrereq {
            name: "playwright",
            purpose: "controls headless Chromium",
            install_hint: "npm install -g playwright && npx playwright install chromium, or set driver.node_path",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nAdcraft needs these tools to render creatives to PNG.");
    msg
}
