use super::{EXIT_FAILURE, EXIT_SUCCESS};
use adcraft_core::Config;
use adcraft_template::TemplateStore;

pub fn run(config: &Config, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_backend(config, &mut checks, &mut all_pass);
    check_public_url(config, &mut checks, &mut all_pass);
    check_templates(config, &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json_output)
}

fn check_backend(config: &Config, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match config.backend.as_str() {
        "playwright" => {
            let missing = adcraft_render::check_render_prereqs(&config.driver);
            if missing.is_empty() {
                checks.push(Check::pass(
                    "render_prereqs",
                    "Node.js and Playwright are available",
                ));
            } else {
                *all_pass = false;
                checks.push(Check::fail(
                    "render_prereqs",
                    &adcraft_render::format_missing(&missing),
                ));
            }
        }
        "mock" => checks.push(Check::info(
            "render_prereqs",
            "Mock backend selected (renders placeholder images)",
        )),
        other => {
            *all_pass = false;
            checks.push(Check::fail(
                "render_prereqs",
                &format!("Unknown backend '{other}' (expected playwright or mock)"),
            ));
        }
    }
}

fn check_public_url(config: &Config, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let Some(public) = &config.public_base_url else {
        checks.push(Check::info(
            "public_base_url",
            "No public base URL; documents resolve against template folders",
        ));
        return;
    };
    match url::Url::parse(public) {
        Ok(_) => checks.push(Check::pass(
            "public_base_url",
            &format!("Public base URL: {public}"),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "public_base_url",
                &format!("Invalid public base URL '{public}': {e}"),
            ));
        }
    }
}

fn check_templates(config: &Config, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let root = &config.templates_root;
    if !root.is_dir() {
        *all_pass = false;
        checks.push(Check::fail(
            "templates_root",
            &format!("Templates root {} does not exist", root.display()),
        ));
        return;
    }
    let store = TemplateStore::new(root);
    let templates = match store.list_templates() {
        Ok(t) => t,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "templates_root",
                &format!("Cannot list templates: {e}"),
            ));
            return;
        }
    };
    checks.push(Check::pass(
        "templates_root",
        &format!("{} template(s) in {}", templates.len(), root.display()),
    ));

    // Every size folder must load: index references, data init, manifest grammar.
    let mut broken = 0usize;
    let mut sizes = 0usize;
    for id in &templates {
        let folders = match store.size_folders(id) {
            Ok(f) => f,
            Err(e) => {
                broken += 1;
                checks.push(Check::warn("template", &format!("{id}: {e}")));
                continue;
            }
        };
        for size in folders {
            sizes += 1;
            if let Err(e) = store.open(id, size) {
                broken += 1;
                checks.push(Check::warn("template", &e.to_string()));
            }
        }
    }
    if broken == 0 {
        checks.push(Check::pass(
            "templates_valid",
            &format!("{sizes} size folder(s) load cleanly"),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "templates_valid",
            &format!("{broken} template problem(s) found"),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status.as_str(),
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Adcraft Doctor\n");
        for check in checks {
            println!("  {} {}", check.status.icon(), check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pass,
    Fail,
    Warn,
    Info,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Fail => "fail",
            Status::Warn => "warn",
            Status::Info => "info",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Status::Pass => "✓",
            Status::Fail => "✗",
            Status::Warn => "⚠",
            Status::Info => "ℹ",
        }
    }
}

struct Check {
    name: &'static str,
    status: Status,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: Status, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, Status::Pass, message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, Status::Fail, message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, Status::Warn, message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, Status::Info, message)
    }
}
