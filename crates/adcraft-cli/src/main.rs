mod commands;

use adcraft_core::{install_interrupt_handler, CancelToken};
use adcraft_schema::Size;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    load_config, ConfigOverrides, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_MANIFEST_ERROR,
    EXIT_TEMPLATE_ERROR,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "adcraft",
    version,
    about = "Ad manifest transformation and deterministic rendering"
)]
struct Cli {
    /// Config file (default: ~/.config/adcraft/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Templates root, overriding the config file.
    #[arg(long, global = true)]
    templates: Option<PathBuf>,

    /// Browser backend: playwright or mock.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the layers and sizes of a manifest file or size folder.
    Inspect {
        /// Path to a manifest.js, or a size folder containing one.
        manifest: PathBuf,
    },
    /// List the sizes a template declares.
    Sizes { template: String },
    /// Apply dynamic values to a manifest and print the result.
    Apply {
        /// Path to a manifest.js, or a size folder containing one.
        manifest: PathBuf,
        /// Dynamic value JSON file ("-" for stdin).
        #[arg(long)]
        data: PathBuf,
        /// Write the manifest here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build the self-contained preview document for one size.
    Preview {
        template: String,
        #[arg(long)]
        size: Size,
        /// Dynamic value JSON file ("-" for stdin).
        #[arg(long)]
        data: Option<PathBuf>,
        /// Write the HTML here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render one size to a PNG.
    Render {
        template: String,
        #[arg(long)]
        size: Size,
        /// Dynamic value JSON file ("-" for stdin).
        #[arg(long)]
        data: Option<PathBuf>,
        /// Output PNG (default: <template>-<WxH>.png).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Export the modified template for every requested size as a .tar.gz.
    Export {
        template: String,
        /// Sizes to export (repeatable or comma separated; default: all).
        #[arg(long = "size", value_delimiter = ',')]
        sizes: Vec<Size>,
        /// Dynamic value JSON file ("-" for stdin).
        #[arg(long)]
        data: Option<PathBuf>,
        /// Also render a preview.png into each size folder.
        #[arg(long, default_value_t = false)]
        previews: bool,
        /// Output archive (default: <template>-static.tar.gz).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render one PNG per product and size into a .tar.gz.
    Dpa {
        template: String,
        /// Product JSON: an array of products or {"sizes": [...], "products": [...]}.
        #[arg(long)]
        products: PathBuf,
        /// Sizes to render (repeatable or comma separated; overrides the file).
        #[arg(long = "size", value_delimiter = ',')]
        sizes: Vec<Size>,
        /// Output archive (default: <template>-dpa.tar.gz).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check the render prerequisites and the configuration.
    Doctor,
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    /// Whether the command drives a real browser.
    fn renders(&self) -> bool {
        matches!(
            self,
            Commands::Render { .. }
                | Commands::Dpa { .. }
                | Commands::Export { previews: true, .. }
        )
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ADCRAFT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    let overrides = ConfigOverrides {
        path: cli.config,
        templates: cli.templates,
        backend: cli.backend,
    };
    let json_output = cli.json;

    let result = load_config(&overrides).and_then(|config| {
        if cli.command.renders()
            && config.backend == "playwright"
            && std::env::var("ADCRAFT_SKIP_PREREQS").as_deref() != Ok("1")
        {
            let missing = adcraft_render::check_render_prereqs(&config.driver);
            if !missing.is_empty() {
                return Err(adcraft_render::format_missing(&missing));
            }
        }

        match cli.command {
            Commands::Inspect { manifest } => commands::inspect::run(&manifest, json_output),
            Commands::Sizes { template } => commands::sizes::run(&config, &template, json_output),
            Commands::Apply {
                manifest,
                data,
                output,
            } => commands::apply::run(&manifest, &data, output.as_deref(), json_output),
            Commands::Preview {
                template,
                size,
                data,
                output,
            } => commands::preview::run(
                &config,
                &template,
                size,
                data.as_deref(),
                output.as_deref(),
            ),
            Commands::Render {
                template,
                size,
                data,
                output,
            } => commands::render::run(
                &config,
                &template,
                size,
                data.as_deref(),
                output.as_deref(),
                &cancel,
                json_output,
            ),
            Commands::Export {
                template,
                sizes,
                data,
                previews,
                output,
            } => commands::export::run(
                &config,
                &template,
                sizes,
                data.as_deref(),
                previews,
                output.as_deref(),
                &cancel,
                json_output,
            ),
            Commands::Dpa {
                template,
                products,
                sizes,
                output,
            } => commands::dpa::run(
                &config,
                &template,
                &products,
                sizes,
                output.as_deref(),
                &cancel,
                json_output,
            ),
            Commands::Doctor => commands::doctor::run(&config, json_output),
            Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if adcraft_core::signal::interrupted() {
                EXIT_INTERRUPTED
            } else if msg.starts_with("manifest error:") {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("template error:") {
                EXIT_TEMPLATE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
