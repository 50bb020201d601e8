#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use pkgmirror_core::mirror::PlatformTarget;
use pkgmirror_core::pypi::PythonVersion;
use pkgmirror_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pkgmirror")]
#[command(author, version, about = "Build offline mirrors of npm and PyPI dependency closures", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve a manifest's dependency closure and download every artifact
    Mirror {
        /// Package ecosystem to mirror
        #[arg(long, value_enum, default_value_t = commands::mirror::Ecosystem::Auto)]
        ecosystem: commands::mirror::Ecosystem,

        /// package.json to read (defaults to the project's package.json)
        #[arg(long, value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// package-lock.json whose pinned versions and peers join the seeds
        /// (defaults to the one next to the manifest)
        #[arg(long, value_name = "PATH")]
        lockfile: Option<PathBuf>,

        /// pip requirements file (repeatable; defaults to requirements*.txt in the project)
        #[arg(long = "requirements", value_name = "PATH")]
        requirements: Vec<PathBuf>,

        /// Extra top-level requirement (e.g. "react@^18", "@types/node", "requests>=2.31")
        #[arg(long = "add", value_name = "SPEC")]
        add: Vec<String>,

        /// Output directory for artifacts and the report
        #[arg(long, value_name = "DIR")]
        out: PathBuf,

        /// Maximum concurrent network operations
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Retries for transient failures
        #[arg(long, value_name = "N")]
        retries: Option<u32>,

        /// Per-operation timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Extra expansion rounds driven by archive introspection
        #[arg(long, value_name = "N")]
        max_rounds: Option<u32>,

        /// Which optional dependencies to mirror
        #[arg(long, value_enum, default_value_t = commands::mirror::OptionalMode::Include)]
        optional: commands::mirror::OptionalMode,

        /// Target platform for `--optional platforms` (repeatable, e.g. linux-x64)
        #[arg(long = "platform", value_name = "TARGET")]
        platforms: Vec<PlatformTarget>,

        /// Also follow the manifest's devDependencies
        #[arg(long)]
        include_dev: bool,

        /// Python version wheels must support (e.g. 3.11)
        #[arg(long, value_name = "VERSION")]
        python: Option<PythonVersion>,

        /// Wheel platform tag to mirror (repeatable, e.g. manylinux2014_x86_64)
        #[arg(long = "wheel-platform", value_name = "TAG")]
        wheel_platforms: Vec<String>,

        /// Registry URL (overrides PKGMIRROR_NPM_REGISTRY, or PKGMIRROR_PYPI_INDEX for PyPI)
        #[arg(long, value_name = "URL")]
        registry: Option<String>,

        /// Resolve the closure only; download nothing
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    // Build config
    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    match cli.command {
        None | Some(Commands::Version) => commands::version::run(),
        Some(Commands::Mirror {
            ecosystem,
            manifest,
            lockfile,
            requirements,
            add,
            out,
            concurrency,
            retries,
            timeout,
            max_rounds,
            optional,
            platforms,
            include_dev,
            python,
            wheel_platforms,
            registry,
            dry_run,
        }) => {
            logging::init(config.verbosity, config.json_logs);

            let options = commands::mirror::MirrorOptions {
                ecosystem,
                manifest,
                lockfile,
                requirements,
                add,
                out,
                concurrency,
                retries,
                timeout,
                max_rounds,
                optional,
                platforms,
                include_dev,
                python,
                wheel_platforms,
                registry,
                dry_run,
            };
            commands::mirror::run(&config, options)
        }
    }
}
