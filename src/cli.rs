use bincover::collector::DEFAULT_TEST_NAME;
use bincover::{Environment, Invocation};
use clap::{Parser, Subcommand};
use eyre::WrapErr;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

type Result<T> = color_eyre::eyre::Result<T>;

/// Run instrumented binaries and merge their coverage profiles
#[derive(Parser)]
#[command(name = "bincover")]
#[command(about = "Run instrumented binaries and merge their coverage profiles")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an instrumented binary once and print what its entrypoint printed
    Run {
        /// Path of the instrumented binary
        #[arg(long)]
        bin: PathBuf,

        /// Test selector naming the entrypoint wrapper
        #[arg(long, default_value = DEFAULT_TEST_NAME)]
        test_name: String,

        /// Where the merged coverage profile is written
        #[arg(long, default_value = "coverage.out")]
        merged_profile: PathBuf,

        /// Do not request a coverage profile
        #[arg(long)]
        no_coverage: bool,

        /// Extra environment variable for the binary (KEY=VALUE, repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// File whose contents are fed to the binary's stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,

        /// Kill the binary after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Arguments for the binary's entrypoint
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Merge existing coverage profiles that share one mode
    Merge {
        /// Where the merged profile is written
        #[arg(long, short)]
        output: PathBuf,

        /// Profiles to merge, in order
        #[arg(required = true)]
        profiles: Vec<PathBuf>,
    },
}

/// Validated configuration for one CLI invocation
#[derive(Debug, Clone)]
pub enum Config {
    Run(RunConfig),
    Merge(MergeConfig),
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub merged_profile: PathBuf,
    pub collect_coverage: bool,
    pub invocation: Invocation,
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub output: PathBuf,
    pub profiles: Vec<PathBuf>,
}

impl Config {
    /// Parse command line arguments into configuration
    pub fn from_cli(cli: Cli) -> Result<Self> {
        match cli.command {
            Commands::Run {
                bin,
                test_name,
                merged_profile,
                no_coverage,
                env,
                stdin_file,
                timeout_secs,
                args,
            } => {
                let mut environment = Environment::new();
                for assignment in &env {
                    let (key, value) = Environment::parse_assignment(assignment)?;
                    environment.set(key, value);
                }

                let mut invocation = Invocation::new(bin)
                    .test_name(test_name)
                    .environment(environment)
                    .args(args);

                if let Some(path) = stdin_file {
                    let input = fs::read_to_string(&path)
                        .wrap_err_with(|| format!("Failed to read stdin file '{}'", path.display()))?;
                    invocation = invocation.stdin(input);
                }
                if let Some(secs) = timeout_secs {
                    invocation = invocation.deadline(Duration::from_secs(secs));
                }

                Ok(Config::Run(RunConfig {
                    merged_profile,
                    collect_coverage: !no_coverage,
                    invocation,
                }))
            }
            Commands::Merge { output, profiles } => {
                Ok(Config::Merge(MergeConfig { output, profiles }))
            }
        }
    }
}
