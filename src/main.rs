//! Exposure Notification Distribution CLI
//!
//! Entry point for the `exposure-dist` command-line tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use exposure_dist::config::parse_override;
use exposure_dist::crypto::{encode_private_key, generate_private_key};
use exposure_dist::{
    verify_output, Assembly, Clock, CryptoProvider, FixedClock, LoadedConfig, SignatureAlgorithm,
    SystemClock,
};
use exposure_keys::JsonFileKeySource;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exposure-dist")]
#[command(about = "Assemble exposure notification distribution files", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the distribution tree from a key export
    Assemble {
        /// Path to the configuration file
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// JSON file with the diagnosis keys to distribute
        #[arg(long, short = 'k')]
        keys: PathBuf,

        /// Output directory (overrides paths.output)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Assemble as of this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// Override a configuration value, e.g. `bundling.shifting_policy_threshold=1`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify checksums and archives of a written tree
    Verify {
        /// Path to the configuration file
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Directory to verify (default: paths.output)
        dir: Option<PathBuf>,
    },

    /// Generate a signing key
    Keygen {
        #[arg(long, default_value = "ecdsa-p256-sha256", value_parser = parse_algorithm)]
        algorithm: SignatureAlgorithm,

        /// File the private key is written to
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Assemble {
            config,
            keys,
            output,
            now,
            overrides,
            json,
        } => run_assemble(config, &keys, output, now, &overrides, json),
        Commands::Verify { config, dir } => run_verify(config, dir),
        Commands::Keygen { algorithm, out } => run_keygen(algorithm, &out),
    }
}

fn parse_algorithm(value: &str) -> Result<SignatureAlgorithm, String> {
    match value {
        "ecdsa-p256-sha256" => Ok(SignatureAlgorithm::EcdsaP256Sha256),
        "ed25519" => Ok(SignatureAlgorithm::Ed25519),
        other => Err(format!("unknown algorithm {}", other)),
    }
}

fn load_config(path: Option<PathBuf>, assignments: &[String]) -> Option<LoadedConfig> {
    let overrides = match assignments
        .iter()
        .map(|assignment| parse_override(assignment))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(overrides) => overrides,
        Err(e) => {
            error!(error = %e, "invalid override");
            return None;
        }
    };
    match LoadedConfig::load(path.as_deref(), overrides) {
        Ok(loaded) => {
            for source in &loaded.sources {
                info!(origin = ?source.origin, path = ?source.path, digest = ?source.digest, "config layer");
            }
            Some(loaded)
        }
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            None
        }
    }
}

fn run_assemble(
    config_path: Option<PathBuf>,
    keys: &Path,
    output: Option<PathBuf>,
    now: Option<DateTime<Utc>>,
    overrides: &[String],
    json: bool,
) -> ExitCode {
    let Some(loaded) = load_config(config_path, overrides) else {
        return ExitCode::FAILURE;
    };
    let mut config = loaded.config;
    if let Some(output) = output {
        config.paths.output = output;
    }

    let crypto = Arc::new(CryptoProvider::from_files(
        config.signature.algorithm,
        config.paths.private_key.clone(),
        config.paths.certificate.clone(),
    ));
    if let Err(e) = crypto.load() {
        error!(error = %e, "signing material unavailable");
        return ExitCode::FAILURE;
    }

    let source = match JsonFileKeySource::load(keys) {
        Ok(source) => source,
        Err(e) => {
            error!(error = %e, "failed to load diagnosis keys");
            return ExitCode::FAILURE;
        }
    };

    let clock: Arc<dyn Clock> = match now {
        Some(now) => Arc::new(FixedClock(now)),
        None => Arc::new(SystemClock),
    };
    let mut assembly = match Assembly::new(config, crypto, clock) {
        Ok(assembly) => assembly,
        Err(e) => {
            error!(error = %e, "failed to set up assembly");
            return ExitCode::FAILURE;
        }
    };

    match assembly.run(&source) {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        error!(error = %e, "failed to serialize report");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(run_id = %assembly.run_id(), error = %e, "assembly failed");
            ExitCode::FAILURE
        }
    }
}

fn run_verify(config_path: Option<PathBuf>, dir: Option<PathBuf>) -> ExitCode {
    let Some(loaded) = load_config(config_path, &[]) else {
        return ExitCode::FAILURE;
    };
    let dir = dir.unwrap_or_else(|| loaded.config.paths.output.clone());

    match verify_output(&dir, &loaded.config) {
        Ok(result) => {
            println!("{}", result.summary());
            for problem in result.errors.iter().skip(1) {
                println!("  {}", problem);
            }
            if result.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "verification aborted");
            ExitCode::FAILURE
        }
    }
}

fn run_keygen(algorithm: SignatureAlgorithm, out: &Path) -> ExitCode {
    let key = generate_private_key(algorithm);
    let encoded = match encode_private_key(&key) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!(error = %e, "failed to encode key");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = fs::write(out, encoded) {
        error!(path = %out.display(), error = %e, "failed to write key");
        return ExitCode::FAILURE;
    }
    println!("{} {}", algorithm, key.fingerprint());
    ExitCode::SUCCESS
}
