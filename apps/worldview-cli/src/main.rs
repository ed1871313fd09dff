mod replay;
mod source;
mod synth;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use worldview_client::{ConfigOverrides, ViewerConfig};

use crate::replay::{ReplayOptions, replay};
use crate::synth::{CAPTURE_FILE, RESOURCE_DIR, SynthOptions, synthesize};

#[derive(Parser)]
#[command(name = "worldview-cli", about = "Synthesize and replay world viewer sessions")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Viewer config file (JSON). Defaults apply when it does not exist.
    #[arg(short, long, global = true, default_value = "worldview.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective configuration
    Info,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Write a synthetic session capture and its resource directory
    Synth {
        /// Output directory
        out: PathBuf,
        #[arg(long, default_value = "2000")]
        objects: usize,
        #[arg(long, default_value = "20")]
        models: usize,
        #[arg(long, default_value = "4")]
        avatars: usize,
        #[arg(long, default_value = "12.0")]
        spacing: f64,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Replay a synthesized session through the viewer and print stats
    Replay {
        /// Directory written by `synth`
        dir: PathBuf,
        /// Frames run after each delivery
        #[arg(long, default_value = "4")]
        frames_per_chunk: usize,
        /// Camera travel per frame along +x
        #[arg(long, default_value = "0.5")]
        speed: f64,
        /// Frames allowed for outstanding loads after the capture ends
        #[arg(long, default_value = "10000")]
        settle_frames: usize,
        /// Print the resulting scene
        #[arg(long)]
        scene: bool,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

/// Flags that win over the config file.
#[derive(clap::Args)]
struct OverrideArgs {
    /// World name sent in the handshake
    #[arg(long)]
    world: Option<String>,
    #[arg(long)]
    load_distance: Option<f64>,
    #[arg(long)]
    fetch_threads: Option<usize>,
    /// Build threads (0 = half the cores)
    #[arg(long)]
    build_workers: Option<usize>,
    /// Request ktx2 texture variants
    #[arg(long)]
    ktx2: bool,
    #[arg(long)]
    load_own_avatar: bool,
}

impl OverrideArgs {
    fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            world: self.world.clone(),
            load_distance: self.load_distance,
            fetch_threads: self.fetch_threads,
            build_workers: self.build_workers,
            prefer_ktx2: self.ktx2.then_some(true),
            load_own_avatar: self.load_own_avatar.then_some(true),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Info => {
            let config = ViewerConfig::load_or_default(&cli.config)?;
            println!("worldview-cli v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "protocol: v{}",
                worldview_protocol::messages::PROTOCOL_VERSION
            );
            println!("build workers: {}", config.build_workers());
            println!("config ({}):", cli.config.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::InitConfig { force } => {
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    cli.config.display()
                );
            }
            ViewerConfig::default().save(&cli.config)?;
            println!("wrote {}", cli.config.display());
        }
        Commands::Synth {
            out,
            objects,
            models,
            avatars,
            spacing,
            seed,
        } => {
            let opts = SynthOptions {
                objects,
                models,
                avatars,
                spacing,
                seed,
            };
            let summary = synthesize(&out, &opts)
                .with_context(|| format!("failed to synthesize into {}", out.display()))?;
            println!(
                "capture: {} ({} chunks, {} objects at end)",
                summary.capture.display(),
                summary.chunks,
                summary.final_objects
            );
            println!(
                "resources: {} ({} files)",
                summary.resources.display(),
                summary.resource_files
            );
        }
        Commands::Replay {
            dir,
            frames_per_chunk,
            speed,
            settle_frames,
            scene,
            overrides,
        } => {
            let mut config = ViewerConfig::load_or_default(&cli.config)?;
            config.apply_overrides(&overrides.to_overrides());
            let opts = ReplayOptions {
                capture: dir.join(CAPTURE_FILE),
                resources: dir.join(RESOURCE_DIR),
                frames_per_chunk,
                speed,
                settle_frames,
            };
            let report = replay(config, &opts)?;
            if scene {
                print!("{}", report.scene);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
