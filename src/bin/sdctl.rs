use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sd_material::generation::NoopSink;
use sd_material::{
    normal_map, orchestrator_options, resolver_from_config, Config, GenerateOutcome, GenerationRequest,
    MaterialSettings, Orchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "sdctl", about = "CLI for Stable Diffusion material generation", version)]
struct Cli {
    /// Override SD_URL
    #[arg(global = true, long)]
    sd_url: Option<String>,

    /// Override OUTPUT_ROOT
    #[arg(global = true, long, value_name = "DIR")]
    output_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Model catalog utilities
    Models {
        #[command(subcommand)]
        cmd: ModelsCmd,
    },
    /// Print the known sampler names with their index
    Samplers,
    /// Generate a material texture (and normal map) from a prompt
    Generate {
        /// Positive prompt
        #[arg(long)]
        prompt: String,
        /// Negative prompt
        #[arg(long, default_value = "")]
        negative: String,
        /// Checkpoint to select; first catalog entry when omitted
        #[arg(long)]
        model: Option<String>,
        /// Sampler name (must be a known sampler)
        #[arg(long, conflicts_with = "sampler_index")]
        sampler: Option<String>,
        /// Sampler index into the known sampler list; out of range uses the default
        #[arg(long, allow_hyphen_values = true)]
        sampler_index: Option<i64>,
        /// Width, clamped to 128..=2048
        #[arg(long)]
        width: Option<i64>,
        /// Height, clamped to 128..=2048
        #[arg(long)]
        height: Option<i64>,
        /// Steps
        #[arg(long)]
        steps: Option<u32>,
        /// CFG scale
        #[arg(long)]
        cfg: Option<f32>,
        /// Seed; -1 lets the server choose
        #[arg(long, allow_hyphen_values = true)]
        seed: Option<i64>,
        /// Request a seamlessly tiling texture
        #[arg(long)]
        tiling: bool,
        /// Skip the normal map
        #[arg(long)]
        no_normal_map: bool,
        /// Normal map strength, 0..=10
        #[arg(long, default_value_t = 0.5)]
        normal_strength: f32,
        /// Write the normal map to this path
        #[arg(long, value_name = "PATH")]
        normal_out: Option<PathBuf>,
    },
    /// Derive a normal map from an existing image
    NormalMap {
        #[arg(long, value_name = "PATH")]
        input: PathBuf,
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        strength: f32,
    },
}

#[derive(Subcommand, Debug)]
enum ModelsCmd {
    /// List checkpoints known to the server
    List {
        /// Output raw JSON instead of names
        #[arg(long)]
        json: bool,
    },
    /// Switch the server's active checkpoint
    Set {
        name: String,
    },
}

/// Sink that writes the normal map to disk.
struct NormalMapWriter {
    path: PathBuf,
}

impl sd_material::MaterialSink for NormalMapWriter {
    fn apply(&self, material: &sd_material::generation::GeneratedMaterial) {
        let Some(normal) = &material.normal else {
            return;
        };
        match normal.save(&self.path) {
            Ok(()) => println!("Normal map saved to {}", self.path.display()),
            Err(e) => eprintln!("Warning: could not save normal map: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    // Load env and parse CLI
    Config::dotenv_load();
    let cli = Cli::parse();

    let mut conf = Config::new()?;
    if let Some(url) = cli.sd_url {
        conf.server.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(root) = cli.output_root {
        conf.output_root = root;
    }

    match cli.command {
        Commands::Models { cmd } => {
            let resolver = resolver_from_config(&conf)?;
            match cmd {
                ModelsCmd::List { json } => {
                    let models = resolver.list_models().await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&*models)?);
                    } else {
                        for m in models.iter() {
                            println!("{}", m.model_name);
                        }
                    }
                }
                ModelsCmd::Set { name } => {
                    resolver.set_model(&name).await?;
                    println!("Active model: {}", name);
                }
            }
            Ok(())
        }
        Commands::Samplers => {
            for (i, s) in conf.samplers.iter().enumerate() {
                println!("{:>2}  {}", i, s);
            }
            Ok(())
        }
        Commands::Generate {
            prompt, negative, model, sampler, sampler_index,
            width, height, steps, cfg, seed, tiling,
            no_normal_map, normal_strength, normal_out,
        } => {
            let mut request = GenerationRequest::new(prompt).negative(negative).tiling(tiling);
            request.model = model;
            request.sampler_name = sampler;
            request.sampler_index = sampler_index;
            request.width = width;
            request.height = height;
            request.steps = steps;
            request.cfg_scale = cfg;
            request.seed = seed;

            let mut options = orchestrator_options(&conf);
            options.material = MaterialSettings {
                generate_normal_map: !no_normal_map,
                normal_map_strength: normal_strength,
                ..MaterialSettings::default()
            };
            let sink: Arc<dyn sd_material::MaterialSink> = match normal_out {
                Some(path) => Arc::new(NormalMapWriter { path }),
                None => Arc::new(NoopSink),
            };
            let orchestrator = Orchestrator::new(resolver_from_config(&conf)?, sink, options);

            match orchestrator.generate(request).await {
                Ok(GenerateOutcome::Completed(done)) => {
                    println!("Saved {} ({}x{})", done.color_path.display(), done.width, done.height);
                    match done.generated_seed {
                        Some(seed) => println!("Seed: {}", seed),
                        None => println!("Seed: unknown"),
                    }
                    Ok(())
                }
                Ok(GenerateOutcome::Skipped) => {
                    eprintln!("Nothing generated: prompt is empty");
                    std::process::exit(2);
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::NormalMap { input, output, strength } => {
            let color = image::open(&input)?.to_rgba8();
            let normal = normal_map::synthesize(&color, strength.clamp(0.0, 10.0));
            normal.save(&output)?;
            println!("Saved {} ({}x{})", output.display(), normal.width(), normal.height());
            Ok(())
        }
    }
}
