use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facegate_core::{
    Embedder, EmbeddingModel, EmbeddingStore, OnnxEmbeddingModel, ScrfdDetector,
};
use facegate_engine::{
    spawn_engine, CaptureError, CaptureSource, Config, EngineHandle, FaceObservationStream,
    Pipeline,
};
use facegate_hw::{Frame, FramePool};

#[derive(Parser)]
#[command(name = "facegate", about = "Face enrollment and verification from image files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AttemptArgs {
    /// Low-resolution frame the face is detected in
    #[arg(long)]
    analysis: PathBuf,
    /// Full-resolution still the face is cropped from (defaults to the analysis image)
    #[arg(long)]
    capture: Option<PathBuf>,
    /// Clockwise degrees that make the analysis frame upright
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    analysis_rotation: i32,
    /// Clockwise degrees that make the capture frame upright
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    capture_rotation: i32,
    /// Identity slot (defaults to the configured slot)
    #[arg(long)]
    slot: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face found in an image
    Enroll(AttemptArgs),
    /// Verify the face found in an image against an enrolled slot
    Verify(AttemptArgs),
    /// List enrolled slots
    List,
    /// Remove an enrolled slot
    Remove {
        /// Slot to remove
        slot: String,
    },
    /// Show the dimension and norm of a stored embedding
    Inspect {
        /// Slot to inspect
        slot: String,
    },
}

/// Serves the same still image on every capture.
struct ImageFileSource {
    path: PathBuf,
    rotation: i32,
    pool: FramePool,
}

impl CaptureSource for ImageFileSource {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let image = image::open(&self.path)
            .map_err(|e| CaptureError::Unavailable(format!("{}: {e}", self.path.display())))?
            .to_rgb8();
        Ok(self.pool.wrap(image, self.rotation)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Enroll(args) => {
            let slot = args.slot.clone().unwrap_or_else(|| config.slot.clone());
            let engine = start_attempt(&config, &args)?;
            let outcome = engine.enroll(&slot).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::Verify(args) => {
            let slot = args.slot.clone().unwrap_or_else(|| config.slot.clone());
            let engine = start_attempt(&config, &args)?;
            let outcome = engine.verify(&slot).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::List => {
            let slots = open_store(&config)?.list()?;
            println!("{}", serde_json::to_string(&slots)?);
        }
        Commands::Remove { slot } => {
            if open_store(&config)?.remove(&slot)? {
                println!("removed {slot}");
            } else {
                println!("no enrollment in {slot}");
            }
        }
        Commands::Inspect { slot } => match open_store(&config)?.load(&slot)? {
            Some(embedding) => println!(
                "{}",
                serde_json::json!({
                    "slot": slot,
                    "dimension": embedding.dimension(),
                    "norm": embedding.norm(),
                })
            ),
            None => println!("no enrollment in {slot}"),
        },
    }

    Ok(())
}

fn load_embedder(config: &Config) -> Result<Embedder<OnnxEmbeddingModel>> {
    let path = config.embedder_model_path();
    let model = OnnxEmbeddingModel::load(&path.to_string_lossy())
        .with_context(|| format!("failed to load embedding model {}", path.display()))?;
    tracing::info!(path = %path.display(), dimension = model.output_dim(), "embedding model loaded");
    Ok(Embedder::new(model))
}

/// The record length depends on the model, so store commands load it too.
fn open_store(config: &Config) -> Result<EmbeddingStore> {
    let dimension = load_embedder(config)?.dimension();
    EmbeddingStore::open(&config.data_dir, dimension)
        .with_context(|| format!("failed to open store {}", config.data_dir.display()))
}

fn read_image(path: &Path) -> Result<image::RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .to_rgb8())
}

/// Run the analysis image through the observation stream and start an engine
/// whose capture source serves the capture image.
fn start_attempt(config: &Config, args: &AttemptArgs) -> Result<EngineHandle> {
    let detector_path = config.detector_model_path();
    let detector = ScrfdDetector::load(&detector_path.to_string_lossy())
        .with_context(|| format!("failed to load detector {}", detector_path.display()))?;
    let embedder = load_embedder(config)?;

    let pool = FramePool::new(config.frame_pool_size);
    let stream =
        FaceObservationStream::new(detector, config.face_selection, config.camera_facing);
    let analysis = pool.wrap(read_image(&args.analysis)?, args.analysis_rotation)?;
    stream.process(analysis);
    match stream.latest() {
        Some(obs) => tracing::info!(bbox = ?obs.bbox, "face observed"),
        None => tracing::info!(path = %args.analysis.display(), "no face in analysis image"),
    }

    let capture = ImageFileSource {
        path: args.capture.clone().unwrap_or_else(|| args.analysis.clone()),
        rotation: args.capture_rotation,
        pool,
    };
    let pipeline = Pipeline::new(
        Box::new(capture),
        embedder,
        &config.data_dir,
        config.margin_px,
        config.camera_facing,
    )
    .with_context(|| format!("failed to open store {}", config.data_dir.display()))?;

    Ok(spawn_engine(
        pipeline,
        stream.subscribe(),
        config.observation_max_age(),
    ))
}
