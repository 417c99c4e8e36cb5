//! pinscan - pin presence inspection station
//!
//! Runs the detection pipeline on captured frames using the cameras,
//! process profiles and reference grids of a station configuration file.

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use image::RgbImage;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pinscan::error::SinkError;
use pinscan::{
    online, CameraIdentity, CameraWorker, Config, DetectionRecord, DetectionSink, Job,
    ProcessParameters, ReferenceGrid,
};

/// pinscan - ejector pin presence inspection
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "station.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the configured pin cameras
    Cameras,

    /// Render the segmentation preview used while teaching
    Preview {
        /// Camera serial number or label
        #[arg(long)]
        camera: String,
        #[arg(long)]
        part: String,
        /// Captured frame
        image: PathBuf,
        /// Where to write the preview
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
    },

    /// Inspect captured frames against the taught reference
    Inspect {
        /// Camera serial number or label
        #[arg(long)]
        camera: String,
        #[arg(long)]
        part: String,
        /// Operator recorded with each detection
        #[arg(long)]
        user: Option<String>,
        /// Captured frames, inspected in order
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Teach a reference grid from a card of pin codes
    ImportCard {
        #[arg(long)]
        part: String,
        #[arg(long)]
        line: String,
        /// Text card, one row of codes per line
        card: PathBuf,
    },

    /// Teach process parameters from a flat JSON record
    ImportParams {
        /// Camera serial number or label
        #[arg(long)]
        camera: String,
        #[arg(long)]
        part: String,
        /// JSON object with the flat parameter keys
        params: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("pinscan v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_or_create(&args.config)?;
    for (camera, count) in config.profile_counts() {
        info!("Camera {}: {} process profiles", camera, count);
    }

    match args.command {
        Command::Cameras => list_cameras(&config),
        Command::Preview {
            camera,
            part,
            image,
            output,
        } => {
            let camera = find_camera(&config, &camera)?;
            let params = find_parameters(&config, camera, &part)?;
            let frame = load_frame(&image)?;
            let preview = online(&frame, params);
            preview
                .save(&output)
                .with_context(|| format!("Failed to write preview to {:?}", output))?;
            info!("Preview written to {:?}", output);
            Ok(())
        }
        Command::Inspect {
            camera,
            part,
            user,
            images,
        } => {
            let camera = find_camera(&config, &camera)?.clone();
            inspect(config, camera, &part, user, &images)
        }
        Command::ImportCard { part, line, card } => {
            let text = std::fs::read_to_string(&card)
                .with_context(|| format!("Failed to read card {:?}", card))?;
            let side = config.teach.reference_side;
            let reference = ReferenceGrid::from_card(&part, &line, &text, side)
                .with_context(|| format!("Failed to import card {:?}", card))?;
            info!(
                "Imported {}x{} reference for part {} on line {}",
                reference.grid.rows(),
                reference.grid.columns(),
                part,
                line
            );
            config.upsert_reference(reference);
            config.save(&args.config)
        }
        Command::ImportParams {
            camera,
            part,
            params,
        } => {
            let json = std::fs::read_to_string(&params)
                .with_context(|| format!("Failed to read parameters {:?}", params))?;
            let parameters = ProcessParameters::from_flat_json(&json)?;
            let serial = find_camera(&config, &camera)?.serial_number.clone();
            match config
                .profiles
                .iter_mut()
                .find(|p| p.part == part && p.camera == serial)
            {
                Some(profile) => profile.parameters = parameters,
                None => config.profiles.push(pinscan::config::ProcessProfile {
                    camera: serial,
                    part,
                    parameters,
                }),
            }
            config.save(&args.config)
        }
    }
}

fn list_cameras(config: &Config) -> Result<()> {
    let cameras = config.pins_cameras();
    if cameras.is_empty() {
        warn!("No pin cameras configured");
    }
    for camera in cameras {
        println!(
            "{:>2}  {:<20} {:<10} {:<8} {:<5} {}",
            camera.device_index,
            camera.serial_number,
            camera.line,
            camera.location,
            camera.side,
            camera.model_name
        );
    }
    Ok(())
}

fn find_camera<'a>(config: &'a Config, key: &str) -> Result<&'a CameraIdentity> {
    match config.camera(key) {
        Some(camera) if camera.is_pins_camera() => Ok(camera),
        Some(camera) => bail!("Camera {} has role {}, not a pin camera", key, camera.role),
        None => bail!("Camera {} is not configured", key),
    }
}

fn find_parameters<'a>(
    config: &'a Config,
    camera: &CameraIdentity,
    part: &str,
) -> Result<&'a ProcessParameters> {
    config
        .parameters_for(camera, part)
        .with_context(|| {
            format!(
                "No process parameters for part {} on camera {}",
                part, camera.serial_number
            )
        })
}

fn load_frame(path: &Path) -> Result<RgbImage> {
    let frame = image::open(path).with_context(|| format!("Failed to open frame {:?}", path))?;
    Ok(frame.to_rgb8())
}

fn inspect(
    config: Config,
    camera: CameraIdentity,
    part: &str,
    user: Option<String>,
    images: &[PathBuf],
) -> Result<()> {
    find_parameters(&config, &camera, part)?;
    if config.reference_for(part, &camera.line).is_none() {
        bail!("No reference taught for part {} on line {}", part, camera.line);
    }

    let history = Arc::new(Mutex::new(Vec::new()));
    let sink = FileSink::new(&config, &camera, history.clone())?;
    let store = Arc::new(ArcSwap::from_pointee(config));
    let mut worker = CameraWorker::spawn(camera, store, sink)
        .context("Failed to start camera worker")?;

    for path in images {
        let frame = load_frame(path)?;
        worker
            .submit(Job {
                frame,
                part: part.to_string(),
                user: user.clone(),
            })
            .with_context(|| format!("Inspection stopped at {:?}", path))?;
    }

    let stats = worker.stats();
    worker.shutdown()?;
    let skipped = stats.skipped.load(Ordering::Relaxed);

    let history = history.lock();
    let passed = history.iter().filter(|r| r.result).count();
    info!(
        "Inspected {} frames: {} OK, {} NG, {} skipped",
        history.len(),
        passed,
        history.len() - passed,
        skipped
    );
    Ok(())
}

/// Writes frames and a JSON-lines record log into the records directory
struct FileSink {
    directory: PathBuf,
    save_origin: bool,
    camera: String,
    sequence: u64,
    history: Arc<Mutex<Vec<DetectionRecord>>>,
}

impl FileSink {
    fn new(
        config: &Config,
        camera: &CameraIdentity,
        history: Arc<Mutex<Vec<DetectionRecord>>>,
    ) -> Result<Self> {
        let directory = config.records.directory.clone();
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create records directory {:?}", directory))?;
        Ok(Self {
            directory,
            save_origin: config.records.save_origin,
            camera: camera.serial_number.clone(),
            sequence: 0,
            history,
        })
    }
}

impl DetectionSink for FileSink {
    fn record(
        &mut self,
        record: &DetectionRecord,
        origin: &RgbImage,
        annotated: &RgbImage,
    ) -> std::result::Result<(), SinkError> {
        self.sequence += 1;
        let stem = format!("{}_{}_{}", self.camera, record.when, self.sequence);

        if self.save_origin {
            origin.save(self.directory.join(format!("{}_origin.png", stem)))?;
        }
        annotated.save(self.directory.join(format!("{}_detection.png", stem)))?;

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory.join("records.jsonl"))?;
        writeln!(log, "{}", serde_json::to_string(record)?)?;

        self.history.lock().push(record.clone());
        Ok(())
    }

    fn show_result(
        &mut self,
        passed: bool,
        _annotated: &RgbImage,
    ) -> std::result::Result<(), SinkError> {
        if passed {
            info!("[{}] OK", self.camera);
        } else {
            error!("[{}] NG", self.camera);
        }
        Ok(())
    }
}
