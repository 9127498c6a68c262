use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use image::ImageReader;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use digitcam::core::capture::validate_frame_rate;
use digitcam::core::console::{self, ConsoleCommand, ConsoleInput, Target};
use digitcam::{
    Aggregator, CameraPipeline, CameraReport, CaptureService, CaptureSettings, ConfigHandle,
    DigitClassifier, DigitPipeline, DirectoryCaptureService, PipelineConfig, RtenDigitClassifier,
};

#[derive(Parser)]
#[command(name = "digitcam")]
#[command(about = "Read handwritten digits from two cameras and show their sum")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run both cameras live, reading settings commands from stdin
    Run {
        /// Directory whose sub-directories are capture devices
        #[arg(value_name = "DEVICES")]
        devices: PathBuf,

        /// Digit classifier model (.rten)
        #[arg(long, value_name = "FILE", default_value = "models/digits.rten")]
        model: PathBuf,

        #[arg(long, default_value_t = 0)]
        left: usize,

        #[arg(long, default_value_t = 1)]
        right: usize,

        /// Requested capture frame rate
        #[arg(long, default_value_t = 20.0, value_parser = parse_fps)]
        fps: f64,

        /// JSON file with initial settings for both cameras
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Save every new thumbnail as PNG into this directory
        #[arg(long, value_name = "DIR")]
        thumbnails: Option<PathBuf>,
    },
    /// Run a single image through the digit pipeline
    Image {
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        #[arg(long, value_name = "FILE", default_value = "models/digits.rten")]
        model: PathBuf,

        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Save debug outputs to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn parse_fps(value: &str) -> anyhow::Result<f64> {
    let rate: f64 = value.parse()?;
    validate_frame_rate(rate)
}

fn load_classifier(model: &Path) -> Option<Arc<dyn DigitClassifier>> {
    match RtenDigitClassifier::load(model) {
        Ok(classifier) => {
            info!("Loaded {} from {}", classifier.name(), model.display());
            Some(Arc::new(classifier))
        }
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.command {
        Command::Run {
            devices,
            model,
            left,
            right,
            fps,
            config,
            thumbnails,
        } => {
            let config = load_config(config.as_deref())?;
            let settings = CaptureSettings {
                frame_rate: fps,
                ..CaptureSettings::default()
            };
            run_live(devices, &model, left, right, settings, config, thumbnails).await
        }
        Command::Image {
            image_path,
            model,
            config,
            debug_out,
        } => {
            let config = load_config(config.as_deref())?;
            run_image(&image_path, &model, &config, debug_out)
        }
    }
}

fn run_image(image_path: &Path, model: &Path, config: &PipelineConfig, debug_out: Option<PathBuf>) -> anyhow::Result<()> {
    info!("Loading image: {:?}", image_path);
    let img = ImageReader::open(image_path)?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;
    info!("Image loaded: {}x{}", img.width(), img.height());

    let classifier: Arc<dyn DigitClassifier> = Arc::new(RtenDigitClassifier::load(model)?);
    let mut pipeline = DigitPipeline::new(classifier);
    if let Some(debug_dir) = debug_out {
        pipeline = pipeline.with_debug(debug_dir)?;
    }

    let outcome = pipeline.process_image(img, config)?;
    let report = CameraReport {
        session: None,
        frame: 1,
        outcome,
    };
    println!("{}", console::describe_report("image", &report));
    Ok(())
}

async fn run_live(
    devices: PathBuf,
    model: &Path,
    left_index: usize,
    right_index: usize,
    settings: CaptureSettings,
    config: PipelineConfig,
    thumbnails: Option<PathBuf>,
) -> anyhow::Result<()> {
    let service: Arc<dyn CaptureService> = Arc::new(DirectoryCaptureService::new(devices));
    let detector = load_classifier(model).map(DigitPipeline::new);

    let left = CameraPipeline::new(
        "left",
        service.clone(),
        settings,
        ConfigHandle::new(config.clone()),
        detector.clone(),
    );
    let right = CameraPipeline::new("right", service, settings, ConfigHandle::new(config), detector);

    for (camera, index) in [(&left, left_index), (&right, right_index)] {
        if let Err(e) = camera.select_device_index(index).await {
            warn!("{}", e);
        }
    }

    if let Some(dir) = &thumbnails {
        std::fs::create_dir_all(dir)?;
    }

    let mut left_reports = left.subscribe();
    let mut right_reports = right.subscribe();
    let aggregator = Aggregator::spawn(left.subscribe(), right.subscribe());
    let mut sums = aggregator.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", console::HELP);

    let mut stdin_open = true;
    loop {
        tokio::select! {
            Ok(()) = left_reports.changed() => {
                let report = left_reports.borrow_and_update().clone();
                show_report("left", &report, thumbnails.as_deref());
            }
            Ok(()) = right_reports.changed() => {
                let report = right_reports.borrow_and_update().clone();
                show_report("right", &report, thumbnails.as_deref());
            }
            Ok(()) = sums.changed() => {
                let sum = *sums.borrow_and_update();
                println!("{}", console::describe_sum(&sum));
            }
            line = lines.next_line(), if stdin_open => {
                match ConsoleInput::read(line?.as_deref()) {
                    ConsoleInput::Closed => {
                        info!("Console input closed, press Ctrl-C to stop");
                        stdin_open = false;
                    }
                    ConsoleInput::Blank => {}
                    ConsoleInput::Command(ConsoleCommand::Quit) => break,
                    ConsoleInput::Command(command) => handle_command(command, &left, &right, &aggregator).await,
                    ConsoleInput::Invalid(e) => println!("{}\n{}", e, console::HELP),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    left.stop();
    right.stop();
    Ok(())
}

async fn handle_command(command: ConsoleCommand, left: &CameraPipeline, right: &CameraPipeline, aggregator: &Aggregator) {
    let cameras = |target: Target| {
        [(left, target.includes_left()), (right, target.includes_right())]
            .into_iter()
            .filter_map(|(camera, selected)| selected.then_some(camera))
    };

    match command {
        ConsoleCommand::Edit(target, edit) => {
            for camera in cameras(target) {
                match camera.config().update(|c| edit.apply(c)) {
                    Ok(()) => println!("{}: {:?}", camera.name(), camera.config().snapshot()),
                    Err(e) => println!("{}: rejected, {}", camera.name(), e),
                }
            }
        }
        ConsoleCommand::SelectDevice(target, index) => {
            for camera in cameras(target) {
                if let Err(e) = camera.select_device_index(index).await {
                    println!("{}", e);
                }
            }
        }
        ConsoleCommand::ListDevices => match left.devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {} ({})", device.index, device.name, device.path.display());
                }
            }
            Err(e) => println!("{}", e),
        },
        ConsoleCommand::Show => {
            for camera in [left, right] {
                let device = camera
                    .current_device()
                    .map(|d| d.name)
                    .unwrap_or_else(|| "none".to_string());
                println!("{} on {} [{:?}]", camera.name(), device, camera.state());
                println!("{}", console::describe_report(camera.name(), &camera.latest()));
            }
            println!("{}", console::describe_sum(&aggregator.current()));
        }
        ConsoleCommand::Quit => {}
    }
}

fn show_report(camera: &str, report: &CameraReport, thumbnails: Option<&Path>) {
    println!("{}", console::describe_report(camera, report));

    let (Some(dir), Some(thumbnail)) = (thumbnails, &report.outcome.thumbnail) else {
        return;
    };
    let path = dir.join(format!("{}_{:06}.png", camera, report.frame));
    if let Err(e) = thumbnail.save(&path) {
        warn!("Failed to save thumbnail {}: {}", path.display(), e);
    }
}
