// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! All commands run against the synthetic sensor:
//! - Listing sensors
//! - Streaming with periodic presentation and optional point cloud export
//! - Finding calibration board correspondences
//! - Showing or writing the configuration

use chrono::Local;
use fullhouse::backends::sensor::{
    ColorImageFormat, ColorLayout, SensorProvider, SyntheticProvider, SyntheticScene,
};
use fullhouse::config::{CalibrationBoard, Config};
use fullhouse::constants::{DepthRange, stream, timing};
use fullhouse::pipelines::{BufferKind, Corner, Pipeline, PresentationSink};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// How long to wait for the first complete set of buffers
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default folder name for calibration reports
const DEFAULT_REPORT_FOLDER: &str = "fullhouse";

/// Load the config from `path`, or from the default location
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    config.validate()?;
    Ok(config)
}

fn color_format() -> ColorImageFormat {
    ColorImageFormat::new(stream::DEFAULT_WIDTH, stream::DEFAULT_HEIGHT, ColorLayout::Bgra)
}

fn scene_for(config: &Config, obstructed: bool) -> SyntheticScene {
    SyntheticScene {
        board: config.board,
        board_visible: !obstructed,
        ..SyntheticScene::default()
    }
}

/// List all available sensors
pub fn list_sensors() -> CliResult {
    let provider = SyntheticProvider::new(SyntheticScene::default());
    let sensors = provider.enumerate();

    if sensors.is_empty() {
        println!("No sensor found.");
        return Ok(());
    }

    println!("Available sensors:");
    println!();
    for info in &sensors {
        println!("  [{}] {} ({})", info.index, info.name, info.serial);
        let sensor = provider.open(info.index)?;
        let (color, depth) = sensor.fields_of_view();
        let (min, max) = sensor.elevation_limits();
        println!(
            "      Color FOV: {:.1}° x {:.1}°   Depth FOV: {:.1}° x {:.1}°",
            color.horizontal, color.vertical, depth.horizontal, depth.vertical
        );
        println!("      Elevation: {}° to {}°", min, max);
        println!();
    }

    Ok(())
}

/// Counts texture uploads instead of drawing them
#[derive(Default)]
struct UploadCounter {
    color: u64,
    depth: u64,
    world: u64,
    world_bytes: usize,
}

impl PresentationSink for UploadCounter {
    type Handle = ();

    fn ensure(&mut self, _handle: &(), _kind: BufferKind, _width: u32, _height: u32) {}

    fn update(&mut self, _handle: &(), kind: BufferKind, bytes: &[u8]) {
        match kind {
            BufferKind::Color => self.color += 1,
            BufferKind::Depth => self.depth += 1,
            BufferKind::World => {
                self.world += 1;
                self.world_bytes = bytes.len();
            }
            BufferKind::Skeleton => {}
        }
    }

    fn destroy(&mut self, _handle: &()) {
        *self = Self::default();
    }
}

/// Stream for `duration` seconds, presenting at the frame rate
pub fn run(mut config: Config, duration: u64, export: Option<PathBuf>, near: bool) -> CliResult {
    if near {
        config.depth_range = DepthRange::Near;
    }
    let scene = scene_for(&config, false);
    let provider = SyntheticProvider::new(scene.clone());
    let mut pipeline = Pipeline::new(config, Arc::new(scene.detector(color_format())));
    pipeline.start(&provider)?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Streaming... (press Ctrl+C to stop early)");

    let mut sink = UploadCounter::default();
    let start = Instant::now();
    let target = Duration::from_secs(duration);
    while start.elapsed() < target {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        pipeline.present(&mut sink, &());
        let frame = pipeline.frame_info().map(|f| f.frame_number).unwrap_or(0);
        print!(
            "\rFrame {:>6}  world updates {:>6}  status {}",
            frame,
            sink.world,
            pipeline.status()
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(timing::SYNTHETIC_FRAME_PERIOD);
    }
    println!();

    let skeletons = pipeline.skeletons();
    println!(
        "Uploads: color {}, depth {}, world {} ({} bytes each)",
        sink.color, sink.depth, sink.world, sink.world_bytes
    );
    println!("Tracked bodies: {}", skeletons.tracked_count());

    if let Some(path) = export {
        let points = pipeline.export_las(&path)?;
        println!("Point cloud saved: {} ({} points)", path.display(), points);
    }

    pipeline.destroy_presentation(&mut sink, &());
    pipeline.stop();
    Ok(())
}

#[derive(Serialize)]
struct CalibrationReport<'a> {
    captured_at: String,
    sensor: String,
    board: CalibrationBoard,
    status: String,
    corners: &'a [Corner],
}

/// Detect the board and write its corner correspondences
pub fn calibrate(
    mut config: Config,
    columns: Option<u32>,
    rows: Option<u32>,
    obstructed: bool,
    output: Option<PathBuf>,
) -> CliResult {
    if let Some(columns) = columns {
        config.board.columns = columns;
    }
    if let Some(rows) = rows {
        config.board.rows = rows;
    }
    config.validate()?;

    let scene = scene_for(&config, obstructed);
    let provider = SyntheticProvider::new(scene.clone());
    let sensor_name = provider
        .enumerate()
        .into_iter()
        .find(|info| info.index == config.sensor_index)
        .map(|info| info.name)
        .unwrap_or_default();
    let board = config.board;

    let mut pipeline = Pipeline::new(config, Arc::new(scene.detector(color_format())));
    pipeline.start(&provider)?;
    if !pipeline.wait_until_ready(READY_TIMEOUT) {
        pipeline.stop();
        return Err("Timed out waiting for frames".into());
    }

    let corners = match pipeline.calibrate() {
        Ok(corners) => corners,
        Err(e) => {
            println!("{}", pipeline.status());
            pipeline.stop();
            return Err(e.into());
        }
    };
    pipeline.stop();

    println!("Found {} corners:", corners.len());
    for (i, corner) in corners.iter().enumerate() {
        println!(
            "  {:>3}  rgb ({:7.2}, {:7.2})  depth ({:>3}, {:>3}) {:>5} mm  world ({:+.3}, {:+.3}, {:.3})",
            i,
            corner.rgb.0,
            corner.rgb.1,
            corner.depth_coordinate.0,
            corner.depth_coordinate.1,
            corner.depth_value_mm,
            corner.world.x,
            corner.world.y,
            corner.world.z
        );
    }

    let now = Local::now();
    let report = CalibrationReport {
        captured_at: now.to_rfc3339(),
        sensor: sensor_name,
        board,
        status: fullhouse::pipelines::STATUS_OK.to_string(),
        corners: &corners,
    };

    let output_path = match output {
        Some(path) => path,
        None => default_report_dir().join(format!(
            "calibration_{}.json",
            now.format("%Y%m%d_%H%M%S")
        )),
    };
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output_path, serde_json::to_string_pretty(&report)?)?;
    println!("Report saved: {}", output_path.display());

    Ok(())
}

/// Print the configuration, optionally writing it out
pub fn show_config(config: &Config, path: Option<&Path>, write: bool) -> CliResult {
    let path = path.map(Path::to_path_buf).or_else(Config::default_path);
    match &path {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (no config directory)"),
    }
    println!("{}", serde_json::to_string_pretty(config)?);

    if write {
        let path = path.ok_or("No config directory available")?;
        config.save(&path)?;
        println!("Saved: {}", path.display());
    }
    Ok(())
}

/// Get default calibration report directory
fn default_report_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_REPORT_FOLDER)
}
