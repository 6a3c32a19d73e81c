//! planar-measure CLI: inspect saved calibrations, measure between two
//! pixels and run the pipeline on a synthetic scene.

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use planar_measure::calib::{io, measure, CalibrationConfig, MeasureOptions, PickSpace};
use planar_measure::nalgebra::Point2;
use planar_measure::synthetic::{self, SyntheticOptions};
use planar_measure::CaptureSource;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "planar-measure")]
#[command(about = "Calibrate a camera against a planar board and measure distances on it")]
#[command(version)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace). PLANAR_MEASURE_LOG
    /// directives such as `warn,solve=debug` take precedence.
    #[arg(long, global = true, default_value = "warn", value_parser = parse_level)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure the distance between two pixels on the calibrated plane.
    Measure(MeasureArgs),

    /// Summarise saved intrinsics and (optionally) extrinsics.
    Show {
        /// Intrinsics JSON file.
        #[arg(long)]
        intrinsics: PathBuf,

        /// Extrinsics JSON file.
        #[arg(long)]
        extrinsics: Option<PathBuf>,

        /// RMS (px) above which the calibration is flagged.
        #[arg(long, default_value = "1.0")]
        high_rms: f64,
    },

    /// Print the capture source selected by CAMERA_SOURCE.
    Source,

    /// Calibrate on a synthetic scene and write both calibration files.
    Synthetic(SyntheticArgs),
}

#[derive(Debug, Clone, Args)]
struct MeasureArgs {
    /// Intrinsics JSON file.
    #[arg(long)]
    intrinsics: PathBuf,

    /// Extrinsics JSON file.
    #[arg(long)]
    extrinsics: PathBuf,

    /// First pick as X,Y pixels.
    #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
    a: Point2<f64>,

    /// Second pick as X,Y pixels.
    #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
    b: Point2<f64>,

    /// Picks were made on an undistorted frame.
    #[arg(long)]
    rectified: bool,

    /// Print the full result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct SyntheticArgs {
    /// Output directory for the calibration files.
    #[arg(long)]
    out: PathBuf,

    /// Calibration config JSON (board, thresholds, file names).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of calibration views.
    #[arg(long, default_value = "12")]
    views: usize,

    /// Pixel noise standard deviation.
    #[arg(long, default_value = "0.1")]
    noise: f64,

    /// Noise seed.
    #[arg(long, default_value = "7")]
    seed: u64,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(s).map_err(|_| format!("unknown log level '{s}'"))
}

fn parse_point(s: &str) -> Result<Point2<f64>, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("invalid coordinate '{v}'"))
    };
    Ok(Point2::new(coord(x)?, coord(y)?))
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let result = match cli.command {
        Commands::Measure(args) => run_measure(&args),
        Commands::Show {
            intrinsics,
            extrinsics,
            high_rms,
        } => run_show(&intrinsics, extrinsics.as_deref(), high_rms),
        Commands::Source => {
            println!("{}", CaptureSource::from_env());
            Ok(())
        }
        Commands::Synthetic(args) => run_synthetic(&args),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(level: LevelFilter) {
    #[cfg(feature = "tracing")]
    {
        let _ = level;
        let _ = tracing_log::LogTracer::init();
        planar_measure::core::init_tracing(false);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let filter = planar_measure::core::LogFilter::from_env_or(level);
        let _ = planar_measure::core::init_with_filter(filter);
    }
}

fn run_measure(args: &MeasureArgs) -> CliResult<()> {
    let intrinsics = io::load_intrinsics(&args.intrinsics)?;
    let pose = io::load_extrinsics(&args.extrinsics, &intrinsics)?;
    let opts = MeasureOptions {
        pick_space: if args.rectified {
            PickSpace::Rectified
        } else {
            PickSpace::Distorted
        },
        ..MeasureOptions::default()
    };
    let result = measure(args.a, args.b, &intrinsics, &pose, &opts)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("distance: {:.4} m", result.distance_m);
        println!("          {:.2} cm", result.distance_cm());
        println!("          {:.1} mm", result.distance_mm());
    }
    Ok(())
}

fn run_show(intrinsics: &Path, extrinsics: Option<&Path>, high_rms: f64) -> CliResult<()> {
    let model = io::load_intrinsics(intrinsics)?;
    let size = model.image_size();
    let d = model.distortion();
    println!("intrinsics: {}", intrinsics.display());
    println!("  image size: {}x{}", size.width, size.height);
    println!("  fx={:.3} fy={:.3}", model.fx(), model.fy());
    println!("  cx={:.3} cy={:.3}", model.cx(), model.cy());
    print!(
        "  k1={:.6} k2={:.6} p1={:.6} p2={:.6}",
        d.k1, d.k2, d.p1, d.p2
    );
    match d.k3 {
        Some(k3) => println!(" k3={k3:.6}"),
        None => println!(),
    }
    println!("  rms: {:.4} px", model.rms());
    if model.has_high_error(high_rms) {
        println!("  warning: rms above {high_rms} px, consider recalibrating");
    }

    if let Some(path) = extrinsics {
        let pose = io::load_extrinsics(path, &model)?;
        let r = pose.rvec();
        let t = pose.tvec();
        let n = pose.plane_normal();
        println!("extrinsics: {}", path.display());
        println!("  rvec: [{:.6}, {:.6}, {:.6}]", r.x, r.y, r.z);
        println!("  tvec: [{:.6}, {:.6}, {:.6}] m", t.x, t.y, t.z);
        println!("  camera-to-plane distance: {:.4} m", t.dot(&n).abs());
    }
    Ok(())
}

fn run_synthetic(args: &SyntheticArgs) -> CliResult<()> {
    let config = match &args.config {
        Some(path) => CalibrationConfig::load_json(path)?,
        None => CalibrationConfig::default(),
    };
    let opts = SyntheticOptions {
        views: args.views,
        sigma_px: args.noise,
        seed: args.seed,
        ..SyntheticOptions::default()
    };
    let run = synthetic::run(&config, &opts)?;

    fs::create_dir_all(&args.out)?;
    let intrinsics_path = args.out.join(config.intrinsics_path());
    let extrinsics_path = args.out.join(config.extrinsics_path());
    io::save_intrinsics(&run.intrinsics, &intrinsics_path)?;
    io::save_extrinsics(&run.extrinsics, &extrinsics_path)?;

    println!("views accepted: {}/{}", run.accepted_views, opts.views);
    println!(
        "fx={:.3} fy={:.3} (truth {:.3})",
        run.intrinsics.fx(),
        run.intrinsics.fy(),
        run.ground_truth.fx()
    );
    println!("rms: {:.4} px", run.intrinsics.rms());
    println!(
        "measured {:.3} mm, expected {:.3} mm",
        run.measurement.distance_mm(),
        run.expected_m * 1000.0
    );
    println!("wrote {}", intrinsics_path.display());
    println!("wrote {}", extrinsics_path.display());
    Ok(())
}
