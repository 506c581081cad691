/// Point cloud tiling entry point: split, process and merge LAS/LAZ sources.
use clap::{Parser, ValueEnum};
use point_cloud_tiling::converter::{output_stems, write_outputs};
use point_cloud_tiling::progress::MultiSourceProgress;
use point_cloud_tiling::router::BoundaryPolicy;
use point_cloud_tiling::{PdalEngine, PipelineProfile, PointCloudConverter, TilingConfig};
use std::io::Write;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ProfileArg {
    /// Bare-earth terrain model only
    Terrain,
    /// Terrain plus first-return surface model
    TerrainAndSurface,
}

impl From<ProfileArg> for PipelineProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Terrain => PipelineProfile::Terrain,
            ProfileArg::TerrainAndSurface => PipelineProfile::TerrainAndSurface,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "point-cloud-tiling")]
#[command(about = "Split lidar point clouds, rasterise each partition and merge the mosaics")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Grid divisions per axis
    #[arg(short, long)]
    splits: Option<usize>,

    /// Rasters to produce
    #[arg(short, long, value_enum)]
    profile: Option<ProfileArg>,

    /// Spatial reference for the outputs, e.g. EPSG:25830
    #[arg(long)]
    srs: Option<String>,

    /// Output raster resolution in map units
    #[arg(long)]
    resolution: Option<f64>,

    /// Assign points on shared edges to one partition only
    #[arg(long)]
    half_open: bool,

    /// Directory for merged rasters and manifests
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// LAS/LAZ files to process
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn load_config(args: &Args) -> point_cloud_tiling::Result<TilingConfig> {
    let mut config = match &args.config {
        Some(path) => TilingConfig::load(path)?,
        None => TilingConfig::default(),
    };
    if let Some(splits) = args.splits {
        config.tiling.square_splits = splits;
    }
    if let Some(profile) = args.profile {
        config.pipeline.profile = profile.into();
    }
    if let Some(srs) = &args.srs {
        config.pipeline.params.spatial_reference = srs.clone();
    }
    if let Some(resolution) = args.resolution {
        config.pipeline.params.resolution = resolution;
    }
    if args.half_open {
        config.tiling.boundary_policy = BoundaryPolicy::HalfOpen;
    }
    config.validate()?;
    Ok(config)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };

    let stems = match output_stems(&args.inputs) {
        Ok(stems) => stems,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };

    log::info!(
        "Tiling {} file(s): {} splits per axis, {:?} profile, {}",
        args.inputs.len(),
        config.tiling.square_splits,
        config.pipeline.profile,
        config.pipeline.params.spatial_reference
    );

    let engine = PdalEngine::new(&config.pipeline.pdal_binary);
    let progress = MultiSourceProgress::new();
    let converter = match PointCloudConverter::new(config, engine) {
        Ok(converter) => converter.with_progress(&progress),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };

    let mut failures = 0;
    for ((path, result), stem) in converter.run_files(&args.inputs).into_iter().zip(&stems) {
        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("{}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };
        if let Err(e) = write_outputs(&mut outcome, &args.output_dir, stem) {
            log::error!("{}: cannot write outputs: {}", path.display(), e);
            failures += 1;
            continue;
        }
        if !outcome.manifest.is_complete() {
            log::error!(
                "{}: incomplete, failed partitions {:?}",
                path.display(),
                outcome.manifest.failed_partitions()
            );
            failures += 1;
        }
    }

    if failures > 0 {
        log::error!("{} of {} file(s) did not complete", failures, args.inputs.len());
        std::process::exit(1);
    }
    log::info!("Done");
}
