//! cbct - cone-beam CT reconstruction CLI
//!
//! Reconstructs a 3-D attenuation volume from a directory of flat-panel
//! projections using the FDK algorithm, spreading the work across all
//! visible devices.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cbct_compute::{Engine, EngineConfig};
use cbct_core::{DetectorGeometry, Roi};
use cbct_io::{DirectorySource, SliceFileSink};

#[derive(Parser)]
#[command(name = "cbct")]
#[command(author, version, about = "Cone-beam CT reconstruction (FDK)")]
#[command(long_about = "
Reconstructs a 3-D volume from cone-beam projections acquired on a flat
panel detector rotating around the specimen.

Projections are headerless little-endian f32 rasters, one file per
rotation angle, ordered by filename. The volume is written as one f32
slice file per z index.

Examples:
  cbct --input scan/ --output vol/ --n-h 1024 --n-v 768 \\
       --pitch-h 0.4 --pitch-v 0.4 --d-so 500 --d-sd 1000 \\
       --delta-phi 0.00873 --projections 720
  cbct ... --roi 256 768 256 768 0 768     # reconstruct a sub-box
  cbct ... --dry-run                       # print the plan and exit
")]
struct Cli {
    /// Directory holding the projection files
    #[arg(short, long)]
    input: PathBuf,

    /// Directory the volume slices are written to
    #[arg(short, long, default_value = "volume")]
    output: PathBuf,

    /// Output filename prefix
    #[arg(short, long, default_value = "vol")]
    prefix: String,

    /// Detector columns
    #[arg(long)]
    n_h: u32,

    /// Detector rows
    #[arg(long)]
    n_v: u32,

    /// Horizontal pixel pitch
    #[arg(long)]
    pitch_h: f32,

    /// Vertical pixel pitch
    #[arg(long)]
    pitch_v: f32,

    /// Source-to-isocenter distance
    #[arg(long)]
    d_so: f32,

    /// Source-to-detector distance
    #[arg(long)]
    d_sd: f32,

    /// Angular step between projections, in radians
    #[arg(long)]
    delta_phi: f32,

    /// Number of projections in the scan
    #[arg(long)]
    projections: u32,

    /// Volume region of interest: x1 x2 y1 y2 z1 z2 (voxel indices)
    #[arg(long, num_args = 6, value_names = ["X1", "X2", "Y1", "Y2", "Z1", "Z2"])]
    roi: Option<Vec<u32>>,

    /// Plan the reconstruction without reading or writing anything
    #[arg(long)]
    dry_run: bool,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    tracing::info!("cbct {}", env!("CARGO_PKG_VERSION"));

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let det_geo = DetectorGeometry {
        n_h: cli.n_h,
        n_v: cli.n_v,
        pitch_h: cli.pitch_h,
        pitch_v: cli.pitch_v,
        d_so: cli.d_so,
        d_sd: cli.d_sd,
        delta_phi: cli.delta_phi,
        num_projections: cli.projections,
    };

    let mut config = EngineConfig::new(det_geo);
    if let Some(roi) = &cli.roi {
        config = config.with_roi(Roi {
            x1: roi[0],
            x2: roi[1],
            y1: roi[2],
            y2: roi[3],
            z1: roi[4],
            z2: roi[5],
        });
    }

    let engine = Engine::new(config).context("Pipeline construction failed")?;

    if cli.dry_run {
        let plan = engine.plan().context("Planning failed")?;
        println!(
            "volume: {}x{}x{} voxels of {:.4}",
            plan.vol_geo.n_x, plan.vol_geo.n_y, plan.vol_geo.n_z, plan.vol_geo.voxel_size
        );
        println!(
            "slabs:  {} of {} slices ({} in the last)",
            plan.subvolumes.num_slabs, plan.subvolumes.slab_height, plan.subvolumes.last_height
        );
        println!("tasks:  {} across {} devices", plan.tasks.len(), plan.devices.len());
        return Ok(());
    }

    let source = DirectorySource::open(&cli.input, cli.n_h, cli.n_v, cli.projections)
        .with_context(|| format!("Failed to open scan directory {}", cli.input.display()))?;
    let sink = SliceFileSink::new(&cli.output, &cli.prefix);

    engine
        .run(Arc::new(source), Box::new(sink))
        .context("Pipeline execution failed")?;
    Ok(())
}
