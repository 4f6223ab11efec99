//! Skinfit command-line front end.
//!
//! Provides three modes of operation:
//! - `solve`: Decompose a baked animation described by a JSON attribute store
//! - `seed`: Cluster a rig-less mesh into joints, then decompose it
//! - `info`: Print workspace crate versions and default settings

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use skinfit_core::prelude::*;
use skinfit_host::{
    AnimationSource, BakedAnimation, SeedOptions, StoreKeys, decompose_store,
    export_joint_curves, seed_joints,
};
use skinfit_solve::decompose;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Linear blend skinning decomposition.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose an animation; inputs and outputs live in a JSON store.
    Solve {
        /// Attribute store (JSON) naming frames, joints, vertices and settings.
        #[arg(short, long)]
        store: PathBuf,

        /// Baked animation (JSON).
        #[arg(short, long)]
        animation: PathBuf,

        /// Where to write the updated store. Defaults to overwriting `--store`.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also write keyed joint curves for the target joints here.
        #[arg(long)]
        curves: Option<PathBuf>,
    },

    /// Seed joints with k-means and decompose the whole mesh against them.
    Seed {
        /// Baked animation (JSON); the first frame is the rest pose.
        #[arg(short, long)]
        animation: PathBuf,

        /// Number of k-means joints.
        #[arg(short, long, default_value_t = 8)]
        joints: usize,

        /// Add a root joint following the bounding-box centre.
        #[arg(long)]
        root: bool,

        /// Random seed for clustering.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Decomposition settings (TOML). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override `max_influence`.
        #[arg(long)]
        max_influence: Option<usize>,

        /// Override `max_iteration`.
        #[arg(long)]
        iterations: Option<usize>,

        /// Where to write joints and result (JSON). Printed when omitted.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn read_animation(path: &Path) -> Result<BakedAnimation> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading animation {}", path.display()))?;
    BakedAnimation::from_json(&json).with_context(|| format!("parsing animation {}", path.display()))
}

fn write_or_print(out: Option<&Path>, json: &str) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_solve(store_path: &Path, animation: &Path, out: Option<&Path>, curves: Option<&Path>) -> Result<()> {
    let json = fs::read_to_string(store_path)
        .with_context(|| format!("reading store {}", store_path.display()))?;
    let mut store = MemoryStore::from_json(&json).context("parsing store")?;
    let anim = read_animation(animation)?;

    let (input, result) = decompose_store(&mut store, &anim)?;
    println!(
        "error={:.6} matching={:.3}% iterations={}",
        result.final_error().unwrap_or(0.0),
        result.matching_percent().unwrap_or(0.0),
        result.iteration_done
    );

    if let Some(path) = curves {
        if input.target_joints.is_none() {
            bail!("--curves needs `{}` and `{}` in the store", StoreKeys::SET_MATRICES, StoreKeys::TARGET_JOINTS);
        }
        let rigid = if store.contains(StoreKeys::RIGID_MATRICES) {
            store.get_bool(StoreKeys::RIGID_MATRICES)?
        } else {
            DecompositionConfig::default().rigid_matrices
        };
        let keyed = export_joint_curves(&input, &result, &anim, rigid)?;
        write_or_print(Some(path), &serde_json::to_string_pretty(&keyed)?)?;
    }

    write_or_print(Some(out.unwrap_or(store_path)), &store.to_json()?)
}

#[allow(clippy::too_many_arguments)]
fn run_seed(
    animation: &Path,
    joints: usize,
    root: bool,
    seed: u64,
    config: Option<&Path>,
    max_influence: Option<usize>,
    iterations: Option<usize>,
    out: Option<&Path>,
) -> Result<()> {
    let anim = read_animation(animation)?;
    let Some((rest_frame, posed_frames)) = anim.frames.split_first() else {
        bail!("animation has no frames");
    };

    let rest = anim.vertex_positions(*rest_frame)?;
    let posed = posed_frames
        .iter()
        .map(|&f| anim.vertex_positions(f))
        .collect::<Result<Vec<_>, _>>()?;

    let mut config = match config {
        Some(path) => DecompositionConfig::from_file(path)?,
        None => DecompositionConfig::default(),
    };
    if let Some(value) = max_influence {
        config.max_influence = value;
    }
    if let Some(value) = iterations {
        config.max_iteration = value;
        config.iteration_full_solver = config.iteration_full_solver.min(value);
    }

    let options = SeedOptions {
        joint_count: joints,
        with_root: root,
        seed,
        ..SeedOptions::default()
    };
    let rig = seed_joints(&rest, &posed, &options)?;
    if max_influence.is_none() {
        config.max_influence = config.max_influence.min(rig.joints.len());
    }

    let mut bounding_diagonal_sum = 0.0;
    for &f in posed_frames {
        bounding_diagonal_sum += anim.bounding_diagonal(f)?;
    }
    let vertex_count = u32::try_from(rest.len()).context("too many vertices")?;
    let mut input = DecompositionInput {
        frames: anim.frames.clone(),
        joints: Vec::new(),
        target_joints: None,
        vertex_ids: (0..vertex_count).collect(),
        rest_positions: rest,
        posed_positions: posed,
        bind_matrices: Vec::new(),
        frame_matrices: Vec::new(),
        bounding_diagonal_sum,
        seed_active_sets: None,
    };
    rig.apply(&mut input);

    let result = decompose(&input, &config)?;
    println!(
        "joints={} error={:.6} matching={:.3}%",
        input.joint_count(),
        result.final_error().unwrap_or(0.0),
        result.matching_percent().unwrap_or(0.0)
    );

    let report = serde_json::json!({
        "joints": input.joints,
        "result": result,
    });
    write_or_print(out, &serde_json::to_string_pretty(&report)?)
}

fn run_info() {
    let defaults = DecompositionConfig::default();
    println!("skinfit v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  skinfit-core   {}", env!("CARGO_PKG_VERSION"));
    println!("  skinfit-solve  {}", env!("CARGO_PKG_VERSION"));
    println!("  skinfit-host   {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("defaults:");
    println!("  max_influence         {}", defaults.max_influence);
    println!("  lagrangian            {}", defaults.lagrangian);
    println!("  max_iteration         {}", defaults.max_iteration);
    println!("  iteration_full_solver {}", defaults.iteration_full_solver);
    println!("  update_rest_matrices  {}", defaults.update_rest_matrices);
    println!("  rigid_matrices        {}", defaults.rigid_matrices);
    println!("  error_percent_break   {}", defaults.error_percent_break);
    println!("  max_cpu               {}", defaults.max_cpu);
    println!(
        "  threads available     {}",
        skinfit_solve::pool::available_threads()
    );
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Solve {
            store,
            animation,
            out,
            curves,
        } => run_solve(&store, &animation, out.as_deref(), curves.as_deref()),
        Commands::Seed {
            animation,
            joints,
            root,
            seed,
            config,
            max_influence,
            iterations,
            out,
        } => run_seed(
            &animation,
            joints,
            root,
            seed,
            config.as_deref(),
            max_influence,
            iterations,
            out.as_deref(),
        ),
        Commands::Info => {
            run_info();
            Ok(())
        }
    }
}
