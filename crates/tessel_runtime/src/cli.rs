use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "tessel",
    about = "Hierarchical grid editing engine",
    author,
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Runtime settings file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct ContextArgs {
    /// Grid context file (JSON).
    #[arg(long)]
    pub context: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a grid into an in-memory backend and report its cells.
    Init {
        #[command(flatten)]
        context: ContextArgs,
        /// Cells to subdivide after loading, as `level:globalId`.
        #[arg(long, value_delimiter = ',')]
        subdivide: Vec<String>,
    },
    /// Compute the edge topology of the initial grid.
    Topology {
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Inspect one cell: local id, parent and children.
    Cell {
        #[command(flatten)]
        context: ContextArgs,
        #[arg(long)]
        level: u8,
        #[arg(long = "global-id")]
        global_id: u32,
    },
    /// Snap a rectangle onto a schema's level-1 lattice.
    Align {
        /// Schema file (JSON).
        #[arg(long)]
        schema: PathBuf,
        /// CRS of the rectangle, e.g. `EPSG:4326`. Defaults to the schema CRS.
        #[arg(long)]
        from: Option<String>,
        /// `minX,minY,maxX,maxY`
        #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true)]
        bounds: Vec<f64>,
    },
    /// Print the grid context of a patch under a schema.
    Patch {
        /// Schema file (JSON).
        #[arg(long)]
        schema: PathBuf,
        /// Patch file (JSON).
        #[arg(long)]
        patch: PathBuf,
    },
}
