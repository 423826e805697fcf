use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tessel_core::bounds::{align_bounds, grid_counts};
use tessel_core::{CellKey, Crs, GridContext, GridManager};
use tessel_editor::{patch_context, EditorSession};
use tessel_services::{GridSchema, MemoryBackend, MemoryStore, PatchMeta, SchemaStore, Settings};
use tracing::info;

use crate::cli::{Cli, Commands};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn read_context(path: &Path) -> Result<GridContext> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    GridContext::from_json(&text).with_context(|| format!("invalid grid context in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_cell(text: &str) -> Result<CellKey> {
    let (level, global_id) = text
        .split_once(':')
        .with_context(|| format!("expected level:globalId, got `{text}`"))?;
    Ok(CellKey::new(level.trim().parse()?, global_id.trim().parse()?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitReport {
    cells: usize,
    levels: usize,
    per_level: Vec<usize>,
    deleted: usize,
    degraded: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CellReport {
    level: u8,
    global_id: u32,
    local_id: u32,
    parent: Option<u32>,
    children: Option<Vec<u32>>,
    min: [f64; 2],
    max: [f64; 2],
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => Settings::load(path).with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Init { context, subdivide } => {
            let context = read_context(&context.context)?;
            let backend = MemoryBackend::new(&context)?;
            let (mut session, initial) = EditorSession::open(context, backend, &settings).await?;
            let mut degraded = initial.degraded.len();

            for cell in &subdivide {
                let key = parse_cell(cell)?;
                let Some(storage_id) = session.core().storage_id(key.level(), key.global_id()) else {
                    bail!("cell {key} is not active");
                };
                let applied = session.subdivide(&[storage_id]).await?;
                degraded += applied.children.degraded.len();
                info!(%key, children = applied.children.count, "subdivided");
            }

            let core = session.core();
            let mut per_level = vec![0; core.levels().len()];
            for &level in core.cache().levels() {
                per_level[level as usize] += 1;
            }
            let report = InitReport {
                cells: core.cell_count(),
                levels: core.levels().len(),
                per_level,
                deleted: core.cache().deleted_flags().iter().filter(|&&d| d).count(),
                degraded,
            };
            session.close().await;

            if cli.json {
                print_json(&report)?;
            } else {
                println!("{} cells over {} levels", report.cells, report.levels);
                for (level, count) in report.per_level.iter().enumerate().filter(|(_, count)| **count > 0) {
                    println!("  level {level}: {count}");
                }
                if report.degraded > 0 {
                    println!("  {} cells rendered from unprojected coordinates", report.degraded);
                }
            }
        }
        Commands::Topology { context } => {
            let context = read_context(&context.context)?;
            let backend = MemoryBackend::new(&context)?;
            let (session, _) = EditorSession::open(context, backend, &settings).await?;
            let topology = session.core().parse_topology().await?;
            session.close().await;

            if cli.json {
                print_json(&topology)?;
            } else {
                let shared = topology.edge_cells.iter().filter(|cells| cells.len() == 2).count();
                println!(
                    "{} edges ({} shared, {} boundary) over {} cells",
                    topology.edge_count(),
                    shared,
                    topology.edge_count() - shared,
                    topology.cell_edges.len()
                );
            }
        }
        Commands::Cell {
            context,
            level,
            global_id,
        } => {
            let manager = GridManager::new(read_context(&context.context)?)?;
            if !manager.levels().contains(level, global_id) {
                bail!("cell {level}-{global_id} is outside the grid");
            }
            let corners = manager.cell_corners(level, global_id);
            let report = CellReport {
                level,
                global_id,
                local_id: manager.local_id(level, global_id),
                parent: (level > 0).then(|| manager.parent_global_id(level, global_id)),
                children: manager.children(level, global_id),
                min: corners.min.to_array(),
                max: corners.max.to_array(),
            };
            if cli.json {
                print_json(&report)?;
            } else {
                println!("cell {level}-{global_id} (local id {})", report.local_id);
                if let Some(parent) = report.parent {
                    println!("  parent: {}-{parent}", level - 1);
                }
                match &report.children {
                    Some(children) => println!("  children: {children:?}"),
                    None => println!("  children: none (deepest level)"),
                }
                println!("  extent: {:?} .. {:?}", report.min, report.max);
            }
        }
        Commands::Align { schema, from, bounds } => {
            let schema: GridSchema = read_json(&schema)?;
            schema.validate()?;
            let to = schema.crs()?;
            let from = match from {
                Some(crs) => crs.parse::<Crs>()?,
                None => to,
            };
            let &[min_x, min_y, max_x, max_y] = bounds.as_slice() else {
                bail!("--bounds takes four numbers");
            };
            let cell_size = schema.cell_size().context("schema has no grid levels")?;
            let base_point = schema.base_point();

            let aligned = align_bounds([min_x, min_y, max_x, max_y], cell_size, from, to, base_point)?;
            let (columns, rows) = grid_counts(aligned.expanded_metric.south_west, base_point, cell_size);
            if cli.json {
                print_json(&aligned)?;
            } else {
                println!("converted: {:?}", aligned.converted.bounds());
                println!("aligned:   {:?}", aligned.aligned.bounds());
                println!("expanded:  {:?}", aligned.expanded.bounds());
                println!("offset from base point: {columns} x {rows} cells");
                if aligned.degraded {
                    println!("warning: some coordinates could not be projected");
                }
            }
        }
        Commands::Patch { schema, patch } => {
            let schema: GridSchema = read_json(&schema)?;
            let patch: PatchMeta = read_json(&patch)?;
            let (schema_name, patch_name) = (schema.name.clone(), patch.name.clone());

            let store = MemoryStore::new();
            store.create_schema(schema).await?;
            store.create_patch(&schema_name, patch).await?;
            let context = patch_context(store.as_ref(), &schema_name, &patch_name).await?;
            if cli.json {
                print_json(&context)?;
            } else {
                println!("{}", context.to_json()?);
            }
        }
    }
    Ok(())
}
