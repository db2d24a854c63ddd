//! Writes a synthetic tract grid with estimates for offline experiments.

use std::path::Path;

use anyhow::{Context, Result};
use geo::polygon;

use census_geo::export::export;
use census_geo::{AttributeTable, Crs, Estimate, GeographyLevel, GeographyRecord};

/// Grid cells per side.
const GRID: usize = 12;
/// Cell size in degrees.
const CELL: f64 = 0.02;
/// South-west corner, near Milwaukee.
const ORIGIN: (f64, f64) = (-88.07, 42.92);

/// Seed mixed into every noise draw.
const SEED: u64 = 42;

/// Uniform noise in `[0, 1)` for tract `index`, draw `stream`. Stateless,
/// so a tract's values don't depend on the order tracts are generated in.
fn noise(index: usize, stream: u64) -> f64 {
    // SplitMix64 finaliser over the tract index and stream.
    let mut z = (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ stream.wrapping_mul(0xD1B5_4A32_D192_ED03)
        ^ SEED;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

/// Roughly normal noise with standard deviation `sd`: four uniforms summed.
fn jitter(index: usize, stream: u64, sd: f64) -> f64 {
    let sum: f64 = (0..4).map(|k| noise(index, stream * 4 + k)).sum();
    (sum - 2.0) * sd * 3f64.sqrt()
}

fn tract(row: usize, col: usize) -> GeographyRecord {
    let index = row * GRID + col;
    let tract_code = 100 * (index + 1);
    let mut rec = GeographyRecord::new(
        format!("55079{tract_code:06}"),
        format!("Census Tract {}", tract_code / 100),
    );

    // Rent rises away from the grid centre, with noise.
    let centre = (GRID as f64 - 1.0) / 2.0;
    let dist = ((row as f64 - centre).powi(2) + (col as f64 - centre).powi(2)).sqrt();
    let rent = (850.0 + 45.0 * dist + jitter(index, 0, 60.0)).round();
    let pct = (70.0 - 6.0 * dist + jitter(index, 1, 5.0)).clamp(0.0, 100.0);

    // About one tract in twenty has a suppressed rent estimate.
    let rent = if noise(index, 99) < 0.05 {
        Estimate::default()
    } else {
        Estimate::new(Some(rent), Some((rent * 0.06).round()))
    };
    rec.values.insert("median_rent".into(), rent);
    rec.values.insert(
        "pct_black".into(),
        Estimate::new(Some((pct * 10.0).round() / 10.0), Some(2.5)),
    );

    let x0 = ORIGIN.0 + col as f64 * CELL;
    let y0 = ORIGIN.1 + row as f64 * CELL;
    rec.geometry = Some(
        polygon![
            (x: x0, y: y0),
            (x: x0 + CELL, y: y0),
            (x: x0 + CELL, y: y0 + CELL),
            (x: x0, y: y0 + CELL),
            (x: x0, y: y0),
        ]
        .into(),
    );
    rec
}

fn main() -> Result<()> {
    env_logger::init();

    let records: Vec<GeographyRecord> = (0..GRID)
        .flat_map(|row| (0..GRID).map(move |col| tract(row, col)))
        .collect();
    let table = AttributeTable::from_records(
        GeographyLevel::Tract,
        Crs::Nad83,
        vec!["median_rent".into(), "pct_black".into()],
        records,
    );

    for output in ["sample_tracts.geojson", "sample_tracts.parquet"] {
        export(&table, Path::new(output), Crs::Wgs84).with_context(|| format!("writing {output}"))?;
    }

    println!(
        "Wrote {} synthetic tracts ({GRID}×{GRID} grid) to sample_tracts.geojson and sample_tracts.parquet",
        table.len()
    );
    Ok(())
}
