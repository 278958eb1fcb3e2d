// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of the FluxION DLMS/COSEM bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader, Xlsx};
use clap::Parser;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::info;

/// DLMS UA export of the registered manufacturer FLAG IDs
const FLAG_IDS_URL: &str = "https://www.dlms.com/srv/lib/Export_Flagids.php";
const DEFAULT_OUTPUT: &str = "data/dlms_flagids.json";

const FLAG_ID_COLUMN: usize = 0;
const MANUFACTURER_COLUMN: usize = 1;

/// Names that differ from what the meters of that vendor are sold as
const OVERRIDES: &[(&str, &str)] = &[("KFM", "Shenzhen Kaifa Technology Co., Ltd.")];

#[derive(Debug, Parser)]
#[command(name = "update-flagids")]
#[command(
    about = "Refresh the bundled DLMS FLAG ID database from the DLMS UA registry",
    long_about = None
)]
struct Cli {
    /// Use a downloaded XLSX export instead of fetching it
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where to write the JSON database
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
}

/// One registry row: FLAG ID and manufacturer name (may be blank)
type Entry = (String, Option<String>);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Updating flag ids...");

    let bytes = match &cli.input {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => download(FLAG_IDS_URL).await?,
    };

    let mut entries = parse_workbook(&bytes)?;
    apply_overrides(&mut entries);
    write_database(&cli.output, &entries)?;
    info!(
        "✅ Wrote {} flag ids to {}",
        entries.len(),
        cli.output.display()
    );
    Ok(())
}

async fn download(url: &str) -> Result<Vec<u8>> {
    info!("Downloading FLAG IDs from: {}", url);
    let response = reqwest::get(url)
        .await
        .context("Failed to send request to DLMS UA")?;
    if !response.status().is_success() {
        bail!("Failed to download flag ids: HTTP {}", response.status());
    }
    let bytes = response
        .bytes()
        .await
        .context("Failed to read response bytes")?;
    Ok(bytes.to_vec())
}

/// Rows of the first worksheet, header skipped
fn parse_workbook(bytes: &[u8]) -> Result<Vec<Entry>> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).context("Failed to open Excel workbook")?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(first) = sheet_names.first() else {
        bail!("No sheets found in Excel file");
    };
    let range = workbook
        .worksheet_range(first)
        .context("Failed to read worksheet")?;

    Ok(collect_entries(range.rows().skip(1)))
}

fn collect_entries<'a>(rows: impl Iterator<Item = &'a [Data]>) -> Vec<Entry> {
    rows.filter_map(|row| {
        let flag_id = cell_text(row.get(FLAG_ID_COLUMN))?;
        let manufacturer = cell_text(row.get(MANUFACTURER_COLUMN));
        Some((flag_id, manufacturer))
    })
    .collect()
}

fn cell_text(cell: Option<&Data>) -> Option<String> {
    let text = match cell? {
        Data::String(s) => s.trim().to_string(),
        Data::Int(v) => v.to_string(),
        Data::Float(v) => v.to_string(),
        Data::Empty => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Replace registry names for known flag ids; absent or blank entries are left alone
fn apply_overrides(entries: &mut [Entry]) {
    for (flag_id, replacement) in OVERRIDES {
        for (id, manufacturer) in entries.iter_mut().filter(|(id, _)| id == flag_id) {
            match manufacturer.as_deref() {
                Some(previous) if previous != *replacement => {
                    info!("Replaced \"{previous}\" with \"{replacement}\" for {id}");
                    *manufacturer = Some((*replacement).to_string());
                }
                _ => {}
            }
        }
    }
}

/// Pretty JSON object in registry order, one entry per line
fn render_json(entries: &[Entry]) -> Result<String> {
    if entries.is_empty() {
        return Ok("{}\n".to_string());
    }

    let mut lines = Vec::with_capacity(entries.len());
    for (flag_id, manufacturer) in entries {
        lines.push(format!(
            "  {}: {}",
            serde_json::to_string(flag_id)?,
            serde_json::to_string(manufacturer)?
        ));
    }
    Ok(format!("{{\n{}\n}}\n", lines.join(",\n")))
}

fn write_database(path: &Path, entries: &[Entry]) -> Result<()> {
    let json = render_json(entries)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
