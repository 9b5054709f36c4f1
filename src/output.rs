//! CLI output formatting for the library commands.
//!
//! Output leads with the asset's identity (`#id file`), with per-size detail
//! on indented lines below it.
//!
//! ## Ingest
//!
//! ```text
//! #1 2023/05/photo.jpg (1200x800)
//!     URL: /wp-content/uploads/2023/05/photo.jpg
//!     thumbnail: generated
//!     hero: deferred
//! ```
//!
//! ## Check
//!
//! ```text
//! #1 2023/05/photo.jpg
//!     hero: photo-1000x500.jpg missing
//!
//! 1 asset with 1 pending size
//! ```
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::library::{AssetId, AttachmentMetadata, PendingSizes};
use crate::materialize::MaterializeError;
use crate::upload::{AdoptReport, IngestReport};

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// ingest
// ============================================================================

pub fn format_ingest_report(report: &IngestReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "#{} {} ({}x{})",
            report.id, report.file, report.width, report.height
        ),
        format!("    URL: {}", report.url),
    ];
    for name in &report.generated {
        lines.push(format!("    {name}: generated"));
    }
    for name in &report.deferred {
        lines.push(format!("    {name}: deferred"));
    }
    lines
}

pub fn print_ingest_report(report: &IngestReport) {
    for line in format_ingest_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// index
// ============================================================================

pub fn format_adopt_report(report: &AdoptReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .adopted
        .iter()
        .map(|file| format!("    {file}"))
        .collect();
    if !lines.is_empty() {
        lines.insert(0, "Adopted".to_string());
        lines.push(String::new());
    }
    lines.push(format!(
        "Adopted {}, {} already registered, {} skipped",
        plural(report.adopted.len(), "original"),
        report.known,
        plural(report.variants, "variant"),
    ));
    lines
}

pub fn print_adopt_report(report: &AdoptReport) {
    for line in format_adopt_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// regenerate
// ============================================================================

/// One line per asset, then one line per written size.
pub fn format_regenerate_results(
    results: &[(AssetId, Result<AttachmentMetadata, MaterializeError>)],
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut failed = 0;
    for (id, result) in results {
        match result {
            Ok(metadata) => {
                lines.push(format!("#{id} {}", plural(metadata.sizes.len(), "size")));
                for (name, record) in &metadata.sizes {
                    lines.push(format!("    {name}: {}", record.file));
                }
            }
            Err(e) => {
                failed += 1;
                lines.push(format!("#{id} failed: {e}"));
            }
        }
    }
    lines.push(String::new());
    lines.push(format!(
        "Regenerated {}, {} failed",
        plural(results.len() - failed, "asset"),
        failed
    ));
    lines
}

pub fn print_regenerate_results(results: &[(AssetId, Result<AttachmentMetadata, MaterializeError>)]) {
    for line in format_regenerate_results(results) {
        println!("{}", line);
    }
}

// ============================================================================
// check
// ============================================================================

pub fn format_pending_sizes(pending: &[PendingSizes]) -> Vec<String> {
    if pending.is_empty() {
        return vec!["All size records have files".to_string()];
    }
    let mut lines = Vec::new();
    for asset in pending {
        lines.push(format!("#{} {}", asset.id, asset.file));
        for (name, file) in &asset.missing {
            lines.push(format!("    {name}: {file} missing"));
        }
    }
    let total: usize = pending.iter().map(|p| p.missing.len()).sum();
    lines.push(String::new());
    lines.push(format!(
        "{} with {}",
        plural(pending.len(), "asset"),
        plural(total, "pending size")
    ));
    lines
}

pub fn print_pending_sizes(pending: &[PendingSizes]) {
    for line in format_pending_sizes(pending) {
        println!("{}", line);
    }
}
