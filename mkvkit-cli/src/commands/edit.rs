//! In-place metadata editing command.

use crate::{format_size, OutputMode};
use anyhow::Context;
use clap::Args;
use console::style;
use mkvkit_matroska::elements::{element_name, CHAPTERS, INFO, TAGS, TITLE};
use mkvkit_matroska::{
    Element, ElementIndex, ParseMode, SegmentIo, UpdateOptions, UpdateOutcome, UpdateReport,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::Status;

/// Rewrite the metadata of a Matroska file in place.
#[derive(Args, Debug)]
pub struct CmdEdit {
    /// Path to the Matroska file to modify.
    pub file: PathBuf,

    /// Set the segment title
    #[arg(long)]
    pub title: Option<String>,

    /// Copy the Tags of another Matroska file
    #[arg(long, value_name = "MKV", conflicts_with = "remove_tags")]
    pub tags_from: Option<PathBuf>,

    /// Copy the Chapters of another Matroska file
    #[arg(long, value_name = "MKV", conflicts_with = "remove_chapters")]
    pub chapters_from: Option<PathBuf>,

    /// Remove all Tags
    #[arg(long)]
    pub remove_tags: bool,

    /// Remove all Chapters
    #[arg(long)]
    pub remove_chapters: bool,

    /// Keep children whose value equals their default
    #[arg(long)]
    pub write_defaults: bool,
}

/// One change applied to the file.
#[derive(Debug, Clone, Serialize)]
pub struct EditResult {
    /// Name of the element changed.
    pub element: &'static str,
    /// What the updater did.
    #[serde(flatten)]
    pub report: UpdateReport,
}

/// A single requested change.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Replace the element with this tree.
    Replace(Element),
    /// Remove every occurrence of the element.
    Remove(u32),
}

impl CmdEdit {
    /// Execute the edit command.
    pub fn run(&self, mode: OutputMode) -> anyhow::Result<Status> {
        if !self.file.exists() {
            anyhow::bail!("File not found: {}", self.file.display());
        }

        let mut index = ElementIndex::open(&self.file, ParseMode::Fast)
            .with_context(|| format!("cannot index {}", self.file.display()))?;
        let edits = self.collect_edits(&mut index)?;
        if edits.is_empty() {
            anyhow::bail!("nothing to do; pass --title, --tags-from, --chapters-from or a --remove flag");
        }

        let results = apply_edits(&mut index, edits, self.options())?;
        let status = Status::from_anomalies(index.anomalies().len());

        match mode {
            OutputMode::Json => {
                let output = serde_json::json!({
                    "type": "edit_complete",
                    "file": self.file.display().to_string(),
                    "changes": results,
                    "anomalies": index.anomalies(),
                });
                println!("{}", output);
            }
            OutputMode::Quiet => {}
            OutputMode::Normal | OutputMode::Verbose => {
                print_results(&self.file, &results);
                if status == Status::Warnings {
                    println!(
                        "  {} {} structural anomalies found, see `mkvkit info`",
                        style("Warning:").yellow().bold(),
                        index.anomalies().len()
                    );
                }
            }
        }

        Ok(status)
    }

    fn options(&self) -> UpdateOptions {
        UpdateOptions::default().with_write_defaults(self.write_defaults)
    }

    /// Build the list of changes, reading source files first so that a bad
    /// source leaves the target untouched.
    fn collect_edits<F: SegmentIo>(&self, index: &mut ElementIndex<F>) -> anyhow::Result<Vec<Edit>> {
        let mut edits = Vec::new();

        if let Some(title) = &self.title {
            let mut info = index
                .read_all(INFO)?
                .unwrap_or_else(|| Element::master(INFO, Vec::new()));
            info.replace_child(Element::utf8(TITLE, title.clone()));
            edits.push(Edit::Replace(info));
        }

        if let Some(source) = &self.chapters_from {
            edits.push(Edit::Replace(read_from(source, CHAPTERS)?));
        } else if self.remove_chapters {
            edits.push(Edit::Remove(CHAPTERS));
        }

        if let Some(source) = &self.tags_from {
            edits.push(Edit::Replace(read_from(source, TAGS)?));
        } else if self.remove_tags {
            edits.push(Edit::Remove(TAGS));
        }

        Ok(edits)
    }
}

/// Read the merged `id` element of another file.
fn read_from(source: &Path, id: u32) -> anyhow::Result<Element> {
    let mut index = ElementIndex::open(source, ParseMode::Fast)
        .with_context(|| format!("cannot index {}", source.display()))?;
    index
        .read_all(id)?
        .with_context(|| format!("{} has no {}", source.display(), element_name(id)))
}

/// Apply `edits` in order. Removing an element the file does not have is
/// not an error.
pub fn apply_edits<F: SegmentIo>(
    index: &mut ElementIndex<F>,
    edits: Vec<Edit>,
    options: UpdateOptions,
) -> anyhow::Result<Vec<EditResult>> {
    let mut results = Vec::new();
    for edit in edits {
        let (id, report) = match edit {
            Edit::Replace(element) => {
                let report = index
                    .update_element(&element, options)
                    .with_context(|| format!("cannot update {}", element_name(element.id)))?;
                (element.id, report)
            }
            Edit::Remove(id) => {
                if index.find(id).is_none() {
                    debug!(element = element_name(id), "Nothing to remove");
                    continue;
                }
                let report = index
                    .remove_elements(id)
                    .with_context(|| format!("cannot remove {}", element_name(id)))?;
                (id, report)
            }
        };
        info!(
            element = element_name(id),
            outcome = ?report.outcome,
            length = report.file_length_after,
            "Element updated"
        );
        results.push(EditResult {
            element: element_name(id),
            report,
        });
    }
    Ok(results)
}

fn print_results(file: &Path, results: &[EditResult]) {
    println!();
    println!("{}", style("Edit Complete:").cyan().bold());
    println!("  File:     {}", style(file.display()).white());
    for result in results {
        let what = match result.report.outcome {
            UpdateOutcome::InPlace { position } => format!("rewritten in place at {}", position),
            UpdateOutcome::Relocated { from, to } => format!("moved from {} to {}", from, to),
            UpdateOutcome::Inserted { position } => format!("inserted at {}", position),
            UpdateOutcome::Removed { count } => format!("{} occurrence(s) removed", count),
        };
        println!("  {:<9} {}", style(format!("{}:", result.element)).green(), what);
    }
    if let (Some(first), Some(last)) = (results.first(), results.last()) {
        let before = first.report.file_length_before;
        let after = last.report.file_length_after;
        if before == after {
            println!("  Size:     {} (unchanged)", format_size(after));
        } else {
            println!("  Size:     {} -> {}", format_size(before), format_size(after));
        }
    }
    println!();
}
