//! Document registry commands (add, remove, list, history, clear-history, retry)

use std::io::Write;

use anyhow::{Context, Result};
use lifeline_keeper::{BlockCount, ContentKey, DocumentId, DocumentRecord};

use super::Workspace;

/// Register a new document
pub fn add(workspace: &Workspace, reference: &str, out: &mut impl Write) -> Result<()> {
    let reference = reference.trim();
    if reference.is_empty() {
        anyhow::bail!("Document reference must not be empty");
    }
    let id = workspace.tracker.add_document(ContentKey::new(reference))?;
    writeln!(out, "Added document {}: {}", id, reference)?;
    Ok(())
}

/// Stop tracking a document and delete its on-disk artifacts
pub fn remove(workspace: &Workspace, id: DocumentId, out: &mut impl Write) -> Result<()> {
    let record = workspace.tracker.remove_document(id)?;

    workspace
        .layout
        .manifests()
        .remove(id)
        .with_context(|| format!("Failed to delete manifest of document {}", id))?;
    workspace
        .root_cache()
        .remove(id)
        .with_context(|| format!("Failed to delete cached root of document {}", id))?;
    let journal = workspace.layout.journal(id);
    match std::fs::remove_file(&journal) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to delete {}", journal.display()));
        }
    }

    writeln!(out, "Removed document {}: {}", id, record.root)?;
    Ok(())
}

/// List documents with availability statistics
pub fn list(workspace: &Workspace, json: bool, out: &mut impl Write) -> Result<()> {
    let documents = workspace.tracker.documents();
    let active = workspace.tracker.active();

    if json {
        let rows: Vec<_> = documents
            .iter()
            .map(|doc| {
                serde_json::json!({
                    "id": doc.id,
                    "root": doc.root,
                    "state": state_label(doc),
                    "active": active == Some(doc.id),
                    "stats": doc.stats(),
                    "history": doc.history,
                })
            })
            .collect();
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }

    if documents.is_empty() {
        writeln!(out, "No documents tracked")?;
        return Ok(());
    }

    writeln!(
        out,
        "{:<4} {:<11} {:>8} {:>9} {:>8} {:>7} {:>9}  {}",
        "ID", "STATE", "BLOCKS", "AVAILABLE", "MISSING", "BLOCK%", "SEGMENT%", "ROOT"
    )?;
    for doc in &documents {
        let stats = doc.stats();
        let marker = if active == Some(doc.id) { "*" } else { "" };
        writeln!(
            out,
            "{:<4} {:<11} {:>8} {:>9} {:>8} {:>6.1}% {:>8.1}%  {}",
            format!("{}{}", doc.id, marker),
            state_label(doc),
            stats.blocks.map_or_else(|| "-".to_string(), |b| b.to_string()),
            stats.available,
            stats.missing,
            stats.persistence_percent,
            stats.segment_availability_percent,
            doc.root
        )?;
    }
    Ok(())
}

/// Print the monthly persistence history
pub fn history(workspace: &Workspace, id: DocumentId, out: &mut impl Write) -> Result<()> {
    let record = workspace.tracker.document(id)?;
    if record.history.is_empty() {
        writeln!(out, "No history for document {}", id)?;
        return Ok(());
    }
    writeln!(out, "{:<8} PERSISTENCE", "MONTH")?;
    for entry in record.history.entries() {
        writeln!(
            out,
            "{:<8} {}%",
            format!("{:02}.{}", entry.month, entry.year),
            entry.persistence
        )?;
    }
    Ok(())
}

pub fn clear_history(workspace: &Workspace, id: DocumentId, out: &mut impl Write) -> Result<()> {
    workspace.tracker.clear_history(id)?;
    writeln!(out, "Cleared history of document {}", id)?;
    Ok(())
}

/// Force rediscovery on the next pass
pub fn retry(workspace: &Workspace, id: DocumentId, out: &mut impl Write) -> Result<()> {
    let before = workspace.tracker.document(id)?;
    workspace.tracker.retrigger(id)?;
    if before.block_count == BlockCount::Failed {
        writeln!(out, "Document {} will be rediscovered; its root previously failed", id)?;
    } else {
        writeln!(out, "Document {} will be rediscovered", id)?;
    }
    Ok(())
}

fn state_label(doc: &DocumentRecord) -> &'static str {
    match doc.block_count {
        BlockCount::Unknown => "undiscovered",
        BlockCount::Failed => "failed",
        BlockCount::Known(_) if doc.cursor.is_some() => "in-progress",
        BlockCount::Known(_) => "discovered",
    }
}
