//! log command - show the journal of a document's last pass

use std::io::Write;

use anyhow::{Context, Result};
use lifeline_keeper::DocumentId;
use lifeline_telemetry::DocumentJournal;

use super::Workspace;

pub fn execute(workspace: &Workspace, id: DocumentId, out: &mut impl Write) -> Result<()> {
    workspace.tracker.document(id)?;

    let path = workspace.layout.journal(id);
    if !path.exists() {
        writeln!(out, "No journal for document {} yet", id)?;
        return Ok(());
    }
    let text = DocumentJournal::read(&path)
        .with_context(|| format!("Failed to read journal {}", path.display()))?;
    out.write_all(text.as_bytes())?;
    Ok(())
}
