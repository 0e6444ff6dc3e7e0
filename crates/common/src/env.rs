//! Environment/runtime helpers
//!
//! Sanity checks to ensure expected directories exist at startup.

use std::path::Path;

use tracing::{debug, warn};

/// Ensure the parent directory of a state file exists, creating it if needed.
pub async fn ensure_parent_dir(file: &Path) -> anyhow::Result<()> {
    let Some(parent) = file.parent() else { return Ok(()) };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    if tokio::fs::metadata(parent).await.is_ok() {
        debug!(dir = %parent.display(), "state directory present");
        return Ok(());
    }
    warn!(dir = %parent.display(), "state directory not found; creating it");
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", parent.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_parent() -> anyhow::Result<()> {
        let root = std::env::temp_dir().join(format!("broker_env_{}", uuid::Uuid::new_v4()));
        let file = root.join("nested").join("state.json");
        ensure_parent_dir(&file).await?;
        assert!(tokio::fs::metadata(root.join("nested")).await?.is_dir());

        // second call is a no-op
        ensure_parent_dir(&file).await?;
        let _ = tokio::fs::remove_dir_all(&root).await;
        Ok(())
    }

    #[tokio::test]
    async fn bare_file_name_needs_no_directory() -> anyhow::Result<()> {
        ensure_parent_dir(Path::new("state.json")).await
    }
}
