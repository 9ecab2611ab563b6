//! Project working trees
//!
//! Each project gets one directory under the workspace root. Steps mount it
//! into their containers and build images from it.

use std::io;
use std::path::{Path, PathBuf};

use conveyor_core::domain::project::Project;

/// Returns the absolute working tree of `project`, creating it if needed
pub async fn prepare(root: &Path, project: &Project) -> io::Result<PathBuf> {
    let dir = root.join(project.id.to_string());
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::canonicalize(&dir).await
}
