use std::path::{Component, Path, PathBuf};
use chrono::{DateTime, Local};
use crate::error::{Error, Result};

/// Extension used when the client gives us nothing to go on
pub const FALLBACK_EXTENSION: &str = ".jpg";

/// Stem used when the client-supplied name has no usable base
const FALLBACK_STEM: &str = "photo";

/// Directory convention for stored backups: `<root>/<YYYY-MM-DD>/<millis>-<name><ext>`
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create the backup root if it doesn't exist
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Error::storage(&root, e))?;
        tracing::info!("Backup root: {}", root.display());
        Ok(Self { root })
    }

    /// Date partition for `now`, created on demand
    pub async fn resolve_destination(&self, now: &DateTime<Local>) -> Result<PathBuf> {
        let dir = self.root.join(date_partition(now));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::storage(&dir, e))?;
        Ok(dir)
    }

    /// `path` relative to the backup root, always with `/` separators
    pub fn relative_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

pub fn date_partition(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// A generated filename, split so a collision suffix can be inserted before the extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    prefix: String,
    ext: String,
}

impl FileName {
    /// Derive the name from the declared name when non-empty, otherwise the original one
    pub fn plan(declared: Option<&str>, original: &str, epoch_millis: i64) -> Self {
        let chosen = declared
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(original);

        let (stem, ext) = split_extension(final_component(chosen));
        let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };
        let ext = if ext.is_empty() { FALLBACK_EXTENSION } else { ext };

        Self {
            prefix: format!("{}-{}", epoch_millis, stem),
            ext: ext.to_string(),
        }
    }

    /// Attempt 0 is the plain name; later attempts append `-<n>` to the stem
    pub fn render(&self, attempt: u32) -> String {
        if attempt == 0 {
            format!("{}{}", self.prefix, self.ext)
        } else {
            format!("{}-{}{}", self.prefix, attempt, self.ext)
        }
    }
}

// Clients may send full paths; only the last component is ours to use.
fn final_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn split_extension(name: &str) -> (&str, &str) {
    if name == "." || name == ".." {
        return ("", "");
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
