//! Content source over an unpacked document directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tracing::debug;

use crate::error::SourceError;
use crate::source::ContentSource;

use super::{Result, util};

/// Chapters are the markup files under `root`, in natural order; every other file is a
/// resource addressable from the chapters.
#[derive(Debug, Clone)]
pub struct FolderSource {
    root: PathBuf,
    chapters: Vec<PathBuf>,
}

impl FolderSource {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let chapters = collect_chapters(&root)?;
        debug!(
            target: "fs::folder",
            root = %root.display(),
            chapters = chapters.len(),
            "opened folder"
        );
        Ok(Self { root, chapters })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chapter paths relative to the root.
    pub fn chapters(&self) -> &[PathBuf] {
        &self.chapters
    }

    fn chapter_path(&self, chapter_index: u32) -> Option<&PathBuf> {
        self.chapters.get(chapter_index as usize)
    }
}

impl ContentSource for FolderSource {
    fn chapter_count(&self) -> u32 {
        self.chapters.len() as u32
    }

    fn get_chapter_markup(
        &mut self,
        chapter_index: u32,
    ) -> std::result::Result<Vec<u8>, SourceError> {
        let rel = self
            .chapter_path(chapter_index)
            .ok_or_else(|| SourceError::NotFound(format!("chapter {chapter_index}")))?;
        Ok(fs::read(self.root.join(rel))?)
    }

    fn get_resource(
        &mut self,
        path: &str,
        _relative_to: u32,
    ) -> std::result::Result<Vec<u8>, SourceError> {
        let rel = util::sanitize_relative(Path::new(path)).ok_or_else(|| {
            SourceError::Corrupted {
                what: path.to_string(),
                reason: "resource path escapes the document root".to_string(),
            }
        })?;
        Ok(fs::read(self.root.join(rel))?)
    }

    /// Root-relative, `/`-separated form of `path` as seen from the chapter's directory.
    /// References that would leave the root are returned unchanged so the fetch rejects them.
    fn resolve_path(&self, path: &str, relative_to: u32) -> String {
        let base = self
            .chapter_path(relative_to)
            .and_then(|chapter| chapter.parent())
            .unwrap_or_else(|| Path::new(""));
        util::resolve_reference(base, path).unwrap_or_else(|| path.to_string())
    }
}

fn collect_chapters(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(anyhow!("folder {:?} does not exist", root));
    }
    if !root.is_dir() {
        return Err(anyhow!("folder {:?} is not a directory", root));
    }

    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if util::is_hidden(&path) {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && util::is_markup(&path) {
                let rel = path.strip_prefix(root).unwrap_or_else(|_| path.as_path()).to_path_buf();
                entries.push(rel);
            }
        }
    }

    entries.sort_by(|a, b| util::natural_cmp_path(a, b));
    Ok(entries)
}
