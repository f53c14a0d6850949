//! File-selection sub-component.
//!
//! Holds the browser cursor and what the user picked: either a set of keystore
//! files or a single directory, never both.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct FileSelector {
    root: PathBuf,
    cwd: PathBuf,
    extension: String,
    entries: Vec<BrowserEntry>,
    cursor: usize,
    selected_files: BTreeSet<PathBuf>,
    selected_directory: Option<PathBuf>,
}

impl FileSelector {
    /// `extension` filters the files shown in the browser (without the dot).
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            cwd: root.clone(),
            root,
            extension: extension.into(),
            entries: Vec::new(),
            cursor: 0,
            selected_files: BTreeSet::new(),
            selected_directory: None,
        }
    }

    /// Back to the start directory with nothing selected.
    pub fn reset(&mut self) {
        self.cwd = self.root.clone();
        self.entries.clear();
        self.cursor = 0;
        self.selected_files.clear();
        self.selected_directory = None;
    }

    /// Re-read the current directory.
    pub fn refresh(&mut self) -> io::Result<()> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.cwd)? {
            let entry = entry?;
            let path = entry.path();
            let is_dir = entry.file_type()?.is_dir();
            if !is_dir && !has_extension(&path, &self.extension) {
                continue;
            }
            entries.push(BrowserEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                is_dir,
            });
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        self.entries = entries;
        self.cursor = self.cursor.min(self.entries.len().saturating_sub(1));
        Ok(())
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn entries(&self) -> &[BrowserEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&BrowserEntry> {
        self.entries.get(self.cursor)
    }

    pub fn move_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        if self.cursor + 1 < self.entries.len() {
            self.cursor += 1;
        }
    }

    /// Descend into the directory under the cursor.
    pub fn enter(&mut self) -> io::Result<()> {
        let Some(entry) = self.current().filter(|e| e.is_dir).cloned() else {
            return Ok(());
        };
        let previous = std::mem::replace(&mut self.cwd, entry.path);
        self.cursor = 0;
        if let Err(e) = self.refresh() {
            self.cwd = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn parent(&mut self) -> io::Result<()> {
        if let Some(parent) = self.cwd.parent().map(Path::to_path_buf) {
            self.cwd = parent;
            self.cursor = 0;
            self.refresh()?;
        }
        Ok(())
    }

    /// Toggle the file under the cursor. Picking a file drops a chosen directory.
    pub fn toggle_current(&mut self) {
        let Some(entry) = self.current().filter(|e| !e.is_dir) else {
            return;
        };
        let path = entry.path.clone();
        self.toggle_file(path);
    }

    pub fn toggle_file(&mut self, path: PathBuf) {
        self.selected_directory = None;
        if !self.selected_files.remove(&path) {
            self.selected_files.insert(path);
        }
    }

    pub fn select_files<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        self.selected_directory = None;
        self.selected_files.extend(paths);
    }

    /// Choose a whole directory. Clears any file selection.
    pub fn select_directory(&mut self, path: PathBuf) {
        self.selected_files.clear();
        self.selected_directory = Some(path);
    }

    /// Choose the directory under the cursor, or the current one if the
    /// cursor is on a file.
    pub fn select_current_directory(&mut self) {
        let path = match self.current() {
            Some(entry) if entry.is_dir => entry.path.clone(),
            _ => self.cwd.clone(),
        };
        self.select_directory(path);
    }

    pub fn is_selected(&self, path: &Path) -> bool {
        self.selected_files.contains(path) || self.selected_directory.as_deref() == Some(path)
    }

    pub fn selected_files(&self) -> Vec<PathBuf> {
        self.selected_files.iter().cloned().collect()
    }

    pub fn selected_directory(&self) -> Option<&Path> {
        self.selected_directory.as_deref()
    }

    pub fn has_selection(&self) -> bool {
        !self.selected_files.is_empty() || self.selected_directory.is_some()
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
}
