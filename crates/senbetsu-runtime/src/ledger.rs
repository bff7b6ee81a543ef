use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Ids of entries already delivered, one per line on disk.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    ids: HashSet<u64>,
}

impl Ledger {
    /// Read the ledger at `path`. A missing file is an empty ledger;
    /// lines that are not ids are ignored.
    pub fn load(path: &Path) -> io::Result<Self> {
        let ids = match fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .filter_map(|line| line.trim().parse().ok())
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            ids,
        })
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append `id` to the file. Recording a known id does nothing.
    pub async fn record(&mut self, id: u64) -> io::Result<()> {
        if self.ids.contains(&id) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{id}\n").as_bytes()).await?;
        file.flush().await?;
        self.ids.insert(id);
        Ok(())
    }
}
