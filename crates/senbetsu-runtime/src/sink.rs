use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use senbetsu_core::{Entry, EntrySink, SenbetsuError};

use crate::ledger::Ledger;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Records accepted entries on disk: a line in the links file, an optional
/// `.torrent` download, and the id in the ledger.
pub struct LinkSink {
    client: reqwest::Client,
    links_file: PathBuf,
    torrent_dir: Option<PathBuf>,
    ledger: Ledger,
}

impl LinkSink {
    pub fn new(
        client: reqwest::Client,
        links_file: PathBuf,
        torrent_dir: Option<PathBuf>,
        ledger: Ledger,
    ) -> Self {
        Self {
            client,
            links_file,
            torrent_dir,
            ledger,
        }
    }

    async fn append_link(&self, entry: &Entry) -> Result<(), SenbetsuError> {
        if let Some(parent) = self.links_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = entry.torrent_url.clone();
        if let Some(magnet) = &entry.magnet_uri {
            line.push('\t');
            line.push_str(magnet);
        }
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.links_file)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn download(&self, dir: &Path, id: u64, entry: &Entry) -> Result<(), SenbetsuError> {
        let sink_err =
            |e: reqwest::Error| SenbetsuError::Sink(format!("download {}: {e}", entry.torrent_url));
        let bytes = self
            .client
            .get(&entry.torrent_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(sink_err)?
            .bytes()
            .await
            .map_err(sink_err)?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{id}.torrent"));
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Torrent saved");
        Ok(())
    }
}

impl EntrySink for LinkSink {
    async fn deliver(&mut self, entry: &Entry) -> Result<(), SenbetsuError> {
        let id = entry.require_id()?;
        if self.ledger.contains(id) {
            debug!(entry = %entry.label(), "Already delivered, skipping");
            return Ok(());
        }

        if let Some(dir) = &self.torrent_dir {
            self.download(dir, id, entry).await?;
        }
        self.append_link(entry).await?;
        self.ledger.record(id).await?;
        info!(entry = %entry.label(), url = %entry.torrent_url, "Delivered");
        Ok(())
    }
}

/// Writes each entry as one JSON line, touching nothing else.
pub struct PrintSink<W> {
    out: W,
}

impl<W: Write + Send> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EntrySink for PrintSink<W> {
    async fn deliver(&mut self, entry: &Entry) -> Result<(), SenbetsuError> {
        let line = serde_json::to_string(entry)
            .map_err(|e| SenbetsuError::Sink(format!("encode {}: {e}", entry.label())))?;
        writeln!(self.out, "{line}")?;
        Ok(())
    }
}

/// The sink a cycle delivers to, picked from the command line.
pub enum OutputSink {
    Links(LinkSink),
    Print(PrintSink<std::io::Stdout>),
}

impl EntrySink for OutputSink {
    async fn deliver(&mut self, entry: &Entry) -> Result<(), SenbetsuError> {
        match self {
            Self::Links(sink) => sink.deliver(entry).await,
            Self::Print(sink) => sink.deliver(entry).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use senbetsu_core::RawItem;
    use tempfile::TempDir;

    fn entry(id: u64) -> Entry {
        Entry::extract(&RawItem {
            title: format!("[Group] Show - {id:02}"),
            guid: format!("https://www.tokyotosho.info/details.php?id={id}"),
            description: format!(
                r#"<a href="https://example.org/{id}.torrent">Torrent</a> <a href="magnet:?xt=urn:btih:{id}">Magnet</a>"#
            ),
            ..Default::default()
        })
    }

    fn link_sink(dir: &TempDir) -> LinkSink {
        let ledger = Ledger::load(&dir.path().join("accepted.txt")).unwrap();
        LinkSink::new(
            reqwest::Client::new(),
            dir.path().join("links.txt"),
            None,
            ledger,
        )
    }

    #[tokio::test]
    async fn test_link_sink_appends_and_records() {
        let dir = TempDir::new().unwrap();
        let mut sink = link_sink(&dir);

        sink.deliver(&entry(1)).await.unwrap();
        sink.deliver(&entry(2)).await.unwrap();

        let links = std::fs::read_to_string(dir.path().join("links.txt")).unwrap();
        assert_eq!(
            links,
            "https://example.org/1.torrent\tmagnet:?xt=urn:btih:1\n\
             https://example.org/2.torrent\tmagnet:?xt=urn:btih:2\n"
        );
        let ledger = Ledger::load(&dir.path().join("accepted.txt")).unwrap();
        assert!(ledger.contains(1) && ledger.contains(2));
    }

    #[tokio::test]
    async fn test_link_sink_skips_ledger_ids() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("accepted.txt"), "1\n").unwrap();
        let mut sink = link_sink(&dir);

        sink.deliver(&entry(1)).await.unwrap();
        assert!(!dir.path().join("links.txt").exists());
    }

    #[tokio::test]
    async fn test_link_sink_requires_id() {
        let dir = TempDir::new().unwrap();
        let mut sink = link_sink(&dir);
        let no_id = Entry::extract(&RawItem::default());

        match sink.deliver(&no_id).await {
            Err(SenbetsuError::Extraction(_)) => {}
            other => panic!("Expected Extraction error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_print_sink_writes_json_lines() {
        let mut sink = PrintSink::new(Vec::new());
        sink.deliver(&entry(3)).await.unwrap();
        sink.deliver(&entry(4)).await.unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 3);
        assert_eq!(lines[1]["torrent_url"], "https://example.org/4.torrent");
    }
}
