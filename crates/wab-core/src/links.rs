//! Group invitation links shared by users.
//!
//! The collected set is small, so it is kept fully in memory and the file is
//! rewritten wholesale whenever it changes.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

use crate::{errors::Error, utils::write_atomic, Result};

pub const INVITE_LINK_PATTERN: &str = r"https://chat\.whatsapp\.com/\S+";

fn invite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(INVITE_LINK_PATTERN).expect("invite link pattern is valid"))
}

/// Every invitation link in `text`, in order of appearance (duplicates kept).
pub fn find_invite_links(text: &str) -> Vec<String> {
    invite_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// JSON array of strings on disk.
#[derive(Clone, Debug)]
pub struct LinkFile {
    path: PathBuf,
}

impl LinkFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty set.
    pub fn load(&self) -> Result<Vec<String>> {
        let txt = match std::fs::read_to_string(&self.path) {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if txt.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&txt)?)
    }

    pub async fn save(&self, links: &[String]) -> Result<()> {
        let txt = serde_json::to_vec_pretty(links)?;
        write_atomic(&self.path, &txt)
            .await
            .map_err(|e| Error::PersistenceFailed(format!("{}: {e}", self.path.display())))
    }
}

/// Ordered, de-duplicated set of collected links backed by a [`LinkFile`].
#[derive(Debug)]
pub struct LinkCollector {
    links: Vec<String>,
    file: LinkFile,
}

impl LinkCollector {
    /// Load the persisted set once at startup.
    pub fn open(file: LinkFile) -> Result<Self> {
        let mut links = Vec::new();
        for link in file.load()? {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        Ok(Self { links, file })
    }

    pub fn links(&self) -> &[String] {
        &self.links
    }

    /// Append links from `text` not seen before and persist the whole set.
    ///
    /// Returns only the newly added links. A failed write is logged; the
    /// in-memory set stays authoritative for the rest of the process.
    pub async fn scan(&mut self, text: &str) -> Vec<String> {
        let mut added = Vec::new();
        for link in find_invite_links(text) {
            if self.links.contains(&link) {
                continue;
            }
            tracing::info!(link = %link, "new link collected");
            self.links.push(link.clone());
            added.push(link);
        }

        if !added.is_empty() {
            self.persist().await;
        }
        added
    }

    /// Empty the set; returns how many links were dropped.
    pub async fn clear(&mut self) -> usize {
        let n = self.links.len();
        self.links.clear();
        self.persist().await;
        n
    }

    async fn persist(&self) {
        if let Err(e) = self.file.save(&self.links).await {
            tracing::error!(error = %e, "failed to persist collected links");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tmp_path;

    fn collector(prefix: &str) -> LinkCollector {
        LinkCollector::open(LinkFile::new(tmp_path(prefix, "json"))).unwrap()
    }

    #[test]
    fn finds_links_and_stops_at_whitespace() {
        let found = find_invite_links(
            "join https://chat.whatsapp.com/ABC123 and https://chat.whatsapp.com/xyz!\nok",
        );
        assert_eq!(
            found,
            vec![
                "https://chat.whatsapp.com/ABC123".to_string(),
                "https://chat.whatsapp.com/xyz!".to_string()
            ]
        );
        assert!(find_invite_links("http://chat.whatsapp.com/insecure").is_empty());
        assert!(find_invite_links("https://wa.me/5511").is_empty());
    }

    #[tokio::test]
    async fn scan_is_idempotent_and_persists() {
        let mut c = collector("wab-links-idem");
        let text = "check this: https://chat.whatsapp.com/XYZ";

        assert_eq!(c.scan(text).await, vec!["https://chat.whatsapp.com/XYZ".to_string()]);
        assert!(c.scan(text).await.is_empty());
        assert_eq!(c.links(), &["https://chat.whatsapp.com/XYZ".to_string()]);

        let on_disk = c.file.load().unwrap();
        assert_eq!(on_disk, c.links());

        let _ = std::fs::remove_file(c.file.path());
    }

    #[tokio::test]
    async fn keeps_first_seen_order_across_messages() {
        let mut c = collector("wab-links-order");
        c.scan("https://chat.whatsapp.com/B https://chat.whatsapp.com/A").await;
        c.scan("https://chat.whatsapp.com/A https://chat.whatsapp.com/C https://chat.whatsapp.com/C").await;
        assert_eq!(
            c.links(),
            &[
                "https://chat.whatsapp.com/B".to_string(),
                "https://chat.whatsapp.com/A".to_string(),
                "https://chat.whatsapp.com/C".to_string(),
            ]
        );

        let _ = std::fs::remove_file(c.file.path());
    }

    #[tokio::test]
    async fn reopen_reads_persisted_set_and_clear_empties_it() {
        let path = tmp_path("wab-links-reopen", "json");
        {
            let mut c = LinkCollector::open(LinkFile::new(&path)).unwrap();
            c.scan("https://chat.whatsapp.com/ONE").await;
        }

        let mut c = LinkCollector::open(LinkFile::new(&path)).unwrap();
        assert_eq!(c.links(), &["https://chat.whatsapp.com/ONE".to_string()]);

        assert_eq!(c.clear().await, 1);
        assert!(LinkFile::new(&path).load().unwrap().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failed_persistence_keeps_memory_authoritative() {
        let path = tmp_path("wab-links-nodir", "d").join("links.json");
        let mut c = LinkCollector::open(LinkFile::new(&path)).unwrap();

        let added = c.scan("https://chat.whatsapp.com/KEEP").await;
        assert_eq!(added.len(), 1);
        assert_eq!(c.links(), &["https://chat.whatsapp.com/KEEP".to_string()]);
        assert!(matches!(
            c.file.save(c.links()).await,
            Err(Error::PersistenceFailed(_))
        ));
    }

    #[test]
    fn corrupt_file_is_an_error_not_an_empty_set() {
        let path = tmp_path("wab-links-corrupt", "json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(LinkCollector::open(LinkFile::new(&path)).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
