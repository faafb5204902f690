//! Abstract surface of the hosting P2P client. Implementers substitute the
//! host's search/transfer APIs; the coordinator never talks to the network
//! itself.

use std::path::PathBuf;

use async_trait::async_trait;

/// One file offered by a peer in response to a search.
#[derive(Debug, Clone)]
pub struct SearchResultFile {
    pub peer: String,
    pub virtual_path: String,
    pub size_bytes: u64,
    pub bitrate: Option<u32>,
    pub duration_seconds: Option<u32>,
}

impl SearchResultFile {
    /// Basename of the peer's virtual path; Soulseek paths are
    /// backslash-separated.
    pub fn file_name(&self) -> &str {
        self.virtual_path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(&self.virtual_path)
    }

    /// The virtual directory holding this file.
    pub fn folder(&self) -> &str {
        let name_len = self.file_name().len();
        let end = self.virtual_path.len().saturating_sub(name_len);
        self.virtual_path[..end].trim_end_matches(['\\', '/'])
    }

    pub fn extension(&self) -> String {
        self.file_name()
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default()
    }
}

/// Live state of a transfer, looked up by virtual path.
#[derive(Debug, Clone, Copy)]
pub struct TransferSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
}

/// Calls the coordinator issues against the host client.
#[async_trait]
pub trait SoulseekClient: Send + Sync + 'static {
    /// Start a search; returns the client-assigned search token.
    async fn start_search(&self, query: &str) -> anyhow::Result<u32>;

    /// Enqueue a download from a peer.
    async fn enqueue_download(
        &self,
        peer: &str,
        virtual_path: &str,
        size_bytes: u64,
    ) -> anyhow::Result<()>;

    /// Abort a transfer, best-effort.
    async fn abort_download(&self, peer: &str, virtual_path: &str) -> anyhow::Result<()>;

    /// Look up a live transfer; `None` means the client no longer tracks it.
    async fn transfer_snapshot(&self, virtual_path: &str) -> Option<TransferSnapshot>;

    /// Directory the client downloads into.
    fn download_directory(&self) -> PathBuf;
}
