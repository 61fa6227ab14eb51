//! Directory-listing cache.
//!
//! The filesystem adapter above this crate asks for directory entries by
//! index ("give me entry N"), while SMB2 Query Directory only scans
//! forward with an optional restart. The cache keeps the last batch the
//! server returned plus the server's cursor position so sequential access
//! costs one round trip per batch, and a backwards jump restarts the scan
//! only when the target really is behind the cursor.
//!
//! Entry indices are 1-based: indices 0 and -1 belong to the synthetic "."
//! and ".." entries owned by the adapter layer, and the cache never stores
//! them.

use tracing::{debug, trace};

use super::{Connection, Terminal, TreeHandle};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{query_directory_flags, Smb2Command};
use crate::protocol::messages::common::FileId;
use crate::protocol::messages::create::{CloseRequest, CreateRequest, CreateResponse};
use crate::protocol::messages::directory::{
    parse_entries, DirectoryEntry, QueryDirectoryRequest, QueryDirectoryResponse,
};
use crate::protocol::messages::SmbMessage;

/// Cached enumeration state for one share binding.
///
/// Invariant: when `entries` is non-empty, `last_accessed` indexes into it
/// and `first_index >= 1`. Invalidation is wholesale; the cache never holds
/// a partial or suspect window.
#[derive(Debug, Default)]
pub struct DirCache {
    /// Tree-connect epoch this state was built under; a mismatch with the
    /// owning tree means a reconnect happened and everything here is stale
    epoch: u64,
    /// Open handle on the share root used for enumeration
    handle: Option<FileId>,
    /// Next index the server's scan would return; 0 = position unknown,
    /// the next query must restart
    server_cursor: i64,
    /// Index of `entries[0]`
    first_index: i64,
    entries: Vec<DirectoryEntry>,
    /// Offset within `entries` of the most recent hit, the sequential-scan
    /// fast path
    last_accessed: usize,
}

impl DirCache {
    /// Drop the cached window but keep the open handle and cursor.
    fn invalidate_entries(&mut self) {
        self.entries.clear();
        self.first_index = 0;
        self.last_accessed = 0;
    }

    /// Drop everything, handle included.
    fn reset(&mut self) {
        self.invalidate_entries();
        self.handle = None;
        self.server_cursor = 0;
    }

    /// Hand the open handle over for an explicit close.
    pub(crate) fn take_handle(&mut self) -> Option<FileId> {
        self.handle.take()
    }

    /// Forget a handle that died with its transport; there is nothing left
    /// to close on the wire.
    pub(crate) fn forget_stale_handle(&mut self) {
        self.handle = None;
        self.server_cursor = 0;
    }

    fn lookup(&mut self, index: i64) -> Option<DirectoryEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let end = self.first_index + self.entries.len() as i64;
        if index < self.first_index || index >= end {
            return None;
        }
        let offset = (index - self.first_index) as usize;
        self.last_accessed = offset;
        Some(self.entries[offset].clone())
    }

    fn store_batch(&mut self, first_index: i64, batch: Vec<DirectoryEntry>, hit_offset: usize) {
        debug_assert!(!batch.is_empty() && hit_offset < batch.len());
        self.first_index = first_index;
        self.entries = batch;
        self.last_accessed = hit_offset;
    }
}

/// Read size asked of Query Directory, bounded by what was negotiated
const DIR_READ_SIZE: u32 = 65536;

impl Connection {
    /// Count the entries of the bound share's root directory, not counting
    /// the synthetic "." and "..". Restarts the server scan and retains
    /// nothing.
    pub async fn count_entries(&mut self, handle: TreeHandle) -> Result<u64> {
        self.require_established()?;
        let mut cache = std::mem::take(&mut self.tree_mut(handle)?.dir);
        let result = self.count_entries_inner(handle, &mut cache).await;
        if let Ok(tree) = self.tree_mut(handle) {
            tree.dir = cache;
        }
        result
    }

    /// Fetch directory entry `index` (1-based), serving it from cache when
    /// the cached window covers it and scanning forward from the nearest
    /// valid position otherwise.
    pub async fn fetch_entry(&mut self, handle: TreeHandle, index: i64) -> Result<DirectoryEntry> {
        self.require_established()?;
        let mut cache = std::mem::take(&mut self.tree_mut(handle)?.dir);
        let result = self.fetch_entry_inner(handle, index, &mut cache).await;
        if let Ok(tree) = self.tree_mut(handle) {
            tree.dir = cache;
        }
        result
    }

    async fn count_entries_inner(
        &mut self,
        handle: TreeHandle,
        cache: &mut DirCache,
    ) -> Result<u64> {
        self.sync_epoch(handle, cache)?;
        let mut restart = true;
        let mut count = 0u64;
        while let Some(batch) = self.query_directory_batch(handle, cache, restart).await? {
            if restart {
                cache.server_cursor = 1;
            }
            restart = false;
            count += batch.len() as u64;
            cache.server_cursor += batch.len() as i64;
        }
        trace!(count, "directory count complete");
        Ok(count)
    }

    async fn fetch_entry_inner(
        &mut self,
        handle: TreeHandle,
        index: i64,
        cache: &mut DirCache,
    ) -> Result<DirectoryEntry> {
        if index < 1 {
            return Err(Error::Invariant(format!(
                "entry index {} is reserved for synthetic entries",
                index
            )));
        }
        self.sync_epoch(handle, cache)?;

        if let Some(entry) = cache.lookup(index) {
            trace!(index, "directory cache hit");
            return Ok(entry);
        }

        // Miss: the window is useless for this target, drop it before
        // scanning. Restart only when the target is behind the cursor.
        let restart = cache.server_cursor <= 0 || index < cache.server_cursor;
        cache.invalidate_entries();
        if restart {
            debug!(index, cursor = cache.server_cursor, "restarting directory scan");
        }

        let mut restart_flag = restart;
        loop {
            let batch = match self
                .query_directory_batch(handle, cache, restart_flag)
                .await?
            {
                Some(batch) => batch,
                // Scan exhausted before reaching the target
                None => return Err(Error::server(NtStatus::NoSuchFile)),
            };
            if restart_flag {
                cache.server_cursor = 1;
            }
            restart_flag = false;

            if batch.is_empty() {
                // A batch of nothing but synthetic entries; scan on
                continue;
            }

            let first = cache.server_cursor;
            cache.server_cursor += batch.len() as i64;

            if index < first + batch.len() as i64 {
                let offset = (index - first) as usize;
                let entry = batch[offset].clone();
                cache.store_batch(first, batch, offset);
                return Ok(entry);
            }
            // Batch precedes the target; keep scanning without retaining
        }
    }

    /// Invalidate cache state built under an earlier tree-connect epoch.
    fn sync_epoch(&mut self, handle: TreeHandle, cache: &mut DirCache) -> Result<()> {
        let epoch = self.tree(handle)?.epoch;
        if cache.epoch != epoch {
            debug!(old = cache.epoch, new = epoch, "directory cache epoch rollover");
            cache.reset();
            cache.epoch = epoch;
        }
        Ok(())
    }

    /// One Query Directory round trip, returning the decoded batch with
    /// the synthetic dot entries filtered out, or `None` once the scan is
    /// exhausted. A structurally invalid response invalidates the whole
    /// cache and fails the call.
    async fn query_directory_batch(
        &mut self,
        handle: TreeHandle,
        cache: &mut DirCache,
        restart: bool,
    ) -> Result<Option<Vec<DirectoryEntry>>> {
        let file_id = self.ensure_dir_handle(handle, cache).await?;
        let (session_id, tree_id, signing) = self.tree_context(handle)?;

        let flags = if restart {
            query_directory_flags::RESTART_SCANS
        } else {
            0
        };
        let read_size = DIR_READ_SIZE.min(self.max_transact_size);
        let request = QueryDirectoryRequest::new(file_id, flags, read_size);
        let terminal = self
            .transact(
                Smb2Command::QueryDirectory,
                tree_id,
                session_id,
                signing,
                request.serialize()?,
            )
            .await?;

        match terminal {
            Terminal::Done(message) => {
                let response = QueryDirectoryResponse::parse(&message.body)?;
                match parse_entries(&response.output_buffer) {
                    Ok(entries) => Ok(Some(
                        entries
                            .into_iter()
                            .filter(|entry| !entry.is_dot_entry())
                            .collect(),
                    )),
                    Err(error) => {
                        // Never serve partial data from a corrupt chain
                        cache.reset();
                        Err(error)
                    }
                }
            }
            Terminal::MoreProcessingRequired(_) => {
                cache.reset();
                Err(Error::Wire(
                    "unexpected continuation to query directory".into(),
                ))
            }
            Terminal::Failed(_, NtStatus::NoMoreFiles) => Ok(None),
            Terminal::Failed(_, status) => Err(Error::server(status)),
        }
    }

    /// Open the share root for enumeration if no handle is cached yet. A
    /// fresh handle scans from the beginning, so the cursor resets to the
    /// first entry.
    async fn ensure_dir_handle(
        &mut self,
        handle: TreeHandle,
        cache: &mut DirCache,
    ) -> Result<FileId> {
        if let Some(file_id) = cache.handle {
            return Ok(file_id);
        }
        let (session_id, tree_id, signing) = self.tree_context(handle)?;
        let request = CreateRequest::open_directory("");
        let terminal = self
            .transact(
                Smb2Command::Create,
                tree_id,
                session_id,
                signing,
                request.serialize()?,
            )
            .await?;

        match terminal {
            Terminal::Done(message) => {
                let response = CreateResponse::parse(&message.body)?;
                cache.handle = Some(response.file_id);
                cache.server_cursor = 1;
                debug!(file_id = ?response.file_id, "directory handle opened");
                Ok(response.file_id)
            }
            Terminal::MoreProcessingRequired(_) => {
                Err(Error::Wire("unexpected continuation to create".into()))
            }
            Terminal::Failed(_, status) => Err(Error::server(status)),
        }
    }

    /// Best-effort close of a file handle; used for enumeration handles on
    /// unbind.
    pub(crate) async fn close_file(&mut self, handle: TreeHandle, file_id: FileId) -> Result<()> {
        let (session_id, tree_id, signing) = self.tree_context(handle)?;
        let body = CloseRequest { file_id }.serialize()?;
        match self
            .transact(Smb2Command::Close, tree_id, session_id, signing, body)
            .await?
        {
            Terminal::Done(_) => Ok(()),
            Terminal::MoreProcessingRequired(_) => {
                Err(Error::Wire("unexpected continuation to close".into()))
            }
            Terminal::Failed(_, status) => Err(Error::server(status)),
        }
    }
}
