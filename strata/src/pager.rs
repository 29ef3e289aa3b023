//! Fixed-size page I/O with a free list and a background fsync task.
//!
//! Pages freed by the B-tree are remembered in a `.del` sidecar (a
//! comma-separated list of page ids) and handed back out before the file is
//! grown. A dedicated thread syncs the file on a fixed interval; `close`
//! signals it and blocks until it has exited and a final sync completed.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::{PageId, PAGE_SIZE};

const SYNC_INTERVAL: Duration = Duration::from_secs(5);

pub struct Pager {
    file: Arc<Mutex<File>>,
    path: PathBuf,
    page_size: usize,
    free_list: Vec<PageId>,
    stop_tx: Option<mpsc::Sender<()>>,
    sync_handle: Option<JoinHandle<()>>,
}

impl Pager {
    /// Opens or creates the page file at `path` with the default page
    /// size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_page_size(path, PAGE_SIZE)
    }

    /// Opens the page file with an explicit page stride, loads the `.del`
    /// sidecar into the in-memory free list and starts the background
    /// fsync task.
    pub fn open_with_page_size<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        crate::strata_debug_log!("[Pager::open] opening page file at {path:?}");
        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;

        let free_list = read_free_list(&sidecar_path(&path))?;
        let file = Arc::new(Mutex::new(file));

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sync_file = Arc::clone(&file);
        let sync_handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(SYNC_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {
                    let file = sync_file.lock().expect("pager file lock poisoned");
                    file.sync_all().expect("background fsync failed");
                }
                // Stop signal or a dropped sender both end the task.
                _ => return,
            }
        });

        Ok(Self {
            file,
            path,
            page_size,
            free_list,
            stop_tx: Some(stop_tx),
            sync_handle: Some(sync_handle),
        })
    }

    /// Writes `data` (zero-padded to the page size) at `page_id`.
    pub fn write_to(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() > self.page_size {
            return Err(Error::new(
                ErrorKind::PageOverflow,
                format!(
                    "{} bytes exceed the page size of {}",
                    data.len(),
                    self.page_size
                ),
            ));
        }
        let mut padded = vec![0u8; self.page_size];
        padded[..data.len()].copy_from_slice(data);

        let mut file = self.lock_file();
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        file.write_all(&padded)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;
        drop(file);

        if let Some(pos) = self.free_list.iter().position(|id| *id == page_id) {
            self.free_list.remove(pos);
        }
        Ok(())
    }

    /// Writes `data` to the next available page and returns its id,
    /// reusing the most recently freed page when one exists.
    pub fn write(&mut self, data: &[u8]) -> Result<PageId> {
        let page_id = match self.free_list.last().copied() {
            Some(id) => id,
            None => self.page_count()?,
        };
        self.write_to(page_id, data)?;
        Ok(page_id)
    }

    /// Marks `page_id` as free and persists the sidecar.
    pub fn delete(&mut self, page_id: PageId) -> Result<()> {
        if !self.free_list.contains(&page_id) {
            self.free_list.push(page_id);
        }
        self.persist_free_list()
    }

    /// Returns the page at `page_id`, or `None` when the page is on the
    /// free list or beyond the end of the file.
    pub fn get(&mut self, page_id: PageId) -> Result<Option<Vec<u8>>> {
        if self.free_list.contains(&page_id) {
            return Ok(None);
        }
        if page_id >= self.page_count()? {
            return Ok(None);
        }

        let mut file = self.lock_file();
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        let mut data = vec![0u8; self.page_size];
        file.read_exact(&mut data)
            .map_err(|e| Error::new(ErrorKind::ShortRead, e.to_string()))?;
        Ok(Some(data))
    }

    /// Stops the fsync task, performs a final sync and persists the
    /// free-list sidecar.
    pub fn close(&mut self) -> Result<()> {
        self.shutdown_sync_task();
        self.lock_file()
            .sync_all()
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;
        self.persist_free_list()
    }

    fn page_count(&self) -> Result<PageId> {
        let file = self.lock_file();
        let len = file
            .metadata()
            .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?
            .len();
        Ok((len / self.page_size as u64) as PageId)
    }

    fn lock_file(&self) -> std::sync::MutexGuard<'_, File> {
        self.file.lock().expect("pager file lock poisoned")
    }

    fn persist_free_list(&self) -> Result<()> {
        let contents = self
            .free_list
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        std::fs::write(sidecar_path(&self.path), contents)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))
    }

    fn shutdown_sync_task(&mut self) {
        // Dropping the sender wakes the task out of its timed wait.
        self.stop_tx.take();
        if let Some(handle) = self.sync_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        self.shutdown_sync_task();
        let _ = self.lock_file().sync_all();
        let _ = self.persist_free_list();
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".del");
    PathBuf::from(os)
}

fn read_free_list(path: &Path) -> Result<Vec<PageId>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<PageId>()
                    .map_err(|e| Error::new(ErrorKind::InvalidPage, e.to_string()))
            })
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::new(ErrorKind::OpenFile, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pager_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let mut pager = Pager::open(&path).unwrap();
        let id = pager.write(b"first page").unwrap();
        assert_eq!(id, 0);
        let id = pager.write(b"second page").unwrap();
        assert_eq!(id, 1);

        let page = pager.get(0).unwrap().unwrap();
        assert_eq!(&page[..10], b"first page");
        assert_eq!(page.len(), PAGE_SIZE);
        pager.close().unwrap();
    }

    #[test]
    fn deleted_pages_are_reused_and_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let mut pager = Pager::open(&path).unwrap();
        pager.write(b"a").unwrap();
        pager.write(b"b").unwrap();
        pager.write(b"c").unwrap();
        pager.delete(1).unwrap();
        assert!(pager.get(1).unwrap().is_none());
        pager.close().unwrap();
        drop(pager);

        let mut pager = Pager::open(&path).unwrap();
        assert!(pager.get(1).unwrap().is_none());
        // The freed page is handed back out before the file grows.
        let id = pager.write(b"recycled").unwrap();
        assert_eq!(id, 1);
        assert_eq!(&pager.get(1).unwrap().unwrap()[..8], b"recycled");
        pager.close().unwrap();
    }

    #[test]
    fn get_beyond_eof_returns_none() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("pages.bin")).unwrap();
        assert!(pager.get(7).unwrap().is_none());
        pager.close().unwrap();
    }

    #[test]
    fn oversize_write_is_rejected() {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("pages.bin")).unwrap();
        let big = vec![0u8; PAGE_SIZE + 1];
        let err = pager.write(&big).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PageOverflow);
        pager.close().unwrap();
    }
}
