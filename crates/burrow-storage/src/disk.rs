//! Disk manager for page-level I/O on named data files.

use burrow_common::page::{PageId, PAGE_SIZE};
use burrow_common::{BurrowError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Identifier assigned to an open file by the disk manager.
pub type FileId = u32;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages of named data files.
///
/// Files are addressed by name (relation heaps use the relation name,
/// index files use `"{relation}.{offset}"`). Page 0 of every file is
/// reserved at creation time so that page number 0 can serve as the
/// null page reference; the first usable page is page 1.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file handles keyed by file ID.
    files: Mutex<FileRegistry>,
}

struct FileRegistry {
    /// File name to ID mapping for files opened this session.
    by_name: HashMap<String, FileId>,
    /// Open handles.
    handles: HashMap<FileId, FileHandle>,
    /// Next file ID to hand out.
    next_id: FileId,
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Path to the file.
    path: PathBuf,
    /// Number of pages in the file (including the reserved page 0).
    num_pages: u32,
}

impl DiskManager {
    /// First usable page number of any file (page 0 is reserved).
    pub const FIRST_PAGE_NUM: u32 = 1;

    /// Creates a new disk manager.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(FileRegistry {
                by_name: HashMap::new(),
                handles: HashMap::new(),
                next_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Opens an existing data file by name.
    ///
    /// Returns `None` when no file with that name exists; callers use
    /// this to fork into their create path.
    pub fn open(&self, name: &str) -> Result<Option<FileId>> {
        let mut files = self.files.lock();

        if let Some(&file_id) = files.by_name.get(name) {
            return Ok(Some(file_id));
        }

        let path = self.file_path(name);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Some(files.register(name, file, path, num_pages)))
    }

    /// Creates a new data file by name and reserves its page 0.
    ///
    /// Fails if a file with that name already exists.
    pub fn create(&self, name: &str) -> Result<FileId> {
        let mut files = self.files.lock();

        if files.by_name.contains_key(name) {
            return Err(BurrowError::FileExists(name.to_string()));
        }

        let path = self.file_path(name);
        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(BurrowError::FileExists(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        // Reserve page 0 so that page number 0 stays the null reference
        file.write_all(&[0u8; PAGE_SIZE])?;
        if self.config.fsync_enabled {
            file.sync_all()?;
        }

        Ok(files.register(name, file, path, 1))
    }

    /// Returns the id of the first usable allocated page of a file
    /// (where index files keep their meta page).
    pub fn first_page_id(&self, file_id: FileId) -> Result<PageId> {
        let files = self.files.lock();
        let handle = files.handle(file_id)?;

        if handle.num_pages <= Self::FIRST_PAGE_NUM {
            return Err(BurrowError::PageNotFound {
                file_id,
                page_num: Self::FIRST_PAGE_NUM,
            });
        }
        Ok(PageId::new(file_id, Self::FIRST_PAGE_NUM))
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut files = self.files.lock();
        let handle = files.handle_mut(page_id.file_id)?;

        if page_id.page_num >= handle.num_pages {
            return Err(BurrowError::PageNotFound {
                file_id: page_id.file_id,
                page_num: page_id.page_num,
            });
        }

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut files = self.files.lock();
        let handle = files.handle_mut(page_id.file_id)?;

        let offset = (page_id.page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        if page_id.page_num >= handle.num_pages {
            handle.num_pages = page_id.page_num + 1;
        }

        Ok(())
    }

    /// Allocates a new zeroed page at the end of the file.
    ///
    /// Returns the PageId of the newly allocated page.
    pub fn allocate_page(&self, file_id: FileId) -> Result<PageId> {
        let mut files = self.files.lock();
        let handle = files.handle_mut(file_id)?;

        let page_num = handle.num_pages;
        let page_id = PageId::new(file_id, page_num);

        let offset = (page_num as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num + 1;

        Ok(page_id)
    }

    /// Returns the number of pages in a file (including reserved page 0).
    pub fn num_pages(&self, file_id: FileId) -> Result<u32> {
        let files = self.files.lock();
        Ok(files.handle(file_id)?.num_pages)
    }

    /// Syncs a file's contents to durable storage.
    pub fn flush(&self, file_id: FileId) -> Result<()> {
        let files = self.files.lock();
        files.handle(file_id)?.file.sync_all()?;
        Ok(())
    }

    /// Closes a specific file.
    pub fn close_file(&self, file_id: FileId) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.handles.remove(&file_id) {
            files.by_name.retain(|_, id| *id != file_id);
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        files.by_name.clear();
        for (_, handle) in files.handles.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a data file.
    pub fn delete_file(&self, file_id: FileId) -> Result<()> {
        let path = {
            let files = self.files.lock();
            files.handle(file_id)?.path.clone()
        };
        self.close_file(file_id)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl FileRegistry {
    fn register(&mut self, name: &str, file: File, path: PathBuf, num_pages: u32) -> FileId {
        let file_id = self.next_id;
        self.next_id += 1;
        self.by_name.insert(name.to_string(), file_id);
        self.handles.insert(
            file_id,
            FileHandle {
                file,
                path,
                num_pages,
            },
        );
        file_id
    }

    fn handle(&self, file_id: FileId) -> Result<&FileHandle> {
        self.handles
            .get(&file_id)
            .ok_or(BurrowError::FileNotOpen(file_id))
    }

    fn handle_mut(&mut self, file_id: FileId) -> Result<&mut FileHandle> {
        self.handles
            .get_mut(&file_id)
            .ok_or(BurrowError::FileNotOpen(file_id))
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
