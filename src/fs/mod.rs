pub mod mock;

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::error::{Error, Result};

pub const FILE_BUFFER_SIZE: usize = 64 * 1024;

// Sequential output. Writes may sit in a buffer until `flush_buffer`, `sync`
// or `close`; none of those may be called once the file is closed.
pub trait WritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    // Pushes buffered bytes to the OS without syncing or closing.
    fn flush_buffer(&mut self) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub trait RandomAccessFile {
    // Fails with `Corruption` if fewer than `len` bytes exist at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    fn size(&self) -> Result<u64>;
}

// A flat directory of named files.
pub trait Dir {
    type Writer: WritableFile;
    type Reader: RandomAccessFile;

    // Creates `name`, truncating anything already there.
    fn create(&mut self, name: &str) -> Result<Self::Writer>;

    fn open(&mut self, name: &str) -> Result<Self::Reader>;

    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    // Returns whether the file existed.
    fn unlink(&mut self, name: &str) -> Result<bool>;

    fn ls(&mut self) -> Result<Vec<String>>;
}

// An in-memory file; writes land directly in the vector.
impl WritableFile for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RandomAccessFile for Vec<u8> {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = offset as usize;
        self.get(start..start.saturating_add(len))
            .map(|b| b.to_vec())
            .ok_or_else(|| {
                Error::corruption(format!("short read of {} bytes at {}", len, offset))
            })
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }
}

fn write_failed(path: &Path, e: io::Error) -> Error {
    tracing::error!(path = %path.display(), error = %e, "file write failed");
    Error::WriteFileFailed(e)
}

pub struct BufferedFileWriter {
    path: PathBuf,
    file: Option<File>,
    buf: Vec<u8>,
}

impl BufferedFileWriter {
    // Opens `path` for writing, creating it and its parent directory if
    // needed. Existing contents are kept when `append` is set and truncated
    // otherwise.
    pub fn open<P: AsRef<Path>>(path: P, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut opts = OpenOptions::new();
        opts.create(true).write(true);
        if append {
            opts.append(true);
        } else {
            opts.truncate(true);
        }
        let file = opts.open(&path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "open for write failed");
            Error::Io(e)
        })?;
        Ok(BufferedFileWriter {
            path,
            file: Some(file),
            buf: Vec::with_capacity(FILE_BUFFER_SIZE),
        })
    }

    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn write_through(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::Interrupt("file is closed"))?;
        file.write_all(data).map_err(|e| write_failed(&self.path, e))
    }

    fn drain_buffer(&mut self) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::Interrupt("file is closed"))?;
        if self.buf.is_empty() {
            return Ok(());
        }
        let result = file.write_all(&self.buf);
        self.buf.clear();
        result.map_err(|e| write_failed(&self.path, e))
    }
}

impl WritableFile for BufferedFileWriter {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::Interrupt("file is closed"));
        }
        if data.is_empty() {
            return Ok(());
        }

        let n = std::cmp::min(data.len(), FILE_BUFFER_SIZE - self.buf.len());
        self.buf.extend_from_slice(&data[..n]);
        let rest = &data[n..];
        if rest.is_empty() {
            return Ok(());
        }

        // The buffer is full.
        self.drain_buffer()?;
        if rest.len() < FILE_BUFFER_SIZE {
            self.buf.extend_from_slice(rest);
            Ok(())
        } else {
            self.write_through(rest)
        }
    }

    fn flush_buffer(&mut self) -> Result<()> {
        self.drain_buffer()
    }

    fn sync(&mut self) -> Result<()> {
        self.drain_buffer()?;
        let file = self.file.as_mut().ok_or(Error::Interrupt("file is closed"))?;
        file.sync_all().map_err(|e| write_failed(&self.path, e))
    }

    fn close(&mut self) -> Result<()> {
        let result = self.sync();
        // Closed even if the final flush failed; the file is unusable either way.
        self.file = None;
        result
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        if self.file.is_some() && !self.buf.is_empty() {
            if let Err(e) = self.drain_buffer() {
                tracing::warn!(path = %self.path.display(), error = %e, "dropping unflushed writer");
            }
        }
    }
}

// Positional reads against a shared file handle.
pub struct FileReader {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "open for read failed");
            Error::Io(e)
        })?;
        Ok(FileReader {
            path,
            file: Mutex::new(file),
        })
    }
}

impl RandomAccessFile for FileReader {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::corruption(format!(
                "{}: short read of {} bytes at {}",
                self.path.display(),
                len,
                offset
            )),
            _ => Error::Io(e),
        })?;
        Ok(buf)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

fn logged<T>(op: &'static str, path: &Path, r: io::Result<T>) -> Result<T> {
    r.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "{} failed", op);
        Error::Io(e)
    })
}

pub struct FileTool;

impl FileTool {
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists()
    }

    pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
        let path = path.as_ref();
        Ok(logged("stat", path, fs::metadata(path))?.len())
    }

    pub fn rename<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Result<()> {
        logged("rename", from.as_ref(), fs::rename(from.as_ref(), to.as_ref()))
    }

    pub fn remove_file<P: AsRef<Path>>(path: P) -> Result<()> {
        logged("remove file", path.as_ref(), fs::remove_file(path.as_ref()))
    }

    pub fn create_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        logged("create dir", path.as_ref(), fs::create_dir_all(path.as_ref()))
    }

    pub fn remove_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        logged("remove dir", path.as_ref(), fs::remove_dir_all(path.as_ref()))
    }
}

// A directory on the real filesystem.
#[derive(Debug, Clone)]
pub struct OsDir {
    root: PathBuf,
}

impl OsDir {
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        FileTool::create_dir(&root)?;
        Ok(OsDir { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl Dir for OsDir {
    type Writer = BufferedFileWriter;
    type Reader = FileReader;

    fn create(&mut self, name: &str) -> Result<BufferedFileWriter> {
        BufferedFileWriter::create(self.root.join(name))
    }

    fn open(&mut self, name: &str) -> Result<FileReader> {
        FileReader::open(self.root.join(name))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        FileTool::rename(self.root.join(from), self.root.join(to))
    }

    fn unlink(&mut self, name: &str) -> Result<bool> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(false);
        }
        FileTool::remove_file(path)?;
        Ok(true)
    }

    fn ls(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in logged("list dir", &self.root, fs::read_dir(&self.root))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
