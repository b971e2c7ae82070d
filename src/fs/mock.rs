use std::{cell::RefCell, collections::HashMap, io, rc::Rc};

use crate::error::{Error, Result};

use super::{Dir, RandomAccessFile, WritableFile};

#[derive(Default, Debug)]
struct MockData {
    synced: Vec<u8>,
    unsynced: Vec<u8>,
}

type FileId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(String, FileId),
    Write(FileId, usize, usize),
    Sync(FileId),
    Rename(String, String),
    Unlink(String),
    Open(String),
    Ls(Vec<String>),
}

impl std::fmt::Display for Event {
    fn fmt(&self, w: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Create(name, file_id) => write!(w, "Create({}, {})", name, file_id),
            Event::Write(file_id, idx, len) => write!(w, "Write({}, {}, {})", file_id, idx, len),
            Event::Sync(file_id) => write!(w, "Sync({})", file_id),
            Event::Rename(from, to) => write!(w, "Rename({}, {})", from, to),
            Event::Unlink(name) => write!(w, "Unlink({})", name),
            Event::Open(name) => write!(w, "Open({})", name),
            Event::Ls(names) => write!(w, "Ls() -> {:?}", names),
        }
    }
}

fn down() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "filesystem is down")
}

#[derive(Debug, Default)]
pub struct MockFs {
    names: HashMap<String, FileId>,
    data: Vec<MockData>,
    events: Vec<Event>,

    // After this many "things happen," "crash" the FS, meaning stop accepting
    // writes until `reboot`.
    time_to_crash: Option<usize>,
}

impl MockFs {
    fn check_crashed(&self) -> io::Result<()> {
        if self.time_to_crash == Some(0) {
            Err(down())
        } else {
            Ok(())
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    // Discard all unsynced state, become uncrashed.
    pub fn reboot(&mut self) {
        for f in self.data.iter_mut() {
            f.unsynced.clear();
            f.unsynced.extend(&f.synced);
        }
        self.time_to_crash = None;
    }

    fn perform_op(&mut self) -> io::Result<()> {
        self.check_crashed()?;
        if let Some(x) = self.time_to_crash {
            self.time_to_crash = Some(x - 1);
        }
        Ok(())
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn iter_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn create(&mut self, path: &str) -> io::Result<FileId> {
        self.perform_op()?;
        // A re-created name gets a fresh, empty file; handles to the old one
        // keep working on the old data.
        let id = self.data.len();
        self.data.push(MockData::default());
        self.names.insert(path.to_owned(), id);
        self.record(Event::Create(path.to_owned(), id));
        Ok(id)
    }

    fn unlink(&mut self, path: &str) -> io::Result<bool> {
        self.perform_op()?;
        self.record(Event::Unlink(path.to_owned()));
        Ok(self.names.remove(path).is_some())
    }

    fn open(&mut self, path: &str) -> Option<FileId> {
        self.record(Event::Open(path.to_owned()));
        self.names.get(path).cloned()
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        self.perform_op()?;
        self.record(Event::Rename(from.to_owned(), to.to_owned()));
        match self.names.remove(from) {
            Some(d) => {
                self.names.insert(to.to_owned(), d);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, from.to_owned())),
        }
    }

    fn ls(&mut self) -> Vec<String> {
        let mut names: Vec<String> = self.names.keys().cloned().collect();
        names.sort();
        self.record(Event::Ls(names.clone()));
        names
    }

    fn write(&mut self, file: FileId, idx: usize, data: &[u8]) -> io::Result<()> {
        self.perform_op()?;

        let f = &mut self.data[file].unsynced;
        if f.len() < idx + data.len() {
            f.resize(idx + data.len(), 0);
        }
        f[idx..idx + data.len()].copy_from_slice(data);

        self.record(Event::Write(file, idx, data.len()));
        Ok(())
    }

    fn sync(&mut self, file: FileId) -> io::Result<()> {
        self.perform_op()?;

        self.record(Event::Sync(file));
        let d = &mut self.data[file];
        d.synced = d.unsynced.clone();
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MockFile {
    fs: Rc<RefCell<MockFs>>,
    pub file_id: FileId,
    idx: usize,
    closed: bool,
}

impl MockFile {
    pub fn read_all(&self) -> Vec<u8> {
        self.fs.borrow().data[self.file_id].unsynced.clone()
    }

    pub fn read_all_synced(&self) -> Vec<u8> {
        self.fs.borrow().data[self.file_id].synced.clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Interrupt("file is closed"))
        } else {
            Ok(())
        }
    }
}

impl WritableFile for MockFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        self.fs
            .borrow_mut()
            .write(self.file_id, self.idx, data)
            .map_err(Error::WriteFileFailed)?;
        self.idx += data.len();
        Ok(())
    }

    // Writes are never buffered here.
    fn flush_buffer(&mut self) -> Result<()> {
        self.check_open()?;
        self.fs
            .borrow()
            .check_crashed()
            .map_err(Error::WriteFileFailed)
    }

    fn sync(&mut self) -> Result<()> {
        self.check_open()?;
        self.fs
            .borrow_mut()
            .sync(self.file_id)
            .map_err(Error::WriteFileFailed)
    }

    fn close(&mut self) -> Result<()> {
        let result = self.sync();
        self.closed = true;
        result
    }
}

impl RandomAccessFile for MockFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let fs = self.fs.borrow();
        let data = &fs.data[self.file_id].unsynced;
        let start = offset as usize;
        match data.get(start..start + len) {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(Error::corruption(format!(
                "mock file {}: short read of {} bytes at {}",
                self.file_id, len, offset
            ))),
        }
    }

    fn size(&self) -> Result<u64> {
        Ok(self.fs.borrow().data[self.file_id].unsynced.len() as u64)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockDir {
    pub fs: Rc<RefCell<MockFs>>,
}

impl MockDir {
    pub fn new() -> Self {
        Self::default()
    }

    fn file(&self, file_id: FileId) -> MockFile {
        MockFile {
            fs: self.fs.clone(),
            file_id,
            idx: 0,
            closed: false,
        }
    }
}

impl Dir for MockDir {
    type Writer = MockFile;
    type Reader = MockFile;

    fn create(&mut self, name: &str) -> Result<MockFile> {
        let id = self.fs.borrow_mut().create(name)?;
        Ok(self.file(id))
    }

    fn open(&mut self, name: &str) -> Result<MockFile> {
        let id = self.fs.borrow_mut().open(name);
        match id {
            Some(id) => Ok(self.file(id)),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                name.to_owned(),
            ))),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        Ok(self.fs.borrow_mut().rename(from, to)?)
    }

    fn unlink(&mut self, name: &str) -> Result<bool> {
        Ok(self.fs.borrow_mut().unlink(name)?)
    }

    fn ls(&mut self) -> Result<Vec<String>> {
        Ok(self.fs.borrow_mut().ls())
    }
}
