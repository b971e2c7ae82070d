use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    fs::{Dir, RandomAccessFile, WritableFile},
};

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP_FILE: &str = "MANIFEST_TMP";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub file_number: u64,
    pub file_size: u64,
    #[serde(default)]
    pub num_entries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestData {
    pub next_file_number: u64,
    pub tables: Vec<TableMeta>,
}

impl Default for ManifestData {
    fn default() -> Self {
        ManifestData {
            next_file_number: 1,
            tables: Vec::new(),
        }
    }
}

// The list of live tables, kept as one JSON document that is replaced
// wholesale on every change.
pub struct Manifest<D: Dir> {
    dir: D,
    data: ManifestData,
}

impl<D> Manifest<D>
where
    D: Dir,
{
    // Reads the manifest in `dir`, writing an empty one if there is none yet.
    pub fn load(mut dir: D) -> Result<Self> {
        match dir.open(MANIFEST_FILE) {
            Ok(file) => {
                let size = file.size()? as usize;
                let contents = file.read_at(0, size)?;
                let data = serde_json::from_slice(&contents)?;
                Ok(Manifest { dir, data })
            }
            Err(e) if e.is_not_found() => {
                let mut result = Manifest {
                    dir,
                    data: ManifestData::default(),
                };
                result.write(ManifestData::default())?;
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    pub fn data(&self) -> &ManifestData {
        &self.data
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.data.tables
    }

    // Hands out a number no table in this manifest uses. It only becomes
    // durable with the next write.
    pub fn new_file_number(&mut self) -> u64 {
        let n = self.data.next_file_number;
        self.data.next_file_number += 1;
        n
    }

    pub fn add_table_meta(&mut self, meta: TableMeta) -> Result<()> {
        let mut data = self.data.clone();
        data.next_file_number = data.next_file_number.max(meta.file_number + 1);
        data.tables.push(meta);
        self.write(data)
    }

    // Replaces the on-disk manifest with `data`. The in-memory copy only
    // changes once the new file is in place.
    pub fn write(&mut self, data: ManifestData) -> Result<()> {
        let encoded = serde_json::to_vec(&data)?;
        let mut file = self.dir.create(MANIFEST_TMP_FILE)?;
        file.append(&encoded)?;
        file.close()?;

        // TODO: sync the directory after the rename once Dir can express it.
        self.dir.rename(MANIFEST_TMP_FILE, MANIFEST_FILE)?;
        self.data = data;
        tracing::debug!(
            tables = self.data.tables.len(),
            next_file_number = self.data.next_file_number,
            "manifest written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::Error,
        fs::{mock::MockDir, OsDir},
    };

    use super::*;

    fn meta(file_number: u64) -> TableMeta {
        TableMeta {
            file_number,
            file_size: 100 * file_number,
            num_entries: file_number,
        }
    }

    #[test]
    fn test_fresh_manifest() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let manifest = Manifest::load(dir.clone())?;
        assert_eq!(manifest.data(), &ManifestData::default());
        assert_eq!(dir.ls()?, vec![MANIFEST_FILE.to_owned()]);
        Ok(())
    }

    #[test]
    fn test_reload() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut manifest = Manifest::load(dir.clone())?;
        let n = manifest.new_file_number();
        assert_eq!(n, 1);
        manifest.add_table_meta(meta(n))?;
        manifest.add_table_meta(meta(7))?;

        let reloaded = Manifest::load(dir)?;
        assert_eq!(reloaded.tables(), &[meta(1), meta(7)]);
        assert_eq!(reloaded.data().next_file_number, 8);
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_old_contents() -> anyhow::Result<()> {
        let dir = MockDir::new();
        let mut manifest = Manifest::load(dir.clone())?;
        manifest.add_table_meta(meta(1))?;

        dir.fs.borrow_mut().schedule_crash(2);
        assert!(manifest.add_table_meta(meta(2)).is_err());
        assert_eq!(manifest.tables(), &[meta(1)]);

        dir.fs.borrow_mut().reboot();
        let reloaded = Manifest::load(dir)?;
        assert_eq!(reloaded.tables(), &[meta(1)]);
        Ok(())
    }

    #[test]
    fn test_garbage_manifest() -> anyhow::Result<()> {
        let mut dir = MockDir::new();
        let mut file = dir.create(MANIFEST_FILE)?;
        file.append(b"{not json")?;
        file.close()?;

        let err = Manifest::load(dir).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        Ok(())
    }

    #[test]
    fn test_os_dir() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let dir = OsDir::open(tmp.path().join("db"))?;
        let mut manifest = Manifest::load(dir.clone())?;
        manifest.add_table_meta(meta(3))?;
        drop(manifest);

        let reloaded = Manifest::load(dir)?;
        assert_eq!(reloaded.tables(), &[meta(3)]);
        assert!(!tmp.path().join("db").join(MANIFEST_TMP_FILE).exists());
        Ok(())
    }
}
