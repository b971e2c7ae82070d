use crate::{
    error::Result,
    fs::{Dir, WritableFile},
    manifest::{Manifest, TableMeta},
    memtable::Memtable,
    options::Options,
    sst::{reader::TableReader, writer::TableBuilder},
};

pub fn table_file_name(number: u64) -> String {
    format!("{:06}.sst", number)
}

fn temp_file_name(number: u64) -> String {
    format!("{:06}.sst.tmp", number)
}

// Replays `memtable` in order into a new table in `file`. Returns the file
// size and the number of entries written. The file is closed whatever
// happens, but on error its contents must be discarded.
pub fn build_table<W: WritableFile>(
    memtable: &Memtable,
    options: &Options,
    file: &mut W,
) -> Result<(u64, u64)> {
    let mut builder = TableBuilder::new(options, file);
    for entry in memtable.iter() {
        if let Err(e) = builder.add(&entry.key, &entry.value) {
            if let Err(close) = builder.finish() {
                tracing::debug!(error = %close, "closing failed table");
            }
            return Err(e);
        }
    }
    builder.finish()?;
    Ok((builder.file_size(), builder.num_entries()))
}

fn write_table_file<D: Dir>(
    dir: &mut D,
    memtable: &Memtable,
    options: &Options,
    number: u64,
) -> Result<TableMeta> {
    let tmp = temp_file_name(number);
    let mut file = dir.create(&tmp)?;
    let (file_size, num_entries) = build_table(memtable, options, &mut file)?;
    dir.rename(&tmp, &table_file_name(number))?;
    Ok(TableMeta {
        file_number: number,
        file_size,
        num_entries,
    })
}

fn discard<D: Dir>(dir: &mut D, name: &str) {
    if let Err(e) = dir.unlink(name) {
        tracing::warn!(file = name, error = %e, "could not remove abandoned table");
    }
}

// Flushes `memtable` into a new level-0 table and records it in `manifest`.
// An empty memtable produces no table.
pub fn write_level0_table<D: Dir>(
    dir: &mut D,
    memtable: &Memtable,
    options: &Options,
    manifest: &mut Manifest<D>,
) -> Result<Option<TableMeta>> {
    if memtable.is_empty() {
        return Ok(None);
    }
    let number = manifest.new_file_number();

    let meta = match write_table_file(dir, memtable, options, number) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::error!(file_number = number, error = %e, "level-0 table write failed");
            discard(dir, &temp_file_name(number));
            return Err(e);
        }
    };
    if let Err(e) = manifest.add_table_meta(meta.clone()) {
        tracing::error!(file_number = number, error = %e, "could not record level-0 table");
        discard(dir, &table_file_name(number));
        return Err(e);
    }

    tracing::info!(
        file_number = meta.file_number,
        file_size = meta.file_size,
        entries = meta.num_entries,
        "level-0 table written"
    );
    Ok(Some(meta))
}

pub fn open_table<D: Dir>(
    dir: &mut D,
    meta: &TableMeta,
    options: &Options,
) -> Result<TableReader<D::Reader>> {
    let file = dir.open(&table_file_name(meta.file_number))?;
    TableReader::open(file, meta.file_number, options)
}
