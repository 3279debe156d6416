//! Durable record of version entries, replayed by [`EntityStore::open`].
//!
//! [`EntityStore::open`]: crate::EntityStore::open

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entity::{EntityModel, TechnicalId};
use crate::error::{Error, Result};
use crate::log::VersionEntry;

/// One journal line: a version entry plus the stream metadata needed to
/// rebuild the live record from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub model: EntityModel,
    pub business_key_field: Option<String>,
    pub entry: VersionEntry,
}

/// Storage for version entries.
///
/// The store appends every batch of entries before publishing them in
/// memory; if `append` fails the mutation is abandoned.
#[async_trait]
pub trait Journal: Send + Sync + 'static {
    /// Persist a batch of records belonging to one entity.
    async fn append(&self, records: &[JournalRecord]) -> Result<()>;

    /// Read back every record, ordered by global sequence.
    async fn load(&self) -> Result<Vec<JournalRecord>>;

    /// Remove every record of one entity.
    async fn purge(&self, model: &EntityModel, id: TechnicalId) -> Result<()>;
}

/// A journal that keeps nothing. Stores built on it start empty every time.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryJournal;

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, _records: &[JournalRecord]) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<JournalRecord>> {
        Ok(vec![])
    }

    async fn purge(&self, _model: &EntityModel, _id: TechnicalId) -> Result<()> {
        Ok(())
    }
}

/// Newline-delimited JSON files, one per entity type, in a directory.
///
/// Each line is a serialized [`JournalRecord`]. A crash mid-write can leave
/// an unterminated last line; [`load`](Journal::load) drops it with a
/// warning and truncates the file back to the last complete record.
#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    handles: Mutex<HashMap<PathBuf, Handle>>,
}

/// Cached append handle for one journal file.
#[derive(Debug)]
struct Handle {
    file: File,
    /// File length after the last complete append.
    len: u64,
}

impl FileJournal {
    /// Open (creating if needed) a journal directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding records of `model`'s entity type.
    pub fn path_for(&self, model: &EntityModel) -> PathBuf {
        let name: String = model
            .entity_type()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.jsonl"))
    }

    async fn journal_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = vec![];
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn append(&self, records: &[JournalRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let path = self.path_for(&first.model);

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut handles = self.handles.lock().await;
        let handle = match handles.entry(path.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(entry.key())
                    .await?;
                let len = file.metadata().await?.len();
                entry.insert(Handle { file, len })
            }
        };

        // Bytes past the last complete append belong to a write that never
        // finished. Cut them so this batch starts on its own line.
        let on_disk = handle.file.metadata().await?.len();
        if on_disk > handle.len {
            warn!(
                file = %path.display(),
                dropped_bytes = on_disk - handle.len,
                "Truncating incomplete journal append"
            );
            handle.file.set_len(handle.len).await?;
        } else if on_disk < handle.len {
            handle.len = on_disk;
        }

        let written = match handle.file.write_all(&buf).await {
            Ok(()) => handle.file.flush().await,
            Err(err) => Err(err),
        };
        match written {
            Ok(()) => {
                handle.len += buf.len() as u64;
                Ok(())
            }
            Err(err) => {
                let len = handle.len;
                if let Err(truncate) = handle.file.set_len(len).await {
                    warn!(file = %path.display(), error = %truncate, "Could not roll back journal append");
                }
                handles.remove(&path);
                warn!(file = %path.display(), error = %err, "Journal append failed");
                Err(err.into())
            }
        }
    }

    async fn load(&self) -> Result<Vec<JournalRecord>> {
        // Holding the handle lock keeps appends out while torn tails are cut.
        let mut handles = self.handles.lock().await;
        let mut records = vec![];

        for path in self.journal_files().await? {
            let contents = fs::read_to_string(&path).await?;
            let parsed = parse_lines(&path.display().to_string(), &contents)?;

            if parsed.valid_len < contents.len() {
                warn!(
                    file = %path.display(),
                    dropped_bytes = contents.len() - parsed.valid_len,
                    "Dropping torn trailing journal line"
                );
                handles.remove(&path);
                let file = OpenOptions::new().write(true).open(&path).await?;
                file.set_len(parsed.valid_len as u64).await?;
            } else if !contents.is_empty() && !contents.ends_with('\n') {
                // Complete record without its terminator; restore it so the
                // next append starts on a fresh line.
                handles.remove(&path);
                let mut file = OpenOptions::new().append(true).open(&path).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
            }

            debug!(file = %path.display(), records = parsed.records.len(), "Loaded journal file");
            records.extend(parsed.records);
        }

        records.sort_by_key(|record| record.entry.sequence);
        Ok(records)
    }

    async fn purge(&self, model: &EntityModel, id: TechnicalId) -> Result<()> {
        let path = self.path_for(model);
        let mut handles = self.handles.lock().await;
        handles.remove(&path);

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let parsed = parse_lines(&path.display().to_string(), &contents)?;

        let mut buf = Vec::new();
        for record in parsed.records.iter().filter(|record| record.entry.id != id) {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let tmp = path.with_extension("jsonl.tmp");
        fs::write(&tmp, &buf).await?;
        fs::rename(&tmp, &path).await?;
        debug!(file = %path.display(), %id, "Purged entity from journal");
        Ok(())
    }
}

#[derive(Debug)]
struct ParsedFile {
    records: Vec<JournalRecord>,
    /// Byte length of the prefix made of complete records.
    valid_len: usize,
}

/// Decode journal lines.
///
/// Only the final, unterminated line may fail to decode (a torn write); it is
/// excluded from `valid_len`. A bad line anywhere else is corruption.
fn parse_lines(file: &str, contents: &str) -> Result<ParsedFile> {
    let mut records = vec![];
    let mut offset = 0;

    for (index, line) in contents.split_inclusive('\n').enumerate() {
        let terminated = line.ends_with('\n');
        let text = line.trim();
        if !text.is_empty() {
            match serde_json::from_str(text) {
                Ok(record) => records.push(record),
                Err(_) if !terminated => break,
                Err(source) => {
                    return Err(Error::CorruptJournal {
                        file: file.to_string(),
                        line: index + 1,
                        source,
                    });
                }
            }
        }
        offset += line.len();
    }

    Ok(ParsedFile {
        records,
        valid_len: offset,
    })
}
