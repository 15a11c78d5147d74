use std::{
    collections::BTreeSet,
    fs,
    io::{self, Read, Seek},
    path::{Path, PathBuf},
};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    catalog::{Catalog, FileRecord, NewFile},
    error::{Error, Result},
    naming::{
        alternative_name,
        fit_name_length,
        split_extension,
        validate_base_name,
    },
};

/// Directory under the media root that holds uploaded bytes.
pub const UPLOAD_DIR: &str = "uploaded_files";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Outcome of deleting a file.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub file: FileRecord,
    /// `false` when the bytes were already gone or could not be removed.
    pub bytes_removed: bool,
}

/// A stored file opened for reading.
#[derive(Debug)]
pub struct Download {
    pub file: FileRecord,
    pub reader: fs::File,
    pub content_type: String,
}

/// Stored bytes under a media root plus their catalog records.
///
/// The catalog is the source of truth. Every operation keeps the bytes on
/// disk and the records in step, and undoes its filesystem change when the
/// catalog write that should follow it fails.
pub struct FileStore {
    catalog: Catalog,
    media_root: PathBuf,
}

impl FileStore {
    pub fn new(catalog: Catalog, media_root: PathBuf) -> Self {
        Self {
            catalog,
            media_root,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Absolute path of a record's bytes.
    pub fn path_of(&self, file: &FileRecord) -> PathBuf {
        self.media_root.join(&file.content_location)
    }

    pub fn get(&self, id: u64) -> Result<FileRecord> {
        self.catalog
            .get_file(id)?
            .ok_or_else(|| Error::file_not_found(id))
    }

    pub fn list(&self) -> Result<Vec<FileRecord>> {
        self.catalog.list_files()
    }

    pub fn tags_for(&self, id: u64) -> Result<Vec<String>> {
        self.catalog.tags_for_file(id)
    }

    /// Store the bytes of `reader` under `original_name` and record them
    /// with `tags`.
    pub fn save<R: Read + Seek>(
        &self,
        original_name: &str,
        mut reader: R,
        tags: &BTreeSet<String>,
    ) -> Result<FileRecord> {
        reader.rewind()?;
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        let content_hash = hex::encode(hasher.finalize());
        reader.rewind()?;

        let display_name = fit_name_length(original_name);
        let content_location = self.free_location(&display_name)?;
        let path = self.media_root.join(&content_location);

        write_new(&path, &mut reader)?;
        if !path.is_file() {
            remove_quietly(&path);
            return Err(Error::StorageVerificationFailed(path));
        }

        let new = NewFile {
            display_name: &display_name,
            content_location: &content_location,
            content_hash: &content_hash,
        };
        let record = match self.catalog.insert_file(&new, tags) {
            Ok(record) => record,
            Err(e) => {
                remove_quietly(&path);
                return Err(e);
            }
        };

        info!(
            id = record.id,
            name = %record.display_name,
            location = %record.content_location,
            tags = tags.len(),
            "stored file"
        );
        Ok(record)
    }

    /// Rename a file to `new_base` while keeping its extension.
    ///
    /// Returns the new display name, or the current one unchanged when
    /// `new_base` already is its base name.
    pub fn rename(&self, id: u64, new_base: &str) -> Result<String> {
        validate_base_name(new_base)?;
        let mut record = self.get(id)?;

        let (current_base, _) = split_extension(&record.display_name);
        if current_base == new_base {
            debug!(id, name = %record.display_name, "rename is a no-op");
            return Ok(record.display_name);
        }

        let (_, ext) = split_extension(location_file_name(
            &record.content_location,
        ));
        let new_display = fit_name_length(&format!("{new_base}{ext}"));

        let mut source = self.path_of(&record);
        if !source.exists() {
            // Another request may have moved the file since it was read.
            record = self.get(id)?;
            source = self.path_of(&record);
            if !source.exists() {
                return Err(Error::SourceMissing(source));
            }
        }

        let new_location = format!("{UPLOAD_DIR}/{new_display}");
        let destination = self.media_root.join(&new_location);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        // A record can own the location even when its bytes are gone.
        if let Some(owner) = self.catalog.file_at_location(&new_location)?
            && owner != id
        {
            return Err(Error::NameCollision(destination));
        }
        if destination.exists() {
            return Err(Error::NameCollision(destination));
        }

        fs::rename(&source, &destination)?;
        if let Err(e) =
            self.catalog
                .update_file_location(id, &new_display, &new_location)
        {
            if let Err(undo) = fs::rename(&destination, &source) {
                warn!(
                    id,
                    from = %destination.display(),
                    to = %source.display(),
                    error = %undo,
                    "failed to move file back after catalog update failed"
                );
            }
            return Err(e);
        }

        if !destination.is_file() {
            return Err(Error::VerificationFailed(destination));
        }

        info!(id, from = %record.display_name, to = %new_display, "renamed file");
        Ok(new_display)
    }

    /// Remove a file's bytes and its record.
    ///
    /// Failing to remove the bytes is logged and reported, not returned: the
    /// record is removed either way.
    pub fn delete(&self, id: u64) -> Result<DeleteReport> {
        let record = self.get(id)?;
        let path = self.path_of(&record);

        let bytes_removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    id,
                    path = %path.display(),
                    error = %e,
                    "could not remove stored bytes"
                );
                false
            }
        };

        let file = self
            .catalog
            .remove_file(id)?
            .ok_or_else(|| Error::file_not_found(id))?;

        info!(id, name = %file.display_name, bytes_removed, "deleted file");
        Ok(DeleteReport {
            file,
            bytes_removed,
        })
    }

    /// Open a file's bytes for reading.
    pub fn download(&self, id: u64) -> Result<Download> {
        let file = self.get(id)?;
        let path = self.path_of(&file);

        let reader = match fs::File::open(&path) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(id, path = %path.display(), "stored bytes are missing");
                return Err(Error::NotFound {
                    kind: "file content",
                    name: file.content_location,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let content_type = mime_guess::from_path(&file.display_name)
            .first_raw()
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        Ok(Download {
            file,
            reader,
            content_type,
        })
    }

    /// Pick a location for `name` that neither the catalog nor the
    /// filesystem already uses.
    fn free_location(&self, name: &str) -> Result<String> {
        let mut candidate = name.to_string();
        loop {
            let location = format!("{UPLOAD_DIR}/{candidate}");
            if self.catalog.file_at_location(&location)?.is_none()
                && !self.media_root.join(&location).exists()
            {
                return Ok(location);
            }
            candidate = alternative_name(name);
        }
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("media_root", &self.media_root)
            .finish_non_exhaustive()
    }
}

fn location_file_name(location: &str) -> &str {
    location.rsplit('/').next().unwrap_or(location)
}

/// Copy `reader` into a file that must not exist yet. A partially written
/// file is removed.
fn write_new(path: &Path, reader: &mut impl Read) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = fs::File::create_new(path)?;
    let written = io::copy(reader, &mut out).and_then(|_| out.sync_all());
    if let Err(e) = written {
        drop(out);
        remove_quietly(path);
        return Err(e.into());
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to clean up bytes");
    }
}
