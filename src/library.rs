use std::{
    collections::BTreeSet,
    io::{Cursor, Read},
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    catalog::{Catalog, FileRecord, Tag},
    data_dir::DataDir,
    error::{Error, Result},
    extract::{DocumentKind, TextExtractor},
    naming::upload_name,
    search::{self, SearchHit},
    settings::ExtractorConfig,
    store::{DeleteReport, Download, FileStore},
    tags::TagGenerator,
};

/// A file record together with its tag names.
#[derive(Debug, Clone, Serialize)]
pub struct FileDetails {
    pub file: FileRecord,
    pub tags: Vec<String>,
}

/// Counts reported by `docshelf status`.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryStatus {
    pub files: u64,
    pub tags: u64,
}

/// An upload whose text has been extracted and tagged but which is not
/// stored yet.
///
/// Preparing is the expensive part of an upload and needs only shared
/// access, so several uploads can be prepared in parallel and committed one
/// after the other.
#[derive(Debug)]
pub struct PreparedUpload {
    pub name: String,
    pub kind: Option<DocumentKind>,
    pub tags: BTreeSet<String>,
    bytes: Vec<u8>,
}

/// The document library: stored files, their tags, and the extractor and
/// tag generator shared by every request.
#[derive(Debug)]
pub struct Library {
    store: FileStore,
    extractor: TextExtractor,
    tagger: TagGenerator,
}

impl Library {
    /// Open the library stored in `data_dir`.
    ///
    /// External tool settings are resolved once here.
    pub fn open(data_dir: &DataDir) -> Result<Self> {
        let catalog = Catalog::open(&data_dir.catalog_db())?;
        let config = ExtractorConfig::resolve(&catalog)?;
        debug!(?config, "resolved extractor configuration");

        let store = FileStore::new(catalog, data_dir.media_dir()?);
        Ok(Self::new(store, TextExtractor::new(config), TagGenerator::new()))
    }

    pub fn new(
        store: FileStore,
        extractor: TextExtractor,
        tagger: TagGenerator,
    ) -> Self {
        Self {
            store,
            extractor,
            tagger,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        self.store.catalog()
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Extract and tag an upload without storing it.
    pub fn prepare(&self, file_name: &str, bytes: Vec<u8>) -> Result<PreparedUpload> {
        let name = upload_name(file_name)
            .ok_or_else(|| Error::InvalidName(file_name.to_string()))?
            .to_string();

        let kind = DocumentKind::from_file_name(&name);
        let text = match kind {
            Some(kind) => self.extractor.extract(&bytes, kind),
            None => {
                debug!(name = %name, "unsupported file type, storing without tags");
                String::new()
            }
        };
        let tags = self.tagger.generate_tags(&text);

        Ok(PreparedUpload {
            name,
            kind,
            tags,
            bytes,
        })
    }

    /// Store a prepared upload.
    pub fn commit(&self, upload: PreparedUpload) -> Result<FileRecord> {
        self.store
            .save(&upload.name, Cursor::new(upload.bytes), &upload.tags)
    }

    /// Extract, tag, and store one uploaded file.
    pub fn handle_upload<R: Read>(
        &self,
        file_name: &str,
        mut reader: R,
    ) -> Result<FileRecord> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let upload = self.prepare(file_name, bytes)?;
        self.commit(upload)
    }

    /// Files carrying the query's tags, best match first.
    pub fn handle_search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search(query, None)
    }

    pub fn search(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        search::search(query, &self.tagger, self.store.catalog(), limit)
    }

    pub fn handle_rename(&self, file_id: u64, new_base: &str) -> Result<String> {
        self.store.rename(file_id, new_base)
    }

    pub fn handle_delete(&self, file_id: u64) -> Result<DeleteReport> {
        self.store.delete(file_id)
    }

    pub fn handle_download(&self, file_id: u64) -> Result<Download> {
        self.store.download(file_id)
    }

    pub fn handle_view(&self, file_id: u64) -> Result<FileDetails> {
        let file = self.store.get(file_id)?;
        let tags = self.store.tags_for(file_id)?;
        Ok(FileDetails { file, tags })
    }

    pub fn list(&self) -> Result<Vec<FileRecord>> {
        self.store.list()
    }

    /// Every tag with the number of files using it.
    pub fn tags(&self) -> Result<Vec<(Tag, usize)>> {
        self.store.catalog().list_tags()
    }

    pub fn status(&self) -> Result<LibraryStatus> {
        let catalog = self.store.catalog();
        let status = LibraryStatus {
            files: catalog.file_count()?,
            tags: catalog.tag_count()?,
        };
        info!(files = status.files, tags = status.tags, "library status");
        Ok(status)
    }
}
