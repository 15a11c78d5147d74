use std::{collections::BTreeSet, path::Path};

use redb::{
    Database,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    Table,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File records, JSON-encoded, keyed by file id.
const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");
/// Unique index: content location -> file id.
const LOCATIONS: TableDefinition<&str, u64> =
    TableDefinition::new("locations");
const TAGS: TableDefinition<u64, &str> = TableDefinition::new("tags");
/// Unique index: tag name -> tag id.
const TAG_NAMES: TableDefinition<&str, u64> =
    TableDefinition::new("tag_names");
/// FileTag rows: link id -> (file id, tag id).
const FILE_TAGS: TableDefinition<u64, (u64, u64)> =
    TableDefinition::new("file_tags");
const FILE_LINKS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("file_links");
const TAG_FILES: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("tag_files");
const SEQUENCES: TableDefinition<&str, u64> =
    TableDefinition::new("sequences");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

const FILE_SEQUENCE: &str = "files";
const TAG_SEQUENCE: &str = "tags";
const LINK_SEQUENCE: &str = "file_tags";

/// A stored file as recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: u64,
    /// User-facing name, at most 50 characters.
    pub display_name: String,
    /// Path of the bytes relative to the media root.
    pub content_location: String,
    /// Lower-case hex sha256 of the bytes.
    pub content_hash: String,
}

/// The fields of a file record that exist before an id is assigned.
#[derive(Debug, Clone, Copy)]
pub struct NewFile<'a> {
    pub display_name: &'a str,
    pub content_location: &'a str,
    pub content_hash: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

/// One file/tag association row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTag {
    pub id: u64,
    pub file_id: u64,
    pub tag_id: u64,
}

pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(FILES)?;
        txn.open_table(LOCATIONS)?;
        txn.open_table(TAGS)?;
        txn.open_table(TAG_NAMES)?;
        txn.open_table(FILE_TAGS)?;
        txn.open_multimap_table(FILE_LINKS)?;
        txn.open_multimap_table(TAG_FILES)?;
        txn.open_table(SEQUENCES)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Files --

    /// Insert a file record together with its tags and associations.
    ///
    /// Everything happens in one write transaction: either the file, every
    /// tag it needs, and every association are stored, or nothing is.
    pub fn insert_file(
        &self,
        new: &NewFile<'_>,
        tags: &BTreeSet<String>,
    ) -> Result<FileRecord> {
        let txn = self.db.begin_write()?;
        let record = {
            let mut sequences = txn.open_table(SEQUENCES)?;
            let mut files = txn.open_table(FILES)?;
            let mut locations = txn.open_table(LOCATIONS)?;
            let mut tag_rows = txn.open_table(TAGS)?;
            let mut tag_names = txn.open_table(TAG_NAMES)?;
            let mut file_tags = txn.open_table(FILE_TAGS)?;
            let mut file_links = txn.open_multimap_table(FILE_LINKS)?;
            let mut tag_files = txn.open_multimap_table(TAG_FILES)?;

            if locations.get(new.content_location)?.is_some() {
                return Err(Error::LocationTaken(
                    new.content_location.to_string(),
                ));
            }

            let id = next_id(&mut sequences, FILE_SEQUENCE)?;
            let record = FileRecord {
                id,
                display_name: new.display_name.to_string(),
                content_location: new.content_location.to_string(),
                content_hash: new.content_hash.to_string(),
            };
            files.insert(id, serde_json::to_vec(&record)?.as_slice())?;
            locations.insert(new.content_location, id)?;

            for name in tags {
                let tag_id = get_or_create_tag(
                    &mut sequences,
                    &mut tag_rows,
                    &mut tag_names,
                    name,
                )?;
                let link_id = next_id(&mut sequences, LINK_SEQUENCE)?;
                file_tags.insert(link_id, (id, tag_id))?;
                file_links.insert(id, link_id)?;
                tag_files.insert(tag_id, id)?;
            }

            record
        };
        txn.commit()?;
        Ok(record)
    }

    pub fn get_file(&self, id: u64) -> Result<Option<FileRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        match table.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Return the id of the file stored at `location`, if any.
    pub fn file_at_location(&self, location: &str) -> Result<Option<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOCATIONS)?;
        Ok(table.get(location)?.map(|v| v.value()))
    }

    /// All file records in id order.
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FILES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Point a file record at a new name and location.
    pub fn update_file_location(
        &self,
        id: u64,
        display_name: &str,
        content_location: &str,
    ) -> Result<FileRecord> {
        let txn = self.db.begin_write()?;
        let updated = {
            let mut files = txn.open_table(FILES)?;
            let mut locations = txn.open_table(LOCATIONS)?;

            let current: FileRecord = match files.get(id)? {
                Some(bytes) => serde_json::from_slice(bytes.value())?,
                None => return Err(Error::file_not_found(id)),
            };

            if let Some(owner) =
                locations.get(content_location)?.map(|v| v.value())
                && owner != id
            {
                return Err(Error::LocationTaken(content_location.to_string()));
            }

            locations.remove(current.content_location.as_str())?;
            locations.insert(content_location, id)?;

            let updated = FileRecord {
                display_name: display_name.to_string(),
                content_location: content_location.to_string(),
                ..current
            };
            files.insert(id, serde_json::to_vec(&updated)?.as_slice())?;
            updated
        };
        txn.commit()?;
        Ok(updated)
    }

    /// Remove a file record and every association that points at it.
    ///
    /// Tags are left in place even when no file uses them anymore.
    pub fn remove_file(&self, id: u64) -> Result<Option<FileRecord>> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut files = txn.open_table(FILES)?;
            let mut locations = txn.open_table(LOCATIONS)?;
            let mut file_tags = txn.open_table(FILE_TAGS)?;
            let mut file_links = txn.open_multimap_table(FILE_LINKS)?;
            let mut tag_files = txn.open_multimap_table(TAG_FILES)?;

            let record: FileRecord = match files.remove(id)? {
                Some(bytes) => serde_json::from_slice(bytes.value())?,
                None => return Ok(None),
            };
            locations.remove(record.content_location.as_str())?;

            let link_ids = file_links
                .remove_all(id)?
                .map(|v| v.map(|guard| guard.value()))
                .collect::<std::result::Result<Vec<u64>, _>>()?;
            for link_id in link_ids {
                if let Some((_, tag_id)) =
                    file_tags.remove(link_id)?.map(|v| v.value())
                {
                    tag_files.remove(tag_id, id)?;
                }
            }

            record
        };
        txn.commit()?;
        Ok(Some(removed))
    }

    pub fn file_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(FILES)?.len()?)
    }

    // -- Tags --

    /// Return the id of the tag called `name`, creating it if needed.
    pub fn get_or_create_tag(&self, name: &str) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let id = {
            let mut sequences = txn.open_table(SEQUENCES)?;
            let mut tag_rows = txn.open_table(TAGS)?;
            let mut tag_names = txn.open_table(TAG_NAMES)?;
            get_or_create_tag(
                &mut sequences,
                &mut tag_rows,
                &mut tag_names,
                name,
            )?
        };
        txn.commit()?;
        Ok(id)
    }

    pub fn tag_id(&self, name: &str) -> Result<Option<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TAG_NAMES)?;
        Ok(table.get(name)?.map(|v| v.value()))
    }

    /// Distinct ids of the files associated with the tag called `name`.
    ///
    /// The match on the tag name is exact.
    pub fn file_ids_for_tag(&self, name: &str) -> Result<Vec<u64>> {
        let txn = self.db.begin_read()?;
        let tag_names = txn.open_table(TAG_NAMES)?;
        let Some(tag_id) = tag_names.get(name)?.map(|v| v.value()) else {
            return Ok(Vec::new());
        };

        let tag_files = txn.open_multimap_table(TAG_FILES)?;
        let mut result = Vec::new();
        for file_id in tag_files.get(tag_id)? {
            result.push(file_id?.value());
        }
        Ok(result)
    }

    /// Association rows for one file, in link id order.
    pub fn links_for_file(&self, file_id: u64) -> Result<Vec<FileTag>> {
        let txn = self.db.begin_read()?;
        let file_links = txn.open_multimap_table(FILE_LINKS)?;
        let file_tags = txn.open_table(FILE_TAGS)?;

        let mut result = Vec::new();
        for link_id in file_links.get(file_id)? {
            let link_id = link_id?.value();
            if let Some((file_id, tag_id)) =
                file_tags.get(link_id)?.map(|v| v.value())
            {
                result.push(FileTag {
                    id: link_id,
                    file_id,
                    tag_id,
                });
            }
        }
        Ok(result)
    }

    /// Sorted, deduplicated tag names of one file.
    pub fn tags_for_file(&self, file_id: u64) -> Result<Vec<String>> {
        let links = self.links_for_file(file_id)?;

        let txn = self.db.begin_read()?;
        let tags = txn.open_table(TAGS)?;
        let mut names = BTreeSet::new();
        for link in links {
            if let Some(name) = tags.get(link.tag_id)? {
                names.insert(name.value().to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Every tag with the number of files currently using it.
    pub fn list_tags(&self) -> Result<Vec<(Tag, usize)>> {
        let txn = self.db.begin_read()?;
        let tags = txn.open_table(TAGS)?;
        let tag_files = txn.open_multimap_table(TAG_FILES)?;

        let mut result = Vec::new();
        for entry in tags.iter()? {
            let (k, v) = entry?;
            let id = k.value();
            let count = tag_files.get(id)?.count();
            result.push((
                Tag {
                    id,
                    name: v.value().to_string(),
                },
                count,
            ));
        }
        Ok(result)
    }

    pub fn tag_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(TAGS)?.len()?)
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

fn next_id(sequences: &mut Table<&'static str, u64>, key: &str) -> Result<u64> {
    let next = sequences.get(key)?.map(|v| v.value()).unwrap_or(0) + 1;
    sequences.insert(key, next)?;
    Ok(next)
}

fn get_or_create_tag(
    sequences: &mut Table<&'static str, u64>,
    tags: &mut Table<u64, &'static str>,
    tag_names: &mut Table<&'static str, u64>,
    name: &str,
) -> Result<u64> {
    if let Some(id) = tag_names.get(name)?.map(|v| v.value()) {
        return Ok(id);
    }
    let id = next_id(sequences, TAG_SEQUENCE)?;
    tag_names.insert(name, id)?;
    tags.insert(id, name)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Catalog) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Catalog::open(&tmp.path().join("catalog.redb")).unwrap();
        (tmp, db)
    }

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn new_file<'a>(name: &'a str, location: &'a str) -> NewFile<'a> {
        NewFile {
            display_name: name,
            content_location: location,
            content_hash: "00ff",
        }
    }

    #[test]
    fn insert_and_get_file() {
        let (_tmp, db) = test_db();

        let record = db
            .insert_file(
                &new_file("a.pdf", "uploaded_files/a.pdf"),
                &tags(&["cat", "dog"]),
            )
            .unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(db.get_file(1).unwrap(), Some(record.clone()));
        assert_eq!(
            db.file_at_location("uploaded_files/a.pdf").unwrap(),
            Some(1)
        );
        assert_eq!(db.tags_for_file(1).unwrap(), vec!["cat", "dog"]);
        assert_eq!(db.links_for_file(1).unwrap().len(), 2);
        assert_eq!(db.file_count().unwrap(), 1);
    }

    #[test]
    fn ids_are_sequential() {
        let (_tmp, db) = test_db();
        let a = db.insert_file(&new_file("a", "u/a"), &tags(&[])).unwrap();
        let b = db.insert_file(&new_file("b", "u/b"), &tags(&[])).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(db.list_files().unwrap(), vec![a, b]);
    }

    #[test]
    fn tags_are_shared_between_files() {
        let (_tmp, db) = test_db();
        db.insert_file(&new_file("a", "u/a"), &tags(&["cat", "dog"]))
            .unwrap();
        db.insert_file(&new_file("b", "u/b"), &tags(&["cat"]))
            .unwrap();

        assert_eq!(db.tag_count().unwrap(), 2);
        assert_eq!(db.file_ids_for_tag("cat").unwrap(), vec![1, 2]);
        assert_eq!(db.file_ids_for_tag("dog").unwrap(), vec![1]);
        assert!(db.file_ids_for_tag("ca").unwrap().is_empty());
    }

    #[test]
    fn get_or_create_tag_is_idempotent() {
        let (_tmp, db) = test_db();
        let first = db.get_or_create_tag("report").unwrap();
        let second = db.get_or_create_tag("report").unwrap();
        assert_eq!(first, second);
        assert_eq!(db.tag_id("report").unwrap(), Some(first));
        assert_eq!(db.tag_count().unwrap(), 1);
    }

    #[test]
    fn duplicate_location_is_rejected() {
        let (_tmp, db) = test_db();
        db.insert_file(&new_file("a", "u/a"), &tags(&["cat"]))
            .unwrap();
        let err = db
            .insert_file(&new_file("other", "u/a"), &tags(&["dog"]))
            .unwrap_err();
        assert!(matches!(err, Error::LocationTaken(_)));

        // The failed insert left nothing behind.
        assert_eq!(db.file_count().unwrap(), 1);
        assert_eq!(db.tag_id("dog").unwrap(), None);
    }

    #[test]
    fn update_moves_location_index() {
        let (_tmp, db) = test_db();
        db.insert_file(&new_file("a.txt", "u/a.txt"), &tags(&["cat"]))
            .unwrap();

        let updated = db.update_file_location(1, "b.txt", "u/b.txt").unwrap();
        assert_eq!(updated.display_name, "b.txt");
        assert_eq!(updated.content_hash, "00ff");
        assert_eq!(db.file_at_location("u/a.txt").unwrap(), None);
        assert_eq!(db.file_at_location("u/b.txt").unwrap(), Some(1));
        assert_eq!(db.tags_for_file(1).unwrap(), vec!["cat"]);
    }

    #[test]
    fn update_rejects_location_of_other_file() {
        let (_tmp, db) = test_db();
        db.insert_file(&new_file("a", "u/a"), &tags(&[])).unwrap();
        db.insert_file(&new_file("b", "u/b"), &tags(&[])).unwrap();

        let err = db.update_file_location(1, "b", "u/b").unwrap_err();
        assert!(matches!(err, Error::LocationTaken(_)));
        assert_eq!(db.get_file(1).unwrap().unwrap().content_location, "u/a");
    }

    #[test]
    fn update_unknown_file_is_not_found() {
        let (_tmp, db) = test_db();
        let err = db.update_file_location(9, "x", "u/x").unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[test]
    fn remove_cascades_associations_but_keeps_tags() {
        let (_tmp, db) = test_db();
        db.insert_file(&new_file("a", "u/a"), &tags(&["cat", "dog"]))
            .unwrap();
        db.insert_file(&new_file("b", "u/b"), &tags(&["cat"]))
            .unwrap();

        let removed = db.remove_file(1).unwrap().unwrap();
        assert_eq!(removed.display_name, "a");
        assert_eq!(db.get_file(1).unwrap(), None);
        assert!(db.links_for_file(1).unwrap().is_empty());
        assert_eq!(db.file_at_location("u/a").unwrap(), None);
        assert_eq!(db.file_ids_for_tag("cat").unwrap(), vec![2]);
        assert!(db.file_ids_for_tag("dog").unwrap().is_empty());

        // Orphaned tags survive.
        assert!(db.tag_id("dog").unwrap().is_some());
        let listed = db.list_tags().unwrap();
        let dog = listed.iter().find(|(t, _)| t.name == "dog").unwrap();
        assert_eq!(dog.1, 0);

        assert_eq!(db.remove_file(1).unwrap(), None);
    }

    #[test]
    fn settings_crud() {
        let (_tmp, db) = test_db();

        assert_eq!(db.get_setting("ocr_command").unwrap(), None);

        db.set_setting("ocr_command", "/opt/bin/tesseract").unwrap();
        assert_eq!(
            db.get_setting("ocr_command").unwrap(),
            Some("/opt/bin/tesseract".to_string())
        );

        assert!(db.remove_setting("ocr_command").unwrap());
        assert!(!db.remove_setting("ocr_command").unwrap());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("catalog.redb");

        {
            let db = Catalog::open(&path).unwrap();
            db.insert_file(&new_file("a", "u/a"), &tags(&["cat"]))
                .unwrap();
        }

        {
            let db = Catalog::open(&path).unwrap();
            assert_eq!(db.get_file(1).unwrap().unwrap().display_name, "a");
            assert_eq!(db.file_ids_for_tag("cat").unwrap(), vec![1]);
            // Sequences survive as well.
            let next =
                db.insert_file(&new_file("b", "u/b"), &tags(&[])).unwrap();
            assert_eq!(next.id, 2);
        }
    }
}
