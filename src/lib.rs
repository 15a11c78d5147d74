//! docshelf - a local document shelf with keyword tagging and search.
//!
//! docshelf stores PDF, Word, and image files, extracts their text (in
//! process for PDF and DOCX, through external tools for legacy `.doc` files
//! and OCR), and turns that text into normalized keyword tags with
//! [Tantivy](https://github.com/quickwit-oss/tantivy)'s analyzers. Searches
//! rank files by how many of the query's tags they carry.
//!
//! # Quick start
//!
//! ```no_run
//! use docshelf::{DataDir, Library};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let library = Library::open(&data_dir).unwrap();
//!
//! let file = std::fs::File::open("minutes.pdf").unwrap();
//! let stored = library.handle_upload("minutes.pdf", file).unwrap();
//! println!("stored #{} as {}", stored.id, stored.display_name);
//!
//! for hit in library.handle_search("budget meeting").unwrap() {
//!     println!("{}. {} {:?}", hit.rank, hit.file.display_name, hit.matched_tags);
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod data_dir;
pub mod error;
pub mod extract;
pub mod library;
pub mod mcp;
pub mod naming;
pub mod search;
pub mod settings;
pub mod stopwords;
pub mod store;
pub mod tags;

pub use catalog::{Catalog, FileRecord};
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use library::Library;
pub use store::FileStore;
pub use tags::TagGenerator;
