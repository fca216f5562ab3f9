//! Image discovery in an extracted catalog database.
//!
//! An operator index image ships a SQLite database describing its bundles.  Two record sets in it
//! name container images:
//!
//! ```text
//! related_image.image          # images a bundle needs at runtime
//! operatorbundle.bundlepath    # the bundle image itself
//! ```
//!
//! The database is opened read-only and only for as long as [`extract_images`] runs.

use std::{collections::BTreeSet, path::Path};

use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};

use crate::error::{ErrorList, MirrorError, Result};

pub const RELATED_IMAGE_TABLE: &str = "related_image";
pub const RELATED_IMAGE_COLUMN: &str = "image";
pub const OPERATOR_BUNDLE_TABLE: &str = "operatorbundle";
pub const OPERATOR_BUNDLE_COLUMN: &str = "bundlepath";

/// The deduplicated set of raw image strings found in a catalog.
///
/// Empty strings are never part of the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet(BTreeSet<String>);

impl ImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an image, returning `false` if it was empty or already present.
    pub fn insert(&mut self, image: impl Into<String>) -> bool {
        let image = image.into();
        if image.is_empty() {
            return false;
        }
        self.0.insert(image)
    }

    pub fn contains(&self, image: &str) -> bool {
        self.0.contains(image)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ImageSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for image in iter {
            set.insert(image);
        }
        set
    }
}

/// Read-only handle on an extracted catalog database.
#[derive(Debug)]
pub struct CatalogDatabase {
    conn: Connection,
}

impl CatalogDatabase {
    /// Opens the database at `path` without write access.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::DatabaseOpen`] if the file is missing or can't be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| MirrorError::DatabaseOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { conn })
    }

    /// Adds every image string in `table.column` to `images`.
    ///
    /// A record that can't be decoded is pushed onto `errors` and the scan carries on.  If the
    /// record set itself can't be read, [`MirrorError::RecordSetRead`] is returned; whatever this
    /// scan had added by then should be discarded by the caller.
    pub fn scan_images(
        &self,
        table: &'static str,
        column: &'static str,
        images: &mut ImageSet,
        errors: &mut ErrorList,
    ) -> Result<()> {
        let read_error = |source| MirrorError::RecordSetRead {
            table,
            column,
            source,
        };

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {column} FROM {table}"))
            .map_err(read_error)?;
        let mut rows = stmt.query([]).map_err(read_error)?;

        let mut count = 0usize;
        while let Some(row) = rows.next().map_err(read_error)? {
            match row.get::<_, Option<String>>(0) {
                Ok(Some(image)) => {
                    if images.insert(image) {
                        count += 1;
                    }
                }
                Ok(None) => {}
                Err(source) => {
                    warn!("skipping unreadable record in {table}.{column}: {source}");
                    errors.push(MirrorError::RecordScan {
                        table,
                        column,
                        source,
                    });
                }
            }
        }

        debug!("found {count} new images in {table}.{column}");
        Ok(())
    }

    /// Scans both image record sets into one set.
    ///
    /// On success the set is returned with any per-record errors.  If either record set can't be
    /// read, the run is over: the result is a [`MirrorError::Aggregate`] holding the errors
    /// collected so far followed by the fatal one, and no images.
    pub fn images(&self) -> Result<(ImageSet, ErrorList)> {
        let mut images = ImageSet::new();
        let mut errors = ErrorList::new();

        for (table, column) in [
            (RELATED_IMAGE_TABLE, RELATED_IMAGE_COLUMN),
            (OPERATOR_BUNDLE_TABLE, OPERATOR_BUNDLE_COLUMN),
        ] {
            if let Err(error) = self.scan_images(table, column, &mut images, &mut errors) {
                errors.push(error);
                return Err(MirrorError::Aggregate(errors));
            }
        }

        Ok((images, errors))
    }
}

/// Opens the catalog database at `path`, collects every image it references and closes it again.
pub fn extract_images(path: impl AsRef<Path>) -> Result<(ImageSet, ErrorList)> {
    let path = path.as_ref();
    info!("reading images from catalog database {}", path.display());
    let db = CatalogDatabase::open(path)?;
    let (images, errors) = db.images()?;
    info!("found {} distinct images", images.len());
    Ok((images, errors))
}
