//! Mirroring the images of an operator index.
//!
//! [`IndexImageMirrorer`] runs the whole pipeline for one index image:
//!
//!  1. the [`DatabaseExtractor`] pulls the index and hands back its catalog database
//!  2. every image referenced by the catalog is collected
//!  3. each image is re-rooted under the destination
//!  4. the [`ImageMirrorer`] copies the whole batch
//!
//! The resulting [`Mapping`] is then used to write the manifests.  Steps 1 and 2 are fatal when
//! they fail; unparseable images and a failed copy are collected into the report instead, so the
//! mapping survives and can be inspected or reused without pulling the index again.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
    catalog::extract_images,
    config::MirrorerOptions,
    error::{ErrorList, MirrorError, Result},
    manifests::write_manifests,
    mapping::{map_images, Mapping},
    reference::TypedImageReference,
};

/// Knows how to pull an index image and extract its catalog database.
pub trait DatabaseExtractor {
    /// Returns the path of the extracted database for the index image `from`.
    fn extract(&self, from: &TypedImageReference) -> anyhow::Result<PathBuf>;
}

impl<F> DatabaseExtractor for F
where
    F: Fn(&TypedImageReference) -> anyhow::Result<PathBuf>,
{
    fn extract(&self, from: &TypedImageReference) -> anyhow::Result<PathBuf> {
        self(from)
    }
}

/// Knows how to copy images from one registry to another.
pub trait ImageMirrorer {
    /// Copies every source image in `mapping` to its destination.
    fn mirror(&self, mapping: &BTreeMap<String, String>) -> anyhow::Result<()>;
}

impl<F> ImageMirrorer for F
where
    F: Fn(&BTreeMap<String, String>) -> anyhow::Result<()>,
{
    fn mirror(&self, mapping: &BTreeMap<String, String>) -> anyhow::Result<()> {
        self(mapping)
    }
}

/// The outcome of a run that got as far as mapping.
#[derive(Debug)]
pub struct MirrorReport {
    pub mapping: Mapping,
    /// Non-fatal errors, in the order they happened.
    pub errors: ErrorList,
}

impl MirrorReport {
    /// `true` if nothing was skipped and the copy succeeded.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// The mapping, or every collected error if there were any.
    pub fn into_result(self) -> Result<Mapping> {
        self.errors.into_result()?;
        Ok(self.mapping)
    }
}

pub struct IndexImageMirrorer {
    image_mirrorer: Box<dyn ImageMirrorer>,
    database_extractor: Box<dyn DatabaseExtractor>,

    source: TypedImageReference,
    dest: TypedImageReference,
    manifest_dir: PathBuf,
}

impl IndexImageMirrorer {
    /// Completes and validates `options`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] if a collaborator or parameter is missing, or if the
    /// destination carries a tag or digest.
    pub fn new(options: MirrorerOptions) -> Result<Self> {
        let options = options.complete();
        options.validate()?;

        let MirrorerOptions {
            image_mirrorer: Some(image_mirrorer),
            database_extractor: Some(database_extractor),
            source: Some(source),
            dest: Some(dest),
            manifest_dir: Some(manifest_dir),
        } = options
        else {
            return Err(MirrorError::Configuration(
                "incomplete options after validation".to_string(),
            ));
        };

        Ok(Self {
            image_mirrorer,
            database_extractor,
            source,
            dest,
            manifest_dir,
        })
    }

    pub fn source(&self) -> &TypedImageReference {
        &self.source
    }

    pub fn dest(&self) -> &TypedImageReference {
        &self.dest
    }

    pub fn manifest_dir(&self) -> &Path {
        &self.manifest_dir
    }

    /// Extracts the catalog and computes the mapping, without copying anything.
    ///
    /// Unparseable images end up in the returned error list.
    pub fn compute_mapping(&self) -> Result<(Mapping, ErrorList)> {
        info!("extracting catalog database from {}", self.source);
        let db_path = self
            .database_extractor
            .extract(&self.source)
            .map_err(|reason| MirrorError::DatabaseExtraction {
                image: self.source.to_string(),
                reason,
            })?;

        let (images, mut errors) = extract_images(&db_path)?;
        let mapping = map_images(&images, &self.dest.to_string(), &mut errors);
        info!(
            "mapped {} of {} images under {}",
            mapping.len(),
            images.len(),
            self.dest
        );
        Ok((mapping, errors))
    }

    /// Runs the pipeline and copies every mapped image.
    ///
    /// # Errors
    ///
    /// Fails outright if the catalog can't be extracted or read.  Anything after that is
    /// collected into [`MirrorReport::errors`].
    pub fn mirror(&self) -> Result<MirrorReport> {
        let (mapping, mut errors) = self.compute_mapping()?;

        info!("mirroring {} images", mapping.len());
        if let Err(reason) = self.image_mirrorer.mirror(&mapping.mirror_pairs()) {
            warn!("mirroring failed: {reason:#}");
            errors.push(MirrorError::MirrorInvocation { reason });
        }

        Ok(MirrorReport { mapping, errors })
    }

    /// Name for the generated policy: the last path component of the index image.
    pub fn default_icsp_name(&self) -> String {
        self.source.short_name().unwrap_or("catalog").to_string()
    }

    /// Writes the mapping file and the image content source policy to the manifest directory.
    pub fn write_manifests(&self, mapping: &Mapping, icsp_name: Option<&str>) -> Result<()> {
        let name = match icsp_name {
            Some(name) => name.to_string(),
            None => self.default_icsp_name(),
        };
        write_manifests(&self.manifest_dir, &name, mapping)
    }
}
