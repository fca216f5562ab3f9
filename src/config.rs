//! Configuration for an index image mirror run.
//!
//! A run is configured with a [`MirrorerOptions`] value: start from the defaults, apply overrides,
//! and hand it to [`IndexImageMirrorer::new`](crate::mirror::IndexImageMirrorer::new), which fills
//! in anything left unset and validates the result before any I/O happens.
//!
//! ```no_run
//! use catalog_mirror::{IndexImageMirrorer, MirrorerOptions, TypedImageReference};
//! use std::{collections::BTreeMap, path::PathBuf};
//!
//! let options = MirrorerOptions::default()
//!     .with_source(TypedImageReference::parse("quay.io/example/index:latest")?)
//!     .with_dest(TypedImageReference::parse("localhost:5000")?)
//!     .with_extractor(|_: &TypedImageReference| -> anyhow::Result<PathBuf> {
//!         Ok(PathBuf::from("index.db"))
//!     })
//!     .with_mirrorer(|_: &BTreeMap<String, String>| -> anyhow::Result<()> { Ok(()) });
//! let mirrorer = IndexImageMirrorer::new(options)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Settings can also come from a TOML file:
//!
//! ```toml
//! source = "quay.io/example/index:latest"
//! dest = "localhost:5000"
//! manifest_dir = "./manifests"
//! index_db = "/tmp/index/bundles.db"
//! icsp_name = "example"
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    error::{MirrorError, Result},
    mirror::{DatabaseExtractor, ImageMirrorer},
    reference::TypedImageReference,
};

/// Directory the generated manifests are written to when none is configured.
pub const DEFAULT_MANIFEST_DIR: &str = "./manifests";

/// Everything needed to run one index image mirror.
pub struct MirrorerOptions {
    pub image_mirrorer: Option<Box<dyn ImageMirrorer>>,
    pub database_extractor: Option<Box<dyn DatabaseExtractor>>,

    pub source: Option<TypedImageReference>,
    pub dest: Option<TypedImageReference>,
    pub manifest_dir: Option<PathBuf>,
}

impl Default for MirrorerOptions {
    fn default() -> Self {
        Self {
            image_mirrorer: None,
            database_extractor: None,
            source: None,
            dest: None,
            manifest_dir: Some(PathBuf::from(DEFAULT_MANIFEST_DIR)),
        }
    }
}

impl fmt::Debug for MirrorerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorerOptions")
            .field("image_mirrorer", &self.image_mirrorer.is_some())
            .field("database_extractor", &self.database_extractor.is_some())
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("manifest_dir", &self.manifest_dir)
            .finish()
    }
}

impl MirrorerOptions {
    /// Options with every field unset, for layering onto another set with [`merge`](Self::merge).
    pub fn empty() -> Self {
        Self {
            manifest_dir: None,
            ..Self::default()
        }
    }

    pub fn with_mirrorer(mut self, mirrorer: impl ImageMirrorer + 'static) -> Self {
        self.image_mirrorer = Some(Box::new(mirrorer));
        self
    }

    pub fn with_extractor(mut self, extractor: impl DatabaseExtractor + 'static) -> Self {
        self.database_extractor = Some(Box::new(extractor));
        self
    }

    pub fn with_source(mut self, source: TypedImageReference) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_dest(mut self, dest: TypedImageReference) -> Self {
        self.dest = Some(dest);
        self
    }

    pub fn with_manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifest_dir = Some(dir.into());
        self
    }

    /// Overlays every field that is set in `other`, leaving the rest alone.
    pub fn merge(mut self, other: MirrorerOptions) -> Self {
        if other.image_mirrorer.is_some() {
            self.image_mirrorer = other.image_mirrorer;
        }
        if other.database_extractor.is_some() {
            self.database_extractor = other.database_extractor;
        }
        if other.source.is_some() {
            self.source = other.source;
        }
        if other.dest.is_some() {
            self.dest = other.dest;
        }
        if other.manifest_dir.is_some() {
            self.manifest_dir = other.manifest_dir;
        }
        self
    }

    /// Fills in defaults for anything left unset.
    pub fn complete(mut self) -> Self {
        if self.manifest_dir.as_deref().is_none_or(is_empty_path) {
            self.manifest_dir = Some(PathBuf::from(DEFAULT_MANIFEST_DIR));
        }
        self
    }

    /// Checks that every collaborator and parameter a run needs is present.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| Err(MirrorError::Configuration(what.to_string()));

        if self.image_mirrorer.is_none() {
            return missing("can't mirror without a mirrorer configured");
        }
        if self.database_extractor.is_none() {
            return missing("can't mirror without a database extractor configured");
        }
        if is_unset(&self.source) {
            return missing("source image required");
        }
        if is_unset(&self.dest) {
            return missing("destination registry required");
        }
        if self
            .dest
            .as_ref()
            .is_some_and(|dest| dest.tag().is_some() || dest.digest().is_some())
        {
            return missing(
                "destination must be a registry or repository, without a tag or digest",
            );
        }
        if self.manifest_dir.as_deref().is_none_or(is_empty_path) {
            return missing("must have directory to write manifests to");
        }
        Ok(())
    }
}

fn is_unset(reference: &Option<TypedImageReference>) -> bool {
    reference
        .as_ref()
        .is_none_or(|reference| reference.to_string().is_empty())
}

fn is_empty_path(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// Settings read from a TOML file.  Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MirrorSettings {
    /// Index image to mirror.
    #[serde(default)]
    pub source: Option<String>,

    /// Registry (and optional namespace) to mirror to.
    #[serde(default)]
    pub dest: Option<String>,

    /// Where to write the mapping file and the image content source policy.
    #[serde(default)]
    pub manifest_dir: Option<PathBuf>,

    /// An already-extracted catalog database for the index image.
    #[serde(default)]
    pub index_db: Option<PathBuf>,

    /// Name of the generated image content source policy.
    #[serde(default)]
    pub icsp_name: Option<String>,
}

impl MirrorSettings {
    /// Parse settings from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is invalid or has unknown keys.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read settings from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// The parameters of these settings as options, with collaborators left unset.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Configuration`] if the source or destination doesn't parse.
    pub fn to_options(&self) -> Result<MirrorerOptions> {
        let parse = |what: &str, value: &str| {
            TypedImageReference::parse(value)
                .map_err(|e| MirrorError::Configuration(format!("invalid {what} {value:?}: {e}")))
        };

        let mut options = MirrorerOptions::empty();
        if let Some(source) = &self.source {
            options.source = Some(parse("source", source)?);
        }
        if let Some(dest) = &self.dest {
            options.dest = Some(parse("destination", dest)?);
        }
        options.manifest_dir = self.manifest_dir.clone();
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use similar_asserts::assert_eq;

    use super::*;

    fn noop_mirror(_: &BTreeMap<String, String>) -> anyhow::Result<()> {
        Ok(())
    }

    fn no_extract(_: &TypedImageReference) -> anyhow::Result<PathBuf> {
        Ok(PathBuf::from("index.db"))
    }

    fn full_options() -> MirrorerOptions {
        MirrorerOptions::default()
            .with_mirrorer(noop_mirror)
            .with_extractor(no_extract)
            .with_source(TypedImageReference::parse("quay.io/example/image:tag").unwrap())
            .with_dest(TypedImageReference::parse("localhost:5000").unwrap())
    }

    fn configuration_message(options: &MirrorerOptions) -> String {
        match options.validate() {
            Err(MirrorError::Configuration(msg)) => msg,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_manifest_dir() {
        let options = MirrorerOptions::default();
        assert_eq!(options.manifest_dir, Some(PathBuf::from("./manifests")));
    }

    #[test]
    fn test_complete_fills_manifest_dir() {
        let mut options = full_options();
        options.manifest_dir = None;
        assert_eq!(
            configuration_message(&options),
            "must have directory to write manifests to"
        );

        let options = options.complete();
        assert_eq!(options.manifest_dir, Some(PathBuf::from("./manifests")));
        options.validate().unwrap();

        let options = full_options().with_manifest_dir("").complete();
        assert_eq!(options.manifest_dir, Some(PathBuf::from("./manifests")));

        let options = full_options().with_manifest_dir("/out").complete();
        assert_eq!(options.manifest_dir, Some(PathBuf::from("/out")));
    }

    #[test]
    fn test_validate_missing_fields() {
        let mut options = full_options();
        options.image_mirrorer = None;
        assert_eq!(
            configuration_message(&options),
            "can't mirror without a mirrorer configured"
        );

        let mut options = full_options();
        options.database_extractor = None;
        assert_eq!(
            configuration_message(&options),
            "can't mirror without a database extractor configured"
        );

        let mut options = full_options();
        options.source = None;
        assert_eq!(configuration_message(&options), "source image required");

        let mut options = full_options();
        options.dest = Some(TypedImageReference::default());
        assert_eq!(
            configuration_message(&options),
            "destination registry required"
        );
    }

    #[test]
    fn test_validate_rejects_qualified_destination() {
        let message = "destination must be a registry or repository, without a tag or digest";

        let options =
            full_options().with_dest(TypedImageReference::parse("quay.io/olmtest:v1").unwrap());
        assert_eq!(configuration_message(&options), message);

        let options = full_options().with_dest(
            TypedImageReference::parse(
                "quay.io/olmtest@sha256:db563baa8194fcfe39d1df744ed70024b0f1f9e9b55b5923c2f3a413c44dc6b8",
            )
            .unwrap(),
        );
        assert_eq!(configuration_message(&options), message);

        let options =
            full_options().with_dest(TypedImageReference::parse("localhost:5000/mirror").unwrap());
        options.validate().unwrap();
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let options = full_options()
            .with_dest(TypedImageReference::parse("quay.io/first").unwrap())
            .with_dest(TypedImageReference::parse("quay.io/second").unwrap());
        assert_eq!(options.dest.unwrap().to_string(), "quay.io/second");
    }

    #[test]
    fn test_merge_only_set_fields() {
        let overlay = MirrorerOptions::empty()
            .with_dest(TypedImageReference::parse("quay.io/olmtest").unwrap());
        let merged = full_options().with_manifest_dir("/out").merge(overlay);

        assert_eq!(merged.dest.as_ref().unwrap().to_string(), "quay.io/olmtest");
        assert_eq!(
            merged.source.as_ref().unwrap().to_string(),
            "quay.io/example/image:tag"
        );
        assert_eq!(merged.manifest_dir, Some(PathBuf::from("/out")));
        assert!(merged.image_mirrorer.is_some());
        merged.validate().unwrap();
    }

    #[test]
    fn test_parse_settings() {
        let settings = MirrorSettings::from_toml(
            r#"
source = "quay.io/example/index:latest"
dest = "localhost:5000"
index_db = "/tmp/bundles.db"
"#,
        )
        .unwrap();
        assert_eq!(settings.index_db, Some(PathBuf::from("/tmp/bundles.db")));
        assert_eq!(settings.manifest_dir, None);

        let options = settings.to_options().unwrap();
        assert_eq!(
            options.source.unwrap().to_string(),
            "quay.io/example/index:latest"
        );
        assert_eq!(options.dest.unwrap().to_string(), "localhost:5000");
        assert_eq!(options.manifest_dir, None);
    }

    #[test]
    fn test_settings_errors() {
        assert!(matches!(
            MirrorSettings::from_toml("registry = \"quay.io\""),
            Err(MirrorError::Settings(_))
        ));

        let settings = MirrorSettings {
            dest: Some("oci://nowhere".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.to_options(),
            Err(MirrorError::Configuration(_))
        ));
    }
}
