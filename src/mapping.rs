//! Re-rooting discovered images under a destination.
//!
//! Each image found in the catalog is parsed into its canonical form and its domain is replaced
//! with the destination root; everything after the domain is kept byte for byte:
//!
//! ```text
//! quay.io/coreos/etcd-operator@sha256:db56...  ->  localhost:5000/coreos/etcd-operator@sha256:db56...
//! busybox:1.36                                 ->  localhost:5000/library/busybox:1.36
//! ```

use std::collections::{btree_map, BTreeMap};

use log::{debug, warn};

use crate::{
    catalog::ImageSet,
    error::{ErrorList, MirrorError},
    reference::ImageReference,
};

/// The destination forms computed for one source image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Digest-pinned destination, only for sources that carry a digest.
    pub with_digest: Option<String>,
    /// Destination root followed by the source's path and tag or digest.
    pub with_tag: String,
}

impl Target {
    /// Computes the destination forms of `source` under `dest_root`.
    pub fn new(source: &ImageReference, dest_root: &str) -> Self {
        let with_digest = source
            .digest()
            .map(|digest| format!("{dest_root}/{}@{digest}", source.path()));
        Self {
            with_digest,
            with_tag: format!("{dest_root}{}", source.remainder()),
        }
    }

    /// The repository a digest-pinned destination lives in, i.e. `with_digest` without the
    /// digest.
    pub fn mirror_repository(&self) -> Option<&str> {
        let with_digest = self.with_digest.as_deref()?;
        Some(match with_digest.rsplit_once('@') {
            Some((repository, _)) => repository,
            None => with_digest,
        })
    }

    /// The destination handed to the image mirrorer.
    pub fn mirror_destination(&self) -> &str {
        self.with_digest.as_deref().unwrap_or(&self.with_tag)
    }
}

/// Canonical source reference to destination, iterated in ascending order of the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping(BTreeMap<String, Target>);

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<String>, target: Target) -> Option<Target> {
        self.0.insert(source.into(), target)
    }

    pub fn get(&self, source: &str) -> Option<&Target> {
        self.0.get(source)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Target> {
        self.0.iter()
    }

    /// The plain source to destination pairs the image mirrorer works from.
    pub fn mirror_pairs(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(source, target)| (source.clone(), target.mirror_destination().to_string()))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, Target)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (S, Target)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(s, t)| (s.into(), t)).collect())
    }
}

impl<'a> IntoIterator for &'a Mapping {
    type Item = (&'a String, &'a Target);
    type IntoIter = btree_map::Iter<'a, String, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Maps every image in `images` under `dest_root`.
///
/// Images that don't parse are reported in `errors` and left out; they never stop the rest of the
/// set from being mapped.  Images that normalize to the same canonical reference share one entry.
pub fn map_images(images: &ImageSet, dest_root: &str, errors: &mut ErrorList) -> Mapping {
    let mut mapping = Mapping::new();
    for image in images.iter() {
        let source = match ImageReference::parse_normalized(image) {
            Ok(source) => source,
            Err(source) => {
                warn!("skipping {image}: {source}");
                errors.push(MirrorError::ReferenceParse {
                    image: image.to_string(),
                    source,
                });
                continue;
            }
        };
        let target = Target::new(&source, dest_root);
        debug!("{source} -> {}", target.with_tag);
        mapping.insert(source.to_string(), target);
    }
    mapping
}
