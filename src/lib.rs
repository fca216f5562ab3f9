//! Mirroring of operator catalog index images.
//!
//! An operator index image carries a catalog database that references every bundle image and
//! every related image its operators need.  To use the catalog from a disconnected registry all of
//! those images have to be copied over, and the cluster has to be told where to find them.  This
//! crate computes that copy plan and writes it out:
//!
//! - `mapping.txt`: `source=destination` copy directives
//! - `imageContentSourcePolicy.yaml`: digest mirror rules for the container runtime
//!
//! Pulling the index and copying image bytes are left to the [`DatabaseExtractor`] and
//! [`ImageMirrorer`] a caller provides.

pub mod catalog;
pub mod config;
pub mod error;
pub mod manifests;
pub mod mapping;
pub mod mirror;
pub mod reference;


pub use catalog::{extract_images, CatalogDatabase, ImageSet};
pub use config::{MirrorSettings, MirrorerOptions};
pub use error::{ErrorList, MirrorError, Result};
pub use manifests::{generate_icsp, write_manifests, write_to_mapping, ImageContentSourcePolicy};
pub use mapping::{map_images, Mapping, Target};
pub use mirror::{DatabaseExtractor, ImageMirrorer, IndexImageMirrorer, MirrorReport};
pub use reference::{ImageReference, ReferenceError, ReferenceType, TypedImageReference};
