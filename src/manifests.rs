//! Output artifacts of a mirror run.
//!
//! Two files are generated from a [`Mapping`]:
//!
//!  - `mapping.txt`: one `source=destination` copy directive per line, for feeding to an image
//!    copy tool.
//!  - `imageContentSourcePolicy.yaml`: an `ImageContentSourcePolicy` that tells the cluster's
//!    container runtime to pull digest-pinned images from the mirror.
//!
//! Both are sorted by source so that the same mapping always gives the same bytes.

use std::{
    fs::{create_dir_all, File},
    io::{BufWriter, Write},
    path::Path,
};

use log::info;
use serde::Serialize;

use crate::{error::Result, mapping::Mapping};

pub const MAPPING_FILE: &str = "mapping.txt";
pub const ICSP_FILE: &str = "imageContentSourcePolicy.yaml";

pub const ICSP_API_VERSION: &str = "operator.openshift.io/v1alpha1";
pub const ICSP_KIND: &str = "ImageContentSourcePolicy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContentSourcePolicy {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ImageContentSourcePolicySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMeta {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContentSourcePolicySpec {
    pub repository_digest_mirrors: Vec<RepositoryDigestMirrors>,
}

/// One rule: digest-pinned pulls of `source` may be served by any of `mirrors`.
// Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryDigestMirrors {
    pub mirrors: Vec<String>,
    pub source: String,
}

impl ImageContentSourcePolicy {
    /// Builds the policy for every digest-pinned entry of `mapping`, one rule per source.
    ///
    /// Entries without a digest destination are left out since a digest mirror can't serve them.
    pub fn from_mapping(name: &str, mapping: &Mapping) -> Self {
        let repository_digest_mirrors = mapping
            .iter()
            .filter_map(|(source, target)| {
                Some(RepositoryDigestMirrors {
                    mirrors: vec![target.mirror_repository()?.to_string()],
                    source: source.clone(),
                })
            })
            .collect();

        Self {
            api_version: ICSP_API_VERSION.to_string(),
            kind: ICSP_KIND.to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
            },
            spec: ImageContentSourcePolicySpec {
                repository_digest_mirrors,
            },
        }
    }
}

/// Writes one `source=destination` line per entry, sorted by source.
///
/// The destination is always the tag form; this file is a list of copy directives, not
/// digest-pinned mirror rules.
pub fn write_to_mapping(out: &mut impl Write, mapping: &Mapping) -> std::io::Result<()> {
    for (source, target) in mapping {
        writeln!(out, "{source}={}", target.with_tag)?;
    }
    Ok(())
}

/// Serializes the `ImageContentSourcePolicy` for `mapping` as YAML.
pub fn generate_icsp(name: &str, mapping: &Mapping) -> Result<Vec<u8>> {
    let icsp = ImageContentSourcePolicy::from_mapping(name, mapping);
    Ok(serde_yaml_ng::to_string(&icsp)?.into_bytes())
}

/// Writes [`MAPPING_FILE`] and [`ICSP_FILE`] into `dir`, creating it if needed.
pub fn write_manifests(dir: impl AsRef<Path>, name: &str, mapping: &Mapping) -> Result<()> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;

    let icsp = generate_icsp(name, mapping)?;
    std::fs::write(dir.join(ICSP_FILE), icsp)?;

    let mut out = BufWriter::new(File::create(dir.join(MAPPING_FILE))?);
    write_to_mapping(&mut out, mapping)?;
    out.flush()?;

    info!("wrote {} and {} to {}", MAPPING_FILE, ICSP_FILE, dir.display());
    Ok(())
}
