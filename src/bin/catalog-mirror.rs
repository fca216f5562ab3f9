//! Command-line front end for mirroring an operator catalog.
//!
//! Reads an already-extracted catalog database, copies every image it references with skopeo (or
//! just plans the copy with `--dry-run`), and writes `mapping.txt` and
//! `imageContentSourcePolicy.yaml` to the manifests directory.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    process::{Command, Stdio},
};

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use log::info;

use catalog_mirror::{
    DatabaseExtractor, ImageMirrorer, IndexImageMirrorer, MirrorSettings, MirrorerOptions,
    TypedImageReference,
};

/// catalog-mirror
#[derive(Debug, Parser)]
#[clap(name = "catalog-mirror", version)]
pub struct App {
    /// Index image to mirror, e.g. quay.io/example/index:latest
    src: Option<String>,
    /// Registry, optionally with a namespace, to mirror to, e.g. localhost:5000
    dest: Option<String>,

    /// Read settings from a TOML file; command-line arguments take precedence
    #[clap(long)]
    config: Option<PathBuf>,
    /// Catalog database already extracted from the index image
    #[clap(long)]
    index_db: Option<PathBuf>,
    /// Where to write mapping.txt and imageContentSourcePolicy.yaml
    #[clap(long)]
    manifests_dir: Option<PathBuf>,
    /// Name of the generated ImageContentSourcePolicy (default: the index image name)
    #[clap(long)]
    icsp_name: Option<String>,
    /// Compute and write the manifests without copying any images
    #[clap(long)]
    dry_run: bool,
}

/// Hands out a database that was extracted beforehand.
struct ExistingDatabase(PathBuf);

impl DatabaseExtractor for ExistingDatabase {
    fn extract(&self, from: &TypedImageReference) -> Result<PathBuf> {
        ensure!(
            self.0.is_file(),
            "catalog database {} for {from} does not exist",
            self.0.display()
        );
        Ok(self.0.clone())
    }
}

struct DryRun;

impl ImageMirrorer for DryRun {
    fn mirror(&self, mapping: &BTreeMap<String, String>) -> Result<()> {
        for (source, dest) in mapping {
            info!("would copy {source} to {dest}");
        }
        Ok(())
    }
}

/// Copies each image with `skopeo copy --all`.
struct SkopeoCopy;

fn skopeo_transport(image: &str) -> String {
    match image.strip_prefix("file://") {
        Some(dir) => format!("dir:{dir}"),
        None => format!("docker://{image}"),
    }
}

impl ImageMirrorer for SkopeoCopy {
    fn mirror(&self, mapping: &BTreeMap<String, String>) -> Result<()> {
        let mut failed = vec![];
        for (source, dest) in mapping {
            info!("copying {source} to {dest}");
            let status = Command::new("skopeo")
                .args(["copy", "--all"])
                .arg(skopeo_transport(source))
                .arg(skopeo_transport(dest))
                .stdin(Stdio::null())
                .status()
                .context("Running skopeo")?;
            if !status.success() {
                failed.push(format!("{source} ({status})"));
            }
        }
        if !failed.is_empty() {
            bail!(
                "{} of {} images failed to copy: {}",
                failed.len(),
                mapping.len(),
                failed.join(", ")
            );
        }
        Ok(())
    }
}

fn parse_reference(what: &str, value: &str) -> Result<TypedImageReference> {
    TypedImageReference::parse(value).with_context(|| format!("Invalid {what} {value:?}"))
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    let settings = match &args.config {
        Some(path) => MirrorSettings::load(path)
            .with_context(|| format!("Loading settings from {}", path.display()))?,
        None => MirrorSettings::default(),
    };

    let mut cli = MirrorerOptions::empty();
    if let Some(src) = &args.src {
        cli = cli.with_source(parse_reference("source", src)?);
    }
    if let Some(dest) = &args.dest {
        cli = cli.with_dest(parse_reference("destination", dest)?);
    }
    if let Some(dir) = &args.manifests_dir {
        cli = cli.with_manifest_dir(dir);
    }

    let index_db = args
        .index_db
        .or(settings.index_db.clone())
        .context("No catalog database given, use --index-db")?;
    let icsp_name = args.icsp_name.or(settings.icsp_name.clone());

    let mut options = MirrorerOptions::default()
        .merge(settings.to_options()?)
        .merge(cli)
        .with_extractor(ExistingDatabase(index_db));
    let image_mirrorer: Box<dyn ImageMirrorer> = if args.dry_run {
        Box::new(DryRun)
    } else {
        Box::new(SkopeoCopy)
    };
    options.image_mirrorer = Some(image_mirrorer);

    let mirrorer = IndexImageMirrorer::new(options)?;
    let report = mirrorer.mirror()?;
    mirrorer.write_manifests(&report.mapping, icsp_name.as_deref())?;
    println!(
        "wrote mirroring manifests to {}",
        mirrorer.manifest_dir().display()
    );

    report.into_result()?;
    Ok(())
}
