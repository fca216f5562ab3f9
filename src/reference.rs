//! Container image reference parsing.
//!
//! Two kinds of reference show up while mirroring a catalog:
//!
//!  - [`ImageReference`]: an image string found in a catalog database.  These are parsed with the
//!    Docker distribution grammar and normalized (implicit `docker.io` domain, `library/` prefix
//!    for official images), so every reference has an explicit domain that can be swapped out.
//!
//!  - [`TypedImageReference`]: a user-supplied root such as the index image being mirrored or the
//!    registry it is mirrored to.  Roots are kept as written; a destination root is usually just a
//!    registry (`localhost:5000`) or a registry plus namespace (`quay.io/olmtest`).

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex_automata::meta::Regex;
use thiserror::Error;

/// The domain used for references that don't name one.
pub const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;

/* The reference grammar, from github.com/distribution/reference:
 *
 *   reference   := name [ ":" tag ] [ "@" digest ]
 *   name        := [domain '/'] path-component ['/' path-component]*
 *   domain      := host [':' port-number]
 *   host        := domain-name | IPv4address | \[ IPv6address \]
 *   path-component := alpha-numeric [separator alpha-numeric]*
 *   separator   := /[_.]|__|[-]+/
 *   tag         := /[\w][\w.-]{0,127}/
 *   digest      := algorithm ":" encoded
 *
 * After normalization the domain is always present, so it is required here.
 */
static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    let alnum = "[a-z0-9]+";
    let path_component = format!("{alnum}(?:(?:[._]|__|[-]+){alnum})*");
    let domain_component = "(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let host = format!(r"(?:{domain_component}(?:\.{domain_component})*|\[[a-fA-F0-9:]+\])");
    let tag = "[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}";
    let digest = "[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";
    let pattern = format!(
        "^(?P<domain>{host}(?::[0-9]+)?)/(?P<path>{path_component}(?:/{path_component})*)(?::(?P<tag>{tag}))?(?:@(?P<digest>{digest}))?$"
    );
    Regex::new(&pattern).expect("reference grammar is a valid regex")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("invalid reference format: empty reference")]
    Empty,
    #[error("invalid reference format")]
    InvalidFormat,
    #[error("invalid reference format: repository name must be lowercase")]
    NameNotLowercase,
    #[error("repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters")]
    NameTooLong,
    #[error("invalid repository name (64-byte hex), cannot specify 64-byte hexadecimal strings")]
    HexIdentifier,
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),
    #[error("invalid checksum digest: {0}")]
    InvalidDigest(String),
    #[error("unknown transport in {0:?}, expected docker:// or file://")]
    UnknownTransport(String),
    #[error("invalid image root {0:?}")]
    InvalidRoot(String),
}

/// A canonical, fully-qualified image reference: `domain/path[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageReference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parses an image string and normalizes it to its canonical form.
    ///
    /// `busybox` becomes `docker.io/library/busybox`, `index.docker.io/foo/bar` becomes
    /// `docker.io/foo/bar`, and anything naming its own domain is kept as is.  No default tag is
    /// added.
    pub fn parse_normalized(s: &str) -> Result<Self, ReferenceError> {
        if s.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if is_hex_identifier(s) {
            return Err(ReferenceError::HexIdentifier);
        }

        let (domain, remainder) = split_domain(s);
        let remote_name = match remainder.find([':', '@']) {
            Some(idx) => &remainder[..idx],
            None => &remainder[..],
        };
        if remote_name.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(ReferenceError::NameNotLowercase);
        }

        Self::parse_canonical(&format!("{domain}/{remainder}"))
    }

    /// Parses a reference that already carries an explicit domain.
    fn parse_canonical(s: &str) -> Result<Self, ReferenceError> {
        let mut caps = REFERENCE.create_captures();
        REFERENCE.captures(s, &mut caps);
        if !caps.is_match() {
            return Err(ReferenceError::InvalidFormat);
        }
        let group = |name: &str| caps.get_group_by_name(name).map(|span| &s[span.range()]);

        let (Some(domain), Some(path)) = (group("domain"), group("path")) else {
            return Err(ReferenceError::InvalidFormat);
        };
        if domain.len() + 1 + path.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(ReferenceError::NameTooLong);
        }
        let digest = group("digest");
        if let Some(digest) = digest {
            validate_digest(digest)?;
        }

        Ok(Self {
            domain: domain.to_string(),
            path: path.to_string(),
            tag: group("tag").map(str::to_string),
            digest: digest.map(str::to_string),
        })
    }

    /// The registry domain, e.g. `quay.io` or `localhost:5000`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The repository path below the domain, e.g. `coreos/etcd-operator`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The repository name: `domain/path`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn is_digest_qualified(&self) -> bool {
        self.digest.is_some()
    }

    /// Everything after the domain in the canonical string, starting with `/`.
    pub fn remainder(&self) -> String {
        let mut remainder = format!("/{}", self.path);
        if let Some(tag) = &self.tag {
            remainder.push(':');
            remainder.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            remainder.push('@');
            remainder.push_str(digest);
        }
        remainder
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.domain, self.remainder())
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_normalized(s)
    }
}

fn is_hex_identifier(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn looks_like_domain(component: &str) -> bool {
    component.contains(['.', ':']) || component == "localhost"
}

// Splits off the domain, applying the Docker Hub defaults.
fn split_domain(name: &str) -> (&str, String) {
    let (domain, remainder) = match name.split_once('/') {
        Some((first, rest)) if looks_like_domain(first) => (first, rest),
        _ => (DEFAULT_DOMAIN, name),
    };
    let domain = if domain == LEGACY_DEFAULT_DOMAIN {
        DEFAULT_DOMAIN
    } else {
        domain
    };
    if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        (domain, format!("{OFFICIAL_REPO_PREFIX}{remainder}"))
    } else {
        (domain, remainder.to_string())
    }
}

fn validate_digest(digest: &str) -> Result<(), ReferenceError> {
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        return Err(ReferenceError::InvalidDigest(digest.to_string()));
    };
    let expected_len = match algorithm {
        "sha256" => 64,
        "sha384" => 96,
        "sha512" => 128,
        other => return Err(ReferenceError::UnsupportedDigest(other.to_string())),
    };
    let lower_hex = encoded
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if encoded.len() != expected_len || !lower_hex {
        return Err(ReferenceError::InvalidDigest(digest.to_string()));
    }
    Ok(())
}

/// Where a root reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceType {
    /// A container registry, written bare or with `docker://`.
    #[default]
    Docker,
    /// A local directory, written with `file://`.
    File,
}

/// A root reference supplied by the user: the index image to mirror, or the destination that
/// discovered images are re-rooted under.
///
/// Unlike [`ImageReference`] no normalization takes place; [`Display`](fmt::Display) gives back
/// the root as written (minus a redundant `docker://`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypedImageReference {
    ref_type: ReferenceType,
    registry: Option<String>,
    path: Option<String>,
    tag: Option<String>,
    digest: Option<String>,
}

impl TypedImageReference {
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let (ref_type, rest) = if let Some(rest) = s.strip_prefix("file://") {
            (ReferenceType::File, rest)
        } else if let Some(rest) = s.strip_prefix("docker://") {
            (ReferenceType::Docker, rest)
        } else if s.contains("://") {
            return Err(ReferenceError::UnknownTransport(s.to_string()));
        } else {
            (ReferenceType::Docker, s)
        };

        let invalid = || ReferenceError::InvalidRoot(s.to_string());
        if rest.is_empty() || rest.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let (rest, digest) = match rest.rsplit_once('@') {
            Some((_, "")) => return Err(invalid()),
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (rest, None),
        };

        let registry_only = !rest.contains('/') && is_registry(rest);
        let last_slash = rest.rfind('/');
        let (name, tag) = match rest.rfind(':') {
            Some(idx) if !registry_only && last_slash.map_or(true, |slash| idx > slash) => {
                (&rest[..idx], Some(rest[idx + 1..].to_string()))
            }
            _ => (rest, None),
        };
        if name.is_empty() || name.split('/').any(str::is_empty) || tag.as_deref() == Some("") {
            return Err(invalid());
        }

        let (registry, path) = match (ref_type, name.split_once('/')) {
            (ReferenceType::File, _) => (None, Some(name)),
            (ReferenceType::Docker, _) if registry_only => (Some(name), None),
            (ReferenceType::Docker, Some((first, rest))) if looks_like_domain(first) => {
                (Some(first), Some(rest))
            }
            (ReferenceType::Docker, _) => (None, Some(name)),
        };

        Ok(Self {
            ref_type,
            registry: registry.map(str::to_string),
            path: path.map(str::to_string),
            tag,
            digest,
        })
    }

    pub fn ref_type(&self) -> ReferenceType {
        self.ref_type
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The last component of the repository path, or the registry for a registry-only root.
    pub fn short_name(&self) -> Option<&str> {
        match &self.path {
            Some(path) => path.rsplit('/').next(),
            None => self.registry.as_deref(),
        }
    }
}

// A single component that can only be a registry: a dotted host, localhost, or host:port.
fn is_registry(component: &str) -> bool {
    if component == "localhost" || component.contains('.') {
        return true;
    }
    match component.split_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

impl fmt::Display for TypedImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ref_type == ReferenceType::File {
            write!(f, "file://")?;
        }
        match (&self.registry, &self.path) {
            (Some(registry), Some(path)) => write!(f, "{registry}/{path}")?,
            (Some(registry), None) => write!(f, "{registry}")?,
            (None, Some(path)) => write!(f, "{path}")?,
            (None, None) => {}
        }
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for TypedImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const ETCD_DIGEST: &str =
        "sha256:db563baa8194fcfe39d1df744ed70024b0f1f9e9b55b5923c2f3a413c44dc6b8";

    fn normalized(s: &str) -> String {
        ImageReference::parse_normalized(s).unwrap().to_string()
    }

    #[test]
    fn test_normalize_docker_hub() {
        assert_eq!(normalized("busybox"), "docker.io/library/busybox");
        assert_eq!(normalized("busybox:1.36"), "docker.io/library/busybox:1.36");
        assert_eq!(normalized("strimzi/operator"), "docker.io/strimzi/operator");
        assert_eq!(
            normalized("index.docker.io/strimzi/operator"),
            "docker.io/strimzi/operator"
        );
        assert_eq!(normalized("docker.io/ubuntu"), "docker.io/library/ubuntu");
    }

    #[test]
    fn test_explicit_domain_kept() {
        let r = ImageReference::parse_normalized("quay.io/halkyonio/operator:v0.1.8").unwrap();
        assert_eq!(r.domain(), "quay.io");
        assert_eq!(r.path(), "halkyonio/operator");
        assert_eq!(r.tag(), Some("v0.1.8"));
        assert!(!r.is_digest_qualified());
        assert_eq!(r.remainder(), "/halkyonio/operator:v0.1.8");

        let r = ImageReference::parse_normalized("localhost:5000/test/etcd").unwrap();
        assert_eq!(r.domain(), "localhost:5000");
        assert_eq!(r.name(), "localhost:5000/test/etcd");

        let r = ImageReference::parse_normalized("localhost/test").unwrap();
        assert_eq!(r.domain(), "localhost");
    }

    #[test]
    fn test_digest_reference() {
        let s = format!("quay.io/coreos/etcd-operator@{ETCD_DIGEST}");
        let r = ImageReference::parse_normalized(&s).unwrap();
        assert!(r.is_digest_qualified());
        assert_eq!(r.digest(), Some(ETCD_DIGEST));
        assert_eq!(r.tag(), None);
        assert_eq!(r.to_string(), s);
    }

    #[test]
    fn test_tag_and_digest() {
        let s = format!("quay.io/coreos/etcd-operator:v0.9.4@{ETCD_DIGEST}");
        let r = ImageReference::parse_normalized(&s).unwrap();
        assert_eq!(r.tag(), Some("v0.9.4"));
        assert_eq!(r.digest(), Some(ETCD_DIGEST));
        assert_eq!(r.to_string(), s);
    }

    #[test]
    fn test_dotted_path_components() {
        assert_eq!(
            normalized("quay.io/test/prometheus.0.14.0"),
            "quay.io/test/prometheus.0.14.0"
        );
        assert_eq!(normalized("quay.io/a__b/c-d--e"), "quay.io/a__b/c-d--e");
    }

    #[test]
    fn test_rejected_references() {
        let cases = [
            ("", ReferenceError::Empty),
            ("quay.io/Coreos/etcd", ReferenceError::NameNotLowercase),
            ("Busybox", ReferenceError::NameNotLowercase),
            ("quay.io/coreos/etcd:", ReferenceError::InvalidFormat),
            ("quay.io/coreos//etcd", ReferenceError::InvalidFormat),
            ("quay.io/coreos/etcd@sha256:abc", ReferenceError::InvalidFormat),
            ("quay.io/-coreos/etcd", ReferenceError::InvalidFormat),
            ("quay.io/coreos/etcd:-tag", ReferenceError::InvalidFormat),
            ("not a reference", ReferenceError::InvalidFormat),
            (
                "a0b1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1",
                ReferenceError::HexIdentifier,
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(
                ImageReference::parse_normalized(input),
                Err(expected),
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_digest_validation() {
        let short = "quay.io/coreos/etcd@sha256:0123456789abcdef0123456789abcdef";
        assert_eq!(
            ImageReference::parse_normalized(short),
            Err(ReferenceError::InvalidDigest(
                "sha256:0123456789abcdef0123456789abcdef".into()
            ))
        );

        let unknown = "quay.io/coreos/etcd@md5:0123456789abcdef0123456789abcdef";
        assert_eq!(
            ImageReference::parse_normalized(unknown),
            Err(ReferenceError::UnsupportedDigest("md5".into()))
        );
    }

    #[test]
    fn test_name_too_long() {
        let long = format!("quay.io/{}", "a".repeat(250));
        assert_eq!(
            ImageReference::parse_normalized(&long),
            Err(ReferenceError::NameTooLong)
        );
    }

    #[test]
    fn test_typed_registry_only() {
        let r = TypedImageReference::parse("localhost:5000").unwrap();
        assert_eq!(r.registry(), Some("localhost:5000"));
        assert_eq!(r.path(), None);
        assert_eq!(r.tag(), None);
        assert_eq!(r.to_string(), "localhost:5000");

        let r = TypedImageReference::parse("quay.io").unwrap();
        assert_eq!(r.registry(), Some("quay.io"));
        assert_eq!(r.to_string(), "quay.io");
    }

    #[test]
    fn test_typed_with_namespace() {
        let r = TypedImageReference::parse("quay.io/olmtest").unwrap();
        assert_eq!(r.registry(), Some("quay.io"));
        assert_eq!(r.path(), Some("olmtest"));
        assert_eq!(r.to_string(), "quay.io/olmtest");

        let r = TypedImageReference::parse("docker://registry.local:5000/mirror/ns").unwrap();
        assert_eq!(r.ref_type(), ReferenceType::Docker);
        assert_eq!(r.registry(), Some("registry.local:5000"));
        assert_eq!(r.to_string(), "registry.local:5000/mirror/ns");
    }

    #[test]
    fn test_typed_index_image() {
        let r = TypedImageReference::parse("quay.io/example/image:tag").unwrap();
        assert_eq!(r.registry(), Some("quay.io"));
        assert_eq!(r.path(), Some("example/image"));
        assert_eq!(r.tag(), Some("tag"));
        assert_eq!(r.short_name(), Some("image"));
        assert_eq!(r.to_string(), "quay.io/example/image:tag");

        let r = TypedImageReference::parse(&format!("quay.io/example/index@{ETCD_DIGEST}"))
            .unwrap();
        assert_eq!(r.digest(), Some(ETCD_DIGEST));
        assert_eq!(r.tag(), None);

        let r = TypedImageReference::parse("busybox:latest").unwrap();
        assert_eq!(r.registry(), None);
        assert_eq!(r.path(), Some("busybox"));
        assert_eq!(r.tag(), Some("latest"));
    }

    #[test]
    fn test_typed_file_root() {
        let r = TypedImageReference::parse("file://local/index").unwrap();
        assert_eq!(r.ref_type(), ReferenceType::File);
        assert_eq!(r.registry(), None);
        assert_eq!(r.to_string(), "file://local/index");
    }

    #[test]
    fn test_typed_rejected() {
        for input in ["", "docker://", "file://", "quay.io//ns", "quay.io/ns:", "a b", "x@"] {
            assert!(TypedImageReference::parse(input).is_err(), "{input:?}");
        }
        assert_eq!(
            TypedImageReference::parse("oci://dir"),
            Err(ReferenceError::UnknownTransport("oci://dir".into()))
        );
    }
}
