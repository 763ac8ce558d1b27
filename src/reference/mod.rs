// Image reference model
//
// Parses free-form image references (`nginx`, `ghcr.io/org/app:1.2`,
// `registry:5000/app@sha256:...`, bare 64-hex digests) into their components
// and renders them back under a caller-selected FormatMask.

mod error;

pub use error::ReferenceError;

use bitflags::bitflags;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Registry that unqualified names belong to
pub const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_NAMESPACE: &str = "library";
const MAX_NAME_LEN: usize = 255;

lazy_static! {
    static ref BARE_DIGEST: Regex = Regex::new(r"^[a-f0-9]{64}$").unwrap();
    static ref DOMAIN: Regex = Regex::new(
        r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$"
    )
    .unwrap();
    static ref PATH_COMPONENT: Regex =
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap();
    static ref TAG: Regex = Regex::new(r"^[\w][\w.-]{0,127}$").unwrap();
    static ref DIGEST: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
            .unwrap();
}

bitflags! {
    /// Components rendered by [`Reference::formatted`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatMask: u8 {
        const NAME = 1;
        const TAG = 1 << 1;
        const DOMAIN = 1 << 2;
        const DIGEST = 1 << 3;
    }
}

impl FormatMask {
    /// `nginx:1.25@sha256:...`
    pub const FAMILIAR: Self = Self::NAME.union(Self::TAG).union(Self::DIGEST);
    /// `docker.io/library/nginx:1.25@sha256:...`
    pub const CANONICAL: Self = Self::FAMILIAR.union(Self::DOMAIN);
    /// `nginx@sha256:...`
    pub const NAME_DIGEST: Self = Self::NAME.union(Self::DIGEST);
    /// Bare hex digest
    pub const DIGEST_ONLY: Self = Self::DIGEST;
}

/// One image reference occurrence.
///
/// Values are immutable; `with_tag`, `with_digest` and `reformatted` return
/// new values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    original: String,
    domain: String,
    path: String,
    tag: String,
    digest: String,
    explicit_domain: bool,
}

impl Reference {
    /// Parse a reference string.
    ///
    /// A bare 64 character hex string is a digest-only reference. Otherwise the
    /// input is `name[:tag][@digest]`, where a name without a registry host is
    /// placed under `docker.io` (and `docker.io/library` when it has a single
    /// path segment).
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        if input.is_empty() {
            return Err(ReferenceError::malformed(input, "reference is empty"));
        }

        if BARE_DIGEST.is_match(input) {
            return Ok(Self {
                original: input.to_string(),
                domain: String::new(),
                path: String::new(),
                tag: String::new(),
                digest: format!("sha256:{}", input),
                explicit_domain: false,
            });
        }

        let (remainder, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest).map_err(|reason| ReferenceError::malformed(input, reason))?;
                (name, digest.to_string())
            }
            None => (input, String::new()),
        };

        let (name, tag) = split_tag(remainder);
        if let Some(tag) = tag {
            if !TAG.is_match(tag) {
                return Err(ReferenceError::malformed(
                    input,
                    format!("invalid tag '{}'", tag),
                ));
            }
        }

        if name.is_empty() {
            return Err(ReferenceError::malformed(input, "missing repository name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ReferenceError::malformed(
                input,
                format!("repository name longer than {} characters", MAX_NAME_LEN),
            ));
        }

        let (domain, path, explicit_domain) = split_domain(name);
        if explicit_domain && !DOMAIN.is_match(domain) {
            return Err(ReferenceError::malformed(
                input,
                format!("invalid registry host '{}'", domain),
            ));
        }
        if let Some(component) = path.split('/').find(|c| !PATH_COMPONENT.is_match(c)) {
            return Err(ReferenceError::malformed(
                input,
                format!("invalid path component '{}'", component),
            ));
        }

        let domain = if domain == LEGACY_DEFAULT_DOMAIN {
            DEFAULT_DOMAIN
        } else {
            domain
        };
        let path = if domain == DEFAULT_DOMAIN && !path.contains('/') {
            format!("{}/{}", OFFICIAL_NAMESPACE, path)
        } else {
            path.to_string()
        };

        Ok(Self {
            original: input.to_string(),
            domain: domain.to_string(),
            path,
            tag: tag.unwrap_or_default().to_string(),
            digest,
            explicit_domain,
        })
    }

    /// Text this value was parsed from (for `reformatted` values, the rendered text)
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Registry host, empty for digest-only references
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Repository path without the registry host (e.g. `library/nginx`)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fully qualified repository name (e.g. `docker.io/library/nginx`)
    pub fn name(&self) -> String {
        if self.path.is_empty() {
            String::new()
        } else {
            format!("{}/{}", self.domain, self.path)
        }
    }

    /// Repository name with the implicit `docker.io/library/` or `docker.io/` prefix stripped
    pub fn familiar_name(&self) -> String {
        if self.path.is_empty() {
            return String::new();
        }
        if self.domain != DEFAULT_DOMAIN {
            return self.name();
        }
        match self.path.strip_prefix("library/") {
            Some(rest) if !rest.contains('/') => rest.to_string(),
            // A leading host-like segment would be read back as the registry
            _ => match self.path.split_once('/') {
                Some((first, _)) if is_host(first) => self.name(),
                _ => self.path.clone(),
            },
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Algorithm-prefixed digest (e.g. `sha256:...`), empty when unpinned
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Digest without its algorithm prefix
    pub fn digest_hex(&self) -> &str {
        self.digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest)
    }

    /// Whether the source text spelled out the registry host
    pub fn has_explicit_domain(&self) -> bool {
        self.explicit_domain
    }

    /// Render the components selected by `mask`, in the order name, tag, digest.
    ///
    /// Without `DOMAIN` the familiar name is used. A digest requested without
    /// a name (or on a reference that has none) renders as the bare hex digest.
    pub fn formatted(&self, mask: FormatMask) -> String {
        let with_digest = mask.contains(FormatMask::DIGEST) && !self.digest.is_empty();
        if with_digest && (!mask.contains(FormatMask::NAME) || self.path.is_empty()) {
            return self.digest_hex().to_string();
        }

        let mut out = String::new();
        if mask.contains(FormatMask::NAME) {
            if mask.contains(FormatMask::DOMAIN) {
                out.push_str(&self.name());
            } else {
                out.push_str(&self.familiar_name());
            }
        }
        if mask.contains(FormatMask::TAG) && !self.tag.is_empty() {
            if !out.is_empty() {
                out.push(':');
            }
            out.push_str(&self.tag);
        }
        if with_digest {
            out.push('@');
            out.push_str(&self.digest);
        }
        out
    }

    /// Copy with only the components in `mask`, whose original text is the rendering
    pub fn reformatted(&self, mask: FormatMask) -> Self {
        let mut copy = self.clone();
        if !mask.contains(FormatMask::TAG) {
            copy.tag.clear();
        }
        if !mask.contains(FormatMask::DIGEST) {
            copy.digest.clear();
        }
        if !mask.contains(FormatMask::NAME) && !copy.digest.is_empty() {
            copy.domain.clear();
            copy.path.clear();
            copy.tag.clear();
        }
        copy.explicit_domain = mask.contains(FormatMask::DOMAIN) && !copy.path.is_empty();
        copy.original = self.formatted(mask);
        copy
    }

    /// Copy with the tag replaced; an empty tag clears it
    pub fn with_tag(&self, tag: &str) -> Result<Self, ReferenceError> {
        if !tag.is_empty() && !TAG.is_match(tag) {
            return Err(ReferenceError::malformed(
                tag,
                format!("invalid tag '{}'", tag),
            ));
        }
        Ok(Self {
            tag: tag.to_string(),
            ..self.clone()
        })
    }

    /// Copy with the digest replaced; an empty digest clears it.
    ///
    /// A bare 64 character hex string is accepted as a sha256 digest.
    pub fn with_digest(&self, digest: &str) -> Result<Self, ReferenceError> {
        let digest = if BARE_DIGEST.is_match(digest) {
            format!("sha256:{}", digest)
        } else {
            digest.to_string()
        };
        if !digest.is_empty() {
            validate_digest(&digest).map_err(|reason| ReferenceError::malformed(&digest, reason))?;
        }
        Ok(Self {
            digest,
            ..self.clone()
        })
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted(FormatMask::FAMILIAR))
    }
}

/// Normalize a digest written either bare or algorithm-prefixed to `algorithm:hex`
pub fn normalize_digest(digest: &str) -> String {
    if BARE_DIGEST.is_match(digest) {
        format!("sha256:{}", digest)
    } else {
        digest.to_string()
    }
}

/// Normalize and validate a digest written bare or algorithm-prefixed
pub fn parse_digest(digest: &str) -> Result<String, ReferenceError> {
    let digest = normalize_digest(digest);
    validate_digest(&digest).map_err(|reason| ReferenceError::malformed(&digest, reason))?;
    Ok(digest)
}

/// Split `name[:tag]`, treating a colon followed by a `/` as a registry port
fn split_tag(remainder: &str) -> (&str, Option<&str>) {
    match remainder.rfind(':') {
        Some(pos) if !remainder[pos + 1..].contains('/') => {
            (&remainder[..pos], Some(&remainder[pos + 1..]))
        }
        _ => (remainder, None),
    }
}

/// Split off the registry host. The first segment is a host when it has a dot,
/// a port, an uppercase letter, or is `localhost`.
fn split_domain(name: &str) -> (&str, &str, bool) {
    match name.split_once('/') {
        Some((first, rest)) if is_host(first) => (first, rest, true),
        _ => (DEFAULT_DOMAIN, name, false),
    }
}

/// Whether a leading name segment is a registry host rather than a path component
fn is_host(segment: &str) -> bool {
    segment.contains('.')
        || segment.contains(':')
        || segment == "localhost"
        || segment.chars().any(|c| c.is_ascii_uppercase())
}

/// Check `algorithm:hex`, with exact lengths for the registered algorithms
fn validate_digest(digest: &str) -> Result<(), String> {
    if !DIGEST.is_match(digest) {
        return Err(format!("invalid digest '{}'", digest));
    }
    let (algorithm, hex) = digest
        .split_once(':')
        .ok_or_else(|| format!("invalid digest '{}'", digest))?;

    let expected_len = match algorithm {
        "sha256" => Some(64),
        "sha512" => Some(128),
        _ => None,
    };
    if let Some(expected_len) = expected_len {
        if hex.len() != expected_len {
            return Err(format!(
                "invalid {} digest: expected {} hex characters, got {}",
                algorithm,
                expected_len,
                hex.len()
            ));
        }
        if hex.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(format!(
                "invalid {} digest: hex must be lowercase",
                algorithm
            ));
        }
    }
    Ok(())
}
