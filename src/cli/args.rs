use clap::Args;

use crate::predicate::Filters;

/// Reference filters that can be flattened into command structs.
///
/// Within each group (domain, name, tag, digest) only one kind of filter may
/// be given; filters from different groups must all match.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Only references on this registry. Can be specified multiple times.
    #[arg(long = "domain")]
    pub domains: Vec<String>,

    /// Only references to this repository (e.g. nginx, ghcr.io/org/app). Can be specified multiple times.
    #[arg(long = "name")]
    pub names: Vec<String>,

    /// Only references without a tag
    #[arg(long)]
    pub untagged: bool,

    /// Only unpinned references that are untagged or tagged `latest`
    #[arg(long)]
    pub latest: bool,

    /// Only pinned references whose tag now points to a different digest (queries the backend)
    #[arg(long)]
    pub outdated: bool,

    /// Only references with this tag. Can be specified multiple times.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Only references without a digest
    #[arg(long)]
    pub unpinned: bool,

    /// Only references pinned to this digest. Can be specified multiple times.
    #[arg(long = "digest")]
    pub digests: Vec<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> Filters {
        Filters {
            domains: self.domains.clone(),
            names: self.names.clone(),
            untagged: self.untagged,
            latest: self.latest,
            outdated: self.outdated,
            tags: self.tags.clone(),
            unpinned: self.unpinned,
            digests: self.digests.clone(),
        }
    }
}

/// Input document selection
#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Document format (dockerfile, compose). Detected from the content when omitted.
    #[arg(long)]
    pub format: Option<String>,

    /// Input file, `-` for stdin
    #[arg(default_value = "-")]
    pub file: String,
}

/// Resolution backend selection
#[derive(Debug, Clone, Default, Args)]
pub struct BackendArgs {
    /// Resolution backend (daemon or registry). Defaults to the config file, then registry.
    #[arg(long)]
    pub backend: Option<String>,
}
