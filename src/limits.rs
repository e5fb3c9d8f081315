//! Hard caps and tunables for decoding, storage, and repository open.
//!
//! These limits are guardrails against unbounded allocations and runaway
//! work on corrupt or adversarial inputs. Every limit is explicit and
//! enforced; exceeding one surfaces as an error rather than truncation.
//!
//! # Design Notes
//! - Presets are validated at compile time; invalid runtime configurations
//!   panic in `validate` (programmer error) or are reported by
//!   `try_validate` for values loaded from a config file.
//! - All structs derive `Deserialize` with field defaults so a caller can
//!   override a subset of fields.

use serde::{Deserialize, Serialize};

/// Bounds for decoding a single pack entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackDecodeLimits {
    /// Maximum bytes in an entry header (type/size varint plus base ref).
    pub max_header_bytes: usize,
    /// Maximum inflated size of a full object or a delta result.
    pub max_object_bytes: usize,
    /// Maximum inflated size of a delta instruction stream.
    pub max_delta_bytes: usize,
}

impl PackDecodeLimits {
    /// Safe defaults for large repositories.
    pub const DEFAULT: Self = Self {
        max_header_bytes: 64,
        max_object_bytes: 512 * 1024 * 1024,
        max_delta_bytes: 512 * 1024 * 1024,
    };

    /// Small caps for tests and constrained environments.
    pub const RESTRICTIVE: Self = Self {
        max_header_bytes: 32,
        max_object_bytes: 16 * 1024 * 1024,
        max_delta_bytes: 16 * 1024 * 1024,
    };

    /// # Panics
    ///
    /// Panics if limits are invalid (indicates a configuration bug).
    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.max_header_bytes >= 2, "header limit too small");
        assert!(self.max_header_bytes <= 128, "header limit too large");
        assert!(self.max_object_bytes > 0, "object limit must be > 0");
        assert!(self.max_delta_bytes > 0, "delta limit must be > 0");
    }

    /// Non-panicking validation for runtime-loaded configuration.
    pub const fn try_validate(&self) -> Result<(), &'static str> {
        if self.max_header_bytes < 2 {
            return Err("header limit too small");
        }
        if self.max_header_bytes > 128 {
            return Err("header limit too large");
        }
        if self.max_object_bytes == 0 {
            return Err("object limit must be > 0");
        }
        if self.max_delta_bytes == 0 {
            return Err("delta limit must be > 0");
        }
        Ok(())
    }
}

impl Default for PackDecodeLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Object store configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreLimits {
    /// Per-entry decode bounds.
    pub decode: PackDecodeLimits,
    /// Maximum number of delta layers resolved for one object.
    ///
    /// Chains deeper than this are reported as corrupt rather than walked.
    pub max_delta_depth: u8,
    /// Byte budget of the shared object cache. Zero disables caching.
    pub cache_bytes: usize,
}

impl StoreLimits {
    pub const DEFAULT: Self = Self {
        decode: PackDecodeLimits::DEFAULT,
        max_delta_depth: 64,
        cache_bytes: 32 * 1024 * 1024,
    };

    pub const RESTRICTIVE: Self = Self {
        decode: PackDecodeLimits::RESTRICTIVE,
        max_delta_depth: 16,
        cache_bytes: 1024 * 1024,
    };

    /// # Panics
    ///
    /// Panics if limits are invalid (indicates a configuration bug).
    #[track_caller]
    pub const fn validate(&self) {
        self.decode.validate();
        assert!(self.max_delta_depth > 0, "delta depth must be > 0");
    }

    pub const fn try_validate(&self) -> Result<(), &'static str> {
        if let Err(e) = self.decode.try_validate() {
            return Err(e);
        }
        if self.max_delta_depth == 0 {
            return Err("delta depth must be > 0");
        }
        Ok(())
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Bounds for commit object parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitParseLimits {
    /// Maximum commit object size in bytes.
    pub max_commit_bytes: usize,
    /// Maximum parent count (octopus merges can be large).
    pub max_parents: usize,
}

impl CommitParseLimits {
    pub const DEFAULT: Self = Self {
        max_commit_bytes: 1024 * 1024,
        max_parents: 256,
    };

    pub const RESTRICTIVE: Self = Self {
        max_commit_bytes: 64 * 1024,
        max_parents: 16,
    };

    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.max_commit_bytes >= 64, "commit byte limit too small");
        assert!(self.max_parents > 0, "must allow at least 1 parent");
    }

    pub const fn try_validate(&self) -> Result<(), &'static str> {
        if self.max_commit_bytes < 64 {
            return Err("commit byte limit too small");
        }
        if self.max_parents == 0 {
            return Err("must allow at least 1 parent");
        }
        Ok(())
    }
}

impl Default for CommitParseLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Bounds for metadata reads during repository discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoLimits {
    /// Maximum bytes to read from a `.git` file (gitdir pointer).
    pub max_dot_git_file_bytes: u32,
    /// Maximum bytes to read from a `commondir` file.
    pub max_commondir_file_bytes: u32,
    /// Maximum bytes to read from `info/alternates`.
    pub max_alternates_file_bytes: u32,
    /// Maximum bytes to read from a `commit-graph-chain` file.
    pub max_graph_chain_file_bytes: u32,
    /// Maximum number of alternate object directories.
    pub max_alternates_count: u8,
}

impl RepoLimits {
    pub const DEFAULT: Self = Self {
        max_dot_git_file_bytes: 8 * 1024,
        max_commondir_file_bytes: 8 * 1024,
        max_alternates_file_bytes: 64 * 1024,
        max_graph_chain_file_bytes: 64 * 1024,
        max_alternates_count: 16,
    };

    pub const RESTRICTIVE: Self = Self {
        max_dot_git_file_bytes: 1024,
        max_commondir_file_bytes: 1024,
        max_alternates_file_bytes: 4 * 1024,
        max_graph_chain_file_bytes: 4 * 1024,
        max_alternates_count: 4,
    };

    #[track_caller]
    pub const fn validate(&self) {
        assert!(
            self.max_dot_git_file_bytes > 0,
            "dot-git file limit must be > 0"
        );
        assert!(
            self.max_commondir_file_bytes > 0,
            "commondir file limit must be > 0"
        );
        assert!(
            self.max_alternates_file_bytes > 0,
            "alternates file limit must be > 0"
        );
        assert!(
            self.max_graph_chain_file_bytes > 0,
            "graph chain file limit must be > 0"
        );
        assert!(
            self.max_alternates_count > 0,
            "must allow at least 1 alternate"
        );
    }

    pub const fn try_validate(&self) -> Result<(), &'static str> {
        if self.max_dot_git_file_bytes == 0 {
            return Err("dot-git file limit must be > 0");
        }
        if self.max_commondir_file_bytes == 0 {
            return Err("commondir file limit must be > 0");
        }
        if self.max_alternates_file_bytes == 0 {
            return Err("alternates file limit must be > 0");
        }
        if self.max_graph_chain_file_bytes == 0 {
            return Err("graph chain file limit must be > 0");
        }
        if self.max_alternates_count == 0 {
            return Err("must allow at least 1 alternate");
        }
        Ok(())
    }
}

impl Default for RepoLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Tunables for pack encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackWriteOptions {
    /// Number of preceding same-kind objects considered as delta bases.
    /// Zero disables delta compression.
    pub window: usize,
    /// Maximum delta chain depth produced by the encoder.
    pub max_delta_depth: u8,
    /// zlib compression level (0-9).
    pub compression_level: u32,
    /// Objects smaller than this are always stored whole.
    pub min_delta_source_bytes: usize,
}

impl PackWriteOptions {
    pub const DEFAULT: Self = Self {
        window: 10,
        max_delta_depth: 50,
        compression_level: 6,
        min_delta_source_bytes: 32,
    };

    /// Whole objects only; fastest to write and decode.
    pub const NO_DELTA: Self = Self {
        window: 0,
        max_delta_depth: 0,
        compression_level: 1,
        min_delta_source_bytes: usize::MAX,
    };

    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.compression_level <= 9, "compression level is 0-9");
        assert!(
            self.window == 0 || self.max_delta_depth > 0,
            "delta window requires a positive chain depth"
        );
    }

    pub const fn try_validate(&self) -> Result<(), &'static str> {
        if self.compression_level > 9 {
            return Err("compression level is 0-9");
        }
        if self.window != 0 && self.max_delta_depth == 0 {
            return Err("delta window requires a positive chain depth");
        }
        Ok(())
    }
}

impl Default for PackWriteOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const _: () = PackDecodeLimits::DEFAULT.validate();
const _: () = PackDecodeLimits::RESTRICTIVE.validate();
const _: () = StoreLimits::DEFAULT.validate();
const _: () = StoreLimits::RESTRICTIVE.validate();
const _: () = CommitParseLimits::DEFAULT.validate();
const _: () = CommitParseLimits::RESTRICTIVE.validate();
const _: () = RepoLimits::DEFAULT.validate();
const _: () = RepoLimits::RESTRICTIVE.validate();
const _: () = PackWriteOptions::DEFAULT.validate();
const _: () = PackWriteOptions::NO_DELTA.validate();
