//! Crate-wide constants.

/// Name/path components are separated by a forward slash on every platform.
pub const NAME_SEPARATOR: char = '/';

/// Environment variable overriding the default build-cache root directory.
pub const CACHE_DIR_ENV: &str = "WEFT_CACHE_DIR";

/// Directory name used under the OS cache directory when no override is set.
pub const CACHE_DIR_NAME: &str = "weft";

/// Length of a full lowercase-hex SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 64;

/// Extension of the sidecar file that records a finished cache entry.
pub const MANIFEST_EXT: &str = "manifest";
