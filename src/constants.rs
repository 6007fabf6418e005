//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for cachepool.
//!
//! All magic numbers and reserved markers used across the crate live here.

/// Characters a cache key (or tag name) may not contain.
///
/// They are used as delimiters in generated backend ids.
pub const RESERVED_CHARACTERS: &str = "{}()/\\@:";

/// Absolute upper bound for a key before hashing (64 KiB).
///
/// Keys longer than this are rejected with `InvalidKey` instead of being hashed.
pub const MAX_KEY_LENGTH: usize = 65_536;

/// Separator between the namespace, version and key parts of a backend id.
pub const ID_SEPARATOR: char = ':';

/// Namespace used when the caller supplies an empty one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Marker segment for tag version counters: `{namespace}:tags:{tag}`.
pub const TAG_SEGMENT: &str = "tags";

/// Suffix of the namespace version meta id: `{namespace}::version`.
pub const VERSION_META_SUFFIX: &str = "::version";

/// Number of digest bytes kept when a key is collapsed to a hash.
///
/// 16 bytes encode to 22 base64url characters.
pub const HASH_DIGEST_BYTES: usize = 16;

/// Encoded width of the collapsed key hash.
pub const HASH_ENCODED_LENGTH: usize = 22;

/// Smallest id bound a backend may declare.
///
/// Must leave room for one separator and the encoded hash.
pub const MIN_ID_LENGTH: usize = HASH_ENCODED_LENGTH + 1;

/// Widest version segment of a versioned id: `u64::MAX` plus one separator.
pub const VERSION_SEGMENT_LENGTH: usize = 21;

/// Default capacity of the in-memory storage (10,000 entries).
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Maximum id length of the filesystem storage.
pub const FILESYSTEM_MAX_ID_LENGTH: usize = 255;

/// Maximum id length of the PostgreSQL storage (`VARCHAR(255)`).
pub const POSTGRES_MAX_ID_LENGTH: usize = 255;

/// Default table used by the PostgreSQL storage.
pub const DEFAULT_POSTGRES_TABLE: &str = "cache_items";

/// Batch size for `SCAN` when clearing a prefix on Redis.
pub const REDIS_SCAN_COUNT: usize = 1_000;

/// Redis 计数器脚本：不存在时先写入种子，再 INCRBY
///
/// KEYS[1] = 计数器ID, ARGV[1] = 种子, ARGV[2] = 递增量
pub const REDIS_SEEDED_INCR_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1], 'NX')
return redis.call('INCRBY', KEYS[1], ARGV[2])
"#;
