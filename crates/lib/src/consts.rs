//! Crate-wide constants.

/// Application name, used for default directory names.
pub const APP_NAME: &str = "assetforge";

/// Environment variable overriding the object store location.
pub const STORE_ENV: &str = "ASSETFORGE_STORE";

/// Version word prefixed to every value hashed through `ObjectId::from_object`.
///
/// Bump when the binary serialization of hashed values changes shape.
pub const OBJECT_SERIALIZATION_VERSION: u32 = 1;

/// Version word mixed into every command hash.
pub const COMMAND_HASH_VERSION: u32 = 1;

/// Version word prefixed to persisted `CommandResultEntry` records.
pub const RESULT_FORMAT_VERSION: u32 = 1;

/// Magic bytes opening every remote-execution envelope.
pub const WIRE_MAGIC: [u8; 4] = *b"AFWR";

/// Version of the remote-execution envelope. Peers refuse any other value.
pub const WIRE_FORMAT_VERSION: u32 = 1;

/// Index key prefix under which command results are recorded.
pub const RESULT_KEY_PREFIX: &str = "__results/";
