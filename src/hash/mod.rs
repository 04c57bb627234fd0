// Content hashing and key derivation
// Everything needed to turn a local file into an addressable, verifiable object

pub mod digest;
pub mod path_utils;

pub use digest::{fingerprint, fingerprint_file, ContentDigest, Fingerprint};
pub use path_utils::destination_key;
