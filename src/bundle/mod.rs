pub mod bundle;
pub mod path;

pub use bundle::{Bundle, BundleConfig, BundleIndex, EntryMetadata, Manifest, RandomAccess, Version};
pub use path::BundlePath;
