pub mod cloneable_file;

pub use cloneable_file::CloneableFile;
