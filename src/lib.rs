pub mod bundle;
pub mod engine;
pub mod error;
pub mod storage;
pub mod util;
pub mod vfs;
pub mod websocket;

pub use bundle::{Bundle, BundleConfig, BundlePath};
pub use engine::{Engine, EngineBuilder, ReadinessState, ReconnectHandle};
pub use error::{Result, VfsError};
pub use storage::BundleStorage;
pub use util::CloneableFile;
pub use vfs::{
    DirNode, DocNode, DocumentWatcher, NodeType, RefNode, Timestamps, VfsEvent, VirtualFileSystem,
    WatcherStopReason,
};
