//! Repository traits for metadata operations.

pub mod artifacts;
pub mod locks;
pub mod permanent_blocks;

pub use artifacts::ArtifactRepo;
pub use locks::LockRepo;
pub use permanent_blocks::PermanentBlockRepo;
