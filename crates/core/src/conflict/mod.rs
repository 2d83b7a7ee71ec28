//! Conflict extraction, resolution, and finalization.
//!
//! The conflict subsystem is responsible for:
//! 1. **Extraction** -- decoding a merge outcome into per-file conflict regions.
//! 2. **Policy** -- recording ours / theirs / manual decisions per path.
//! 3. **Application** -- materializing decisions into the working tree.
//! 4. **Finalization** -- staging and committing the result, or hard-resetting.

pub mod applier;
pub mod chunks;
pub mod extractor;
pub mod finalizer;
pub mod markers;
pub mod policy;
pub mod reset;

pub use applier::{AppliedSet, ResolutionApplier};
pub use extractor::{ChunkStart, ConflictExtractor, ConflictRegion, ConflictSet};
pub use finalizer::CommitFinalizer;
pub use policy::{Resolution, ResolutionPolicy};
pub use reset::StateReset;
