//! A3S Build Copier - COPY/ADD source resolution and execution
//!
//! Resolves the sources of a COPY or ADD instruction (build context files,
//! files inside a prior image, or URLs) into fingerprinted [`CopyInfo`]s
//! whose hashes drive the build cache, then applies them to a destination
//! filesystem.
//!
//! ```text
//! SourcesAndDest ──► Copier ──► CopyInstruction ──► perform_copy ──► rootfs
//!                     │  ├─ wildcard::expand
//!                     │  ├─ hash (memoized per source)
//!                     │  ├─ PathCache (prior images only)
//!                     │  └─ SourceDownloader (ADD <url>)
//!                     └─ ImageMount::new_rw_layer (once)
//! ```

pub mod archive;
pub mod cache;
pub mod copier;
pub mod hash;
pub mod idtools;
pub mod layer;
pub mod perform;
pub mod remote;
pub mod source;
pub mod wildcard;

// Re-export common types
pub use archive::{Archiver, TarArchiver, TarOptions};
pub use cache::{PathCache, SharedPathCache};
pub use copier::{normalize_dest, CopyInfo, CopyInstruction, Copier, SourcesAndDest};
pub use idtools::{IdentityRemapper, LchownRemapper};
pub use layer::{ExtractedImage, ImageMount, RwLayer};
pub use perform::{perform_copy, perform_copy_for_info, CopyFileOptions};
pub use remote::{Download, HttpDownloader, RejectRemote, SourceDownloader};
pub use source::Source;
