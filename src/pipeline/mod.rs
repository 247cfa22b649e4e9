//! Pipeline stages for acquiring and packaging one item.
//!
//! Each submodule implements exactly one step. Capture talks to the viewer;
//! the packaging stages only touch the working directory.
//!
//! ## Data Flow
//!
//! ```text
//! probe ──▶ capture ──▶ encode ──▶ document ──▶ archive
//! (poll)    (N.png)     (N.jpg)    (.pdf)       (.zip)
//! ```
//!
//! 1. [`probe`]    — fingerprint polling, page advance, data-URI decoding
//! 2. [`capture`]  — drive the probe until the expected page count is on disk
//! 3. [`encode`]   — lossy re-encode of every raster; runs in `spawn_blocking`
//! 4. [`document`] — one PDF page per JPEG, sized to the image
//! 5. [`archive`]  — Deflate level 9 ZIP of the JPEGs, then delete them
//!
//! [`package`] chains stages 3–5 behind artifact-existence checks.

pub mod archive;
pub mod capture;
pub mod document;
pub mod encode;
pub mod package;
pub mod probe;
