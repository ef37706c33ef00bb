//! Destination pre-population hooks.
//!
//! Before the pull path writes segments, a `SketchConstructor` may seed the
//! destination directory with a best guess of the final contents, so that
//! matching regions are already in place and zero regions stay holes. The
//! base implementation does nothing; strategies must not break pull
//! idempotence.

use std::path::Path;

use diskferry_core::error::Result;

use crate::recipe::FileRecipe;

/// Hook invoked after the destination directory is created and before any
/// segment is written.
pub trait SketchConstructor: Send + Sync {
    fn construct(&self, dir: &Path, recipes: &[FileRecipe]) -> Result<()>;
}

/// The default constructor: leaves the destination untouched.
#[derive(Debug, Default)]
pub struct NoopSketchConstructor;

impl SketchConstructor for NoopSketchConstructor {
    fn construct(&self, _dir: &Path, _recipes: &[FileRecipe]) -> Result<()> {
        Ok(())
    }
}
