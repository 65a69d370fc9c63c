use std::sync::Arc;

use log::{info, warn};

use crate::backend::{BackendError, ObjectBackend};

/// Keeps target versioning enabled while a versioned source is migrated.
///
/// The source's versioning configuration is captured on engage. On drop the
/// target is set back to that configuration if it drifted during the pass,
/// so a versioned source always leaves a versioned target behind.
pub struct VersioningGuard {
    target: Arc<dyn ObjectBackend>,
    source_config: Option<bool>,
    forced: bool,
}

impl VersioningGuard {
    pub fn engage(
        source: &dyn ObjectBackend,
        target: Arc<dyn ObjectBackend>,
    ) -> Result<Self, BackendError> {
        if !source.is_versioned()? {
            return Ok(Self {
                target,
                source_config: None,
                forced: false,
            });
        }

        let forced = !target.is_versioned()?;
        if forced {
            info!("Enabling versioning on {}", target.display_point());
            target.set_versioning(true)?;
        }
        Ok(Self {
            target,
            source_config: Some(true),
            forced,
        })
    }

    /// True when engaging changed the target's versioning.
    pub fn is_forced(&self) -> bool {
        self.forced
    }
}

impl Drop for VersioningGuard {
    fn drop(&mut self) {
        let Some(config) = self.source_config.take() else {
            return;
        };
        let point = self.target.display_point();
        match self.target.is_versioned() {
            Ok(current) if current == config => {}
            Ok(_) => {
                info!("Restoring versioning on {} to the source configuration", point);
                if let Err(e) = self.target.set_versioning(config) {
                    warn!("Failed to restore versioning on {}: {}", point, e);
                }
            }
            Err(e) => warn!("Could not read versioning of {}: {}", point, e),
        }
    }
}
