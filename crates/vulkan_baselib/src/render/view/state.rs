//! Whether the recorded frame resources may be submitted

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Validity of the per-image command buffers and sync objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum FrameState {
    /// No surface has been attached yet
    #[default]
    Unbuilt,
    /// Every command buffer is recorded against live framebuffers
    Ready,
    /// A rebuild is in progress or failed; command buffers may reference
    /// destroyed framebuffers
    Stale,
    /// Work failed after an image was acquired, so the shared semaphores may
    /// hold a pending signal
    Faulted,
}

impl FrameState {
    /// Whether prerecorded command buffers can be submitted
    pub(crate) fn ensure_submittable(self) -> VulkanResult<()> {
        let reason = match self {
            Self::Ready => return Ok(()),
            Self::Unbuilt => "view has no realized surface",
            Self::Stale => "frame resources are out of date; resize the view to rebuild them",
            Self::Faulted => "a frame submission failed; resize the view to recover",
        };
        Err(VulkanError::InvalidOperation {
            reason: reason.to_string(),
        })
    }

    /// Whether command buffers may be re-recorded in place
    ///
    /// A faulted view must go through a resize first.
    pub(crate) fn ensure_recordable(self) -> VulkanResult<()> {
        match self {
            Self::Ready | Self::Stale => Ok(()),
            Self::Unbuilt | Self::Faulted => self.ensure_submittable(),
        }
    }

    /// State while command buffers are being re-recorded
    ///
    /// A fault survives; only a resize clears it.
    pub(crate) fn begin_rebuild(self) -> Self {
        match self {
            Self::Unbuilt | Self::Faulted => self,
            Self::Ready | Self::Stale => Self::Stale,
        }
    }

    /// State once every command buffer has been recorded again
    pub(crate) fn finish_rebuild(self) -> Self {
        match self {
            Self::Faulted => Self::Faulted,
            _ => Self::Ready,
        }
    }

    /// Whether recovery has to recreate the frame semaphores
    pub(crate) fn needs_sync_reset(self) -> bool {
        self == Self::Faulted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_ready_frames_are_submitted() {
        assert!(FrameState::Ready.ensure_submittable().is_ok());
        for state in [FrameState::Unbuilt, FrameState::Stale, FrameState::Faulted] {
            assert!(matches!(
                state.ensure_submittable(),
                Err(VulkanError::InvalidOperation { .. })
            ));
        }
    }

    #[test]
    fn test_failed_resize_blocks_submission_until_rebuilt() {
        // resize tears down framebuffers, then realize fails
        let state = FrameState::Ready.begin_rebuild();
        assert_eq!(state, FrameState::Stale);
        assert!(state.ensure_submittable().is_err());
        assert!(!state.needs_sync_reset());

        // a later rebuild may still re-record
        assert!(state.ensure_recordable().is_ok());
        assert_eq!(state.finish_rebuild(), FrameState::Ready);
    }

    #[test]
    fn test_fault_survives_until_resize_completes() {
        let state = FrameState::Faulted;
        assert!(state.ensure_recordable().is_err());
        assert!(state.needs_sync_reset());
        assert_eq!(state.begin_rebuild(), FrameState::Faulted);
        assert_eq!(state.finish_rebuild(), FrameState::Faulted);
    }

    #[test]
    fn test_unbuilt_view_rejects_everything() {
        let state = FrameState::default();
        assert_eq!(state, FrameState::Unbuilt);
        assert!(state.ensure_submittable().is_err());
        assert!(state.ensure_recordable().is_err());
        assert_eq!(state.begin_rebuild(), FrameState::Unbuilt);
        assert_eq!(state.finish_rebuild(), FrameState::Ready);
    }
}
