//! Checks run against a fresh scan after an update has been written.

use super::UpdateError;
use crate::analyzer::ElementIndex;
use crate::elements::{
    self, CLUSTER, CUES, CUE_CLUSTER_POSITION, CUE_POINT, CUE_TRACK_POSITIONS,
};
use crate::error::{MkvError, Result};
use crate::file::SegmentIo;

/// Counts of dangling references before an update. An update may not add
/// to them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Baseline {
    pub unresolved_seek_entries: usize,
    pub unresolved_cue_positions: usize,
}

/// What the layout must look like once the update is applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct Expectation {
    /// Elements that must start at the given positions.
    pub present: Vec<(u32, u64)>,
    /// An ID that must no longer occur.
    pub absent: Option<u32>,
}

impl<F: SegmentIo> ElementIndex<F> {
    pub(crate) fn baseline(&mut self) -> Result<Baseline> {
        Ok(Baseline {
            unresolved_seek_entries: self.meta_seek_positions.values().filter(|&&ok| !ok).count(),
            unresolved_cue_positions: self.unresolved_cue_positions()?,
        })
    }

    /// Number of CueClusterPositions that do not land on a Cluster.
    pub(crate) fn unresolved_cue_positions(&mut self) -> Result<usize> {
        let Some(cues) = self.read_all(CUES)? else {
            return Ok(0);
        };
        let segment = self.segment;
        let unresolved = cues
            .find_children(CUE_POINT)
            .flat_map(|point| point.find_children(CUE_TRACK_POSITIONS))
            .filter_map(|positions| positions.child_unsigned(CUE_CLUSTER_POSITION))
            .filter(|&relative| !self.position_holds(segment.absolute(relative), CLUSTER))
            .count();
        Ok(unresolved)
    }

    /// Compare the freshly scanned layout with what the plan promised.
    pub(crate) fn verify_data_structures_against_file(
        &mut self,
        expectation: &Expectation,
        baseline: &Baseline,
    ) -> std::result::Result<(), UpdateError> {
        for &(id, position) in &expectation.present {
            if !self.position_holds(position, id) {
                return Err(verification(format!(
                    "{} expected at {} is missing",
                    elements::element_name(id),
                    position
                )));
            }
        }

        if let Some(id) = expectation.absent {
            if let Some(i) = self.find(id) {
                return Err(verification(format!(
                    "{} still present at {}",
                    elements::element_name(id),
                    self.descriptors[i].position
                )));
            }
        }

        let after = self.baseline()?;
        if after.unresolved_seek_entries > baseline.unresolved_seek_entries {
            return Err(verification(format!(
                "{} seek entries no longer resolve",
                after.unresolved_seek_entries - baseline.unresolved_seek_entries
            )));
        }
        if after.unresolved_cue_positions > baseline.unresolved_cue_positions {
            return Err(verification(format!(
                "{} cue cluster positions no longer resolve",
                after.unresolved_cue_positions - baseline.unresolved_cue_positions
            )));
        }
        Ok(())
    }
}

fn verification(reason: String) -> UpdateError {
    UpdateError::Unknown(MkvError::InvalidState(format!(
        "post-update verification failed: {}",
        reason
    )))
}
