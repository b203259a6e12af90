//! In-place element updater.
//!
//! Rewrites one top-level element of an existing file with as few writes as
//! possible. Cluster data is never moved: an element is either rewritten
//! in its old slot (plus any voids following it), moved into free void
//! space before the first Cluster, or appended at the end of the file. The
//! SeekHeads and the Segment size are adjusted to match.
//!
//! All writes are planned first and then applied through a journal. If
//! writing or the verification scan that follows fails, the original
//! bytes and file length are restored.

mod journal;
pub(crate) mod layout;
mod plan;
mod verify;

use crate::analyzer::{parse_seek_head, ElementIndex, SeekEntry};
use crate::element::Element;
use crate::elements::{self, ATTACHMENTS, CHAPTERS, CUES, INFO, SEEK_HEAD, TAGS, TRACKS};
use crate::error::MkvError;
use crate::file::{Access, SegmentIo};
use crate::schema::{normalize, NormalizeOptions};
use journal::Journal;
use mkvkit_core::MuxSession;
use plan::{PlannedWrite, Planner, SeekHeadState};
use serde::Serialize;
use std::io;
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tracing::{info, warn};
use verify::{Baseline, Expectation};

/// Errors returned by [`ElementIndex::update_element`] and
/// [`ElementIndex::remove_elements`].
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The Segment size field is too narrow for the grown file.
    #[error("segment size field too narrow after writing the element")]
    SegmentSizeForElement,

    /// The Segment size field is too narrow after appending a SeekHead.
    #[error("segment size field too narrow after writing the seek head")]
    SegmentSizeForMetaSeek,

    /// No slot can hold the SeekHead, not even a one-entry pointer.
    #[error("no room left for the seek head")]
    MetaSeek,

    /// The element cannot be updated through the index.
    #[error("element 0x{id:X} cannot be updated in place")]
    NotIndexable {
        /// Rejected element ID.
        id: u32,
    },

    /// Reopening the file read-only failed.
    #[error("failed to reopen the file read-only: {0}")]
    OpeningForReading(#[source] io::Error),

    /// Opening the file for writing failed.
    #[error("failed to open the file for writing: {0}")]
    OpeningForWriting(#[source] io::Error),

    /// The size field of the last, unknown-size element is too narrow for
    /// its actual size.
    #[error("size field of the last element too narrow for its implied size")]
    FixingLastElementUnknownSize,

    /// Cancelled while rescanning.
    #[error("update aborted")]
    Aborted,

    /// Any other failure.
    #[error(transparent)]
    Unknown(MkvError),
}

impl From<MkvError> for UpdateError {
    fn from(err: MkvError) -> Self {
        match err {
            MkvError::Aborted => UpdateError::Aborted,
            other => UpdateError::Unknown(other),
        }
    }
}

impl From<io::Error> for UpdateError {
    fn from(err: io::Error) -> Self {
        UpdateError::Unknown(MkvError::Io(err))
    }
}

/// Options for [`ElementIndex::update_element`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Keep children whose value equals the schema default.
    pub write_defaults: bool,
    /// Add missing mandatory children before writing.
    pub add_mandatory_if_missing: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            write_defaults: false,
            add_mandatory_if_missing: true,
        }
    }
}

impl UpdateOptions {
    /// Set whether default-valued children are kept.
    pub fn with_write_defaults(mut self, write_defaults: bool) -> Self {
        self.write_defaults = write_defaults;
        self
    }

    /// Set whether missing mandatory children are added.
    pub fn with_add_mandatory(mut self, add: bool) -> Self {
        self.add_mandatory_if_missing = add;
        self
    }
}

impl From<UpdateOptions> for NormalizeOptions {
    fn from(options: UpdateOptions) -> Self {
        NormalizeOptions {
            write_defaults: options.write_defaults,
            add_mandatory_if_missing: options.add_mandatory_if_missing,
        }
    }
}

/// Where a relocated element may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlacementStrategy {
    /// Any void run before the first Cluster, otherwise the end of the file.
    Anywhere,
    /// Always the end of the file.
    End,
}

impl PlacementStrategy {
    /// Strategy for an element ID; `None` for IDs the updater refuses.
    pub fn for_id(id: u32) -> Option<Self> {
        match id {
            TAGS | CHAPTERS | ATTACHMENTS | INFO | TRACKS => Some(PlacementStrategy::Anywhere),
            CUES => Some(PlacementStrategy::End),
            _ => None,
        }
    }
}

/// What happened to the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Rewritten at its old position.
    InPlace {
        /// Absolute position.
        position: u64,
    },
    /// Moved to a new position.
    Relocated {
        /// Old absolute position.
        from: u64,
        /// New absolute position.
        to: u64,
    },
    /// Written for the first time.
    Inserted {
        /// Absolute position.
        position: u64,
    },
    /// All occurrences voided.
    Removed {
        /// Number of occurrences removed.
        count: usize,
    },
}

/// Summary of a successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// What happened to the element.
    pub outcome: UpdateOutcome,
    /// File length before the update.
    pub file_length_before: u64,
    /// File length after the update.
    pub file_length_after: u64,
    /// Number of SeekHeads written.
    pub seek_heads_rewritten: usize,
    /// Whether the SeekHeads were merged into a new one (or one was created).
    pub seek_head_regenerated: bool,
    /// Number of distinct writes performed.
    pub writes: usize,
}

/// A complete, not yet applied update.
#[derive(Debug)]
struct UpdatePlan {
    writes: Vec<PlannedWrite>,
    original_length: u64,
    expectation: Expectation,
    report: UpdateReport,
}

/// Holds the index's handle read-write and returns it to read-only when
/// dropped.
struct WriteScope<'a, F: SegmentIo> {
    index: &'a mut ElementIndex<F>,
    writable: bool,
}

impl<'a, F: SegmentIo> WriteScope<'a, F> {
    fn enter(index: &'a mut ElementIndex<F>) -> Result<Self, UpdateError> {
        index
            .io
            .reopen(Access::ReadWrite)
            .map_err(UpdateError::OpeningForWriting)?;
        Ok(Self {
            index,
            writable: true,
        })
    }

    fn close(mut self) -> Result<(), UpdateError> {
        self.writable = false;
        self.index
            .io
            .reopen(Access::ReadOnly)
            .map_err(UpdateError::OpeningForReading)
    }
}

impl<F: SegmentIo> Deref for WriteScope<'_, F> {
    type Target = ElementIndex<F>;

    fn deref(&self) -> &Self::Target {
        self.index
    }
}

impl<F: SegmentIo> DerefMut for WriteScope<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.index
    }
}

impl<F: SegmentIo> Drop for WriteScope<'_, F> {
    fn drop(&mut self) {
        if self.writable {
            if let Err(e) = self.index.io.reopen(Access::ReadOnly) {
                warn!("failed to reopen read-only: {}", e);
            }
        }
    }
}

impl<F: SegmentIo> ElementIndex<F> {
    /// Replace the last occurrence of `element.id` with `element`.
    ///
    /// Earlier occurrences are voided; callers that want to keep their
    /// content merge it first with [`ElementIndex::read_all`]. UIDs needed
    /// for missing mandatory children come from a fresh [`MuxSession`].
    pub fn update_element(
        &mut self,
        element: &Element,
        options: UpdateOptions,
    ) -> Result<UpdateReport, UpdateError> {
        let mut session = MuxSession::new();
        self.update_element_with_session(element, options, &mut session)
    }

    /// [`ElementIndex::update_element`] with an explicit session.
    pub fn update_element_with_session(
        &mut self,
        element: &Element,
        options: UpdateOptions,
        session: &mut MuxSession,
    ) -> Result<UpdateReport, UpdateError> {
        let id = element.id;
        let strategy = PlacementStrategy::for_id(id).ok_or(UpdateError::NotIndexable { id })?;
        self.ensure_full()?;

        let mut tree = element.clone();
        normalize(&mut tree, options.into(), session);

        let baseline = self.baseline()?;
        let plan = self.plan_update(&tree, strategy)?;
        self.execute(plan, baseline)
    }

    /// Void every occurrence of `id` and drop the SeekHead entries that
    /// pointed at them.
    pub fn remove_elements(&mut self, id: u32) -> Result<UpdateReport, UpdateError> {
        PlacementStrategy::for_id(id).ok_or(UpdateError::NotIndexable { id })?;
        self.ensure_full()?;

        let baseline = self.baseline()?;
        let plan = self.plan_removal(id)?;
        self.execute(plan, baseline)
    }

    fn seek_head_states(&mut self) -> Result<Vec<SeekHeadState>, UpdateError> {
        let mut states = Vec::new();
        for i in self.find_all(SEEK_HEAD) {
            let descriptor = self.descriptors[i];
            let seek_head = self.read_element(&descriptor)?;
            let entries = parse_seek_head(&seek_head);
            states.push(SeekHeadState {
                position: descriptor.position,
                original: entries.clone(),
                entries,
            });
        }
        Ok(states)
    }

    fn plan_update(
        &mut self,
        tree: &Element,
        strategy: PlacementStrategy,
    ) -> Result<UpdatePlan, UpdateError> {
        let id = tree.id;
        let heads = self.seek_head_states()?;
        let occurrences: Vec<u64> = self
            .find_all(id)
            .into_iter()
            .map(|i| self.descriptors[i].position)
            .collect();
        let mut planner = Planner::new(self);

        let (outcome, position) = match occurrences.split_last() {
            Some((&last, earlier)) => {
                for &position in earlier {
                    planner.void_element(position)?;
                }
                let position = planner.replace(last, tree, strategy)?;
                if position == last {
                    (UpdateOutcome::InPlace { position }, position)
                } else {
                    info!(
                        element = elements::element_name(id),
                        from = last,
                        to = position,
                        "relocated element"
                    );
                    (UpdateOutcome::Relocated { from: last, to: position }, position)
                }
            }
            None => {
                let position = planner.insert(tree, strategy)?;
                info!(element = elements::element_name(id), position, "inserted element");
                (UpdateOutcome::Inserted { position }, position)
            }
        };
        planner.check_segment_size(UpdateError::SegmentSizeForElement)?;

        let moved = !matches!(outcome, UpdateOutcome::InPlace { .. });
        let target = SeekEntry::new(id, planner.segment().relative(position));
        let (seek_heads_rewritten, seek_head_regenerated) =
            planner.update_seek_heads(heads, Some(target), moved)?;
        planner.check_segment_size(UpdateError::SegmentSizeForMetaSeek)?;
        planner.write_segment_size()?;

        Ok(Self::finish_plan(
            planner,
            outcome,
            Expectation {
                present: vec![(id, position)],
                absent: None,
            },
            seek_heads_rewritten,
            seek_head_regenerated,
        ))
    }

    fn plan_removal(&mut self, id: u32) -> Result<UpdatePlan, UpdateError> {
        let heads = self.seek_head_states()?;
        let occurrences: Vec<u64> = self
            .find_all(id)
            .into_iter()
            .map(|i| self.descriptors[i].position)
            .collect();
        let mut planner = Planner::new(self);
        for &position in &occurrences {
            planner.void_element_run(position)?;
        }
        let (seek_heads_rewritten, seek_head_regenerated) =
            planner.update_seek_heads(heads, None, false)?;
        planner.check_segment_size(UpdateError::SegmentSizeForMetaSeek)?;
        planner.write_segment_size()?;
        info!(element = elements::element_name(id), count = occurrences.len(), "removing elements");

        Ok(Self::finish_plan(
            planner,
            UpdateOutcome::Removed {
                count: occurrences.len(),
            },
            Expectation {
                present: Vec::new(),
                absent: Some(id),
            },
            seek_heads_rewritten,
            seek_head_regenerated,
        ))
    }

    fn finish_plan(
        planner: Planner,
        outcome: UpdateOutcome,
        expectation: Expectation,
        seek_heads_rewritten: usize,
        seek_head_regenerated: bool,
    ) -> UpdatePlan {
        let original_length = planner.original_length();
        let file_length_after = planner.file_length();
        let writes = planner.into_writes();
        UpdatePlan {
            report: UpdateReport {
                outcome,
                file_length_before: original_length,
                file_length_after,
                seek_heads_rewritten,
                seek_head_regenerated,
                writes: writes.len(),
            },
            writes,
            original_length,
            expectation,
        }
    }

    /// Apply a plan, rescan, verify, and roll back on failure. The handle is
    /// read-only again on return.
    fn execute(&mut self, plan: UpdatePlan, baseline: Baseline) -> Result<UpdateReport, UpdateError> {
        if plan.writes.is_empty() {
            return Ok(plan.report);
        }

        let mut scope = WriteScope::enter(self)?;
        let result = scope.apply(&plan, &baseline);
        let closed = scope.close();
        let report = result?;
        closed?;
        Ok(report)
    }

    fn apply(&mut self, plan: &UpdatePlan, baseline: &Baseline) -> Result<UpdateReport, UpdateError> {
        let mut journal = Journal::new(plan.original_length);
        let applied = self.apply_and_verify(&mut journal, plan, baseline);

        match applied {
            Ok(()) => Ok(plan.report.clone()),
            Err(e) => {
                warn!("update failed, restoring original bytes: {}", e);
                journal.rollback(&mut self.io)?;
                self.process()?;
                Err(e)
            }
        }
    }

    fn apply_and_verify(
        &mut self,
        journal: &mut Journal,
        plan: &UpdatePlan,
        baseline: &Baseline,
    ) -> Result<(), UpdateError> {
        journal.apply(&mut self.io, &plan.writes)?;
        self.process()?;
        self.verify_data_structures_against_file(&plan.expectation, baseline)
    }
}
