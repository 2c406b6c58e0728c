//! Action accumulator: the single entry point for document mutations.
//!
//! Callers queue requests; [`ActionAccumulator::execute`] drains the queue
//! into the change tracker in order. `enqueue_and_finish` closes the batch
//! with a boundary, which is what turns the tracker's open packet into one
//! undo step. Inside a change block the boundaries are held back until the
//! block ends, so several finished batches still become one step.

use crate::action::Action;
use crate::tracker::{ChangeTracker, Commit};
use pixgraph_core::{ChangeId, ChangeInfo, ConcurrencyError, Document, DocumentError};
use std::collections::VecDeque;

/// Requests that only touch view state and never reach the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Passthrough {
    SetActiveFrame(i32),
    SetPlaying(bool),
}

#[derive(Debug, Clone)]
pub enum Request<A> {
    Make(A),
    StartOrUpdate(A),
    EndUpdateable,
    CancelUpdateable,
    /// Close the open packet.
    Boundary,
    Undo,
    Redo,
    DeleteRecordedChanges,
    Passthrough(Passthrough),
}

/// What executing one request did.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Applied to the document; not yet an undo step.
    Applied(Vec<ChangeInfo>),
    /// Applied temporarily as part of an updateable change.
    Previewed(Vec<ChangeInfo>),
    Committed(Commit),
    Undone { id: ChangeId, changes: Vec<ChangeInfo> },
    Redone { id: ChangeId, changes: Vec<ChangeInfo> },
    RecordedChangesDeleted,
    Passthrough(Passthrough),
}

#[derive(Debug)]
pub struct ActionAccumulator<A> {
    queue: VecDeque<Request<A>>,
    executing: bool,
    change_block: bool,
}

impl<A> Default for ActionAccumulator<A> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            executing: false,
            change_block: false,
        }
    }
}

impl<A: Action> ActionAccumulator<A> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn is_change_block_active(&self) -> bool {
        self.change_block
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Append to the open batch.
    pub fn enqueue(&mut self, action: A) {
        self.queue.push_back(Request::Make(action));
    }

    pub fn enqueue_request(&mut self, request: Request<A>) {
        self.queue.push_back(request);
    }

    /// Append and close the batch (unless a change block holds it open).
    pub fn enqueue_and_finish<I>(&mut self, actions: I)
    where
        I: IntoIterator<Item = A>,
    {
        self.queue.extend(actions.into_iter().map(Request::Make));
        if !self.change_block {
            self.queue.push_back(Request::Boundary);
        }
    }

    /// Hold back batch boundaries until [`end_change_block`](Self::end_change_block).
    pub fn start_change_block(&mut self) -> Result<(), ConcurrencyError> {
        if self.change_block {
            return Err(ConcurrencyError::ChangeBlockActive);
        }
        self.change_block = true;
        Ok(())
    }

    pub fn end_change_block(&mut self) {
        if self.change_block {
            self.change_block = false;
            self.queue.push_back(Request::Boundary);
        }
    }

    /// Drain the queue into `tracker`. Requests queued while this runs are
    /// drained too. On the first failure the rest of the queue is dropped.
    /// A concurrency refusal applied nothing, so an open change block
    /// survives it; any other failure has already made the tracker revert
    /// the open packet, and the block goes with it.
    pub fn execute(
        &mut self,
        tracker: &mut ChangeTracker<A>,
        document: &mut Document,
    ) -> Result<Vec<Processed>, DocumentError> {
        if self.executing {
            return Ok(Vec::new());
        }
        self.executing = true;
        let result = self.drain(tracker, document);
        self.executing = false;
        match &result {
            Ok(_) => {}
            Err(DocumentError::Concurrency(err)) => {
                log::debug!("request refused: {err}");
                self.queue.clear();
            }
            Err(_) => {
                if self.change_block {
                    log::warn!("change block aborted by failed batch");
                }
                self.queue.clear();
                self.change_block = false;
            }
        }
        result
    }

    fn drain(
        &mut self,
        tracker: &mut ChangeTracker<A>,
        document: &mut Document,
    ) -> Result<Vec<Processed>, DocumentError> {
        let mut out = Vec::new();
        while let Some(request) = self.queue.pop_front() {
            let processed = match request {
                Request::Make(action) => Processed::Applied(tracker.make(document, action)?),
                Request::StartOrUpdate(action) => {
                    Processed::Previewed(tracker.start_or_update(document, action)?)
                }
                Request::EndUpdateable => {
                    tracker.end_updateable()?;
                    continue;
                }
                Request::CancelUpdateable => Processed::Previewed(tracker.cancel_updateable(document)?),
                Request::Boundary => match tracker.complete_packet() {
                    Some(commit) => Processed::Committed(commit),
                    None => continue,
                },
                Request::Undo => match tracker.undo(document)? {
                    Some((id, changes)) => Processed::Undone { id, changes },
                    None => continue,
                },
                Request::Redo => match tracker.redo(document)? {
                    Some((id, changes)) => Processed::Redone { id, changes },
                    None => continue,
                },
                Request::DeleteRecordedChanges => {
                    tracker.delete_recorded_changes()?;
                    Processed::RecordedChangesDeleted
                }
                Request::Passthrough(p) => Processed::Passthrough(p),
            };
            out.push(processed);
        }
        Ok(out)
    }
}
