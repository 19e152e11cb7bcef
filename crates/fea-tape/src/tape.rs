//! The tape: an ordered record of blocks with a recording switch.

use crate::block::Block;
use crate::TapeError;

/// Ordered record of forward operations.
///
/// The tape is an explicit context object: code that wants its solves
/// recorded receives a `&mut Tape` and checks [`Tape::is_recording`].
/// There is no process-global tape, so independent tapes never interfere.
pub struct Tape {
    blocks: Vec<Box<dyn Block>>,
    recording: bool,
    track_initial_guess: bool,
}

impl Tape {
    /// A new, empty tape with recording enabled.
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            recording: true,
            track_initial_guess: true,
        }
    }

    /// Whether solves should currently annotate themselves onto this tape.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Suspend annotation; subsequent solves run as plain pass-throughs.
    pub fn stop_recording(&mut self) {
        self.recording = false;
    }

    /// Resume annotation.
    pub fn start_recording(&mut self) {
        self.recording = true;
    }

    /// Whether saved warm-start values are registered as explicit
    /// initial-guess dependency edges. Defaults to `true`.
    pub fn tracks_initial_guess(&self) -> bool {
        self.track_initial_guess
    }

    /// Enable or disable initial-guess dependency edges on newly recorded
    /// blocks. Disabling reproduces drivers that treat the warm start as
    /// invisible to the dependency graph.
    pub fn track_initial_guess(&mut self, track: bool) {
        self.track_initial_guess = track;
    }

    /// Append a recorded block.
    pub fn add_block(&mut self, block: Box<dyn Block>) {
        self.blocks.push(block);
    }

    /// Number of recorded blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Access to the recorded blocks, in recording order.
    pub fn blocks(&self) -> &[Box<dyn Block>] {
        &self.blocks
    }

    /// Replay every block in recording order.
    ///
    /// Adjoint steps consume snapshots that assume forward values are
    /// current, so replay must complete before back-propagation starts.
    pub fn recompute(&self) -> Result<(), TapeError> {
        for block in &self.blocks {
            block.recompute()?;
        }
        Ok(())
    }

    /// Walk the blocks in reverse order, calling each adjoint step.
    ///
    /// The caller seeds the adjoint of the quantity of interest on the
    /// relevant output variable first. The first failing block aborts the
    /// traversal; no partial recovery is attempted.
    pub fn backpropagate(&self) -> Result<(), TapeError> {
        for block in self.blocks.iter().rev() {
            block.adjoint()?;
        }
        Ok(())
    }

    /// Clear accumulated adjoint values on every variable the tape touches.
    pub fn clear_adj_values(&self) {
        for block in &self.blocks {
            for dep in block.dependencies() {
                dep.variable.clear_adj_value();
            }
            for out in block.outputs() {
                out.clear_adj_value();
            }
        }
    }

    /// Discard all recorded blocks.
    pub fn reset(&mut self) {
        self.blocks.clear();
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}
