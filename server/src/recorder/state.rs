use motion_cam_common::config::{RecordingConfig, SnapshotPolicy};
use motion_cam_common::frame::CapturedFrame;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// No clip in progress.
    Idle,
    /// Buffering frames for a clip. Continues until the clip is full,
    /// whether or not motion persists.
    Recording,
}

/// Side effects requested by one [`Recorder::advance`] call.
#[derive(Debug, Default)]
pub struct RecorderStep {
    /// Save the current frame as a still image.
    pub snapshot: bool,
    /// A full clip to write out, in capture order.
    pub clip: Option<Vec<CapturedFrame>>,
}

/// Motion-triggered clip recorder.
///
/// Pure state: it never touches the filesystem, it only tells the caller
/// what to persist. Invariant: the buffer never holds more than
/// `frames_needed` frames, and a flush always drains it completely.
pub struct Recorder {
    state: RecordingState,
    buffer: Vec<CapturedFrame>,
    frames_needed: usize,
    snapshot_policy: SnapshotPolicy,
}

impl Recorder {
    pub fn new(frames_needed: usize, snapshot_policy: SnapshotPolicy) -> Self {
        let frames_needed = frames_needed.max(1);
        Self {
            state: RecordingState::Idle,
            buffer: Vec::with_capacity(frames_needed),
            frames_needed,
            snapshot_policy,
        }
    }

    pub fn from_config(config: &RecordingConfig) -> Self {
        Self::new(config.frames_needed(), config.snapshot_policy)
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_needed(&self) -> usize {
        self.frames_needed
    }

    /// Feed one frame and its motion verdict.
    pub fn advance(&mut self, frame: &CapturedFrame, motion: bool) -> RecorderStep {
        let mut step = RecorderStep::default();

        match (self.state, motion) {
            (RecordingState::Idle, false) => return step,
            (RecordingState::Idle, true) => {
                debug!(seq = frame.seq, "IDLE→RECORDING: motion onset");
                self.state = RecordingState::Recording;
                self.buffer.clear();
                step.snapshot = true;
            }
            (RecordingState::Recording, true) => {
                step.snapshot = self.snapshot_policy == SnapshotPolicy::EveryMotionFrame;
            }
            (RecordingState::Recording, false) => {}
        }

        self.buffer.push(frame.clone());

        if self.buffer.len() >= self.frames_needed {
            debug!(
                seq = frame.seq,
                frames = self.buffer.len(),
                "RECORDING→IDLE: clip complete"
            );
            step.clip = Some(std::mem::replace(
                &mut self.buffer,
                Vec::with_capacity(self.frames_needed),
            ));
            self.state = RecordingState::Idle;
        }

        step
    }
}
