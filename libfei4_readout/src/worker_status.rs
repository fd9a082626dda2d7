/// What a processing task is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Acquire,
    Decode,
    Telescope,
}

/// Progress report sent from a processing task to whoever displays it
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub stage: Stage,
    pub n_words: u64,
    pub n_events: u64,
}

impl WorkerStatus {
    pub fn new(stage: Stage, n_words: u64, n_events: u64) -> Self {
        Self {
            stage,
            n_words,
            n_events,
        }
    }
}
