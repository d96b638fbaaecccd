use crate::model::Snapshot;

/// Which transport delivered a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    Push,
    Pull,
}

/// Sync Channel -> presentation loop.
#[derive(Debug, Clone)]
pub struct SyncUpdate {
    pub source: SyncSource,
    pub snapshot: Snapshot,
}

/// Connection state of the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PushStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected { error: String },
}

/// External input for the presentation loop (control socket, signals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Skip to the next photo now, like a tap on the screen.
    Advance,
}
