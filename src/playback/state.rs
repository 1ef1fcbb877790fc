/// Lifecycle of one player.
///
/// `Empty -> Opening -> Opened -> Playing <-> Paused`, with `Closed`
/// reachable from anywhere. Stalls are tracked separately by the player's
/// `suspended` flag and do not change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Empty,
    Opening,
    Opened,
    Playing,
    Paused,
    Closed,
}

impl PlaybackState {
    /// Enough data loaded to start playback.
    pub fn is_opened(self) -> bool {
        matches!(
            self,
            PlaybackState::Opened | PlaybackState::Playing | PlaybackState::Paused
        )
    }

    /// A stream is attached (loading or loaded).
    pub fn is_active(self) -> bool {
        self == PlaybackState::Opening || self.is_opened()
    }
}
