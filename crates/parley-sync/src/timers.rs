use parley_types::RoomKey;

/// Fired by per-entry timer tasks back into the engine's loop. Each carries
/// the generation it was armed with; a refreshed entry ignores older firings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    PresenceExpired {
        room: RoomKey,
        user_id: String,
        generation: u64,
    },
    TypingIdle {
        room: RoomKey,
        generation: u64,
    },
}
