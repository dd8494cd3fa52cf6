//! Error types shared by the store, the tick pipeline and the join gate.

/// Failures of the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored row could not be turned back into a record.
    #[error("corrupt record in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// A uniqueness or key constraint rejected the write.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Why a single game's tick did not commit.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The game disappeared between listing and processing.
    #[error("game {0} no longer exists")]
    GameVanished(String),

    #[error("game {0} has not started")]
    NotStarted(String),

    /// Another writer advanced the game since it was loaded.
    #[error("game {game_id} was advanced concurrently; tick for year {year} discarded")]
    Conflict { game_id: String, year: i64 },

    #[error("system '{system}' failed: {cause:#}")]
    System {
        system: String,
        cause: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("engine lock poisoned")]
    Poisoned,
}

impl TickError {
    /// Missing-entity errors are skipped quietly; everything else is worth a warning.
    pub fn is_missing_entity(&self) -> bool {
        matches!(self, TickError::GameVanished(_))
    }
}

/// Outcomes of the concurrency gate that reject a join.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("game {0} not found")]
    GameNotFound(String),

    #[error("game {0} has already started")]
    AlreadyStarted(String),

    #[error("player {player_id} already joined game {game_id}")]
    AlreadyJoined { game_id: String, player_id: String },

    #[error("game {0} is full")]
    GameFull(String),

    /// The roster kept changing under us; the caller may try again later.
    #[error("game {0} is busy; join not applied")]
    Contention(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rejected game creation requests.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("max_players must be between 1 and {max}, got {requested}")]
    InvalidMaxPlayers { requested: u32, max: u32 },

    #[error("creator_user_id must not be empty")]
    MissingCreator,

    #[error(transparent)]
    Store(#[from] StoreError),
}
