use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown field '{field}' for entity '{entity}'")]
    UnknownField { entity: &'static str, field: String },

    #[error("invalid status '{status}' for entity '{entity}'")]
    InvalidStatus { entity: &'static str, status: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("story key '{story_key}' not found in batch {batch_id}")]
    StoryKeyNotFound { batch_id: i64, story_key: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
