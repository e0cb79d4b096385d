/// Database model definitions.
pub mod models;
/// Room, membership, game, score and answer persistence.
pub mod quiz_store;
/// Storage abstraction layer for database operations.
pub mod storage;
