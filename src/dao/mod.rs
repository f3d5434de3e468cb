/// Row-level change notifications.
pub mod changes;
/// Identity provider boundary and in-memory implementation.
pub mod identity;
/// Database model definitions.
pub mod models;
/// Relational store boundary and in-memory implementation.
pub mod room_store;
/// Storage error types shared by every backend.
pub mod storage;
