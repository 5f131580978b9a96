/// Match document store contract and its backends.
pub mod match_store;
/// Store-level document types shared by every backend.
pub mod models;
/// Storage abstraction layer errors.
pub mod storage;
