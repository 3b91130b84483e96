//! MongoDB persistence for signing sessions

pub mod mongo;
pub mod schemas;
pub mod session_store;

pub use mongo::{MongoClient, MongoCollection};
pub use session_store::MongoSessionRepository;
