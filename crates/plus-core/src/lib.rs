pub mod aggregate;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod index;
pub mod planner;
pub mod sqlite;
pub mod support;
pub mod types;
pub mod vouch;

pub use engine::{preview_cycle, resolve, run_cycle, CyclePlan, CycleReport};
pub use error::{ErrorKind, PlusError, Result};
pub use gateway::{MemoryGateway, StorageGateway};
pub use sqlite::SqliteGateway;
