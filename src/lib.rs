pub mod arrow_utils;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod data_store;
pub mod errors;
pub mod harness;
pub mod isolation;
pub mod model;
pub mod populator;
pub mod seed;
pub mod storage;
pub mod store;
pub mod tracking;

// Re-export key types and structs for easier access
pub use config::{CoordinatorConfig, HarnessConfig, RaceWindow, StoreConfig};
pub use coordinator::ClaimCoordinator;
pub use errors::{ClaimError, HarnessError, Result, StoreError, StoreResult};
pub use harness::{ClaimStrategy, ConformanceHarness, Expectation, PopulateStrategy, Verdict};
pub use isolation::IsolationLevel;
pub use model::{Claim, Group, Member, Slot, SlotAddress, VersionToken, VersionedSlot};
pub use populator::GroupPopulator;
pub use seed::{SeedPlan, SeededGroup, Seeder};
pub use storage::{MemoryStorage, Storage, StorageMutation};
pub use store::memory::MemStore;
pub use store::{ResourceStore, Scope, StoreTransaction};

/// Seatclaim Prelude
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::harness::*;
    pub use crate::model::*;
    pub use crate::store::memory::*;
    pub use crate::store::*;
    pub use crate::*;
}
