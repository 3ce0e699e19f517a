pub mod aggregator;
pub mod coordinator;
pub mod decoder;
pub mod directory;
pub mod geohash;
pub mod hooks;
pub mod messages;
pub mod registry;
pub mod relay;
pub mod store;
pub mod types;

pub use aggregator::{Book, Federation};
pub use coordinator::{Coordinator, CoordinatorClient, CoordinatorInfo, HttpCoordinatorClient};
pub use hooks::FederationHook;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use types::{Exchange, ExchangeInfo, PublicOrder};
