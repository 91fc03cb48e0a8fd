//! KV Client (C1, spec §4.1): a thin DynamoDB-style CRUD abstraction with
//! conditional writes, plus the CHECK-phase mutation auditor the executor
//! wraps it in.

pub mod audit;
pub mod client;
pub mod error;
pub mod memory;
pub mod value;

pub use audit::CheckingKvClient;
pub use client::{AttrUpdate, Expected, ExpectedCondition, KvClient, QuerySpec, RangeCondition, ScanSpec};
pub use error::KvError;
pub use memory::InMemoryKv;
pub use value::{AttrValue, Item, Key};
