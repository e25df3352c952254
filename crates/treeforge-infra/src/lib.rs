//! Storage and expression adapters for the TreeForge engine.
//!
//! Implements the ports defined in `treeforge-core`:
//! - `memory` -- dashmap-backed in-memory `ForgeState`
//! - `scoped` -- session-ID namespacing wrapper for shared stores
//! - `sqlite` -- SQLite-backed `ForgeState` (sqlx)
//! - `jexl` -- JEXL-backed `ExpressionExecutor`

pub mod jexl;
pub mod memory;
pub mod scoped;
pub mod sqlite;

pub use jexl::JexlExpressionExecutor;
pub use memory::MemoryForgeState;
pub use scoped::ScopedForgeState;
pub use sqlite::SqliteForgeState;
