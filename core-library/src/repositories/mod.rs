//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for the list store.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - Timestamps are read from an injectable [`Clock`](bridge_traits::time::Clock)
//!   and stored as Unix milliseconds
//!
//! ## Available Repositories
//!
//! - `TodoListRepository` - Owning records and their sync settings
//! - `TodoItemRepository` - Child items with remote identity and sync stamps

pub mod item;
pub mod list;

pub use item::{SqliteTodoItemRepository, TodoItemRepository};
pub use list::{SqliteTodoListRepository, TodoListRepository};
