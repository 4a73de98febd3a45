//! # List Store Module
//!
//! Owns the local database of todo lists and their items and provides
//! repository patterns for data access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite connection pooling, schema and migrations (including the tables
//!   the sync engine records its sessions and conflict tasks in)
//! - Domain models with validation and sync bookkeeping
//! - Repositories for lists and items

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{
    NewTodoItem, NewTodoList, TodoItem, TodoItemId, TodoItemUpdate, TodoList, TodoListId,
    TodoListUpdate,
};
