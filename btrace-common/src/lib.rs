//! Common functionality for `btrace`.
//!
//! This crate exposes a set of key types:
//!
//!  - [`ByteView`]: Gives access to binary data in-memory or on the file system.
//!  - [`SelfCell`]: Allows to create self-referential types.
//!  - [`Name`]: A symbol name, tagged with the [`Language`] it was mangled by.
//!  - Functions and utilities to deal with paths from different platforms.
//!
//! # Features
//!
//! - `serde` (optional): Implements `serde::Deserialize` and `serde::Serialize` for all data types.
//!
//! [`Name`]: struct.Name.html
//! [`ByteView`]: struct.ByteView.html
//! [`SelfCell`]: struct.SelfCell.html

#![warn(missing_docs)]

mod byteview;
mod cell;
mod path;
mod types;

pub use crate::byteview::*;
pub use crate::cell::*;
pub use crate::path::*;
pub use crate::types::*;

pub use debugid::*;
pub use uuid::Uuid;
