//! Abstractions for dealing with object files and debug information.
//!
//! This module defines the [`Object`] type, which is an abstraction over various object file
//! formats used in different platforms. Also, since executables on MacOS might contain multiple
//! object files (called a _"Fat MachO"_), there is an [`Archive`] type, that provides a uniform
//! interface with access to an objects iterator in all platforms.
//!
//! Most processing of object files will happen on the `Object` type or its concrete implementation
//! for one platform. To allow abstraction over this, there is the [`ObjectLike`] trait. It defines
//! common attributes and gives access to a [`DebugSession`], which can be used to perform more
//! stateful handling of debug information.
//!
//! See [`Object`] for the full API, or use one of the modules for direct access to the
//! platform-dependent data.
//!
//! # Background
//!
//! This crate resolves addresses found in a process's memory, such as return addresses collected
//! by a stack walker, into source file, line and function information. It reads the object
//! container (ELF, Mach-O or PE/COFF), locates the matching debug companion file, and interprets
//! its DWARF debugging information. Stack walking itself, symbol demangling, and the primitives
//! used to map files into memory are treated as external collaborators and are not implemented
//! here.
//!
//! [`Object`]: enum.Object.html
//! [`Archive`]: enum.Archive.html
//! [`ObjectLike`]: trait.ObjectLike.html
//! [`DebugSession`]: trait.DebugSession.html

#![warn(missing_docs)]

mod base;
#[cfg(all(feature = "dwarf", feature = "elf", feature = "macho", feature = "pe"))]
mod object;

#[cfg(feature = "dwarf")]
pub mod dwarf;
#[cfg(feature = "elf")]
pub mod elf;
#[cfg(feature = "dwarf")]
pub mod function_builder;
#[cfg(feature = "macho")]
pub mod macho;
#[cfg(feature = "pe")]
pub mod pe;
pub mod resolve;
pub mod sort;
#[cfg(all(feature = "dwarf", feature = "elf", feature = "macho", feature = "pe"))]
pub mod state;

pub use crate::base::*;
#[cfg(all(feature = "dwarf", feature = "elf", feature = "macho", feature = "pe"))]
pub use crate::object::*;
