//! # Vistula OS installer
//!
//! This crate implements installing Vistula OS from its running live
//! system onto a disk, along with the discovery helpers (locales,
//! timezones, Wi-Fi networks, applications) an installer front end needs.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]

pub mod cli;
pub mod fstab;
pub mod install;
pub mod inventory;
pub mod software;

mod bootloader;
mod console;
pub(crate) mod mount;
mod target;

#[cfg(test)]
mod fixture;
