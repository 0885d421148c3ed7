//! Domain types
//!
//! Documents, their parsed metadata, and configuration. These types know
//! nothing about workers or channels.

pub mod config;
pub mod document;
