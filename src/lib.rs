//! relsync: incremental sync of Google Contacts, Calendar and Gmail into a
//! local relationship store, with follow-up cadence scoring.

pub mod cadence;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod google_api;
mod migrations;
pub mod resolver;
pub mod sync;
