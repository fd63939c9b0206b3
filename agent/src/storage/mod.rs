//! Agent state: settings, on-disk layout and the record store

pub mod layout;
pub mod settings;
pub mod store;
