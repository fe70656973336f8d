//! Atomically swapped route table snapshots.
//!
//! # Responsibilities
//! - Hold the current `Arc<RouteTable>`
//! - Hand each request its own snapshot
//! - Install freshly compiled tables with a new generation number
//!
//! # Design Decisions
//! - Readers never block: `arc-swap` load is lock-free
//! - A failed compile never touches the current table
//! - Old tables are freed when the last request holding them finishes

use std::path::Path;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::config::ConfigError;
use crate::routing::table::RouteTable;

pub struct RouteTableHandle {
    current: ArcSwap<RouteTable>,
    // serialises generation assignment between concurrent installs
    install: Mutex<()>,
}

impl RouteTableHandle {
    /// Wrap the initial table as generation 1.
    pub fn new(table: RouteTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(table.with_generation(1)),
            install: Mutex::new(()),
        }
    }

    /// Capture the current snapshot.
    pub fn load(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Install a compiled table; returns the generation it was given.
    pub fn install(&self, table: RouteTable) -> u64 {
        let _guard = self.install.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = self.current.load().generation() + 1;
        self.current.store(Arc::new(table.with_generation(generation)));
        generation
    }

    /// Compile configuration text and swap it in.
    pub fn reload(&self, text: &str) -> Result<u64, ConfigError> {
        let table = RouteTable::compile(text)?;
        Ok(self.install(table))
    }

    pub fn reload_from_file(&self, path: &Path) -> Result<u64, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        self.reload(&text)
    }
}
