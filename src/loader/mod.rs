//! Loads extracted artifacts into the relational store.
//!
//! Two independent passes. The event pass walks `match_centre_data_*.json`
//! and inserts unseen incident events in committed batches. The catalog pass
//! walks the tournament listings and inserts tournaments, teams, matches,
//! incidents and bets in one transaction. Both are idempotent: running them
//! again over the same artifacts inserts nothing.
use std::fmt;

use anyhow::Result;
use tracing::{info, instrument};

use crate::artifacts::ArtifactStore;
use crate::util::db::Db;

pub mod catalog;
pub mod events;

pub use catalog::CatalogReport;
pub use events::EventReport;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub events: EventReport,
    pub catalog: CatalogReport,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events: {} inserted in {} batches ({} already stored, {} bad files); \
             catalog: {} tournaments, {} teams, {} matches, {} incidents, {} bets ({} bad files)",
            self.events.inserted,
            self.events.batches_committed,
            self.events.skipped_existing,
            self.events.files_skipped,
            self.catalog.tournaments,
            self.catalog.teams,
            self.catalog.matches,
            self.catalog.incidents,
            self.catalog.bets,
            self.catalog.files_skipped,
        )
    }
}

pub struct Loader {
    db: Db,
    store: ArtifactStore,
    batch_size: usize,
}

impl Loader {
    pub fn new(db: Db, store: ArtifactStore, batch_size: usize) -> Self {
        Self {
            db,
            store,
            batch_size: batch_size.max(1),
        }
    }

    #[instrument(skip(self), fields(root = %self.store.root().display()))]
    pub async fn load(&self) -> Result<LoadReport> {
        let events = events::load_events(&self.db, &self.store, self.batch_size).await?;
        let catalog = catalog::load_catalog(&self.db, &self.store).await?;
        let report = LoadReport { events, catalog };
        info!(%report, "load finished");
        Ok(report)
    }
}
