//! Collaborators for driving [`StreamMachine`]s in tests.
//!
//! A [`Fixture`] bundles a [`ScriptedAdapter`], an execution ledger, a stream
//! journal store and a health monitor. `restarted()` simulates a process
//! restart: the journals survive, the machines and the monitor do not.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::adapter::ScriptedAdapter;
use super::domain::settings;
use crate::adapter::outbound::MemoryStreamJournalStore;
use crate::application::{
    AlertQuota, ExecutionJournal, FileStreamJournalStore, HealthMonitor, StreamConfig, StreamDeps,
    StreamJournalStore, StreamMachine, StreamSettings,
};
use crate::domain::Bar;
use crate::port::NotifierRegistry;

/// Quota high enough that tests never see a suppressed alert.
pub fn generous_quota() -> AlertQuota {
    AlertQuota {
        per_minute: 10_000,
        burst: 10_000,
    }
}

enum Backing {
    Memory(Arc<MemoryStreamJournalStore>),
    Disk(PathBuf),
}

pub struct Fixture {
    pub adapter: Arc<ScriptedAdapter>,
    pub journal: Arc<ExecutionJournal>,
    pub store: Arc<dyn StreamJournalStore>,
    pub health: Arc<HealthMonitor>,
    pub settings: Arc<StreamSettings>,
    backing: Backing,
}

impl Fixture {
    /// In-memory journals, no notifiers.
    pub fn new() -> Self {
        Self::with_notifiers(NotifierRegistry::new())
    }

    pub fn with_notifiers(notifiers: NotifierRegistry) -> Self {
        let memory = Arc::new(MemoryStreamJournalStore::new());
        Self {
            adapter: Arc::new(ScriptedAdapter::new()),
            journal: Arc::new(ExecutionJournal::in_memory()),
            store: Arc::clone(&memory) as Arc<dyn StreamJournalStore>,
            health: Arc::new(HealthMonitor::new(
                Arc::new(notifiers),
                generous_quota(),
                None,
            )),
            settings: Arc::new(settings()),
            backing: Backing::Memory(memory),
        }
    }

    /// Journals persisted under `root`, the way a real run lays them out.
    pub fn on_disk(root: &Path) -> Self {
        let adapter = Arc::new(ScriptedAdapter::new());
        Self::open_disk(root, adapter, NotifierRegistry::new())
    }

    fn open_disk(root: &Path, adapter: Arc<ScriptedAdapter>, notifiers: NotifierRegistry) -> Self {
        let journal = ExecutionJournal::open(root.join("execution")).expect("open execution journal");
        Self {
            adapter,
            journal: Arc::new(journal),
            store: Arc::new(FileStreamJournalStore::new(root.join("streams"))),
            health: Arc::new(HealthMonitor::new(
                Arc::new(notifiers),
                generous_quota(),
                Some(root.join("incidents.jsonl")),
            )),
            settings: Arc::new(settings()),
            backing: Backing::Disk(root.to_path_buf()),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Same venue and journals, fresh monitor. On-disk fixtures reopen
    /// their files from scratch.
    pub fn restarted(&self) -> Self {
        match &self.backing {
            Backing::Memory(memory) => Self {
                adapter: Arc::clone(&self.adapter),
                journal: Arc::clone(&self.journal),
                store: Arc::clone(&self.store),
                health: Arc::new(HealthMonitor::new(
                    Arc::new(NotifierRegistry::new()),
                    generous_quota(),
                    None,
                )),
                settings: Arc::clone(&self.settings),
                backing: Backing::Memory(Arc::clone(memory)),
            },
            Backing::Disk(root) => {
                let mut fixture =
                    Self::open_disk(root, Arc::clone(&self.adapter), NotifierRegistry::new());
                fixture.settings = Arc::clone(&self.settings);
                fixture
            }
        }
    }

    /// Make stream journal writes fail. In-memory fixtures only.
    pub fn fail_writes(&self, failing: bool) {
        match &self.backing {
            Backing::Memory(memory) => memory.set_failing(failing),
            Backing::Disk(_) => panic!("fail_writes needs an in-memory fixture"),
        }
    }

    pub fn deps(&self) -> StreamDeps {
        StreamDeps {
            adapter: Arc::clone(&self.adapter) as _,
            journal: Arc::clone(&self.journal),
            store: Arc::clone(&self.store),
            health: Arc::clone(&self.health),
        }
    }

    pub fn create(&self, config: StreamConfig, now: DateTime<Utc>) -> StreamMachine {
        StreamMachine::create(config, Arc::clone(&self.settings), self.deps(), now)
            .expect("create stream")
    }

    /// Created at `now` and hydrated with `bars` as a complete batch.
    pub async fn hydrated(&self, config: StreamConfig, bars: Vec<Bar>, now: DateTime<Utc>) -> StreamMachine {
        let mut machine = self.create(config, now);
        machine.hydrate(bars, true, now).await.expect("hydrate");
        machine
    }

    /// Rebuild a machine from whatever the store holds for `config.key`.
    pub async fn restore(&self, config: StreamConfig, now: DateTime<Utc>) -> StreamMachine {
        let record = self
            .store
            .load(&config.key)
            .expect("load stream record")
            .expect("stream record present");
        StreamMachine::restore(config, Arc::clone(&self.settings), self.deps(), record, now)
            .await
            .expect("restore stream")
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
