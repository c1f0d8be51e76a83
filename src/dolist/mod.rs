//! Do-List Scheduler
//!
//! The cooperative maintenance list that drives everything periodic in a
//! process: registration, list refresh, record fetches, and client retries.
//!
//! ## Mechanism
//! - Every item carries a `needs_info` flag, a minimum re-fire interval, and
//!   a command factory. A sweep runs about once a second; each ready item's
//!   factory produces a command that is enqueued on the shared
//!   [`CommandPool`](crate::transport::CommandPool).
//! - Commands signal success by calling `info_received()` on their item.
//!   Until that happens the item stays armed and re-fires each interval, so
//!   a lost datagram simply means another send next tick.
//! - Items are held weakly. When the owning component goes away, its items
//!   disappear from the list on the next sweep.
//! - One-shot items are removed once their info has been received; until
//!   then they keep retrying like any other item.


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::transport::{Command, CommandPool};

/// How often the scheduler sweeps the list. Coarse on purpose: this bounds
/// the retry rate of every item in the process.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// The scheduling state every do-list item carries.
pub struct ItemCore {
    needs_info: AtomicBool,
    one_shot: bool,
    min_interval: Duration,
    refresh_after: Option<Duration>,
    times: Mutex<ItemTimes>,
}

#[derive(Default)]
struct ItemTimes {
    last_run: Option<Instant>,
    last_info: Option<Instant>,
    completed: bool,
}

impl ItemCore {
    /// A recurring item, armed from the start.
    pub fn new(min_interval: Duration) -> Self {
        ItemCore {
            needs_info: AtomicBool::new(true),
            one_shot: false,
            min_interval,
            refresh_after: None,
            times: Mutex::new(ItemTimes::default()),
        }
    }

    /// A recurring item whose info goes stale: `needs_info` re-raises itself
    /// `refresh_after` after the last `info_received`.
    pub fn with_refresh(min_interval: Duration, refresh_after: Duration) -> Self {
        ItemCore {
            refresh_after: Some(refresh_after),
            ..Self::new(min_interval)
        }
    }

    /// An item that is removed from the list once its info has arrived.
    pub fn one_shot(min_interval: Duration) -> Self {
        ItemCore {
            one_shot: true,
            ..Self::new(min_interval)
        }
    }

    /// Marks the monitored state stale; the item will fire on a coming sweep.
    pub fn set_needs_info(&self) {
        self.needs_info.store(true, Ordering::SeqCst);
    }

    /// Called by whoever receives the information the item was after.
    pub fn info_received(&self) {
        self.needs_info.store(false, Ordering::SeqCst);
        let mut times = self.times.lock().unwrap();
        times.last_info = Some(Instant::now());
        times.completed = true;
    }

    pub fn needs_info(&self) -> bool {
        self.needs_info.load(Ordering::SeqCst)
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    /// True once `info_received` has been called at least once.
    pub fn completed(&self) -> bool {
        self.times.lock().unwrap().completed
    }

    fn ready(&self, now: Instant) -> bool {
        let times = self.times.lock().unwrap();

        if !self.needs_info() {
            match (self.refresh_after, times.last_info) {
                (Some(refresh), Some(last_info)) if now.duration_since(last_info) >= refresh => {
                    self.set_needs_info();
                }
                _ => return false,
            }
        }

        match times.last_run {
            None => true,
            Some(last_run) => now.duration_since(last_run) >= self.min_interval,
        }
    }

    fn mark_run(&self, now: Instant) {
        self.times.lock().unwrap().last_run = Some(now);
    }
}

/// A unit of periodic maintenance.
pub trait DoListItem: Send + Sync {
    fn core(&self) -> &ItemCore;

    /// Produces the command for one firing. Returning `None` leaves the item
    /// armed for the next sweep.
    fn create_command(&self) -> Option<Command>;
}

/// The per-process registry of do-list items.
pub struct DoList {
    items: Mutex<Vec<Weak<dyn DoListItem>>>,
    pool: Arc<CommandPool>,
}

impl DoList {
    pub fn new(pool: Arc<CommandPool>) -> Arc<Self> {
        Arc::new(DoList {
            items: Mutex::new(Vec::new()),
            pool,
        })
    }

    /// Registers an item. The list holds it weakly; keep the `Arc` alive for
    /// as long as the item should keep firing.
    pub fn add_item(&self, item: &Arc<dyn DoListItem>) {
        self.items.lock().unwrap().push(Arc::downgrade(item));
    }

    /// Registers an item and fires it immediately, without waiting for the
    /// next sweep.
    pub async fn run_and_add_item(&self, item: &Arc<dyn DoListItem>) {
        self.add_item(item);
        item.core().mark_run(Instant::now());
        if let Some(cmd) = item.create_command() {
            self.pool.enqueue(cmd).await;
        }
    }

    /// One sweep over the list: drop dead or finished items, fire the ready
    /// ones. Commands are enqueued after the lock is released.
    pub async fn check(&self) {
        let now = Instant::now();
        let mut ready: Vec<Command> = Vec::new();
        {
            let mut items = self.items.lock().unwrap();
            items.retain(|weak| {
                let Some(item) = weak.upgrade() else {
                    return false;
                };
                if item.core().is_one_shot() && item.core().completed() {
                    return false;
                }
                if item.core().ready(now) {
                    item.core().mark_run(now);
                    if let Some(cmd) = item.create_command() {
                        ready.push(cmd);
                    }
                }
                true
            });
        }
        for cmd in ready {
            self.pool.enqueue(cmd).await;
        }
    }

    /// The sweep loop. Runs until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(CHECK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Do-list sweep stopping");
                        return;
                    }
                }
                _ = interval.tick() => {
                    self.check().await;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}
