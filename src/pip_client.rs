//! The seam between a bot and the companion-app protocol itself.
//!
//! Speaking the actual wire protocol to the handset is out of scope here;
//! `PipClient` is the trait a worker's `Bot` programs against, grounded on
//! the handful of calls the original's `Feature` subclasses make through
//! `self.bot.pippy`/`self.bot.inventory`/`self.bot.player` (see
//! `use_chem.py`) plus the inventory-version/lock-state/use-submission seam
//! the `UseItemLock` machinery needs (`bot.py`'s `on_pip_update` is where a
//! real implementation would bump `inventory_version`). `SocketPipClient` is
//! the production stand-in that owns the handed-off pip socket;
//! `TestPipClient` is an in-memory double for feature unit tests.

use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::Error;

/// An item as named by a chat command, before it's resolved against the
/// current inventory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemRef(pub String);

/// An item resolved against the inventory at the moment of lookup. Carrying
/// this instead of a bare name is what lets `item_handle` re-confirm the
/// item is still present right before submission without a second name
/// lookup racing a fresh inventory update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemHandle(pub String);

pub trait PipClient: Send + Sync + 'static {
    fn player_name(&self) -> String;

    /// Monotonic counter the companion app bumps on every inventory-
    /// affecting update. `UseItemLock` compares this against the version
    /// recorded at the start of the last `use_item` to tell whether the
    /// game has actually observed that use yet.
    fn inventory_version(&self) -> u64;

    /// True while the player can't act on an item (paused, in a menu, in
    /// VATS, ...).
    fn player_locked(&self) -> bool;

    /// Looks up `item` in the current inventory by name (case-insensitive).
    /// Duplicate names are tolerated; the first match is returned.
    fn item_handle(&self, item: ItemRef) -> Option<ItemHandle>;

    /// Submits the in-game use action for an already-resolved item.
    fn submit_use(&self, item: ItemHandle) -> Result<(), Error>;

    fn close(&self);
}

/// Owns the raw pip socket handed across from the master process. The wire
/// protocol itself (inventory sync, update notifications) isn't
/// implemented here; this only keeps the connection alive and closes it
/// cleanly, which is all `Bot` needs to stay running while a real protocol
/// implementation is plugged in behind this trait.
pub struct SocketPipClient {
    _socket: StdTcpStream,
    player_name: String,
    inventory_version: AtomicU64,
    player_locked: AtomicBool,
}

impl SocketPipClient {
    pub fn new(socket: StdTcpStream, player_name: String) -> SocketPipClient {
        SocketPipClient {
            _socket: socket,
            player_name,
            inventory_version: AtomicU64::new(0),
            player_locked: AtomicBool::new(false),
        }
    }
}

impl PipClient for SocketPipClient {
    fn player_name(&self) -> String {
        self.player_name.clone()
    }

    fn inventory_version(&self) -> u64 {
        self.inventory_version.load(Ordering::SeqCst)
    }

    fn player_locked(&self) -> bool {
        self.player_locked.load(Ordering::SeqCst)
    }

    fn item_handle(&self, _item: ItemRef) -> Option<ItemHandle> {
        None
    }

    fn submit_use(&self, item: ItemHandle) -> Result<(), Error> {
        Err(Error::fatal(format!(
            "pip protocol not implemented, cannot use {}",
            item.0
        )))
    }

    fn close(&self) {}
}

/// In-memory double used by feature tests.
pub struct TestPipClient {
    player_name: String,
    inventory: Mutex<Vec<String>>,
    used: Mutex<Vec<String>>,
    inventory_version: AtomicU64,
    player_locked: AtomicBool,
}

impl TestPipClient {
    pub fn new(player_name: impl Into<String>, inventory: Vec<String>) -> TestPipClient {
        TestPipClient {
            player_name: player_name.into(),
            inventory: Mutex::new(inventory),
            used: Mutex::new(Vec::new()),
            inventory_version: AtomicU64::new(0),
            player_locked: AtomicBool::new(false),
        }
    }

    pub fn used_items(&self) -> Vec<String> {
        self.used.lock().unwrap().clone()
    }

    pub fn set_player_locked(&self, locked: bool) {
        self.player_locked.store(locked, Ordering::SeqCst);
    }

    /// Simulates an inventory-affecting pip update, bumping the version
    /// `UseItemLock.check` compares against `last_use_version`.
    pub fn bump_inventory_version(&self) {
        self.inventory_version.fetch_add(1, Ordering::SeqCst);
    }
}

impl PipClient for TestPipClient {
    fn player_name(&self) -> String {
        self.player_name.clone()
    }

    fn inventory_version(&self) -> u64 {
        self.inventory_version.load(Ordering::SeqCst)
    }

    fn player_locked(&self) -> bool {
        self.player_locked.load(Ordering::SeqCst)
    }

    fn item_handle(&self, item: ItemRef) -> Option<ItemHandle> {
        let inventory = self.inventory.lock().unwrap();
        inventory
            .iter()
            .find(|carried| carried.eq_ignore_ascii_case(&item.0))
            .map(|carried| ItemHandle(carried.clone()))
    }

    fn submit_use(&self, item: ItemHandle) -> Result<(), Error> {
        let mut inventory = self.inventory.lock().unwrap();
        let position = inventory
            .iter()
            .position(|carried| carried.eq_ignore_ascii_case(&item.0));
        match position {
            Some(index) => {
                let carried = inventory.remove(index);
                self.used.lock().unwrap().push(carried);
                self.inventory_version.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::fatal(format!("{} is not carried", item.0))),
        }
    }

    fn close(&self) {}
}
