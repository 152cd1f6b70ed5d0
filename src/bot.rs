//! One bot instance per open stream: dispatches chat lines and pip update
//! notifications to that stream's enabled features.
//!
//! Grounded on `pipirc.bot.PippyBot`.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::chat::SenderRank;
use crate::config::StreamConfig;
use crate::error::UserError;
use crate::features::{self, Feature};
use crate::ipc::ChatSink;
use crate::pip_client::{ItemRef, PipClient};

/// The distinguished failure cause `UseItemLock::reset` fails a parked
/// waiter with.
pub const USE_ITEM_RESET_CAUSE: &str = "UseItemReset";

const CHECK_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct LockState {
    /// Reentrant-acquire depth. Only the 0->1 transition actually parks on
    /// `check`; nested acquires by the same holder return immediately.
    count: u32,
    holder: Option<ThreadId>,
    /// Inventory version recorded at the start of the last `use_item`.
    /// `None` until the first use ever happens.
    last_use_version: Option<u64>,
    /// True while the outermost acquire is parked waiting for `check` to
    /// pass; this is the "waiter" `reset` fails.
    parked: bool,
    reset_cause: Option<&'static str>,
}

/// A reentrant lock plus a one-shot waiter plus `last_use_version`, gating
/// at-most-one-in-flight `use_item` per bot. Translated away from a plain
/// reentrant mutex: reentrancy is tracked explicitly by owner thread id and
/// depth (`count`), because the outermost acquire additionally has to park
/// until the player is in a usable state, which a bare `ReentrantMutex`
/// can't express.
pub struct UseItemLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl UseItemLock {
    pub fn new() -> UseItemLock {
        UseItemLock {
            state: Mutex::new(LockState {
                count: 0,
                holder: None,
                last_use_version: None,
                parked: false,
                reset_cause: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Acquires the lock. The outermost acquire (count 0 -> 1) blocks the
    /// calling thread until `check` reports the player usable, or until
    /// `reset` fails the wait with `UseItemReset`. Re-entrant acquires by
    /// the thread that already holds it return immediately without
    /// checking anything again.
    pub fn acquire<'a>(&'a self, pip: &dyn PipClient) -> Result<UseItemGuard<'a>, UserError> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();

        while state.count > 0 && state.holder != Some(me) {
            state = self.cond.wait(state).unwrap();
        }

        if state.holder == Some(me) {
            state.count += 1;
            return Ok(UseItemGuard { lock: self });
        }

        state.count = 1;
        state.holder = Some(me);
        state.parked = true;

        loop {
            if let Some(cause) = state.reset_cause.take() {
                state.count = 0;
                state.holder = None;
                state.parked = false;
                self.cond.notify_all();
                return Err(UserError(cause.to_string()));
            }
            if Self::check(&state, pip) {
                state.parked = false;
                return Ok(UseItemGuard { lock: self });
            }
            let (next, _timeout) = self.cond.wait_timeout(state, CHECK_POLL_INTERVAL).unwrap();
            state = next;
        }
    }

    /// `check()`: a waiter is parked and unfulfilled, the current inventory
    /// version differs from the one recorded by the last `use_item` (so
    /// we're observing post-last-use state), and the player isn't locked
    /// (paused, in VATS, ...).
    fn check(state: &LockState, pip: &dyn PipClient) -> bool {
        state.parked
            && state.last_use_version != Some(pip.inventory_version())
            && !pip.player_locked()
    }

    fn record_use_version(&self, version: u64) {
        self.state.lock().unwrap().last_use_version = Some(version);
    }

    /// Wakes any parked waiter to re-run `check` against current pip
    /// state. Bots call this from `on_pip_update` since `check` is
    /// specified to run on every pip update.
    pub fn notify_update(&self) {
        self.cond.notify_all();
    }

    /// Fails the currently parked waiter (if any) with the distinguished
    /// `UseItemReset` cause, and clears `last_use_version` regardless of
    /// whether anyone was waiting.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_use_version = None;
        if state.parked {
            state.reset_cause = Some(USE_ITEM_RESET_CAUSE);
        }
        self.cond.notify_all();
    }
}

impl Default for UseItemLock {
    fn default() -> Self {
        UseItemLock::new()
    }
}

pub struct UseItemGuard<'a> {
    lock: &'a UseItemLock,
}

impl Drop for UseItemGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        state.count -= 1;
        if state.count == 0 {
            state.holder = None;
            self.lock.cond.notify_all();
        }
    }
}

pub struct Bot {
    pub stream_name: String,
    config: StreamConfig,
    ipc: Arc<dyn ChatSink>,
    pip: Arc<dyn PipClient>,
    features: Vec<Box<dyn Feature>>,
    use_item_lock: UseItemLock,
}

impl Bot {
    pub fn start(
        stream_name: String,
        config: StreamConfig,
        ipc: Arc<dyn ChatSink>,
        pip: Arc<dyn PipClient>,
    ) -> Bot {
        let features = features::build_enabled(&config);
        let bot = Bot {
            stream_name,
            config,
            ipc,
            pip,
            features,
            use_item_lock: UseItemLock::new(),
        };
        bot.debug("Starting...");
        bot.debug("Started");
        bot
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn pip(&self) -> &dyn PipClient {
        &*self.pip
    }

    pub fn features(&self) -> &[Box<dyn Feature>] {
        &self.features
    }

    /// Uses a carried item by name, gated by `UseItemLock` so only one
    /// use is ever in flight for this bot.
    pub fn use_item(&self, item_name: &str) -> Result<(), UserError> {
        let _guard = self.use_item_lock.acquire(self.pip.as_ref())?;
        let version = self.pip.inventory_version();
        let handle = self
            .pip
            .item_handle(ItemRef(item_name.to_string()))
            .ok_or_else(|| UserError("item no longer exists".to_string()))?;
        self.use_item_lock.record_use_version(version);
        self.pip
            .submit_use(handle)
            .map_err(|e| UserError(e.to_string()))
    }

    pub fn say(&self, text: &str) {
        if let Err(e) = self.ipc.send_chat(&self.stream_name, text) {
            warn!("failed to send chat for {}: {}", self.stream_name, e);
        }
    }

    /// Says `text` only when the stream's config has `debug` enabled.
    pub fn debug(&self, text: &str) {
        if self.config.debug {
            self.say(text);
        }
    }

    pub fn recv_chat(&self, text: &str, sender: &str, rank: SenderRank) {
        for feature in &self.features {
            feature.recv_chat(self, text, sender, rank);
        }
    }

    pub fn on_pip_update(&self, updates: &[String]) {
        self.use_item_lock.notify_update();
        for feature in &self.features {
            feature.on_pip_update(self, updates);
        }
    }

    /// Closes the pip connection and tells the master this stream is gone.
    /// Resets the use-item lock first so a command handler parked on a
    /// game-state check doesn't block forever past shutdown.
    pub fn stop(&self) {
        self.use_item_lock.reset();
        self.pip.close();
        self.debug("Disconnected");
        if let Err(e) = self.ipc.close_channel(&self.stream_name) {
            warn!("failed to report closed stream {}: {}", self.stream_name, e);
        }
    }

    #[cfg(test)]
    pub fn start_for_test(config: StreamConfig, pip: Arc<dyn PipClient>) -> Bot {
        Bot::start("test-stream".to_string(), config, Arc::new(NullChatSink), pip)
    }
}

#[cfg(test)]
struct NullChatSink;

#[cfg(test)]
impl ChatSink for NullChatSink {
    fn send_chat(&self, _stream_name: &str, _text: &str) -> Result<(), crate::error::Error> {
        Ok(())
    }

    fn close_channel(&self, _stream_name: &str) -> Result<(), crate::error::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod use_item_lock_tests {
    use super::*;
    use crate::pip_client::TestPipClient;

    #[test]
    fn reentrant_acquire_by_same_thread_does_not_block() {
        let lock = UseItemLock::new();
        let pip = TestPipClient::new("Player", vec!["Jet".to_string()]);
        let outer = lock.acquire(&pip).unwrap();
        let inner = lock.acquire(&pip).unwrap();
        drop(inner);
        drop(outer);
    }

    #[test]
    fn second_use_blocks_until_inventory_version_moves_past_last_use() {
        let lock = UseItemLock::new();
        let pip = TestPipClient::new("Player", vec!["Jet".to_string()]);

        let guard = lock.acquire(&pip).unwrap();
        lock.record_use_version(pip.inventory_version());
        drop(guard);

        // check() wants the version to differ from last_use_version, which
        // it won't until the game reports the use went through.
        let lock = Arc::new(lock);
        let pip = Arc::new(pip);
        let lock2 = lock.clone();
        let pip2 = pip.clone();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let result = lock2.acquire(pip2.as_ref() as &dyn PipClient).map(|_| ());
            let _ = done_tx.send(result);
        });

        assert!(done_rx.recv_timeout(Duration::from_millis(120)).is_err());

        pip.bump_inventory_version();
        lock.notify_update();
        done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("acquire should complete once the version moves")
            .unwrap();
    }

    #[test]
    fn reset_fails_a_parked_waiter_with_the_distinguished_cause() {
        let lock = Arc::new(UseItemLock::new());
        let pip = Arc::new(TestPipClient::new("Player", vec!["Jet".to_string()]));

        {
            let guard = lock.acquire(pip.as_ref() as &dyn PipClient).unwrap();
            lock.record_use_version(pip.inventory_version());
            drop(guard);
        }

        let lock2 = lock.clone();
        let pip2 = pip.clone();
        let handle =
            thread::spawn(move || lock2.acquire(pip2.as_ref() as &dyn PipClient).map(|_guard| ()));

        thread::sleep(Duration::from_millis(120));
        lock.reset();

        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.0, USE_ITEM_RESET_CAUSE);
    }
}
