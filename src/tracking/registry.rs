// =============================================================================
// Position Registry — owns the set of running position monitors
// =============================================================================
//
// One entry per tracked entry order id. The map is the only shared mutable
// structure in the engine; it is guarded by a short-held `parking_lot::Mutex`
// that is never held across an `.await`.
//
// Monitors remove their own entry when they exit, matched by `run_id` so a
// stale run can never evict a newer registration of the same order id.
// Dropping the registry cancels every monitor it started.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, InstrumentResolver};
use crate::execution::OrderSync;
use crate::market_data::MarketDataSource;
use crate::position::{PositionSnapshot, TrackedPosition, TrackingRequest};
use crate::runtime_config::EngineConfig;
use crate::tracking::monitor::{run_monitor, MonitorContext, MonitorExit};
use crate::types::OrderId;

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStart {
    /// A new monitor was spawned.
    Started { run_id: Uuid },
    /// A monitor for this order id is already running; nothing changed.
    AlreadyTracked,
    /// The entry cannot carry a stop-loss; no monitor was spawned.
    Unprotectable { reason: String },
    /// `shutdown()` was called; no new monitors are accepted.
    ShutDown,
}

struct Entry {
    run_id: Uuid,
    token: CancellationToken,
    snapshots: watch::Receiver<PositionSnapshot>,
    handle: Option<JoinHandle<MonitorExit>>,
}

type MonitorMap = Arc<Mutex<HashMap<OrderId, Entry>>>;

pub struct PositionRegistry {
    monitors: MonitorMap,
    ctx: Arc<MonitorContext>,
    root: CancellationToken,
}

impl PositionRegistry {
    /// Build a registry; fails if `config` does not pass validation.
    pub fn new(
        broker: Arc<dyn Broker>,
        resolver: Arc<dyn InstrumentResolver>,
        feed: Arc<dyn MarketDataSource>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let sync = OrderSync::new(
            Arc::clone(&broker),
            resolver,
            config.faults.clone(),
            config.account_mode,
        );
        Ok(Self {
            monitors: Arc::new(Mutex::new(HashMap::new())),
            ctx: Arc::new(MonitorContext {
                broker,
                feed,
                sync,
                config,
            }),
            root: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Start protecting `request`. Idempotent per `order_id`.
    pub fn start_tracking(&self, request: TrackingRequest) -> TrackingStart {
        let order_id = request.order_id;

        if let Err(reason) = check_protectable(&request) {
            warn!(order_id, symbol = %request.symbol, %reason, "entry cannot be protected");
            return TrackingStart::Unprotectable { reason };
        }

        let mut monitors = self.monitors.lock();

        if self.root.is_cancelled() {
            warn!(order_id, "registry shut down, not tracking");
            return TrackingStart::ShutDown;
        }
        if monitors.contains_key(&order_id) {
            warn!(order_id, "order already tracked");
            return TrackingStart::AlreadyTracked;
        }

        let run_id = Uuid::new_v4();
        let pos = TrackedPosition::new(request, run_id);
        let (tx, rx) = watch::channel(pos.snapshot());
        let token = self.root.child_token();

        info!(
            order_id,
            run_id = %run_id,
            symbol = %pos.symbol,
            direction = %pos.direction,
            quantity = pos.quantity,
            entry_price = format!("{:.2}", pos.entry_price),
            owner = %pos.owner,
            account = %self.ctx.config.account_mode,
            "tracking started"
        );

        let handle = tokio::spawn({
            let ctx = Arc::clone(&self.ctx);
            let token = token.clone();
            let map = Arc::clone(&self.monitors);
            async move {
                let exit = run_monitor(pos, ctx, token, &tx).await;
                release(&map, order_id, run_id);
                // Receivers see the channel close only after the entry is gone.
                drop(tx);
                exit
            }
        });

        monitors.insert(
            order_id,
            Entry {
                run_id,
                token,
                snapshots: rx,
                handle: Some(handle),
            },
        );

        TrackingStart::Started { run_id }
    }

    /// Cancel the monitor for `order_id`. Returns `false` if none is running.
    ///
    /// The monitor finishes any in-flight cycle, then removes itself.
    pub fn stop_tracking(&self, order_id: OrderId) -> bool {
        match self.monitors.lock().get(&order_id) {
            Some(entry) => {
                info!(order_id, run_id = %entry.run_id, "stop tracking requested");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn is_tracking(&self, order_id: OrderId) -> bool {
        self.monitors.lock().contains_key(&order_id)
    }

    /// Tracked order ids in ascending order.
    pub fn tracked_order_ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self.monitors.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.monitors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.lock().is_empty()
    }

    /// State of the monitor after its latest cycle.
    pub fn snapshot(&self, order_id: OrderId) -> Option<PositionSnapshot> {
        self.monitors
            .lock()
            .get(&order_id)
            .map(|e| e.snapshots.borrow().clone())
    }

    /// Receive a snapshot after every cycle. The channel closes once the
    /// monitor has exited and removed itself.
    pub fn subscribe(&self, order_id: OrderId) -> Option<watch::Receiver<PositionSnapshot>> {
        self.monitors
            .lock()
            .get(&order_id)
            .map(|e| e.snapshots.clone())
    }

    /// Wait until the monitor for `order_id` has exited. Returns `false` if
    /// it was not running.
    pub async fn wait_for_exit(&self, order_id: OrderId) -> bool {
        let Some(mut rx) = self.subscribe(order_id) else {
            return false;
        };
        while rx.changed().await.is_ok() {}
        true
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Cancel every monitor and wait for all of them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();

        let handles: Vec<(OrderId, JoinHandle<MonitorExit>)> = self
            .monitors
            .lock()
            .iter_mut()
            .filter_map(|(id, e)| e.handle.take().map(|h| (*id, h)))
            .collect();

        info!(monitors = handles.len(), "registry shutting down");

        let results =
            futures_util::future::join_all(handles.into_iter().map(|(id, h)| async move {
                (id, h.await)
            }))
            .await;

        for (order_id, result) in results {
            match result {
                Ok(exit) => debug!(order_id, exit = %exit, "monitor joined"),
                Err(e) => error!(order_id, error = %e, "monitor task did not join cleanly"),
            }
        }
    }
}

impl Drop for PositionRegistry {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for PositionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionRegistry")
            .field("tracked", &self.tracked_order_ids())
            .field("config", &self.ctx.config)
            .field("shut_down", &self.root.is_cancelled())
            .finish()
    }
}

/// Remove the entry for `order_id` if it still belongs to `run_id`.
fn release(monitors: &MonitorMap, order_id: OrderId, run_id: Uuid) {
    let mut map = monitors.lock();
    if map.get(&order_id).is_some_and(|e| e.run_id == run_id) {
        map.remove(&order_id);
        debug!(order_id, run_id = %run_id, "monitor entry released");
    }
}

fn check_protectable(request: &TrackingRequest) -> Result<(), String> {
    if request.symbol.trim().is_empty() {
        return Err("symbol is empty".into());
    }
    if request.quantity == 0 {
        return Err("quantity must be positive".into());
    }
    if !request.entry_price.is_finite() || request.entry_price <= 0.0 {
        return Err(format!("invalid entry price {}", request.entry_price));
    }
    let Some(leg) = request.primary_leg() else {
        return Err("entry has no legs".into());
    };
    leg.stop_action(request.direction).map(|_| ())
}

// =============================================================================
// Tests
// =============================================================================
