//! Background service: ticks on an interval while running.
//!
//! Every tick is published as a `heartbeat.tick` event carrying a running `count`.
//! The ticker task watches a child of the start [`Context`], so cancelling that
//! context stops ticking too; [`Service::stop`] cancels it explicitly and waits
//! for the task to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use component_runtime::{
    BoxError, Component, ComponentInfo, ComponentType, Context, Event, EventBus, Service,
    ServiceState, ServiceStatus,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::SampleError;

pub const TICK_TOPIC: &str = "heartbeat.tick";

pub struct Heartbeat {
    info: ComponentInfo,
    state: ServiceState,
    bus: EventBus,
    interval: Duration,
    ticks: Arc<AtomicU64>,
    ticker: Mutex<Option<(Context, JoinHandle<()>)>>,
}

impl Heartbeat {
    pub const ID: &'static str = "heartbeat";

    pub fn new(bus: EventBus, interval: Duration) -> Self {
        Self {
            info: ComponentInfo::new(Self::ID, "Heartbeat", ComponentType::Service)
                .with_metadata("interval_ms", interval.as_millis().to_string()),
            state: ServiceState::new(),
            bus,
            interval,
            ticks: Arc::new(AtomicU64::new(0)),
            ticker: Mutex::new(None),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn spawn_ticker(&self, ctx: &Context) {
        let cancel = ctx.child();
        let watch = cancel.clone();
        let bus = self.bus.clone();
        let ticks = self.ticks.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = watch.cancelled() => break,
                    _ = timer.tick() => {
                        let count = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!(count, "Heartbeat tick");
                        bus.publish(Event::new(TICK_TOPIC, Heartbeat::ID).with("count", count));
                    }
                }
            }
        });
        *self.ticker.lock() = Some((cancel, handle));
    }
}

impl Component for Heartbeat {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

#[async_trait]
impl Service for Heartbeat {
    async fn start(&self, ctx: &Context) -> Result<(), BoxError> {
        self.state
            .start_with(async {
                self.spawn_ticker(ctx);
                info!(interval_ms = self.interval.as_millis() as u64, "Heartbeat started");
                Ok::<(), BoxError>(())
            })
            .await
    }

    async fn stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.state
            .stop_with(async {
                let ticker = self.ticker.lock().take();
                if let Some((cancel, handle)) = ticker {
                    cancel.cancel();
                    handle
                        .await
                        .map_err(|e| SampleError::TickerFailed(e.to_string()))?;
                }
                info!(ticks = self.ticks(), "Heartbeat stopped");
                Ok::<(), BoxError>(())
            })
            .await
    }

    fn status(&self) -> ServiceStatus {
        self.state.status()
    }
}
