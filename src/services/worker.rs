use crate::client::AristonApi;
use crate::error::{BridgeError, log_and_continue};
use crate::models::ariston::{GatewayId, PlantFeatures, Snapshot};
use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

type Reply = Sender<Result<(), BridgeError>>;

/// Write requests carry the instant after which the caller no longer waits for them.
enum Request {
    SetPower { on: bool, deadline: Instant, reply: Reply },
    SetTemperature { celsius: f64, deadline: Instant, reply: Reply },
    Stop,
}

/// What the worker reports back to the host thread, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Connected { gateway: GatewayId, features: PlantFeatures },
    Snapshot(Snapshot),
    PollFailed(BridgeError),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub gateway: Option<GatewayId>,
    pub poll_interval: Duration,
    /// Upper bound on one idle wait; a stop request is noticed within this time.
    pub tick: Duration,
    pub command_timeout: Duration,
}

/// Handle held by the host thread. The worker thread owns the remote client.
pub struct Worker {
    requests: Sender<Request>,
    events: Receiver<WorkerEvent>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    command_timeout: Duration,
}

impl Worker {
    pub fn spawn<A: AristonApi + 'static>(api: A, settings: WorkerSettings) -> std::io::Result<Self> {
        let (req_tx, req_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let command_timeout = settings.command_timeout;

        let handle = thread::Builder::new().name("ariston-worker".into()).spawn(move || {
            let mut state = WorkerState {
                api,
                configured: settings.gateway.clone(),
                gateway: None,
                last_target: None,
                events: event_tx,
            };
            state.run(&req_rx, settings.poll_interval, settings.tick);
            let _ = done_tx.send(());
        })?;

        Ok(Worker {
            requests: req_tx,
            events: event_rx,
            done: done_rx,
            handle: Some(handle),
            command_timeout,
        })
    }

    pub fn set_power(&self, on: bool) -> Result<(), BridgeError> {
        self.request(|deadline, reply| Request::SetPower { on, deadline, reply })
    }

    pub fn set_temperature(&self, celsius: f64) -> Result<(), BridgeError> {
        self.request(|deadline, reply| Request::SetTemperature { celsius, deadline, reply })
    }

    fn request(&self, build: impl FnOnce(Instant, Reply) -> Request) -> Result<(), BridgeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let deadline = Instant::now() + self.command_timeout;
        self.requests
            .send(build(deadline, reply_tx))
            .map_err(|_| BridgeError::NotReady("worker is not running".into()))?;
        match reply_rx.recv_timeout(self.command_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::Transport(format!(
                "no reply within {}s",
                self.command_timeout.as_secs_f32()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::NotReady("worker stopped".into())),
        }
    }

    /// Everything reported since the last call, oldest first.
    pub fn drain_events(&self) -> Vec<WorkerEvent> {
        self.events.try_iter().collect()
    }

    /// Ask the worker to stop and wait up to `timeout`. Returns false if it had to be detached.
    pub fn stop(mut self, timeout: Duration) -> bool {
        let _ = self.requests.send(Request::Stop);
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take()
                    && handle.join().is_err()
                {
                    warn!("Ariston worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Ariston worker did not stop within {}s; detaching it",
                    timeout.as_secs_f32()
                );
                false
            }
        }
    }
}

struct WorkerState<A> {
    api: A,
    configured: Option<GatewayId>,
    gateway: Option<GatewayId>,
    last_target: Option<f64>,
    events: Sender<WorkerEvent>,
}

impl<A: AristonApi> WorkerState<A> {
    fn run(&mut self, requests: &Receiver<Request>, interval: Duration, tick: Duration) {
        let mut next_poll = Instant::now();
        loop {
            let now = Instant::now();
            if now >= next_poll {
                self.poll_once();
                // Maintain steady cadence
                next_poll = now + interval;
            }

            let wait = next_poll.saturating_duration_since(Instant::now()).min(tick);
            match requests.recv_timeout(wait) {
                Ok(Request::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Request::SetPower { on, deadline, reply }) => {
                    let _ = reply.send(expired(deadline).and_then(|_| self.set_power(on)));
                }
                Ok(Request::SetTemperature { celsius, deadline, reply }) => {
                    let _ = reply.send(expired(deadline).and_then(|_| self.set_temperature(celsius)));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        debug!("Ariston worker loop exited");
    }

    fn poll_once(&mut self) {
        let event = match self.connect().and_then(|gw| self.api.plant_data(&gw)) {
            Ok(snapshot) => {
                debug!("Poll returned {} sensor value(s)", snapshot.reported_count());
                if let Some(t) = snapshot.dhw_set_temperature.get() {
                    self.last_target = Some(t);
                }
                WorkerEvent::Snapshot(snapshot)
            }
            Err(e) => WorkerEvent::PollFailed(e),
        };
        // Receiver gone means the plugin is shutting down.
        let _ = self.events.send(event);
    }

    /// Log in and discover the gateway if that has not happened yet.
    fn connect(&mut self) -> Result<GatewayId, BridgeError> {
        if !self.api.is_logged_in() {
            debug!("Logging in to Ariston");
            self.api.login()?;
        }
        if let Some(gw) = &self.gateway {
            return Ok(gw.clone());
        }

        let plants = self.api.hello()?;
        let gateway = match &self.configured {
            Some(wanted) => plants
                .iter()
                .find(|p| p.gw.matches(wanted))
                .map(|p| p.gw.clone())
                .ok_or_else(|| BridgeError::Transport(format!("gateway {} not found in account", wanted)))?,
            None => plants
                .first()
                .map(|p| p.gw.clone())
                .ok_or_else(|| BridgeError::Transport("account has no water heaters".into()))?,
        };
        // Without features the range comes from the snapshot or the configured fallback.
        let features = log_and_continue("Ariston features", self.api.features(&gateway)).unwrap_or_default();
        info!("Connected to Ariston gateway {} ({} plant(s) in account)", gateway, plants.len());
        self.gateway = Some(gateway.clone());
        let _ = self.events.send(WorkerEvent::Connected {
            gateway: gateway.clone(),
            features,
        });
        Ok(gateway)
    }

    fn ready_gateway(&self) -> Result<GatewayId, BridgeError> {
        match &self.gateway {
            Some(gw) if self.api.is_logged_in() => Ok(gw.clone()),
            Some(_) => Err(BridgeError::NotReady("Ariston session expired; waiting for next poll".into())),
            None => Err(BridgeError::NotReady("Ariston gateway not connected yet".into())),
        }
    }

    fn set_power(&mut self, on: bool) -> Result<(), BridgeError> {
        let gw = self.ready_gateway()?;
        self.api.set_power(&gw, on)
    }

    fn set_temperature(&mut self, celsius: f64) -> Result<(), BridgeError> {
        let gw = self.ready_gateway()?;
        self.api.set_temperature(&gw, celsius, self.last_target)?;
        self.last_target = Some(celsius);
        Ok(())
    }
}

/// A request whose caller already gave up must not reach the remote side.
fn expired(deadline: Instant) -> Result<(), BridgeError> {
    if Instant::now() < deadline {
        return Ok(());
    }
    warn!("Dropping command that waited past its deadline");
    Err(BridgeError::Transport("command expired before it was sent".into()))
}
