use crate::client::AristonApi;
use crate::error::{BridgeError, log_and_continue};
use crate::host::{Host, HostCommand, ensure_devices};
use crate::models::ariston::{GatewayId, Snapshot};
use crate::services::worker::{Worker, WorkerEvent, WorkerSettings};
use crate::slots::{OFFLINE_TEXT, ONLINE_TEXT, Slot, SlotValue, TemperatureBounds, reconcile};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub worker: WorkerSettings,
    /// Used until the plant reports its own range.
    pub fallback_bounds: TemperatureBounds,
    pub shutdown_timeout: Duration,
    /// Connection status is logged every this many heartbeats.
    pub status_check_every: u32,
}

/// The bridge instance. The host calls the `on_*` lifecycle methods; nothing here is global.
pub struct Plugin {
    settings: PluginSettings,
    worker: Option<Worker>,
    bounds: TemperatureBounds,
    displayed: BTreeMap<Slot, SlotValue>,
    gateway: Option<GatewayId>,
    available: Option<bool>,
    dhw_available: Option<bool>,
    last_dhw_mode: Option<String>,
    last_poll_ok: Option<DateTime<Utc>>,
    heartbeat_counter: u32,
}

impl Plugin {
    pub fn new(settings: PluginSettings) -> Self {
        let bounds = settings.fallback_bounds;
        Plugin {
            settings,
            worker: None,
            bounds,
            displayed: BTreeMap::new(),
            gateway: None,
            available: None,
            dhw_available: None,
            last_dhw_mode: None,
            last_poll_ok: None,
            heartbeat_counter: 0,
        }
    }

    /// Create missing devices and start the worker. Safe to call on every start.
    pub fn on_start<H, A>(&mut self, host: &mut H, api: A) -> Result<(), BridgeError>
    where
        H: Host + ?Sized,
        A: AristonApi + 'static,
    {
        let created = ensure_devices(host)?;
        debug!("Device check complete ({} created)", created);

        if self.worker.is_some() {
            warn!("Ariston worker already running; start ignored");
            return Ok(());
        }
        info!(
            "Starting Ariston worker (interval={}s, gateway={})",
            self.settings.worker.poll_interval.as_secs(),
            self.settings
                .worker
                .gateway
                .as_ref()
                .map(|g| g.to_string())
                .unwrap_or_else(|| "auto-detect".to_string())
        );
        let worker = Worker::spawn(api, self.settings.worker.clone())
            .map_err(|e| BridgeError::NotReady(format!("cannot start worker thread: {}", e)))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Returns false when the worker had to be detached after the shutdown timeout.
    pub fn on_stop(&mut self) -> bool {
        match self.worker.take() {
            Some(worker) => {
                let stopped = worker.stop(self.settings.shutdown_timeout);
                info!("Ariston bridge stopped");
                stopped
            }
            None => true,
        }
    }

    pub fn on_heartbeat<H: Host + ?Sized>(&mut self, host: &mut H) {
        self.sync_events(host);

        self.heartbeat_counter += 1;
        if self.heartbeat_counter >= self.settings.status_check_every {
            self.heartbeat_counter = 0;
            self.log_status();
        }
    }

    pub fn on_command<H: Host + ?Sized>(&mut self, host: &mut H, command: &HostCommand) {
        debug!(
            "Command for unit {}: '{}' level '{}'",
            command.unit, command.command, command.level
        );
        let result = self.execute_command(host, command);
        if log_and_continue("Command", result).is_none() {
            self.restore(host, command.unit);
        }
    }

    pub fn on_disconnect(&mut self, reason: &BridgeError) {
        warn!("Lost contact with host: {}", reason);
    }

    pub fn displayed(&self, slot: Slot) -> Option<&SlotValue> {
        self.displayed.get(&slot)
    }

    pub fn bounds(&self) -> TemperatureBounds {
        self.bounds
    }

    fn execute_command<H: Host + ?Sized>(&mut self, host: &mut H, command: &HostCommand) -> Result<(), BridgeError> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| BridgeError::NotReady("Ariston worker is not running".into()))?;

        match Slot::from_unit(command.unit) {
            Some(Slot::Power) => {
                let on = match command.command.trim() {
                    c if c.eq_ignore_ascii_case("on") => true,
                    c if c.eq_ignore_ascii_case("off") => false,
                    other => {
                        return Err(BridgeError::Validation(format!("unsupported switch command '{}'", other)));
                    }
                };
                worker.set_power(on)?;
                self.sync_events(host);
                self.display(host, Slot::Power, SlotValue::power(on));
                info!("DHW switched {}", if on { "on" } else { "off" });
                Ok(())
            }
            Some(Slot::TargetTemperature) => {
                let celsius = self.bounds.parse_level(&command.level)?;
                worker.set_temperature(celsius)?;
                self.sync_events(host);
                self.display(host, Slot::TargetTemperature, SlotValue::temperature(celsius));
                info!("DHW target temperature set to {:.1}°C", celsius);
                Ok(())
            }
            _ => Err(BridgeError::Validation(format!(
                "unit {} does not accept commands",
                command.unit
            ))),
        }
    }

    /// Apply every worker event queued so far, oldest first.
    fn sync_events<H: Host + ?Sized>(&mut self, host: &mut H) {
        let events = match &self.worker {
            Some(worker) => worker.drain_events(),
            None => return,
        };
        for event in events {
            self.apply_event(host, event);
        }
    }

    fn apply_event<H: Host + ?Sized>(&mut self, host: &mut H, event: WorkerEvent) {
        match event {
            WorkerEvent::Connected { gateway, features } => {
                self.bounds = self.bounds.refined(features.min_set_temp, features.max_set_temp);
                info!(
                    "Ariston gateway {} ready (target range {:.1}-{:.1}°C)",
                    gateway, self.bounds.min, self.bounds.max
                );
                self.gateway = Some(gateway);
            }
            WorkerEvent::Snapshot(snapshot) => self.apply_snapshot(host, &snapshot),
            WorkerEvent::PollFailed(e) => {
                log_and_continue::<()>("Ariston poll", Err(e));
                self.set_available(false);
                self.display(host, Slot::Status, SlotValue::text(OFFLINE_TEXT));
            }
        }
    }

    fn apply_snapshot<H: Host + ?Sized>(&mut self, host: &mut H, snapshot: &Snapshot) {
        self.bounds = self
            .bounds
            .refined(snapshot.dhw_set_temperature_min.get(), snapshot.dhw_set_temperature_max.get());
        let available = snapshot.available.get().unwrap_or(true);
        self.set_available(available);
        if let Some(dhw_available) = snapshot.dhw_available.get() {
            self.set_dhw_available(dhw_available);
        }
        if let Some(mode) = snapshot.dhw_mode.value() {
            self.last_dhw_mode = Some(mode.clone());
        }
        self.last_poll_ok = Some(Utc::now());

        let mut updates = reconcile(snapshot);
        let status_reported = updates.iter().any(|(slot, _)| *slot == Slot::Status);
        if available && !status_reported && self.shows_offline() {
            let text = self.last_dhw_mode.as_deref().unwrap_or(ONLINE_TEXT);
            updates.push((Slot::Status, SlotValue::text(text)));
        }

        for (slot, value) in updates {
            self.display(host, slot, value);
        }
    }

    fn shows_offline(&self) -> bool {
        self.displayed(Slot::Status).map(|v| v.svalue.as_str()) == Some(OFFLINE_TEXT)
    }

    /// Write a slot when its display value changes.
    fn display<H: Host + ?Sized>(&mut self, host: &mut H, slot: Slot, value: SlotValue) {
        if self.displayed.get(&slot) == Some(&value) {
            return;
        }
        debug!("Updating {} to '{}'", slot.spec().name, value.svalue);
        self.write(host, slot, value);
    }

    fn write<H: Host + ?Sized>(&mut self, host: &mut H, slot: Slot, value: SlotValue) {
        let context = format!("Update of {}", slot.spec().name);
        if log_and_continue(&context, host.update_device(slot.unit(), &value)).is_some() {
            self.displayed.insert(slot, value);
        }
    }

    /// Put back the last known value of a slot whose command failed; the host may already show the requested one.
    fn restore<H: Host + ?Sized>(&mut self, host: &mut H, unit: u8) {
        let slot = match Slot::from_unit(unit) {
            Some(slot @ (Slot::Power | Slot::TargetTemperature)) => slot,
            _ => return,
        };
        if let Some(value) = self.displayed.get(&slot).cloned() {
            debug!("Restoring {} to '{}'", slot.spec().name, value.svalue);
            self.write(host, slot, value);
        }
    }

    fn set_available(&mut self, available: bool) {
        if self.available == Some(available) {
            return;
        }
        if available {
            info!("Ariston connection active");
        } else {
            error!("Ariston connection unavailable");
        }
        self.available = Some(available);
    }

    fn set_dhw_available(&mut self, available: bool) {
        if self.dhw_available == Some(available) {
            return;
        }
        if available {
            info!("DHW available");
        } else {
            warn!("DHW unavailable");
        }
        self.dhw_available = Some(available);
    }

    fn log_status(&self) {
        if self.worker.is_none() {
            error!("Ariston worker is not running");
            return;
        }
        let last_ok = self
            .last_poll_ok
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| "never".to_string());
        match self.available {
            Some(false) => error!(
                "Ariston unavailable (gateway={}, last successful poll {})",
                self.gateway.as_ref().map(|g| g.0.as_str()).unwrap_or("-"),
                last_ok
            ),
            _ => debug!("Status check: connection active, last successful poll {}", last_ok),
        }
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.on_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::StubApi;
    use crate::host::testing::MemoryHost;
    use std::thread;
    use std::time::Instant;

    fn settings(interval: Duration) -> PluginSettings {
        PluginSettings {
            worker: WorkerSettings {
                gateway: None,
                poll_interval: interval,
                tick: Duration::from_millis(10),
                command_timeout: Duration::from_secs(2),
            },
            fallback_bounds: TemperatureBounds { min: 40.0, max: 80.0 },
            shutdown_timeout: Duration::from_secs(5),
            status_check_every: 3,
        }
    }

    fn started(stub: &StubApi, interval: Duration) -> (Plugin, MemoryHost) {
        let mut plugin = Plugin::new(settings(interval));
        let mut host = MemoryHost::default();
        plugin.on_start(&mut host, stub.clone()).unwrap();
        (plugin, host)
    }

    /// Heartbeat until `pred` holds on the host, or two seconds pass.
    fn beat_until(plugin: &mut Plugin, host: &mut MemoryHost, pred: impl Fn(&MemoryHost) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            plugin.on_heartbeat(host);
            if pred(host) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn wait_for_polls(stub: &StubApi, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while stub.polls() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        // let the worker hand the result over
        thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn start_is_idempotent_for_devices() {
        let stub = StubApi::with_plant("AA01");
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));
        assert_eq!(host.created, vec![1, 2, 3, 4]);
        assert!(plugin.on_stop());

        plugin.on_start(&mut host, stub.clone()).unwrap();
        assert_eq!(host.created.len(), 4);
        assert!(plugin.on_stop());
    }

    #[test]
    fn snapshot_is_mirrored_into_slots() {
        let stub = StubApi::with_plant("AA01");
        stub.state.lock().unwrap().fallback = StubApi::snapshot(r#"{"dhw_storage_temperature": 45.0, "mode": "OFF"}"#);
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));

        assert!(beat_until(&mut plugin, &mut host, |h| h.value(Slot::Power).is_some()));
        assert_eq!(host.value(Slot::CurrentTemperature), Some(&SlotValue::text("45.0")));
        let power = host.value(Slot::Power).unwrap();
        assert_eq!((power.nvalue, power.svalue.as_str()), (0, "Off"));
        assert_eq!(host.value(Slot::TargetTemperature), None);
        assert_eq!(plugin.displayed(Slot::Power), Some(&SlotValue::power(false)));
        plugin.on_stop();
    }

    #[test]
    fn last_power_command_wins_over_stale_poll() {
        let stub = StubApi::with_plant("AA01");
        stub.state.lock().unwrap().fallback = StubApi::snapshot(r#"{"mode": "OFF"}"#);
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));
        // The poll result is queued but not applied before the commands arrive.
        wait_for_polls(&stub, 1);

        plugin.on_command(&mut host, &HostCommand::switch(false));
        plugin.on_command(&mut host, &HostCommand::switch(true));
        plugin.on_heartbeat(&mut host);

        assert_eq!(host.value(Slot::Power), Some(&SlotValue::power(true)));
        assert_eq!(stub.writes(), vec!["AA01 power false", "AA01 power true"]);
        plugin.on_stop();
    }

    #[test]
    fn out_of_range_temperature_is_never_sent() {
        let stub = StubApi::with_plant("AA01");
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));
        wait_for_polls(&stub, 1);

        for level in ["95", "10", "hot", ""] {
            let res = plugin.execute_command(&mut host, &HostCommand::set_level(4, level));
            assert!(matches!(res, Err(BridgeError::Validation(_))), "{}: {:?}", level, res);
        }
        assert!(stub.writes().is_empty());
        assert_eq!(host.value(Slot::TargetTemperature), None);

        plugin.execute_command(&mut host, &HostCommand::set_level(4, "55")).unwrap();
        assert_eq!(host.value(Slot::TargetTemperature), Some(&SlotValue::text("55.0")));
        assert_eq!(stub.writes().len(), 1);
        plugin.on_stop();
    }

    #[test]
    fn device_reported_range_replaces_fallback() {
        let stub = StubApi::with_plant("AA01");
        {
            let mut s = stub.state.lock().unwrap();
            s.features.max_set_temp = Some(75.0);
            s.fallback = StubApi::snapshot(r#"{"dhw_set_temperature_min": 35.0, "dhw_set_temperature": 50.0}"#);
        }
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));
        assert!(beat_until(&mut plugin, &mut host, |h| h.value(Slot::TargetTemperature).is_some()));

        assert_eq!(plugin.bounds(), TemperatureBounds { min: 35.0, max: 75.0 });
        assert!(plugin.execute_command(&mut host, &HostCommand::set_level(4, "78")).is_err());
        plugin.execute_command(&mut host, &HostCommand::set_level(4, "36.5")).unwrap();
        assert_eq!(host.value(Slot::TargetTemperature), Some(&SlotValue::text("36.5")));
        plugin.on_stop();
    }

    #[test]
    fn failed_write_leaves_slot_unchanged() {
        let stub = StubApi::with_plant("AA01");
        stub.state.lock().unwrap().fallback = StubApi::snapshot(r#"{"mode": "Summer"}"#);
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));
        assert!(beat_until(&mut plugin, &mut host, |h| h.value(Slot::Power).is_some()));
        stub.state.lock().unwrap().fail_writes = true;

        let res = plugin.execute_command(&mut host, &HostCommand::switch(false));
        assert!(matches!(res, Err(BridgeError::Transport(_))));
        assert_eq!(host.value(Slot::Power), Some(&SlotValue::power(true)));
        plugin.on_stop();
    }

    #[test]
    fn poll_failure_marks_offline_and_recovery_updates() {
        let stub = StubApi::with_plant("AA01");
        {
            let mut s = stub.state.lock().unwrap();
            s.scripted.push_back(Err(BridgeError::Transport("timeout".into())));
            s.fallback = StubApi::snapshot(r#"{"dhw_storage_temperature": 48.0, "dhw_mode": "Manual"}"#);
        }
        let (mut plugin, mut host) = started(&stub, Duration::from_millis(30));

        assert!(beat_until(&mut plugin, &mut host, |h| h.value(Slot::CurrentTemperature).is_some()));
        assert!(host.updates.contains(&(3, SlotValue::text(OFFLINE_TEXT))));
        assert_eq!(host.value(Slot::Status), Some(&SlotValue::text("Manual")));
        assert_eq!(host.value(Slot::CurrentTemperature), Some(&SlotValue::text("48.0")));
        plugin.on_stop();
    }

    #[test]
    fn unchanged_values_are_not_written_again() {
        let stub = StubApi::with_plant("AA01");
        stub.state.lock().unwrap().fallback = StubApi::snapshot(r#"{"mode": "Summer", "dhw_storage_temperature": 47.0}"#);
        let (mut plugin, mut host) = started(&stub, Duration::from_millis(20));

        assert!(beat_until(&mut plugin, &mut host, |_| stub.polls() >= 5));
        let power_writes = host.updates.iter().filter(|(unit, _)| *unit == 2).count();
        let temperature_writes = host.updates.iter().filter(|(unit, _)| *unit == 1).count();
        assert_eq!((power_writes, temperature_writes), (1, 1));
        plugin.on_stop();
    }

    #[test]
    fn failed_commands_put_the_last_value_back() {
        let stub = StubApi::with_plant("AA01");
        stub.state.lock().unwrap().fallback = StubApi::snapshot(r#"{"mode": "Summer", "dhw_set_temperature": 50.0}"#);
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));
        assert!(beat_until(&mut plugin, &mut host, |h| h.value(Slot::TargetTemperature).is_some()));

        // The host UI already shows what the user asked for.
        host.devices.insert(4, Some(SlotValue::text("95")));
        plugin.on_command(&mut host, &HostCommand::set_level(4, "95"));
        assert_eq!(host.value(Slot::TargetTemperature), Some(&SlotValue::text("50.0")));

        stub.state.lock().unwrap().fail_writes = true;
        host.devices.insert(2, Some(SlotValue::power(false)));
        plugin.on_command(&mut host, &HostCommand::switch(false));
        assert_eq!(host.value(Slot::Power), Some(&SlotValue::power(true)));
        assert!(stub.writes().is_empty());
        plugin.on_stop();
    }

    #[test]
    fn recovery_clears_offline_without_dhw_mode() {
        let fixture = std::fs::read_to_string("tests/data/plant-data.json").expect("fixture present");
        let stub = StubApi::with_plant("AA01");
        {
            let mut s = stub.state.lock().unwrap();
            s.scripted.push_back(Ok(StubApi::snapshot(r#"{"dhw_mode": "Manual"}"#)));
            s.scripted.push_back(Err(BridgeError::Transport("timeout".into())));
            s.fallback = StubApi::snapshot(&fixture);
        }
        let (mut plugin, mut host) = started(&stub, Duration::from_millis(30));

        assert!(beat_until(&mut plugin, &mut host, |h| h.value(Slot::CurrentTemperature).is_some()));
        assert!(host.updates.contains(&(3, SlotValue::text(OFFLINE_TEXT))));
        assert_eq!(host.value(Slot::Status), Some(&SlotValue::text("Manual")));
        assert_eq!(plugin.available, Some(true));
        assert_eq!(plugin.dhw_available, Some(true));
        plugin.on_stop();
    }

    #[test]
    fn recovery_without_any_dhw_mode_shows_online() {
        let stub = StubApi::with_plant("AA01");
        {
            let mut s = stub.state.lock().unwrap();
            s.scripted.push_back(Err(BridgeError::Transport("timeout".into())));
            s.fallback = StubApi::snapshot(r#"{"dhw_mode": null, "available": true, "dhw_available": false}"#);
        }
        let (mut plugin, mut host) = started(&stub, Duration::from_millis(30));

        assert!(beat_until(&mut plugin, &mut host, |h| h.value(Slot::Status) == Some(&SlotValue::text(ONLINE_TEXT))));
        assert_eq!(plugin.dhw_available, Some(false));
        plugin.on_stop();
    }

    #[test]
    fn commands_need_a_running_worker() {
        let mut plugin = Plugin::new(settings(Duration::from_secs(3600)));
        let mut host = MemoryHost::default();
        let res = plugin.execute_command(&mut host, &HostCommand::switch(true));
        assert!(matches!(res, Err(BridgeError::NotReady(_))));
    }

    #[test]
    fn unknown_units_and_words_are_rejected() {
        let stub = StubApi::with_plant("AA01");
        let (mut plugin, mut host) = started(&stub, Duration::from_secs(3600));
        let toggle = HostCommand {
            unit: 2,
            command: "Toggle".into(),
            level: String::new(),
        };
        assert!(matches!(plugin.execute_command(&mut host, &toggle), Err(BridgeError::Validation(_))));
        let on_sensor = HostCommand::set_level(1, "50");
        assert!(matches!(plugin.execute_command(&mut host, &on_sensor), Err(BridgeError::Validation(_))));
        assert!(stub.writes().is_empty());
        plugin.on_stop();
    }

    #[test]
    fn stop_returns_within_timeout() {
        let stub = StubApi::with_plant("AA01");
        let mut cfg = settings(Duration::from_secs(3600));
        cfg.worker.tick = crate::services::worker::DEFAULT_TICK;
        let mut plugin = Plugin::new(cfg);
        let mut host = MemoryHost::default();
        plugin.on_start(&mut host, stub.clone()).unwrap();
        wait_for_polls(&stub, 1);

        let began = Instant::now();
        assert!(plugin.on_stop());
        assert!(began.elapsed() < Duration::from_secs(5));
        assert!(plugin.on_stop());
    }
}
