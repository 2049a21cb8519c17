use crate::host::{CommandSource, Host};
use crate::services::plugin::Plugin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Drive the plugin's callbacks from the host until `stop` is set.
///
/// Each tick relays pending user actions first, then lets the plugin apply poll results.
pub fn run_loop<H: Host + CommandSource>(plugin: &mut Plugin, host: &mut H, heartbeat: Duration, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        let tick_start = Instant::now();

        match host.poll_commands() {
            Ok(commands) => {
                for command in &commands {
                    plugin.on_command(host, command);
                }
            }
            Err(e) => plugin.on_disconnect(&e),
        }
        plugin.on_heartbeat(host);

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < heartbeat {
            thread::sleep(heartbeat - elapsed);
        }
    }
    plugin.on_stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::StubApi;
    use crate::host::HostCommand;
    use crate::host::testing::MemoryHost;
    use crate::services::plugin::PluginSettings;
    use crate::services::worker::WorkerSettings;
    use crate::slots::{Slot, SlotValue, TemperatureBounds};
    use std::sync::Arc;

    fn plugin() -> Plugin {
        Plugin::new(PluginSettings {
            worker: WorkerSettings {
                gateway: None,
                poll_interval: Duration::from_secs(3600),
                tick: Duration::from_millis(10),
                command_timeout: Duration::from_secs(2),
            },
            fallback_bounds: TemperatureBounds { min: 40.0, max: 80.0 },
            shutdown_timeout: Duration::from_secs(5),
            status_check_every: 10,
        })
    }

    #[test]
    fn relays_host_commands_until_stopped() {
        let stub = StubApi::with_plant("AA01");
        stub.state.lock().unwrap().fallback = StubApi::snapshot(r#"{"mode": "Summer"}"#);
        let mut plugin = plugin();
        let mut host = MemoryHost::default();
        plugin.on_start(&mut host, stub.clone()).unwrap();
        while stub.polls() == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        host.pending.push_back(HostCommand::switch(false));

        let stop = Arc::new(AtomicBool::new(false));
        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                stop.store(true, Ordering::Relaxed);
            })
        };
        run_loop(&mut plugin, &mut host, Duration::from_millis(10), &stop);
        stopper.join().unwrap();

        assert_eq!(stub.writes(), vec!["AA01 power false"]);
        assert_eq!(host.value(Slot::Power), Some(&SlotValue::power(false)));
    }

    #[test]
    fn host_outage_does_not_end_the_loop() {
        let stub = StubApi::with_plant("AA01");
        stub.state.lock().unwrap().fallback = StubApi::snapshot(r#"{"dhw_storage_temperature": 51.0}"#);
        let mut plugin = plugin();
        let mut host = MemoryHost::default();
        plugin.on_start(&mut host, stub.clone()).unwrap();
        host.fail_polls = true;

        let stop = Arc::new(AtomicBool::new(false));
        let stopper = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                stop.store(true, Ordering::Relaxed);
            })
        };
        run_loop(&mut plugin, &mut host, Duration::from_millis(10), &stop);
        stopper.join().unwrap();

        assert_eq!(host.value(Slot::CurrentTemperature), Some(&SlotValue::text("51.0")));
    }
}
