//! Keyboard Dechatter - chatter monitor
//!
//! Runs the filter engine against every keyboard on the system and logs
//! each event it would suppress. Events are observed, not grabbed, so the
//! desktop keeps receiving input unchanged.

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    monitor::run()
}

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    anyhow::bail!("the monitor reads Linux evdev devices; on this platform embed the library behind the OS keyboard hook")
}

#[cfg(target_os = "linux")]
mod monitor {
    use anyhow::{Context, Result};
    use keyboard_dechatter::{
        config::{app_dir, Config},
        device::{KeyboardClassifier, SysfsProbe},
        engine::DechatterEngine,
        keyboard::{evdev_status, EvdevListener, HardwareEvent},
        report::SessionReport,
        stats::{stats_path, ChatterStats},
        timing::{LoadMonitor, ProcStatSampler, SystemClock},
    };
    use log::{info, warn};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Sleep between empty polls
    const POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// How often to look for plugged/unplugged keyboards and flush stats
    const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(2);

    pub fn run() -> Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        let config = match Config::load() {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("config unavailable, using defaults: {}", e);
                None
            }
        };
        let effective = config.clone().unwrap_or_default();

        // Evdev events carry kernel timestamps; the clock only stamps
        // events that arrive without one
        let clock = SystemClock;
        let load = LoadMonitor::new(&effective.load);
        let _sampler = load
            .spawn_sampler(ProcStatSampler::default())
            .context("starting load sampler")?;
        let classifier = KeyboardClassifier::new(SysfsProbe::default());
        let mut engine = DechatterEngine::new(config, clock, classifier, load);

        let stats_file = stats_path().ok();
        if let Some(path) = &stats_file {
            engine.set_stats(ChatterStats::load_or_default(path));
        }

        let running = Arc::new(AtomicBool::new(true));
        {
            let running = Arc::clone(&running);
            ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
                .context("installing Ctrl-C handler")?;
        }

        // All devices feed one queue so same-key order is preserved
        let (event_tx, event_rx) = mpsc::channel::<HardwareEvent>();
        let mut listener = EvdevListener::new(event_tx).with_context(evdev_status)?;
        for device in listener.device_ids() {
            let class = engine.classify(device);
            info!("watching {} ({})", device, class.name());
        }

        let start = Instant::now();
        let mut last_housekeeping = Instant::now();

        while running.load(Ordering::SeqCst) {
            if listener.poll() == 0 {
                thread::sleep(POLL_INTERVAL);
            }

            while let Ok(event) = event_rx.try_recv() {
                if engine.on_event(&event).is_drop() {
                    info!(
                        "chatter on {}: {} {:?}",
                        event.device, event.key, event.event_type
                    );
                }
            }

            if last_housekeeping.elapsed() >= HOUSEKEEPING_INTERVAL {
                last_housekeeping = Instant::now();
                match listener.rescan() {
                    Ok(true) => {
                        engine.notify_device_list_changed();
                        info!("keyboards changed: {}", evdev_status());
                    }
                    Ok(false) => {}
                    Err(e) => warn!("device rescan failed: {}", e),
                }
                if let Some(path) = &stats_file {
                    if let Err(e) = engine.stats_mut().save_if_due(Instant::now(), path) {
                        warn!("saving stats failed: {}", e);
                    }
                }
            }
        }

        let report = SessionReport::new(start, &mut engine);
        println!("\n{}", report.to_text());
        let report_path = app_dir()?.join(format!(
            "report_{}.json",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        if let Err(e) = report.export_json(&report_path) {
            warn!("writing report failed: {}", e);
        } else {
            println!("Report written to {}", report_path.display());
        }

        let mut stats = engine.shutdown();
        if let Some(path) = &stats_file {
            if stats.is_dirty() {
                stats.save_to(path)?;
            }
        }

        Ok(())
    }
}
