//! The replication server loop.
//!
//! One `ReplServer` runs per node. It paces the whole core: it drives the
//! queue manager's cooperative cycle, periodically marshals newly observed
//! plots outward, installs replicated-in plots, and runs the deconfliction
//! pass after every drain. The simulator owns the other end of the shared
//! store handle and appends observations concurrently with the loop.
//!
//! Shutdown is cooperative: an external flag is observed between
//! iterations, and the loop exits after one final deconfliction pass.

use {
    crate::error::{CoreError, Result},
    log::{debug, info, warn},
    plotsync_db::{
        plot::{marshal_batch, unmarshal_batch, DronePlot, FLAG_NEW},
        store::PlotDb,
        Deconflictor,
    },
    plotsync_net::{queue::QueueMgr, ReplConfig, ReplKey},
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex, MutexGuard,
        },
        thread,
        time::{Duration, Instant},
    },
};

/// The per-node replication driver.
pub struct ReplServer {
    db: Arc<Mutex<PlotDb>>,
    queue: QueueMgr,
    deconflictor: Deconflictor,
    config: ReplConfig,
    shutdown: Arc<AtomicBool>,
    started_at: Instant,
    last_repl: i64,
}

impl ReplServer {
    /// Build a server over a shared plot store.
    ///
    /// `shutdown` is the external stop signal; setting it makes
    /// [`ReplServer::run`] return after one final deconfliction pass.
    pub fn new(
        db: Arc<Mutex<PlotDb>>,
        config: ReplConfig,
        key: ReplKey,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            db,
            queue: QueueMgr::from_config(&config, key),
            deconflictor: Deconflictor::new(),
            config,
            shutdown,
            started_at: Instant::now(),
            last_repl: 0,
        }
    }

    /// Seconds of simulation time since the server started: wall-clock
    /// elapsed scaled by the configured time multiplier. Paces replication
    /// rounds only — recorded plot timestamps are never touched by it.
    pub fn adjusted_time(&self) -> i64 {
        (self.started_at.elapsed().as_secs_f64() * self.config.time_mult) as i64
    }

    /// Largest normalized start phase elected so far.
    pub fn master_start_time(&self) -> i64 {
        self.deconflictor.master_start_time()
    }

    /// The elected master clock node (0 until the first election).
    pub fn master_clock_node(&self) -> u32 {
        self.deconflictor.master_clock_node()
    }

    /// The bound listener address, once [`ReplServer::bind`] has run.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.queue.local_addr()
    }

    /// Number of replication connections currently alive.
    pub fn active_connections(&self) -> usize {
        self.queue.active_connections()
    }

    /// Open the listening socket and start the simulation clock. Failure
    /// is fatal to the node.
    pub fn bind(&mut self) -> Result<()> {
        self.queue.bind_and_listen(self.config.bind_addr)?;
        self.started_at = Instant::now();
        self.last_repl = 0;
        Ok(())
    }

    /// Run the replication loop until the shutdown flag is set.
    pub fn run(&mut self) -> Result<()> {
        if !self.queue.is_bound() {
            self.bind()?;
        }

        while !self.shutdown.load(Ordering::Relaxed) {
            self.tick();
            thread::sleep(Duration::from_millis(self.config.loop_sleep_ms));
        }

        // One last reconciliation over whatever arrived late.
        if let Ok(mut db) = self.db.lock() {
            self.deconflictor.run(&mut db);
        }
        info!(
            "node {} replication stopped: master start time {}, master clock node {}",
            self.config.node_id,
            self.deconflictor.master_start_time(),
            self.deconflictor.master_clock_node()
        );
        Ok(())
    }

    /// One cooperative cycle of the loop. Public so test harnesses can
    /// drive several in-process nodes deterministically.
    ///
    /// Errors inside a cycle are scoped to the payload or connection that
    /// caused them: they are logged and the loop keeps going.
    pub fn tick(&mut self) {
        self.queue.handle_once();

        if self.adjusted_time() - self.last_repl >= self.config.secs_between_repl {
            match self.queue_new_plots() {
                Ok(0) => {}
                Ok(queued) => debug!(
                    "node {} queued {queued} plots for replication",
                    self.config.node_id
                ),
                Err(e) => warn!("marshalling new plots failed: {e}"),
            }
            self.last_repl = self.adjusted_time();
        }

        while let Some((peer_id, payload)) = self.queue.pop() {
            match self.install_repl_plots(&payload) {
                Ok(count) => debug!(
                    "node {} replicated in {count} plots from node {peer_id}",
                    self.config.node_id
                ),
                Err(e) => warn!("discarding replication payload from node {peer_id}: {e}"),
            }
        }

        match self.db.lock() {
            Ok(mut db) => self.deconflictor.run(&mut db),
            Err(_) => warn!("plot store lock poisoned, skipping deconfliction"),
        }
    }

    /// Marshal every `NEW` plot into a count-prefixed batch, clear the
    /// flags, and hand the batch to every peer. Returns how many plots
    /// were queued; zero sends nothing.
    pub fn queue_new_plots(&mut self) -> Result<usize> {
        let (payload, count) = {
            let mut db = self.store()?;
            let new_plots: Vec<DronePlot> = db
                .iter()
                .filter(|p| p.is_flag_set(FLAG_NEW))
                .cloned()
                .collect();
            if new_plots.is_empty() {
                return Ok(0);
            }
            for plot in db.iter_mut() {
                plot.clear_flags(FLAG_NEW);
            }
            (marshal_batch(&new_plots)?, new_plots.len())
        };

        self.queue.send_to_all(&payload);
        Ok(count)
    }

    /// Install a replicated-in batch. The records enter the store without
    /// `FLAG_NEW`: they are someone else's observations and must not be
    /// replicated onward. A malformed batch fails whole; the store is
    /// untouched.
    pub fn install_repl_plots(&mut self, bytes: &[u8]) -> Result<usize> {
        let plots = unmarshal_batch(bytes)?;
        let count = plots.len();
        let mut db = self.store()?;
        for plot in plots {
            db.push(plot);
        }
        Ok(count)
    }

    fn store(&self) -> Result<MutexGuard<'_, PlotDb>> {
        self.db.lock().map_err(|_| CoreError::StorePoisoned)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server(node_id: &str) -> (ReplServer, Arc<Mutex<PlotDb>>) {
        let db = Arc::new(Mutex::new(PlotDb::new()));
        let server = ReplServer::new(
            db.clone(),
            ReplConfig::dev_default(node_id),
            ReplKey::from_bytes(&[0x42; 16]).unwrap(),
            Arc::new(AtomicBool::new(false)),
        );
        (server, db)
    }

    #[test]
    fn test_install_into_empty_store() {
        let (mut server, db) = test_server("1");

        let plots = vec![
            DronePlot::new(42, 2, 1003, 10.0, 20.0, FLAG_NEW),
            DronePlot::new(42, 3, 1007, 10.0, 20.0, 0),
        ];
        let bytes = marshal_batch(&plots).unwrap();
        assert_eq!(server.install_repl_plots(&bytes).unwrap(), 2);

        let db = db.lock().unwrap();
        assert_eq!(db.len(), 2);
        for (installed, expected) in db.iter().zip(&plots) {
            assert_eq!(installed.drone_id, expected.drone_id);
            assert_eq!(installed.node_id, expected.node_id);
            assert_eq!(installed.timestamp, expected.timestamp);
            assert!(!installed.is_flag_set(FLAG_NEW));
        }
    }

    #[test]
    fn test_install_rejects_bad_multiple() {
        let (mut server, db) = test_server("1");

        let mut bytes = marshal_batch(&[DronePlot::new(1, 1, 1, 0.0, 0.0, 0)]).unwrap();
        bytes.truncate(bytes.len() - 1);

        assert!(server.install_repl_plots(&bytes).is_err());
        assert!(db.lock().unwrap().is_empty());
    }

    #[test]
    fn test_queue_new_plots_clears_flags_and_counts() {
        let (mut server, db) = test_server("1");
        {
            let mut db = db.lock().unwrap();
            db.add_plot(42, 1, 1005, 10.0, 20.0, FLAG_NEW);
            db.add_plot(43, 1, 1010, 11.0, 21.0, FLAG_NEW);
            db.add_plot(44, 2, 1003, 12.0, 22.0, 0);
        }

        // No peers configured: marshalling still clears the flags.
        assert_eq!(server.queue_new_plots().unwrap(), 2);
        assert!(db
            .lock()
            .unwrap()
            .iter()
            .all(|p| !p.is_flag_set(FLAG_NEW)));

        // A second round finds nothing new.
        assert_eq!(server.queue_new_plots().unwrap(), 0);
    }

    #[test]
    fn test_quiet_node_ticks_without_activity() {
        let (mut server, db) = test_server("1");
        server.bind().unwrap();

        for _ in 0..50 {
            server.tick();
        }

        assert!(db.lock().unwrap().is_empty());
        assert_eq!(server.master_start_time(), 0);
        assert_eq!(server.master_clock_node(), 0);
    }

    #[test]
    fn test_adjusted_time_scales_with_multiplier() {
        let db = Arc::new(Mutex::new(PlotDb::new()));
        let mut config = ReplConfig::dev_default("1");
        config.time_mult = 600.0;
        let server = ReplServer::new(
            db,
            config,
            ReplKey::from_bytes(&[0x42; 16]).unwrap(),
            Arc::new(AtomicBool::new(false)),
        );

        thread::sleep(Duration::from_millis(50));
        let adjusted = server.adjusted_time();
        assert!(adjusted >= 25, "600x multiplier over 50ms gave {adjusted}");
    }

    #[test]
    fn test_run_honors_shutdown_flag() {
        let db = Arc::new(Mutex::new(PlotDb::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut server = ReplServer::new(
            db,
            ReplConfig::dev_default("1"),
            ReplKey::from_bytes(&[0x42; 16]).unwrap(),
            shutdown.clone(),
        );

        let handle = thread::spawn(move || server.run());
        thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();
    }
}
