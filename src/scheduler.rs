// Drives scan -> resolve cycles. One cycle, including any confirmation wait,
// finishes before the next starts, so a single signing account never has two
// of our transactions in flight.

use crate::chain::ChainClient;
use crate::config::ScheduleSettings;
use crate::error::{OracleError, Result};
use crate::executor::{AttemptStatus, ResolutionAttempt, ResolutionExecutor};
use crate::scanner::RoundScanner;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
    Resolving { round_id: u64 },
    CoolDown,
    Sleeping,
    BackOff,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    NotDue,
    Attempted(ResolutionAttempt),
}

/// Counters owned by the loop. Reset only by restarting the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub attempts: u64,
    pub resolved: u64,
    pub reverted: u64,
    pub failed_attempts: u64,
    pub cycle_errors: u64,
}

pub struct Scheduler {
    chain: Arc<dyn ChainClient>,
    scanner: RoundScanner,
    executor: ResolutionExecutor,
    settings: ScheduleSettings,
    state: SchedulerState,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        scanner: RoundScanner,
        executor: ResolutionExecutor,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            chain,
            scanner,
            executor,
            settings,
            state: SchedulerState::Idle,
            stats: SchedulerStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// One scan and, if due, one resolution attempt.
    ///
    /// Only a failed connectivity probe escapes as an error; scan and
    /// execution failures are already absorbed by the scanner and executor.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.stats.cycles += 1;
        self.state = SchedulerState::Scanning;

        let block = self.chain.block_number().await.map_err(|e| match e {
            OracleError::Connection(_) => e,
            other => OracleError::Connection(other.to_string()),
        })?;
        info!(block, cycle = self.stats.cycles, "Scanning for due rounds");

        let Some(round) = self.scanner.check_due(Utc::now()).await else {
            return Ok(CycleOutcome::NotDue);
        };

        self.state = SchedulerState::Resolving { round_id: round.id };
        info!(round_id = round.id, "Round due for resolution");
        let attempt = self.executor.execute(&round).await;
        self.record(&attempt);
        Ok(CycleOutcome::Attempted(attempt))
    }

    fn record(&mut self, attempt: &ResolutionAttempt) {
        self.stats.attempts += 1;
        match attempt.status {
            AttemptStatus::Resolved { .. } => self.stats.resolved += 1,
            AttemptStatus::Reverted => self.stats.reverted += 1,
            AttemptStatus::AlreadyResolved => {}
            _ => self.stats.failed_attempts += 1,
        }
        info!(
            round_id = attempt.round_id,
            status = %attempt.status,
            attempts = self.stats.attempts,
            resolved = self.stats.resolved,
            reverted = self.stats.reverted,
            failed = self.stats.failed_attempts,
            "Resolution attempt finished"
        );
    }

    /// State and pause that follow a cycle result.
    pub fn next_pause(&self, result: &Result<CycleOutcome>) -> (SchedulerState, Duration) {
        match result {
            Ok(CycleOutcome::NotDue) => (SchedulerState::Sleeping, self.settings.poll_interval),
            Ok(CycleOutcome::Attempted(_)) => (SchedulerState::CoolDown, self.settings.cooldown),
            Err(_) => (SchedulerState::BackOff, self.settings.error_backoff),
        }
    }

    /// Loop until `stop` turns true. The signal is only honoured between
    /// cycles; an in-flight submission always runs to its outcome.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) {
        info!(
            poll_secs = self.settings.poll_interval.as_secs(),
            cooldown_secs = self.settings.cooldown.as_secs(),
            backoff_secs = self.settings.error_backoff.as_secs(),
            "Starting oracle loop"
        );

        while !*stop.borrow() {
            let result = self.run_cycle().await;
            if let Err(e) = &result {
                self.stats.cycle_errors += 1;
                error!(error = %e, errors = self.stats.cycle_errors, "Cycle failed, backing off");
            }

            let (state, pause) = self.next_pause(&result);
            self.state = state;
            info!(state = ?state, pause_secs = pause.as_secs(), "Waiting for next cycle");

            tokio::select! {
                _ = sleep(pause) => {}
                _ = stop_requested(&mut stop) => {}
            }
        }

        self.state = SchedulerState::Stopped;
        info!(cycles = self.stats.cycles, resolved = self.stats.resolved, "Oracle loop stopped");
    }

    /// Exactly one cycle, no looping.
    pub async fn run_once(&mut self) -> Result<CycleOutcome> {
        let result = self.run_cycle().await;
        if let Err(e) = &result {
            self.stats.cycle_errors += 1;
            error!(error = %e, "Cycle failed");
        }
        self.state = SchedulerState::Stopped;
        result
    }
}

/// Turn a shutdown signal (Ctrl-C in the binary) into a stop flag for `run`.
/// Nothing here cancels a cycle; callers check the flag between cycles.
pub fn stop_channel<F>(signal: F) -> watch::Receiver<bool>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("Stop signal received, finishing current cycle");
                let _ = stop_tx.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for stop signal"),
        }
    });
    stop_rx
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        // sender dropped: nothing can stop the loop any more
        std::future::pending::<()>().await;
    }
}
