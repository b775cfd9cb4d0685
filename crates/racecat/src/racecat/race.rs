use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use tokio::{net::TcpStream, sync::mpsc};

use crate::racecat::{
    connection::Connection,
    dial::{Dialer, Target},
    error::{DialError, RaceError},
    shutdown::ShutdownRx,
};

/// One-shot winner flag shared by every attempt of a race.
#[derive(Debug, Default)]
pub struct ExclusivityGuard {
    claimed: AtomicBool,
}

impl ExclusivityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeeds for exactly one caller over the guard's lifetime.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub enum ConnectOutcome {
    Winner(Connection),
    /// Connected after the race was already won; the stream was closed on the spot.
    Straggler,
    Failed(DialError),
}

#[derive(Debug)]
struct Report {
    target: Target,
    outcome: ConnectOutcome,
}

// Hands the winner's stream to the caller's relay starter. Only reachable after a
// successful `try_claim`, so the lock is never contended.
struct Starter<F>(Mutex<Option<F>>);

impl<F> Starter<F> {
    fn take(&self) -> Option<F> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Dial every target concurrently and keep the first connection that succeeds.
///
/// The winning attempt passes its stream to `on_win` right away, so the relay is
/// already running while slower attempts are still in flight. Later successes are
/// closed immediately. Returns once every attempt has reported.
pub async fn race<F>(
    targets: &[Target],
    dialer: &Dialer,
    shutdown: ShutdownRx,
    on_win: F,
) -> Result<Connection, RaceError>
where
    F: FnOnce(&Target, TcpStream) -> Connection + Send + 'static,
{
    if targets.is_empty() {
        return Err(RaceError::AllUnreachable);
    }

    let launched = targets.len();
    let guard = Arc::new(ExclusivityGuard::new());
    let starter = Arc::new(Starter(Mutex::new(Some(on_win))));
    let (tx, mut rx) = mpsc::channel::<Report>(launched);

    for target in targets {
        let target = target.clone();
        let dialer = dialer.clone();
        let shutdown = shutdown.clone();
        let guard = guard.clone();
        let starter = starter.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let outcome = attempt(&target, &dialer, shutdown, &guard, &starter).await;
            // Capacity equals the number of attempts, so this never waits.
            let _ = tx.send(Report { target, outcome }).await;
        });
    }
    drop(tx);

    let mut winner: Option<Connection> = None;
    let mut reported = 0usize;
    while reported < launched {
        let Some(report) = rx.recv().await else {
            break;
        };
        reported += 1;

        match report.outcome {
            ConnectOutcome::Winner(conn) => winner = Some(conn),
            ConnectOutcome::Straggler => {
                tracing::debug!(target_addr = %report.target, "race: straggler discarded");
            }
            ConnectOutcome::Failed(err) => {
                tracing::debug!(target_addr = %report.target, err = %err, "race: dial failed");
            }
        }
    }

    if reported < launched {
        if let Some(conn) = winner {
            conn.close();
        }
        return Err(RaceError::Internal { launched, reported });
    }

    winner.ok_or(RaceError::AllUnreachable)
}

async fn attempt<F>(
    target: &Target,
    dialer: &Dialer,
    shutdown: ShutdownRx,
    guard: &ExclusivityGuard,
    starter: &Starter<F>,
) -> ConnectOutcome
where
    F: FnOnce(&Target, TcpStream) -> Connection,
{
    let stream = match dialer.dial(target, shutdown).await {
        Ok(s) => s,
        Err(err) => return ConnectOutcome::Failed(err),
    };

    if !guard.try_claim() {
        drop(stream);
        return ConnectOutcome::Straggler;
    }

    match starter.take() {
        Some(start) => ConnectOutcome::Winner(start(target, stream)),
        None => {
            tracing::error!(target_addr = %target, "race: winner found no relay starter");
            ConnectOutcome::Straggler
        }
    }
}
