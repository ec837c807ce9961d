//! Fan-Out Executor - runs one operation per peer and stops early once enough
//! of them have answered.
//!
//! Termination rules:
//! - once `ceil(N * min_success_fraction)` operations have succeeded, a settle
//!   timer starts; every tick without a new success ends the run
//! - after a success, `successes + finished >= N` also ends the run
//! - every operation shares one deadline, `per_op_timeout` from the start
//!
//! Ending the run cancels the operations still in flight. Unless
//! `allow_late_stragglers` is set, `execute` then waits for each of them to
//! report before returning.

use crate::config::FanOutConfig;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FanOut {
    pub min_success_fraction: f64,
    pub per_op_timeout: Duration,
    pub settle_interval: Duration,
    pub allow_late_stragglers: bool,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::from_config(&FanOutConfig::default())
    }
}

impl FanOut {
    pub fn from_config(config: &FanOutConfig) -> Self {
        Self {
            min_success_fraction: config.min_success_fraction,
            per_op_timeout: config.per_op_timeout(),
            settle_interval: config.settle_interval(),
            allow_late_stragglers: false,
        }
    }

    pub fn with_late_stragglers(mut self, allow: bool) -> Self {
        self.allow_late_stragglers = allow;
        self
    }

    /// Number of successes that arms the settle timer.
    pub fn success_target(&self, num_peers: usize) -> usize {
        let target = (num_peers as f64 * self.min_success_fraction).ceil() as usize;
        target.clamp(1, num_peers.max(1))
    }

    /// Run `op` once per peer and return how many calls succeeded.
    pub async fn execute<P, F, Fut>(&self, peers: Vec<P>, op: F) -> usize
    where
        P: Send + 'static,
        F: Fn(P) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let num_peers = peers.len();
        if num_peers == 0 {
            return 0;
        }

        let target = self.success_target(num_peers);
        let deadline = Instant::now() + self.per_op_timeout;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, mut done_rx) = mpsc::channel::<bool>(num_peers);

        for peer in peers {
            let fut = op(peer);
            let mut cancel_rx = cancel_rx.clone();
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let success = tokio::select! {
                    biased;
                    res = tokio::time::timeout_at(deadline, fut) => matches!(res, Ok(Ok(()))),
                    _ = cancelled(&mut cancel_rx) => false,
                };
                // The receiver is gone if the caller already returned.
                let _ = done_tx.send(success).await;
            });
        }
        drop(done_tx);
        drop(cancel_rx);

        let mut num_success = 0;
        let mut num_done = 0;
        let mut success_at_last_tick = 0;
        let mut settle: Option<Interval> = None;

        loop {
            tokio::select! {
                msg = done_rx.recv() => {
                    let Some(success) = msg else { break };
                    num_done += 1;

                    if success {
                        num_success += 1;

                        if settle.is_none() && num_success >= target {
                            let mut interval = tokio::time::interval_at(
                                Instant::now() + self.settle_interval,
                                self.settle_interval,
                            );
                            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            settle = Some(interval);
                            success_at_last_tick = num_success;
                        }

                        // Same as 2 * successes + failures >= N.
                        if num_success + num_done >= num_peers {
                            cancel_tx.send_replace(true);
                            if self.allow_late_stragglers {
                                return num_success;
                            }
                        }
                    }

                    if num_done == num_peers {
                        break;
                    }
                }
                _ = next_tick(&mut settle) => {
                    if num_success > success_at_last_tick {
                        success_at_last_tick = num_success;
                    } else {
                        debug!(num_success, num_done, num_peers, "fan-out settled");
                        cancel_tx.send_replace(true);
                        if self.allow_late_stragglers {
                            return num_success;
                        }
                    }
                }
            }
        }

        num_success
    }
}

/// Resolves once cancellation is signalled or the sender is dropped.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

async fn next_tick(settle: &mut Option<Interval>) {
    match settle {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fan_out(fraction: f64, per_op_timeout: Duration, settle: Duration) -> FanOut {
        FanOut {
            min_success_fraction: fraction,
            per_op_timeout,
            settle_interval: settle,
            allow_late_stragglers: false,
        }
    }

    /// What the fake RPC to a peer does.
    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        SucceedAfter(Duration),
        Hang,
    }

    async fn run(f: Behaviour) -> anyhow::Result<()> {
        match f {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(anyhow!("rpc failed")),
            Behaviour::SucceedAfter(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Behaviour::Hang => std::future::pending().await,
        }
    }

    #[test]
    fn test_success_target_rounds_up() {
        let f = fan_out(0.3, Duration::from_secs(3), Duration::from_millis(500));
        assert_eq!(f.success_target(10), 3);
        assert_eq!(f.success_target(20), 6);
        assert_eq!(f.success_target(7), 3);
        assert_eq!(f.success_target(1), 1);

        let all = fan_out(1.0, Duration::from_secs(3), Duration::from_millis(500));
        assert_eq!(all.success_target(5), 5);
    }

    #[tokio::test]
    async fn test_empty_peer_set_returns_zero() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let n = FanOut::default()
            .execute(Vec::<usize>::new(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(n, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let f = fan_out(0.3, Duration::from_secs(3), Duration::from_millis(500));
        let peers = vec![Behaviour::Succeed; 10];

        let n = f.execute(peers, run).await;

        assert_eq!(n, 10);
    }

    #[tokio::test]
    async fn test_all_fail_returns_without_settle_wait() {
        let f = fan_out(0.3, Duration::from_secs(5), Duration::from_secs(5));
        let peers = vec![Behaviour::Fail; 8];

        let start = Instant::now();
        let n = f.execute(peers, run).await;

        assert_eq!(n, 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_settles_when_no_new_successes() {
        let f = fan_out(0.3, Duration::from_secs(5), Duration::from_millis(50));
        let mut peers = vec![Behaviour::Succeed; 3];
        peers.extend(vec![Behaviour::Hang; 7]);

        let start = Instant::now();
        let n = f.execute(peers, run).await;

        assert_eq!(n, 3);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_late_success_extends_settle() {
        let f = fan_out(0.3, Duration::from_secs(5), Duration::from_millis(100));
        let mut peers = vec![Behaviour::Succeed; 3];
        peers.push(Behaviour::SucceedAfter(Duration::from_millis(40)));
        peers.extend(vec![Behaviour::Hang; 6]);

        let n = f.execute(peers, run).await;

        assert_eq!(n, 4);
    }

    #[tokio::test]
    async fn test_stragglers_are_left_running() {
        let f = fan_out(0.3, Duration::from_secs(5), Duration::from_millis(50))
            .with_late_stragglers(true);
        let mut peers = vec![Behaviour::Succeed; 3];
        peers.extend(vec![Behaviour::Hang; 7]);

        let start = Instant::now();
        let n = f.execute(peers, run).await;

        assert_eq!(n, 3);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_count() {
        let f = fan_out(0.3, Duration::from_millis(100), Duration::from_secs(5));
        let mut peers = vec![Behaviour::Succeed; 2];
        peers.extend(vec![Behaviour::Hang; 8]);

        let start = Instant::now();
        let n = f.execute(peers, run).await;

        assert_eq!(n, 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_half_success_heuristic_exits_early() {
        // Target is all four peers, so only the heuristic can end this run.
        let f = fan_out(1.0, Duration::from_secs(10), Duration::from_secs(10))
            .with_late_stragglers(true);
        let peers = vec![
            Behaviour::Succeed,
            Behaviour::Succeed,
            Behaviour::Hang,
            Behaviour::Hang,
        ];

        let start = Instant::now();
        let n = f.execute(peers, run).await;

        assert_eq!(n, 2);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancelled_workers_report_before_return() {
        let finished = Arc::new(AtomicUsize::new(0));
        let f = fan_out(0.3, Duration::from_secs(5), Duration::from_millis(50));
        let mut peers = vec![Behaviour::Succeed; 3];
        peers.extend(vec![Behaviour::Hang; 7]);

        let counter = finished.clone();
        let n = f
            .execute(peers, move |b| {
                let counter = counter.clone();
                async move {
                    let _guard = DropCounter(counter);
                    run(b).await
                }
            })
            .await;

        assert_eq!(n, 3);
        assert_eq!(finished.load(Ordering::SeqCst), 10);
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}
