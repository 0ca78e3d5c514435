use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::environment::Action;
use crate::error::{DecisionTimeout, PolicyError};
use crate::eval::policy::{PolicyClient, PolicyRequest};

/// Helper threads per worker: the serving one plus one abandoned call.
const MAX_HELPERS: usize = 2;

#[derive(Debug)]
pub enum Decision {
    Action(Action),
    TimedOut(DecisionTimeout),
    Failed(PolicyError),
}

type Answer = (u64, Result<Action, PolicyError>);

/// Decrements the live helper count when a helper thread exits.
struct HelperGuard(Arc<AtomicUsize>);

impl Drop for HelperGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs policy calls on a helper thread so a worker can stop waiting.
///
/// Requests are numbered; answers to anything but the newest request are
/// dropped and stale queued requests never reach the policy. A call that
/// overruns the timeout is abandoned to a fresh helper unless an earlier
/// abandoned call is still running, in which case later requests queue
/// behind the current one and time out until it returns.
pub struct DecisionChannel {
    policy: Arc<dyn PolicyClient>,
    worker: usize,
    timeout: Duration,
    latest: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
    requests: Sender<(u64, PolicyRequest)>,
    responses: Receiver<Answer>,
}

fn connect(
    policy: Arc<dyn PolicyClient>,
    latest: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
) -> (Sender<(u64, PolicyRequest)>, Receiver<Answer>) {
    let (request_tx, request_rx) = mpsc::channel::<(u64, PolicyRequest)>();
    let (response_tx, response_rx) = mpsc::channel();

    live.fetch_add(1, Ordering::SeqCst);
    let guard = HelperGuard(live);

    thread::spawn(move || {
        let _guard = guard;
        for (ticket, request) in request_rx {
            if ticket < latest.load(Ordering::SeqCst) {
                continue;
            }
            if response_tx.send((ticket, policy.decide(&request))).is_err() {
                break;
            }
        }
    });

    (request_tx, response_rx)
}

impl DecisionChannel {
    pub fn new(policy: Arc<dyn PolicyClient>, worker: usize, timeout: Duration) -> Self {
        let latest = Arc::new(AtomicU64::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let (requests, responses) =
            connect(Arc::clone(&policy), Arc::clone(&latest), Arc::clone(&live));
        Self {
            policy,
            worker,
            timeout,
            latest,
            live,
            requests,
            responses,
        }
    }

    fn reconnect(&mut self) {
        let (requests, responses) = connect(
            Arc::clone(&self.policy),
            Arc::clone(&self.latest),
            Arc::clone(&self.live),
        );
        self.requests = requests;
        self.responses = responses;
    }

    pub fn decide(&mut self, request: PolicyRequest) -> Decision {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(mpsc::SendError((_, request))) = self.requests.send((ticket, request)) {
            self.reconnect();
            if self.requests.send((ticket, request)).is_err() {
                return Decision::Failed(PolicyError::Transport(
                    "decision thread unavailable".to_string(),
                ));
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok((answered, _)) if answered != ticket => continue,
                Ok((_, Ok(action))) => return Decision::Action(action),
                Ok((_, Err(error))) => return Decision::Failed(error),
                Err(RecvTimeoutError::Timeout) => {
                    if self.live.load(Ordering::SeqCst) < MAX_HELPERS {
                        self.reconnect();
                    }
                    return Decision::TimedOut(DecisionTimeout {
                        worker: self.worker,
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.reconnect();
                    return Decision::Failed(PolicyError::Transport(
                        "decision thread exited".to_string(),
                    ));
                }
            }
        }
    }
}
