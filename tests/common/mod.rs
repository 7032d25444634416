//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use camnode::pipeline::{NodeBridge, NodeMessage};
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Receive messages until one matches `pred`. Non-matching messages are
/// discarded.
pub fn wait_for_message(
    bridge: &NodeBridge,
    timeout: Duration,
    pred: impl Fn(&NodeMessage) -> bool,
) -> Option<NodeMessage> {
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match bridge.recv_timeout(left.min(Duration::from_millis(50))) {
            Some(msg) if pred(&msg) => return Some(msg),
            _ => {}
        }
    }
    None
}
