// This file is part of the terraform-provider-otc project
//
// Copyright (C) ANEO, 2024-2024. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License")
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Polling of remote objects until they reach a target state

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{debug, trace};

use crate::utils::DisplayJoinable;

const INITIAL_WAIT: Duration = Duration::from_millis(100);
const MAX_WAIT: Duration = Duration::from_secs(10);
const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error(
        "timeout while waiting for state to become '{}' (last state: '{last_state}', timeout: {timeout:?})",
        .target.iter().join_with(", ")
    )]
    Timeout {
        last_state: String,
        target: Vec<String>,
        timeout: Duration,
    },
    #[error("unexpected state '{state}', wanted target '{}'", .target.iter().join_with(", "))]
    UnexpectedState { state: String, target: Vec<String> },
    #[error("couldn't find resource ({checks} retries)")]
    NotFound { checks: u32 },
    #[error(transparent)]
    Refresh(#[from] anyhow::Error),
}

/// Configuration of a wait for a remote state change
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// States that are expected while waiting
    pub pending: Vec<String>,
    /// States that end the wait
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Smallest time between two refreshes
    pub min_timeout: Duration,
    /// Consecutive "not found" tolerated when a target is expected
    pub not_found_checks: u32,
    /// Consecutive target observations required
    pub continuous_target_occurence: u32,
}

impl StateChangeConf {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::ZERO,
            min_timeout: Duration::ZERO,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurence: 1,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    fn next_wait(&self, wait: Duration) -> Duration {
        let wait = if wait.is_zero() { INITIAL_WAIT } else { wait * 2 };
        wait.max(self.min_timeout).min(MAX_WAIT)
    }

    /// Refresh until a target state is observed.
    ///
    /// `refresh` returns the object and its current state, or `None` when the
    /// object does not exist. With an empty `target`, the absence of the object
    /// is the awaited outcome and `Ok(None)` is returned.
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> Result<Option<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<(T, String)>>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut wait = Duration::ZERO;
        let mut last_state = String::new();
        let mut not_found = 0;
        let mut target_seen = 0;

        let timed_out = |last_state: String| WaitError::Timeout {
            last_state,
            target: self.target.clone(),
            timeout: self.timeout,
        };

        debug!(pending = ?self.pending, target = ?self.target, "waiting for state");
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        loop {
            if !wait.is_zero() {
                if Instant::now() + wait >= deadline {
                    sleep_until(deadline).await;
                    return Err(timed_out(last_state));
                }
                sleep(wait).await;
            }

            let observed = match timeout_at(deadline, refresh()).await {
                Ok(observed) => observed?,
                Err(_) => return Err(timed_out(last_state)),
            };

            match observed {
                None if self.target.is_empty() => {
                    target_seen += 1;
                    if target_seen >= self.continuous_target_occurence {
                        return Ok(None);
                    }
                }
                None => {
                    not_found += 1;
                    trace!(not_found, "object not found");
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound {
                            checks: self.not_found_checks,
                        });
                    }
                }
                Some((value, state)) => {
                    not_found = 0;
                    trace!(%state, "refreshed state");
                    if self.target.contains(&state) {
                        target_seen += 1;
                        if target_seen >= self.continuous_target_occurence {
                            return Ok(Some(value));
                        }
                    } else if self.pending.is_empty() || self.pending.contains(&state) {
                        target_seen = 0;
                    } else {
                        return Err(WaitError::UnexpectedState {
                            state,
                            target: self.target.clone(),
                        });
                    }
                    last_state = state;
                }
            }

            wait = self.next_wait(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    fn states(states: &[&'static str]) -> impl FnMut() -> std::future::Ready<anyhow::Result<Option<(usize, String)>>> {
        let mut iter = states.to_vec().into_iter().enumerate();
        move || {
            let next = iter.next();
            std::future::ready(Ok(next.map(|(i, state)| (i, state.to_owned()))))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_through_pending_states() {
        let conf = StateChangeConf::new(&["BUILD"], &["ACTIVE"], Duration::from_secs(60));
        let result = conf
            .wait_for_state(states(&["BUILD", "BUILD", "ACTIVE"]))
            .await
            .unwrap();
        assert_eq!(result, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_fails() {
        let conf = StateChangeConf::new(&["BUILD"], &["ACTIVE"], Duration::from_secs(60));
        let err = conf
            .wait_for_state(states(&["BUILD", "ERROR"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::UnexpectedState { ref state, .. } if state == "ERROR"));
        assert!(err.to_string().contains("'ACTIVE'"));
    }

    #[tokio::test(start_paused = true)]
    async fn any_state_is_pending_without_pending_list() {
        let conf = StateChangeConf::new(&[], &["available"], Duration::from_secs(60));
        let result = conf
            .wait_for_state(states(&["creating", "whatever", "available"]))
            .await
            .unwrap();
        assert_eq!(result, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn absence_is_success_without_target() {
        let conf = StateChangeConf::new(&["ACTIVE", "DELETING"], &[], Duration::from_secs(60));
        let result = conf
            .wait_for_state(states(&["ACTIVE", "DELETING"]))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn absence_is_tolerated_up_to_the_checks() {
        let mut conf = StateChangeConf::new(&["BUILD"], &["ACTIVE"], Duration::from_secs(3600));
        conf.not_found_checks = 3;
        let mut calls = 0;
        let err = conf
            .wait_for_state(|| {
                calls += 1;
                std::future::ready(Ok(None::<((), String)>))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::NotFound { checks: 3 }));
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_last_state() {
        let conf = StateChangeConf::new(&["BUILD"], &["ACTIVE"], Duration::from_secs(30));
        let start = Instant::now();
        let err = conf
            .wait_for_state(|| std::future::ready(Ok(Some(((), "BUILD".to_owned())))))
            .await
            .unwrap_err();
        match err {
            WaitError::Timeout { last_state, .. } => assert_eq!(last_state, "BUILD"),
            err => panic!("unexpected error: {err}"),
        }
        assert_eq!(Instant::now() - start, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_errors_abort() {
        let conf = StateChangeConf::new(&["BUILD"], &["ACTIVE"], Duration::from_secs(30));
        let err = conf
            .wait_for_state(|| std::future::ready(Err::<Option<((), String)>, _>(anyhow!("boom"))))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Refresh(_)));
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_target_occurences_are_consecutive() {
        let mut conf = StateChangeConf::new(&["BUILD"], &["ACTIVE"], Duration::from_secs(60));
        conf.continuous_target_occurence = 2;
        let result = conf
            .wait_for_state(states(&["ACTIVE", "BUILD", "ACTIVE", "ACTIVE"]))
            .await
            .unwrap();
        assert_eq!(result, Some(3));
    }

    #[test]
    fn back_off_is_bounded() {
        let conf = StateChangeConf::new(&[], &["x"], Duration::from_secs(60))
            .min_timeout(Duration::from_secs(3));
        let mut wait = Duration::ZERO;
        let mut waits = Vec::new();
        for _ in 0..5 {
            wait = conf.next_wait(wait);
            waits.push(wait.as_secs());
        }
        assert_eq!(waits, [3, 6, 10, 10, 10]);
    }
}
