// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Completion detection
//!
//! A run folder is ready for finalization when the instrument has marked it
//! as done and no update has been replicated for longer than the at-rest
//! delay. The marker is authoritative: without it the folder is never ready,
//! however old its last update is.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Decides whether the instrument has finished writing a run folder
pub trait CompletionCheck: Send + Sync {
    fn is_folder_done(&self, path: &Path) -> bool;
}

impl<F> CompletionCheck for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_folder_done(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Done when any of the marker files exists directly in the run folder
#[derive(Clone, Debug)]
pub struct MarkerFiles {
    names: Vec<String>,
}

impl MarkerFiles {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl CompletionCheck for MarkerFiles {
    fn is_folder_done(&self, path: &Path) -> bool {
        self.names.iter().any(|name| path.join(name).is_file())
    }
}

/// Outcome of completion detection for one run folder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// No completion marker yet
    NotMarkedDone,
    /// Marked done, but updated too recently
    Settling { age: Duration, delay: Duration },
    /// Marked done and at rest; go ahead and reconcile
    AtRest { age: Duration },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::AtRest { .. })
    }
}

/// Time since the newest of `last_updates`, zero when there are none
pub fn last_update_age(last_updates: &[DateTime<Utc>], now: DateTime<Utc>) -> Duration {
    last_updates
        .iter()
        .max()
        .and_then(|latest| (now - *latest).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

/// Decide whether the run folder at `path` may be finalized
pub fn evaluate(
    path: &Path,
    check: &dyn CompletionCheck,
    last_updates: &[DateTime<Utc>],
    delay: Duration,
    now: DateTime<Utc>,
) -> Readiness {
    if !check.is_folder_done(path) {
        return Readiness::NotMarkedDone;
    }
    let age = last_update_age(last_updates, now);
    if age > delay {
        Readiness::AtRest { age }
    } else {
        Readiness::Settling { age, delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const DELAY: Duration = Duration::from_secs(15 * 60);

    fn done(_: &Path) -> bool {
        true
    }

    fn not_done(_: &Path) -> bool {
        false
    }

    #[test]
    fn settling_folder_is_deferred() {
        let now = Utc::now();
        let updates = [now - TimeDelta::minutes(10)];
        let readiness = evaluate(Path::new("/data/RunsA/Run123"), &done, &updates, DELAY, now);
        assert!(matches!(readiness, Readiness::Settling { .. }));
        assert!(!readiness.is_ready());
    }

    #[test]
    fn folder_at_rest_proceeds() {
        let now = Utc::now();
        let updates = [now - TimeDelta::minutes(20)];
        let readiness = evaluate(Path::new("/data/RunsA/Run123"), &done, &updates, DELAY, now);
        assert_eq!(
            readiness,
            Readiness::AtRest {
                age: Duration::from_secs(20 * 60)
            }
        );
    }

    #[test]
    fn missing_marker_wins_over_age() {
        let now = Utc::now();
        let updates = [now - TimeDelta::days(30)];
        let readiness = evaluate(Path::new("/x"), &not_done, &updates, DELAY, now);
        assert_eq!(readiness, Readiness::NotMarkedDone);
    }

    #[test]
    fn empty_history_never_finalizes() {
        let now = Utc::now();
        let readiness = evaluate(Path::new("/x"), &done, &[], Duration::ZERO, now);
        assert_eq!(
            readiness,
            Readiness::Settling {
                age: Duration::ZERO,
                delay: Duration::ZERO
            }
        );
    }

    #[test]
    fn newest_update_decides_age() {
        let now = Utc::now();
        let updates = [
            now - TimeDelta::hours(3),
            now - TimeDelta::minutes(1),
            now - TimeDelta::hours(1),
        ];
        assert_eq!(last_update_age(&updates, now), Duration::from_secs(60));
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let now = Utc::now();
        let updates = [now + TimeDelta::minutes(5)];
        assert_eq!(last_update_age(&updates, now), Duration::ZERO);
    }

    #[test]
    fn marker_files_match_any_name() {
        let dir = tempfile::tempdir().unwrap();
        let check = MarkerFiles::new(["RTAComplete.txt", "CopyComplete.txt"]);
        assert!(!check.is_folder_done(dir.path()));

        std::fs::write(dir.path().join("CopyComplete.txt"), b"").unwrap();
        assert!(check.is_folder_done(dir.path()));
    }

    #[test]
    fn closures_are_completion_checks() {
        let check = |path: &Path| path.ends_with("Run123");
        assert!(check.is_folder_done(Path::new("/data/RunsA/Run123")));
        assert!(!check.is_folder_done(Path::new("/data/RunsA/Run124")));
    }
}
