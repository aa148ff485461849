#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the caller must do after [`OperationSet::complete`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Schedule {
    /// The set drained; run [`OperationSet::finalize`] once the coalescing window elapses.
    Arm,
    Skip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Finalize {
    /// The consolidated refresh must run now.
    Fired,
    /// Operations were registered during the window; the next drain re-arms.
    Deferred,
    /// Nothing was scheduled.
    Idle,
}

/// Named in-flight operations of one triggering event. Fires once per drain to empty.
///
/// A name registered twice stays pending until it has been completed twice.
#[derive(Clone, Debug, Default)]
pub struct OperationSet {
    pending: BTreeMap<String, usize>,
    refresh_scheduled: bool,
}

impl OperationSet {
    /// Returns false if `name` was already pending.
    pub fn register(&mut self, name: impl Into<String>) -> bool {
        let count = self.pending.entry(name.into()).or_default();
        *count += 1;
        *count == 1
    }

    pub fn complete(&mut self, name: &str) -> Schedule {
        let Some(count) = self.pending.get_mut(name) else {
            return Schedule::Skip;
        };
        *count -= 1;
        if *count > 0 {
            return Schedule::Skip;
        }
        self.pending.remove(name);
        if self.pending.is_empty() && !self.refresh_scheduled {
            self.refresh_scheduled = true;
            return Schedule::Arm;
        }
        Schedule::Skip
    }

    pub fn finalize(&mut self) -> Finalize {
        if !self.refresh_scheduled {
            return Finalize::Idle;
        }
        self.refresh_scheduled = false;
        if self.pending.is_empty() {
            Finalize::Fired
        } else {
            Finalize::Deferred
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.refresh_scheduled
    }
}

#[derive(Debug)]
enum Message {
    Register(String),
    Complete(String),
}

/// Handle to an [`OperationSet`] driven on its own task. Every method is a non-blocking send.
#[derive(Clone, Debug)]
pub struct Debouncer {
    tx: mpsc::UnboundedSender<Message>,
}

impl Debouncer {
    /// Spawns the driver on the current tokio runtime. `refresh` runs on the driver task once
    /// per drain. The driver stops when every handle is gone, after a pending refresh has run.
    pub fn spawn<F>(window: Duration, refresh: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(window, rx, refresh));
        Self { tx }
    }

    pub fn register(&self, name: impl Into<String>) {
        self.send(Message::Register(name.into()));
    }

    pub fn complete(&self, name: impl Into<String>) {
        self.send(Message::Complete(name.into()));
    }

    /// Registers `name` now and completes it when the guard is dropped.
    pub fn track(&self, name: impl Into<String>) -> OperationGuard {
        let name = name.into();
        self.register(name.clone());
        OperationGuard {
            debouncer: self.clone(),
            name,
        }
    }

    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            tracing::trace!("debouncer driver gone");
        }
    }
}

#[derive(Debug)]
pub struct OperationGuard {
    debouncer: Debouncer,
    name: String,
}

impl OperationGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.debouncer.complete(std::mem::take(&mut self.name));
    }
}

async fn drive<F>(window: Duration, mut rx: mpsc::UnboundedReceiver<Message>, mut refresh: F)
where
    F: FnMut(),
{
    let mut set = OperationSet::default();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(Message::Register(name)) => {
                    tracing::trace!(name = name.as_str(), "operation registered");
                    set.register(name);
                }
                Some(Message::Complete(name)) => {
                    if set.complete(&name) == Schedule::Arm {
                        deadline = Some(window_end(window));
                    }
                }
                None => break,
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                finalize(&mut set, &mut refresh);
            }
        }
    }

    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
        finalize(&mut set, &mut refresh);
    }
}

/// Windows too large for the clock never elapse.
fn window_end(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

fn finalize<F: FnMut()>(set: &mut OperationSet, refresh: &mut F) {
    match set.finalize() {
        Finalize::Fired => {
            tracing::debug!("consolidated refresh fired");
            refresh();
        }
        Finalize::Deferred => {
            tracing::debug!(
                pending = set.pending().count(),
                "consolidated refresh deferred"
            );
        }
        Finalize::Idle => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(set: &mut OperationSet, names: &[&str]) -> Vec<Schedule> {
        names.iter().map(|name| set.complete(name)).collect()
    }

    #[test]
    fn arms_once_when_the_set_drains() {
        let mut set = OperationSet::default();
        for name in ["a", "b", "c"] {
            assert!(set.register(name));
        }
        assert_eq!(
            drain(&mut set, &["b", "c", "a"]),
            vec![Schedule::Skip, Schedule::Skip, Schedule::Arm]
        );
        assert_eq!(set.finalize(), Finalize::Fired);
        assert!(set.is_idle());
        assert_eq!(set.finalize(), Finalize::Idle);
    }

    #[test]
    fn registration_during_the_window_defers_the_refresh() {
        let mut set = OperationSet::default();
        set.register("a");
        assert_eq!(set.complete("a"), Schedule::Arm);

        set.register("d");
        assert_eq!(set.finalize(), Finalize::Deferred);
        assert_eq!(set.pending().collect::<Vec<_>>(), vec!["d"]);

        assert_eq!(set.complete("d"), Schedule::Arm);
        assert_eq!(set.finalize(), Finalize::Fired);
    }

    #[test]
    fn drain_within_the_window_does_not_arm_twice() {
        let mut set = OperationSet::default();
        set.register("a");
        assert_eq!(set.complete("a"), Schedule::Arm);
        set.register("b");
        assert_eq!(set.complete("b"), Schedule::Skip);
        assert_eq!(set.finalize(), Finalize::Fired);
    }

    #[test]
    fn unknown_and_repeated_completions_are_ignored() {
        let mut set = OperationSet::default();
        assert_eq!(set.complete("ghost"), Schedule::Skip);
        assert!(set.is_idle());

        set.register("a");
        assert_eq!(set.complete("a"), Schedule::Arm);
        assert_eq!(set.complete("a"), Schedule::Skip);
        assert_eq!(set.finalize(), Finalize::Fired);
    }

    #[test]
    fn a_name_registered_twice_needs_two_completions() {
        let mut set = OperationSet::default();
        assert!(set.register("thumbnails"));
        assert!(!set.register("thumbnails"));
        assert_eq!(set.complete("thumbnails"), Schedule::Skip);
        assert_eq!(set.pending().collect::<Vec<_>>(), vec!["thumbnails"]);
        assert_eq!(set.finalize(), Finalize::Idle);

        assert_eq!(set.complete("thumbnails"), Schedule::Arm);
        assert_eq!(set.finalize(), Finalize::Fired);
        assert!(set.is_idle());
    }
}
