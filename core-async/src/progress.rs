//! Progress reporting for long running operations.
//!
//! A progress channel carries a single integer value inside a fixed
//! `[min, max]` range. [`map_progress`] forwards one operation's progress to
//! another operation whose progress uses a different range, which is how a
//! long single download reports into a caller's percentage.

use crate::sync::watch;

/// Writing half of a progress channel.
#[derive(Debug)]
pub struct ProgressSender {
    tx: watch::Sender<u64>,
    min: u64,
    max: u64,
}

/// Reading half of a progress channel.
#[derive(Debug, Clone)]
pub struct ProgressReceiver {
    rx: watch::Receiver<u64>,
    min: u64,
    max: u64,
}

/// Creates a progress channel over `[min, max]`, starting at `min`.
///
/// A reversed range is normalised.
pub fn progress_channel(min: u64, max: u64) -> (ProgressSender, ProgressReceiver) {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };
    let (tx, rx) = watch::channel(min);
    (
        ProgressSender { tx, min, max },
        ProgressReceiver { rx, min, max },
    )
}

impl ProgressSender {
    /// Publishes a new value, clamped to this channel's range.
    pub fn set(&self, value: u64) {
        self.tx.send_replace(value.clamp(self.min, self.max));
    }

    pub fn range(&self) -> (u64, u64) {
        (self.min, self.max)
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        ProgressReceiver {
            rx: self.tx.subscribe(),
            min: self.min,
            max: self.max,
        }
    }
}

impl ProgressReceiver {
    /// Latest published value.
    pub fn value(&self) -> u64 {
        *self.rx.borrow()
    }

    pub fn range(&self) -> (u64, u64) {
        (self.min, self.max)
    }

    /// Waits for the next value. Returns `false` once the sender is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    fn take_value(&mut self) -> u64 {
        *self.rx.borrow_and_update()
    }
}

/// Rescales `value` from the `from` range into the `to` range.
///
/// Values outside `from` are clamped first. A degenerate `from` range maps
/// to the end of `to` once reached, and to its start otherwise.
pub fn rescale(value: u64, from: (u64, u64), to: (u64, u64)) -> u64 {
    let (from_min, from_max) = from;
    let (to_min, to_max) = to;

    if from_max <= from_min {
        return if value >= from_max { to_max } else { to_min };
    }

    let clamped = value.clamp(from_min, from_max);
    let offset = u128::from(clamped - from_min) * u128::from(to_max - to_min)
        / u128::from(from_max - from_min);

    (to_min + offset as u64).clamp(to_min, to_max)
}

/// Forwards progress from `source` into `target`, rescaling between ranges.
///
/// Resolves when the source sender is dropped, after the final value has been
/// forwarded.
pub async fn map_progress(mut source: ProgressReceiver, target: ProgressSender) {
    let from = source.range();
    let to = target.range();

    let current = source.take_value();
    target.set(rescale(current, from, to));

    while source.changed().await {
        let value = source.take_value();
        target.set(rescale(value, from, to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(5, (0, 10), (0, 100)), 50);
        assert_eq!(rescale(0, (0, 10), (20, 40)), 20);
        assert_eq!(rescale(10, (0, 10), (20, 40)), 40);
        assert_eq!(rescale(150, (100, 200), (0, 100)), 50);
    }

    #[test]
    fn test_rescale_clamps_out_of_range_values() {
        assert_eq!(rescale(42, (0, 10), (0, 100)), 100);
        assert_eq!(rescale(1, (5, 10), (0, 100)), 0);
    }

    #[test]
    fn test_rescale_degenerate_source_range() {
        assert_eq!(rescale(3, (3, 3), (0, 100)), 100);
        assert_eq!(rescale(2, (3, 3), (0, 100)), 0);
    }

    #[test]
    fn test_sender_clamps_values() {
        let (tx, rx) = progress_channel(10, 0);
        assert_eq!(tx.range(), (0, 10));
        tx.set(25);
        assert_eq!(rx.value(), 10);
    }

    #[crate::test]
    async fn test_map_progress_rescales_until_source_closes() {
        let (source_tx, source_rx) = progress_channel(0, 10);
        let (target_tx, mut target_rx) = progress_channel(0, 100);

        let mapping = crate::task::spawn(map_progress(source_rx, target_tx));

        source_tx.set(5);
        while target_rx.value() != 50 {
            assert!(target_rx.changed().await);
        }

        source_tx.set(10);
        drop(source_tx);
        mapping.await.unwrap();

        assert_eq!(target_rx.value(), 100);
    }
}
