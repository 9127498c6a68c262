use log::debug;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::camera::CameraReport;
use crate::models::Digit;

/// Sum of two last-known digits, a missing digit counting as 0
pub fn sum_digits(first: Option<Digit>, second: Option<Digit>) -> u32 {
    first.map_or(0, |d| d.value() as u32) + second.map_or(0, |d| d.value() as u32)
}

/// Last-known digit of each camera and their sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigitSum {
    pub left: Option<Digit>,
    pub right: Option<Digit>,
}

impl DigitSum {
    pub fn total(&self) -> u32 {
        sum_digits(self.left, self.right)
    }
}

/// Publishes the running sum whenever either camera's digit changes.
/// Each side is read independently; no consistent snapshot across cameras.
pub struct Aggregator {
    sums: watch::Receiver<DigitSum>,
    task: JoinHandle<()>,
}

impl Aggregator {
    pub fn spawn(mut left: watch::Receiver<CameraReport>, mut right: watch::Receiver<CameraReport>) -> Self {
        let initial = DigitSum {
            left: left.borrow_and_update().digit(),
            right: right.borrow_and_update().digit(),
        };
        let (sender, sums) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut left_open = true;
            let mut right_open = true;
            while left_open || right_open {
                tokio::select! {
                    changed = left.changed(), if left_open => {
                        if changed.is_err() {
                            left_open = false;
                            continue;
                        }
                        let digit = left.borrow_and_update().digit();
                        sender.send_if_modified(|sum| replace(&mut sum.left, digit));
                    }
                    changed = right.changed(), if right_open => {
                        if changed.is_err() {
                            right_open = false;
                            continue;
                        }
                        let digit = right.borrow_and_update().digit();
                        sender.send_if_modified(|sum| replace(&mut sum.right, digit));
                    }
                }
            }
            debug!("Both cameras closed, aggregator finished");
        });

        Self { sums, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<DigitSum> {
        self.sums.clone()
    }

    pub fn current(&self) -> DigitSum {
        *self.sums.borrow()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn replace(slot: &mut Option<Digit>, digit: Option<Digit>) -> bool {
    if *slot == digit {
        false
    } else {
        *slot = digit;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationResult, FrameOutcome};
    use std::time::Duration;

    fn digit(value: u8) -> Digit {
        Digit::try_from(value).unwrap()
    }

    fn report(value: Option<u8>) -> CameraReport {
        CameraReport {
            session: None,
            frame: 1,
            outcome: FrameOutcome {
                quad: None,
                thumbnail: None,
                classification: value.map(|v| ClassificationResult {
                    digit: digit(v),
                    confidence: 0.9,
                }),
            },
        }
    }

    #[test]
    fn test_sum_over_all_combinations() {
        let values: Vec<Option<Digit>> = std::iter::once(None).chain((0..=9).map(|v| Some(digit(v)))).collect();
        for a in &values {
            for b in &values {
                let expected = a.map_or(0, |d| d.value() as u32) + b.map_or(0, |d| d.value() as u32);
                assert_eq!(sum_digits(*a, *b), expected);
            }
        }
        assert_eq!(sum_digits(Some(digit(9)), Some(digit(9))), 18);
    }

    #[test]
    fn test_missing_side_counts_as_zero() {
        let sum = DigitSum { left: Some(digit(3)), right: None };
        assert_eq!(sum.total(), 3);
    }

    #[tokio::test]
    async fn test_sum_follows_either_camera() -> anyhow::Result<()> {
        let (left_tx, left_rx) = watch::channel(CameraReport::default());
        let (right_tx, right_rx) = watch::channel(CameraReport::default());
        let aggregator = Aggregator::spawn(left_rx, right_rx);
        let mut sums = aggregator.subscribe();
        assert_eq!(aggregator.current().total(), 0);

        left_tx.send_replace(report(Some(3)));
        tokio::time::timeout(Duration::from_secs(5), sums.changed()).await??;
        assert_eq!(sums.borrow_and_update().total(), 3);

        right_tx.send_replace(report(Some(4)));
        tokio::time::timeout(Duration::from_secs(5), sums.changed()).await??;
        assert_eq!(sums.borrow_and_update().total(), 7);

        left_tx.send_replace(report(None));
        tokio::time::timeout(Duration::from_secs(5), sums.changed()).await??;
        assert_eq!(sums.borrow_and_update().total(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_digit_does_not_republish() -> anyhow::Result<()> {
        let (left_tx, left_rx) = watch::channel(report(Some(5)));
        let (_right_tx, right_rx) = watch::channel(CameraReport::default());
        let aggregator = Aggregator::spawn(left_rx, right_rx);
        let mut sums = aggregator.subscribe();
        sums.borrow_and_update();

        left_tx.send_replace(report(Some(5)));
        let waited = tokio::time::timeout(Duration::from_millis(100), sums.changed()).await;
        assert!(waited.is_err());
        assert_eq!(aggregator.current().total(), 5);
        Ok(())
    }
}
