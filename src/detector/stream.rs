//! Lazy adapters from reading sequences to deviation events

use futures::{Stream, StreamExt};

use super::{DetectorError, DeviationDetector};
use crate::types::{DeviationEvent, SensorReading};

/// Iterator returned by [`DeviationDetector::events`].
///
/// Pulls readings only as events are requested; readings that do not change
/// state are consumed silently, rejected readings surface as `Err`.
pub struct DeviationEvents<'a, I> {
    detector: &'a mut DeviationDetector,
    readings: I,
}

impl<'a, I> DeviationEvents<'a, I> {
    pub(super) fn new(detector: &'a mut DeviationDetector, readings: I) -> Self {
        Self { detector, readings }
    }
}

impl<I> Iterator for DeviationEvents<'_, I>
where
    I: Iterator<Item = SensorReading>,
{
    type Item = Result<DeviationEvent, DetectorError>;

    fn next(&mut self) -> Option<Self::Item> {
        for reading in self.readings.by_ref() {
            match self.detector.process(&reading) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// Async counterpart of [`DeviationDetector::events`]; the stream owns the detector.
pub fn event_stream<S>(
    mut detector: DeviationDetector,
    readings: S,
) -> impl Stream<Item = Result<DeviationEvent, DetectorError>>
where
    S: Stream<Item = SensorReading>,
{
    readings.filter_map(move |reading| {
        let outcome = detector.process(&reading).transpose();
        async move { outcome }
    })
}
