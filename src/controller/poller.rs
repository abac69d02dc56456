use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Intervals;
use crate::domain::{AggregateMeasurement, DataPublisher, Measurement, PeripheralData, Sensor};

#[derive(Debug, Clone)]
struct Accumulator {
    unit: String,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

/// Folds measurements per quantity over one aggregation window
#[derive(Debug)]
pub struct Aggregator {
    peripheral: String,
    window_start: DateTime<Utc>,
    quantities: BTreeMap<String, Accumulator>,
}

impl Aggregator {
    pub fn new(peripheral: impl Into<String>) -> Self {
        Self {
            peripheral: peripheral.into(),
            window_start: Utc::now(),
            quantities: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, measurement: &Measurement) {
        let acc = self
            .quantities
            .entry(measurement.quantity.clone())
            .or_insert_with(|| Accumulator {
                unit: measurement.unit.clone(),
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            });
        acc.count += 1;
        acc.sum += measurement.value;
        acc.min = acc.min.min(measurement.value);
        acc.max = acc.max.max(measurement.value);
    }

    /// Close the current window. Quantities with no readings are omitted.
    pub fn flush(&mut self) -> Vec<AggregateMeasurement> {
        let end = Utc::now();
        let start = std::mem::replace(&mut self.window_start, end);
        std::mem::take(&mut self.quantities)
            .into_iter()
            .map(|(quantity, acc)| AggregateMeasurement {
                id: Uuid::new_v4(),
                peripheral: self.peripheral.clone(),
                quantity,
                unit: acc.unit,
                count: acc.count,
                mean: acc.sum / acc.count as f64,
                min: acc.min,
                max: acc.max,
                start_datetime: start,
                end_datetime: end,
            })
            .collect()
    }
}

/// Periodically reads one sensor, publishing every reading and an aggregate
/// per quantity at the end of each aggregation window.
pub struct SensorPoller {
    sensor: Arc<dyn Sensor>,
    intervals: Intervals,
    publisher: DataPublisher,
}

impl SensorPoller {
    pub fn new(sensor: Arc<dyn Sensor>, intervals: Intervals, publisher: DataPublisher) -> Self {
        Self {
            sensor,
            intervals,
            publisher,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let name = self.sensor.name().to_string();
        let mut aggregator = Aggregator::new(&name);

        let now = Instant::now();
        let mut measure_tick = interval_at(now, self.intervals.measurement());
        measure_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut aggregate_tick =
            interval_at(now + self.intervals.aggregate(), self.intervals.aggregate());
        aggregate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sensor = %name,
            measurement_interval_s = self.intervals.measurement_interval,
            aggregate_interval_s = self.intervals.aggregate_interval,
            "sensor polling started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = measure_tick.tick() => {
                    match self.sensor.measure().await {
                        Ok(measurements) => {
                            for measurement in measurements {
                                aggregator.add(&measurement);
                                self.publisher.publish(PeripheralData::Measurement(measurement));
                            }
                        }
                        Err(e) => warn!(sensor = %name, error = %e, "measurement failed"),
                    }
                }
                _ = aggregate_tick.tick() => {
                    for aggregate in aggregator.flush() {
                        debug!(
                            sensor = %name,
                            quantity = %aggregate.quantity,
                            count = aggregate.count,
                            mean = aggregate.mean,
                            "aggregate"
                        );
                        self.publisher.publish(PeripheralData::Aggregate(aggregate));
                    }
                }
            }
        }
        info!(sensor = %name, "sensor polling stopped");
    }
}
