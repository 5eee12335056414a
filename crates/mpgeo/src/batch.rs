//! Concurrent batch geocoding.
//!
//! A batch geocodes N points on a pool of worker tasks fed from a shared job
//! queue. Every job carries its original index and results are written back
//! into a pre-sized slot vector, so `result[i]` always belongs to
//! `points[i]` no matter which request finishes first.
//!
//! Concurrency and rate are independent knobs: `concurrency` bounds how many
//! requests are in flight, while the geocoder's shared [`RateLimiter`] caps
//! the aggregate request rate across all workers.
//!
//! [`RateLimiter`]: crate::transport::RateLimiter

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::client::Geocoder;
use crate::error::{Error, Result};
use crate::types::{GeoCoordinate, Point3D};

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Progress of a running batch, sent after each point completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    /// Points completed so far (successfully or not).
    pub completed: usize,
    /// Points in the batch.
    pub total: usize,
    /// Wall-clock time since the batch started.
    pub elapsed: Duration,
}

impl BatchProgress {
    /// Completed points per second since the batch started.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let completed = self.completed as f64;
            completed / secs
        } else {
            0.0
        }
    }
}

/// Cooperative cancellation for a running batch.
///
/// Once cancelled, workers stop taking new points; requests already in
/// flight are allowed to finish and the batch returns [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a flag that is not yet cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the batch to stop taking new points.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of concurrent workers (at least one is always used).
    pub concurrency: usize,
    /// Rate limit applied to the geocoder's limiter for the duration of the batch.
    pub max_rps: Option<f64>,
    /// Channel that receives a [`BatchProgress`] after every completed point.
    pub progress: Option<async_channel::Sender<BatchProgress>>,
    /// Flag to stop the batch early.
    pub cancel: Option<CancelFlag>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl BatchOptions {
    /// Options with the given worker count and nothing else set.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            max_rps: None,
            progress: None,
            cancel: None,
        }
    }

    /// Override the geocoder's rate limit for the duration of the batch.
    #[must_use]
    pub fn with_max_rps(mut self, max_rps: f64) -> Self {
        self.max_rps = Some(max_rps);
        self
    }

    /// Send a progress event after each completed point.
    #[must_use]
    pub fn with_progress(mut self, progress: async_channel::Sender<BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Stop the batch when the flag is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Geocode every point, failing the whole batch on the first error.
///
/// The result has the same length and order as `points`. Once any point
/// fails (after its own retries), no new points are started and that error
/// is returned.
pub async fn batch_geocode<G>(
    geocoder: Arc<G>,
    points: &[Point3D],
    options: &BatchOptions,
) -> Result<Vec<GeoCoordinate>>
where
    G: Geocoder + 'static,
{
    run(geocoder, points, options, true)
        .await?
        .into_iter()
        .collect()
}

/// Geocode every point, keeping each point's outcome.
///
/// The result has the same length and order as `points`; a failed point
/// does not stop the others. The outer error is only returned when the batch
/// is cancelled.
pub async fn batch_geocode_settled<G>(
    geocoder: Arc<G>,
    points: &[Point3D],
    options: &BatchOptions,
) -> Result<Vec<Result<GeoCoordinate>>>
where
    G: Geocoder + 'static,
{
    run(geocoder, points, options, false).await
}

async fn run<G>(
    geocoder: Arc<G>,
    points: &[Point3D],
    options: &BatchOptions,
    fail_fast: bool,
) -> Result<Vec<Result<GeoCoordinate>>>
where
    G: Geocoder + 'static,
{
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let previous_rps = match (options.max_rps, geocoder.limiter()) {
        (Some(max_rps), Some(limiter)) => Some(limiter.set_max_rps(max_rps).await),
        _ => None,
    };

    let outcome = dispatch(&geocoder, points, options, fail_fast).await;

    if let (Some(previous), Some(limiter)) = (previous_rps, geocoder.limiter()) {
        limiter.set_max_rps(previous).await;
    }

    outcome
}

async fn dispatch<G>(
    geocoder: &Arc<G>,
    points: &[Point3D],
    options: &BatchOptions,
    fail_fast: bool,
) -> Result<Vec<Result<GeoCoordinate>>>
where
    G: Geocoder + 'static,
{
    let total = points.len();
    let workers = options.concurrency.clamp(1, total);
    tracing::info!(total, workers, "starting batch geocode");

    let (job_tx, job_rx) = async_channel::bounded::<(usize, Point3D)>(total);
    for job in points.iter().copied().enumerate() {
        // The queue holds every job, so this never waits.
        if job_tx.send(job).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    let (result_tx, result_rx) = async_channel::unbounded::<(usize, Result<GeoCoordinate>)>();
    let mut set = JoinSet::new();
    for _ in 0..workers {
        let geocoder = Arc::clone(geocoder);
        let jobs = job_rx.clone();
        let results = result_tx.clone();
        let cancel = options.cancel.clone();
        set.spawn(async move {
            while let Ok((index, point)) = jobs.recv().await {
                if cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                    break;
                }
                let result = geocoder.geocode(point).await;
                if results.send((index, result)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let start = Instant::now();
    let mut slots: Vec<Option<Result<GeoCoordinate>>> = (0..total).map(|_| None).collect();
    let mut completed = 0;

    while let Ok((index, result)) = result_rx.recv().await {
        if fail_fast {
            if let Err(e) = result {
                tracing::warn!(index, error = %e, "geocode failed, aborting batch");
                job_rx.close();
                set.abort_all();
                return Err(e);
            }
        }

        slots[index] = Some(result);
        completed += 1;

        if let Some(progress) = &options.progress {
            // Progress is best-effort; a full or closed channel never stops the batch.
            let _ = progress.try_send(BatchProgress {
                completed,
                total,
                elapsed: start.elapsed(),
            });
        }
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }

    if completed < total {
        tracing::info!(completed, total, "batch geocode cancelled");
        return Err(Error::Cancelled);
    }

    tracing::info!(total, elapsed = ?start.elapsed(), "batch geocode finished");
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use rand::Rng;

    use super::*;
    use crate::client::GeocodeFuture;
    use crate::transport::RateLimiter;

    /// Maps a point to a coordinate derived from it, after a random delay.
    #[derive(Default)]
    struct EchoGeocoder {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        /// Points whose `x` equals this value fail.
        fail_x: Option<f64>,
    }

    fn expected(point: Point3D) -> GeoCoordinate {
        GeoCoordinate::new(point.x, point.y).with_alt(point.z)
    }

    impl Geocoder for EchoGeocoder {
        fn geocode(&self, point: Point3D) -> GeocodeFuture<'_> {
            let delay = Duration::from_millis(rand::rng().random_range(0..15));
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if self.fail_x.is_some_and(|x| (x - point.x).abs() < f64::EPSILON) {
                    return Err(Error::GeocodeUnavailable { point });
                }
                Ok(expected(point))
            })
        }
    }

    fn points(n: usize) -> Vec<Point3D> {
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let f = i as f64;
                Point3D::new(f, f * 10.0, f * 100.0)
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_results_follow_input_order() {
        let geocoder = Arc::new(EchoGeocoder::default());
        let points = points(64);

        let results = batch_geocode(Arc::clone(&geocoder), &points, &BatchOptions::new(8))
            .await
            .unwrap();

        assert_eq!(results.len(), points.len());
        for (point, geo) in points.iter().zip(&results) {
            assert_eq!(*geo, expected(*point));
        }
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 64);
    }

    #[tokio::test]
    async fn test_empty_batch_issues_no_requests() {
        let geocoder = Arc::new(EchoGeocoder::default());
        let results = batch_geocode(Arc::clone(&geocoder), &[], &BatchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounds_in_flight_requests() {
        let geocoder = Arc::new(EchoGeocoder::default());
        batch_geocode(Arc::clone(&geocoder), &points(40), &BatchOptions::new(3))
            .await
            .unwrap();
        assert!(geocoder.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_runs() {
        let geocoder = Arc::new(EchoGeocoder::default());
        let results = batch_geocode(geocoder, &points(3), &BatchOptions::new(0))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fail_fast_returns_first_error() {
        let geocoder = Arc::new(EchoGeocoder {
            fail_x: Some(5.0),
            ..EchoGeocoder::default()
        });
        let err = batch_geocode(geocoder, &points(20), &BatchOptions::new(4))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GeocodeUnavailable { point } if point.x == 5.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_settled_keeps_failures_in_place() {
        let geocoder = Arc::new(EchoGeocoder {
            fail_x: Some(2.0),
            ..EchoGeocoder::default()
        });
        let points = points(6);
        let results = batch_geocode_settled(geocoder, &points, &BatchOptions::new(3))
            .await
            .unwrap();

        assert_eq!(results.len(), 6);
        for (i, result) in results.iter().enumerate() {
            if i == 2 {
                assert!(matches!(result, Err(Error::GeocodeUnavailable { .. })));
            } else {
                assert_eq!(*result.as_ref().unwrap(), expected(points[i]));
            }
        }
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (tx, rx) = async_channel::unbounded();
        let geocoder = Arc::new(EchoGeocoder::default());
        let options = BatchOptions::new(2).with_progress(tx);

        batch_geocode(geocoder, &points(5), &options).await.unwrap();
        drop(options);

        let mut events = Vec::new();
        while let Ok(event) = rx.recv().await {
            events.push(event);
        }
        let counts: Vec<usize> = events.iter().map(|e| e.completed).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert!(events.iter().all(|e| e.total == 5));
    }

    #[tokio::test]
    async fn test_closed_progress_channel_does_not_abort() {
        let (tx, rx) = async_channel::bounded(1);
        drop(rx);
        let geocoder = Arc::new(EchoGeocoder::default());
        let options = BatchOptions::new(2).with_progress(tx);

        let results = batch_geocode(geocoder, &points(4), &options).await.unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_batch() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let geocoder = Arc::new(EchoGeocoder::default());
        let options = BatchOptions::new(2).with_cancel(cancel);

        let err = batch_geocode(Arc::clone(&geocoder), &points(10), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    /// Records the limiter's rate as seen during each call.
    struct RateRecorder {
        limiter: RateLimiter,
        seen: std::sync::Mutex<Vec<f64>>,
    }

    impl Geocoder for RateRecorder {
        fn geocode(&self, point: Point3D) -> GeocodeFuture<'_> {
            Box::pin(async move {
                let rps = self.limiter.max_rps().await;
                self.seen.lock().unwrap().push(rps);
                Ok(expected(point))
            })
        }

        fn limiter(&self) -> Option<&RateLimiter> {
            Some(&self.limiter)
        }
    }

    #[tokio::test]
    async fn test_max_rps_override_is_scoped_to_batch() {
        let recorder = Arc::new(RateRecorder {
            limiter: RateLimiter::new(5.0),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let options = BatchOptions::new(2).with_max_rps(50.0);

        batch_geocode(Arc::clone(&recorder), &points(3), &options)
            .await
            .unwrap();

        assert!(
            recorder
                .seen
                .lock()
                .unwrap()
                .iter()
                .all(|rps| (rps - 50.0).abs() < f64::EPSILON)
        );
        assert!((recorder.limiter.max_rps().await - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_rate() {
        let progress = BatchProgress {
            completed: 10,
            total: 20,
            elapsed: Duration::from_secs(2),
        };
        assert!((progress.rate() - 5.0).abs() < f64::EPSILON);

        let start = BatchProgress {
            completed: 0,
            total: 20,
            elapsed: Duration::ZERO,
        };
        assert!(start.rate().abs() < f64::EPSILON);
    }
}
