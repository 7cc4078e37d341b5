use {
    crate::{DeferredQueueConfig, QueueError},
    async_trait::async_trait,
    parking_lot::Mutex,
    rand::{Rng, SeedableRng, rngs::StdRng},
    std::{
        error::Error,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    },
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
        time::Instant,
    },
    tracing::{debug, info, warn},
};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Processing failures are logged at most this often.
const FAILURE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Work performed by the queue consumer, one item at a time.
#[async_trait]
pub trait DeferredProcessor<T>: Send + Sync {
    async fn process(&self, item: T) -> Result<(), BoxError>;
}

/// What happened to an enqueued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Accepted after slowing the caller down.
    Delayed(Duration),
    /// Rejected; the caller was slowed down anyway.
    Dropped,
}

/// Bounded queue with load shedding.
///
/// Below `optimal_size` items producers are not slowed down. Between
/// `optimal_size` and `delay_size` they sleep for a delay growing linearly
/// from `min_delay` to `max_delay`. Past `delay_size` items are dropped with
/// a probability growing linearly to certainty at `max_size`.
pub struct DeferredQueue<T> {
    config: DeferredQueueConfig,
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    size: Arc<AtomicUsize>,
    rng: Mutex<StdRng>,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> DeferredQueue<T> {
    pub fn new(config: DeferredQueueConfig) -> Result<Self, QueueError> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Queue with reproducible drop decisions.
    pub fn with_seed(config: DeferredQueueConfig, seed: u64) -> Result<Self, QueueError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: DeferredQueueConfig, rng: StdRng) -> Result<Self, QueueError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.max_size);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            size: Arc::new(AtomicUsize::new(0)),
            rng: Mutex::new(rng),
            shutdown,
            consumer: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &DeferredQueueConfig {
        &self.config
    }

    /// Items waiting for the consumer.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chance that an item arriving while `size` items are queued is dropped.
    pub fn drop_probability(&self, size: usize) -> f64 {
        let DeferredQueueConfig {
            delay_size,
            max_size,
            ..
        } = self.config;
        if size >= max_size {
            return 1.0;
        }
        if size + 1 <= delay_size {
            return 0.0;
        }
        let span = max_size - delay_size;
        ((size + 1 - delay_size) as f64 / span as f64).clamp(0.0, 1.0)
    }

    /// Delay imposed on a producer whose item brought the queue to `size`.
    pub fn admission_delay(&self, size: usize) -> Duration {
        let DeferredQueueConfig {
            optimal_size,
            delay_size,
            min_delay,
            max_delay,
            ..
        } = self.config;
        if size <= optimal_size {
            return Duration::ZERO;
        }
        if size >= delay_size {
            return max_delay;
        }
        let ratio = (size - optimal_size) as f64 / (delay_size - optimal_size) as f64;
        min_delay + (max_delay - min_delay).mul_f64(ratio)
    }

    fn should_drop(&self, size: usize) -> bool {
        let probability = self.drop_probability(size);
        probability > 0.0 && self.rng.lock().gen_bool(probability)
    }

    /// Offers an item, possibly sleeping to push back on the caller.
    pub async fn enqueue(&self, item: T) -> EnqueueOutcome {
        if self.should_drop(self.len()) {
            tokio::time::sleep(self.config.max_delay).await;
            return EnqueueOutcome::Dropped;
        }

        // Count before sending, so the consumer never sees a negative size.
        let size = self.size.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.try_send(item).is_err() {
            self.size.fetch_sub(1, Ordering::AcqRel);
            tokio::time::sleep(self.config.max_delay).await;
            return EnqueueOutcome::Dropped;
        }

        let delay = self.admission_delay(size);
        if delay.is_zero() {
            EnqueueOutcome::Accepted
        } else {
            tokio::time::sleep(delay).await;
            EnqueueOutcome::Delayed(delay)
        }
    }

    /// Spawns the consumer task.
    pub fn start<P>(&self, processor: Arc<P>) -> Result<(), QueueError>
    where
        P: DeferredProcessor<T> + 'static,
    {
        let mut consumer = self.consumer.lock();
        let rx = self.rx.lock().take().ok_or(QueueError::AlreadyStarted)?;
        let shutdown = self.shutdown.subscribe();
        let size = Arc::clone(&self.size);
        *consumer = Some(tokio::spawn(consume(rx, processor, size, shutdown)));
        Ok(())
    }

    /// Stops the consumer, leaving queued items unprocessed.
    ///
    /// Safe to call before [`start()`](Self::start) and more than once.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("deferred queue consumer panicked: {err}");
            }
        }
    }
}

async fn consume<T, P>(
    mut rx: mpsc::Receiver<T>,
    processor: Arc<P>,
    size: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Send + 'static,
    P: DeferredProcessor<T> + ?Sized,
{
    info!("deferred queue consumer started");
    let mut last_logged: Option<Instant> = None;
    let mut suppressed = 0usize;

    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        size.fetch_sub(1, Ordering::AcqRel);

        if let Err(err) = processor.process(item).await {
            let now = Instant::now();
            if last_logged.is_none_or(|at| now.duration_since(at) >= FAILURE_LOG_INTERVAL) {
                warn!(suppressed, "deferred operation failed: {err}");
                last_logged = Some(now);
                suppressed = 0;
            } else {
                suppressed += 1;
            }
        }
    }

    let remaining = size.load(Ordering::Acquire);
    if remaining > 0 {
        warn!(remaining, "deferred queue stopped with unprocessed items");
    } else {
        debug!("deferred queue consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::sync::atomic::AtomicBool};

    fn config() -> DeferredQueueConfig {
        DeferredQueueConfig {
            optimal_size: 10,
            delay_size: 20,
            max_size: 30,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        }
    }

    /// Fills the queue without the admission rules.
    fn fill(queue: &DeferredQueue<u32>, count: usize) {
        for i in 0..count {
            queue.tx.try_send(i as u32).unwrap();
            queue.size.fetch_add(1, Ordering::AcqRel);
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl DeferredProcessor<u32> for Recorder {
        async fn process(&self, item: u32) -> Result<(), BoxError> {
            self.seen.lock().push(item);
            if self.fail.load(Ordering::Relaxed) {
                return Err("refused".into());
            }
            Ok(())
        }
    }

    #[test]
    fn admission_curve() {
        let queue = DeferredQueue::<u32>::new(config()).unwrap();

        assert_eq!(queue.admission_delay(5), Duration::ZERO);
        assert_eq!(queue.admission_delay(10), Duration::ZERO);
        assert_eq!(queue.admission_delay(15), Duration::from_millis(30));
        assert_eq!(queue.admission_delay(20), Duration::from_millis(50));
        assert_eq!(queue.admission_delay(29), Duration::from_millis(50));

        assert_eq!(queue.drop_probability(0), 0.0);
        assert_eq!(queue.drop_probability(19), 0.0);
        assert!((queue.drop_probability(25) - 0.6).abs() < 1e-9);
        assert_eq!(queue.drop_probability(30), 1.0);
        assert_eq!(queue.drop_probability(45), 1.0);
    }

    #[test]
    fn drop_rate_follows_probability() {
        let queue = DeferredQueue::<u32>::with_seed(config(), 7).unwrap();
        let drops = (0..10_000).filter(|_| queue.should_drop(25)).count();
        assert!((5_500..6_500).contains(&drops), "dropped {drops}");
        assert!((0..1_000).all(|_| queue.should_drop(30)));
        assert!(!(0..1_000).any(|_| queue.should_drop(15)));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let config = DeferredQueueConfig {
            optimal_size: 30,
            ..config()
        };
        assert!(DeferredQueue::<u32>::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn crowded_queue_delays_or_drops() {
        let queue = DeferredQueue::with_seed(config(), 42).unwrap();
        fill(&queue, 25);

        let started = Instant::now();
        let outcome = queue.enqueue(99).await;
        assert!(
            outcome == EnqueueOutcome::Dropped
                || outcome == EnqueueOutcome::Delayed(Duration::from_millis(50)),
            "{outcome:?}"
        );
        // Either way the caller has been slowed down.
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_always_drops() {
        let queue = DeferredQueue::with_seed(config(), 1).unwrap();
        fill(&queue, 30);
        for i in 0..20 {
            assert_eq!(queue.enqueue(i).await, EnqueueOutcome::Dropped);
        }
        assert_eq!(queue.len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_queue_accepts() {
        let queue = DeferredQueue::with_seed(config(), 1).unwrap();
        assert_eq!(queue.enqueue(1).await, EnqueueOutcome::Accepted);
        fill(&queue, 13);
        assert!(matches!(queue.enqueue(2).await, EnqueueOutcome::Delayed(_)));
        assert_eq!(queue.len(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_drains_and_survives_failures() {
        let queue = DeferredQueue::with_seed(config(), 1).unwrap();
        let recorder = Arc::new(Recorder::default());
        recorder.fail.store(true, Ordering::Relaxed);
        queue.start(Arc::clone(&recorder)).unwrap();
        assert_eq!(queue.start(Arc::clone(&recorder)), Err(QueueError::AlreadyStarted));

        for i in 0..5 {
            assert_eq!(queue.enqueue(i).await, EnqueueOutcome::Accepted);
        }
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*recorder.seen.lock(), [0, 1, 2, 3, 4]);

        queue.stop().await;
        queue.stop().await;
    }

    #[tokio::test]
    async fn stop_before_start() {
        let queue = DeferredQueue::<u32>::new(config()).unwrap();
        queue.stop().await;
        assert!(queue.is_empty());
    }
}
