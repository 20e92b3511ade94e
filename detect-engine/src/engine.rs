//! `DetectionEngine` (C3): a fixed pool of thread-affine contexts behind
//! a bounded drop-oldest queue (§4.2 "Public contract",
//! "Concurrency").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use vision_types::{Detection, Frame};

use crate::context::{ContextFactory, RawOutput};
use crate::error::EngineError;
use crate::postprocess::{postprocess_shape_a, postprocess_shape_b, PostprocessParams};
use crate::preprocess::{InputDtype, PreprocBuffer};

const DEFAULT_MAX_QUEUE: usize = 10;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

struct Task {
    frame: Frame,
    responder: oneshot::Sender<Vec<Detection>>,
}

/// Mutable runtime parameters, shared across workers (§4.2
/// "set_max_queue(n); set_confidence_threshold(f); set_nms_threshold(f);
/// set_enabled_categories(Vec<String>)").
struct EngineConfig {
    max_queue: usize,
    confidence_threshold: f32,
    nms_threshold: f32,
    enabled_categories: Vec<String>,
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    stop: AtomicBool,
    config: RwLock<EngineConfig>,
    class_names: Vec<String>,
    model_w: u32,
    model_h: u32,
    dtype: InputDtype,
    dropped_total: AtomicUsize,
}

/// Async handle to a single submission's eventual detections.
///
/// Resolves to an empty vector if the task is dropped from the queue
/// under overload or cancelled by `shutdown()` (§4.2
/// "drop-oldest"). Never blocks the caller on construction.
pub struct DetectionFuture {
    rx: oneshot::Receiver<Vec<Detection>>,
}

impl std::future::Future for DetectionFuture {
    type Output = Vec<Detection>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        match std::pin::Pin::new(&mut self.rx).poll(cx) {
            std::task::Poll::Ready(Ok(dets)) => std::task::Poll::Ready(dets),
            std::task::Poll::Ready(Err(_)) => std::task::Poll::Ready(Vec::new()),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

pub struct DetectionEngine {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl DetectionEngine {
    /// Load `num_contexts` independent contexts, one per worker
    /// (§4.2 "init"). If any context fails to build, already
    /// built contexts are released and initialization fails.
    pub fn init(
        factory: Arc<dyn ContextFactory>,
        num_contexts: usize,
        model_w: u32,
        model_h: u32,
        dtype: InputDtype,
        class_names: Vec<String>,
    ) -> Result<Self, EngineError> {
        let mut contexts = Vec::with_capacity(num_contexts);
        for _ in 0..num_contexts {
            match factory.new_context() {
                Ok(ctx) => contexts.push(ctx),
                Err(e) => {
                    for mut c in contexts {
                        c.release();
                    }
                    return Err(e);
                }
            }
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            stop: AtomicBool::new(false),
            config: RwLock::new(EngineConfig {
                max_queue: DEFAULT_MAX_QUEUE,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                nms_threshold: DEFAULT_NMS_THRESHOLD,
                enabled_categories: Vec::new(),
            }),
            class_names,
            model_w,
            model_h,
            dtype,
            dropped_total: AtomicUsize::new(0),
        });

        let workers = contexts
            .into_iter()
            .enumerate()
            .map(|(idx, ctx)| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("detect-worker-{idx}"))
                    .spawn(move || worker_loop(idx, ctx, shared))
                    .expect("spawn detect worker")
            })
            .collect();

        Ok(Self { shared, workers })
    }

    /// Enqueue a frame, never blocking the caller (§4.2
    /// "submit"). If the queue is at capacity, the oldest queued task is
    /// dropped (its future resolves to an empty vector) to make room.
    pub fn submit(&self, frame: Frame) -> DetectionFuture {
        let (tx, rx) = oneshot::channel();
        let task = Task {
            frame,
            responder: tx,
        };

        let max_queue = self.shared.config.read().max_queue;
        let mut queue = self.shared.queue.lock();
        if queue.len() >= max_queue {
            if let Some(dropped) = queue.pop_front() {
                self.shared.dropped_total.fetch_add(1, Ordering::Relaxed);
                let _ = dropped.responder.send(Vec::new());
            }
        }
        queue.push_back(task);
        self.shared.not_empty.notify_one();

        DetectionFuture { rx }
    }

    pub fn set_max_queue(&self, n: usize) {
        self.shared.config.write().max_queue = n;
    }

    pub fn set_confidence_threshold(&self, f: f32) {
        self.shared.config.write().confidence_threshold = f;
    }

    pub fn set_nms_threshold(&self, f: f32) {
        self.shared.config.write().nms_threshold = f;
    }

    pub fn set_enabled_categories(&self, categories: Vec<String>) {
        self.shared.config.write().enabled_categories = categories;
    }

    pub fn dropped_total(&self) -> usize {
        self.shared.dropped_total.load(Ordering::Relaxed)
    }

    /// Flush workers: drain the queue resolving pending futures as
    /// cancelled-empty, then join (§4.2 "shutdown").
    pub fn shutdown(mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        {
            let mut queue = self.shared.queue.lock();
            for task in queue.drain(..) {
                let _ = task.responder.send(Vec::new());
            }
        }
        self.shared.not_empty.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_idx: usize,
    mut ctx: Box<dyn crate::context::Context>,
    shared: Arc<Shared>,
) {
    let mut scratch = PreprocBuffer::new(shared.model_w, shared.model_h);

    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.stop.load(Ordering::SeqCst) {
                    break None;
                }
                shared.not_empty.wait(&mut queue);
            }
        };

        let Some(task) = task else {
            break;
        };

        let dets = process_one(&mut ctx, &mut scratch, &shared, &task.frame)
            .unwrap_or_else(|e| {
                warn!(worker = worker_idx, error = %e, "detection worker error");
                Vec::new()
            });
        let _ = task.responder.send(dets);
    }

    ctx.release();
    debug!(worker = worker_idx, "detection worker stopped");
}

fn process_one(
    ctx: &mut Box<dyn crate::context::Context>,
    scratch: &mut PreprocBuffer,
    shared: &Shared,
    frame: &Frame,
) -> Result<Vec<Detection>, EngineError> {
    let (input, letterbox) = scratch.process(frame, shared.dtype);
    let raw = ctx.run(input)?;

    let config = shared.config.read();
    let params = PostprocessParams {
        confidence_threshold: config.confidence_threshold,
        nms_threshold: config.nms_threshold,
        class_names: &shared.class_names,
        enabled_categories: &config.enabled_categories,
    };

    let dets = match raw {
        RawOutput::ShapeA(heads) => postprocess_shape_a(
            &heads,
            &letterbox,
            frame.width as f32,
            frame.height as f32,
            &params,
        ),
        RawOutput::ShapeB(tensor) => postprocess_shape_b(
            &tensor,
            &letterbox,
            frame.width as f32,
            frame.height as f32,
            &params,
        ),
    };
    Ok(dets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextFactory};
    use crate::postprocess::UnifiedTensor;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use vision_types::PixelFormat;

    struct EmptyContext;
    impl Context for EmptyContext {
        fn run(&mut self, _input: PreprocessedInput<'_>) -> Result<RawOutput, EngineError> {
            Ok(RawOutput::ShapeB(UnifiedTensor {
                num_anchors: 0,
                num_classes: 0,
                data: Vec::new(),
            }))
        }
        fn release(&mut self) {}
    }

    struct EmptyFactory {
        fail_after: Option<usize>,
        built: StdAtomicUsize,
    }
    impl ContextFactory for EmptyFactory {
        fn new_context(&self) -> Result<Box<dyn Context>, EngineError> {
            let n = self.built.fetch_add(1, Ordering::SeqCst);
            if self.fail_after == Some(n) {
                return Err(EngineError::ContextInit("boom".into()));
            }
            Ok(Box::new(EmptyContext))
        }
    }

    fn blank_frame() -> Frame {
        Frame::new(64, 64, PixelFormat::Rgb8, vec![0u8; 64 * 64 * 3])
    }

    #[test]
    fn init_fails_releases_already_built_contexts() {
        let factory = Arc::new(EmptyFactory {
            fail_after: Some(1),
            built: StdAtomicUsize::new(0),
        });
        let result = DetectionEngine::init(
            factory,
            3,
            64,
            64,
            InputDtype::Uint8,
            vec!["person".to_string()],
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn submit_resolves_with_detections() {
        let factory = Arc::new(EmptyFactory {
            fail_after: None,
            built: StdAtomicUsize::new(0),
        });
        let engine = DetectionEngine::init(
            factory,
            1,
            64,
            64,
            InputDtype::Uint8,
            vec!["person".to_string()],
        )
        .unwrap();
        let fut = engine.submit(blank_frame());
        let dets = fut.await;
        assert!(dets.is_empty());
        engine.shutdown();
    }

    /// scenario S6: queue capacity 2, submit 5 while workers can't drain.
    /// Builds the shared queue state directly (no live worker thread) so
    /// the eviction order can be asserted without a race against a
    /// worker draining it concurrently.
    #[test]
    fn s6_drop_oldest_under_overload() {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            stop: AtomicBool::new(false),
            config: RwLock::new(EngineConfig {
                max_queue: 2,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                nms_threshold: DEFAULT_NMS_THRESHOLD,
                enabled_categories: Vec::new(),
            }),
            class_names: vec!["person".to_string()],
            model_w: 64,
            model_h: 64,
            dtype: InputDtype::Uint8,
            dropped_total: AtomicUsize::new(0),
        });

        let submit = |shared: &Arc<Shared>| -> oneshot::Receiver<Vec<Detection>> {
            let (tx, rx) = oneshot::channel();
            let max_queue = shared.config.read().max_queue;
            let mut queue = shared.queue.lock();
            if queue.len() >= max_queue {
                if let Some(dropped) = queue.pop_front() {
                    shared.dropped_total.fetch_add(1, Ordering::Relaxed);
                    let _ = dropped.responder.send(Vec::new());
                }
            }
            queue.push_back(Task {
                frame: blank_frame(),
                responder: tx,
            });
            rx
        };

        let rx1 = submit(&shared);
        let rx2 = submit(&shared);
        let rx3 = submit(&shared);
        let rx4 = submit(&shared);
        let rx5 = submit(&shared);

        assert_eq!(shared.dropped_total.load(Ordering::Relaxed), 3);
        assert_eq!(rx1.try_recv().unwrap(), Vec::<Detection>::new());
        assert_eq!(rx2.try_recv().unwrap(), Vec::<Detection>::new());
        assert_eq!(rx3.try_recv().unwrap(), Vec::<Detection>::new());
        assert!(rx4.try_recv().is_err());
        assert!(rx5.try_recv().is_err());
        assert_eq!(shared.queue.lock().len(), 2);
    }
}
