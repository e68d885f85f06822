//! Streaming pipeline runtime.
//!
//! A pipeline is a linear chain of stages, each running on its own worker
//! thread, connected by bounded channels:
//!
//! ```text
//!  ┌────────┐ cap ┌─────────┐ cap ┌────────┐        ┌──────┐
//!  │ source ├────►│ stage 1 ├────►│ stage 2│─ ... ─►│ sink │
//!  └────────┘     └─────────┘     └────────┘        └──────┘
//! ```
//!
//! Everything travels in-band as a [`Message`]: task markers announce the
//! next unit of work, items carry the payload, and a single poison pill
//! per pipeline shuts the chain down stage by stage. A full downstream
//! channel blocks the sender, so memory stays bounded end to end
//! (backpressure).
//!
//! A fatal error in any stage logs the cause, poisons the downstream
//! channel so the rest of the graph drains, and propagates the error to
//! [`Pipeline::wait`], which joins every worker and reports the first
//! failure.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use cbct_core::Task;

use crate::{ComputeError, ComputeResult};

/// Default bound of each channel between stages.
pub const DEFAULT_INPUT_LIMIT: usize = 1;

/// What flows along a pipeline edge.
pub enum Message<T> {
    /// The next task begins; stages reconfigure before more items arrive.
    Task(Task),
    /// One payload item.
    Item(T),
    /// In-band shutdown sentinel; exactly one per pipeline run.
    Poison,
}

/// Sending half of a pipeline edge.
pub type MessageSender<T> = SyncSender<Message<T>>;
/// Receiving half of a pipeline edge.
pub type MessageReceiver<T> = Receiver<Message<T>>;

/// Creates a bounded pipeline edge.
pub fn stage_channel<T>(capacity: usize) -> (MessageSender<T>, MessageReceiver<T>) {
    std::sync::mpsc::sync_channel(capacity.max(1))
}

/// Best-effort poison of a downstream channel; ignores a closed channel
/// since a dead neighbor needs no sentinel.
pub fn poison<T>(tx: &MessageSender<T>) {
    let _ = tx.send(Message::Poison);
}

/// Sends one message, mapping a closed channel to a stage error.
pub fn send<T>(stage: &'static str, tx: &MessageSender<T>, msg: Message<T>) -> ComputeResult<()> {
    tx.send(msg)
        .map_err(|_| ComputeError::ChannelClosed { stage })
}

/// Receives one message, mapping a channel closed without a sentinel to a
/// stage error.
pub fn recv<T>(stage: &'static str, rx: &MessageReceiver<T>) -> ComputeResult<Message<T>> {
    rx.recv().map_err(|_| ComputeError::ChannelClosed { stage })
}

/// First stage of a pipeline: produces messages from a task queue.
pub trait SourceWorker: Send + 'static {
    /// Item type flowing out of this stage.
    type Output: Send + 'static;

    /// Stage name for logs and errors.
    fn name(&self) -> &'static str;

    /// Worker loop; emits exactly one [`Message::Poison`] before a
    /// successful return. On a fatal error the stage poisons downstream
    /// (when the edge is still alive) and returns the error.
    fn run(self, output: MessageSender<Self::Output>) -> ComputeResult<()>;
}

/// Interior stage: transforms items, forwards task markers and the
/// sentinel.
pub trait StageWorker: Send + 'static {
    /// Item type flowing into this stage.
    type Input: Send + 'static;
    /// Item type flowing out of this stage.
    type Output: Send + 'static;

    /// Stage name for logs and errors.
    fn name(&self) -> &'static str;

    /// Worker loop; forwards the sentinel downstream and returns when it
    /// arrives.
    fn run(
        self,
        input: MessageReceiver<Self::Input>,
        output: MessageSender<Self::Output>,
    ) -> ComputeResult<()>;
}

/// Final stage: consumes items.
pub trait SinkWorker: Send + 'static {
    /// Item type flowing into this stage.
    type Input: Send + 'static;

    /// Stage name for logs and errors.
    fn name(&self) -> &'static str;

    /// Worker loop; returns when the sentinel arrives.
    fn run(self, input: MessageReceiver<Self::Input>) -> ComputeResult<()>;
}

/// Assembles stages into a running pipeline.
///
/// Stages start the moment they are added; [`Pipeline::wait`] joins all
/// workers and returns the first error.
///
/// # Example
///
/// ```ignore
/// let mut pipeline = Pipeline::new(1);
/// let rx = pipeline.source(source_stage);
/// let rx = pipeline.stage(weighting_stage, rx);
/// pipeline.sink(sink_stage, rx);
/// pipeline.wait()?;
/// ```
pub struct Pipeline {
    input_limit: usize,
    workers: Vec<(String, JoinHandle<ComputeResult<()>>)>,
}

impl Pipeline {
    /// Creates an empty pipeline whose edges hold `input_limit` messages.
    pub fn new(input_limit: usize) -> Self {
        Self {
            input_limit: input_limit.max(1),
            workers: Vec::new(),
        }
    }

    /// Spawns the producing stage and returns its output edge.
    pub fn source<S: SourceWorker>(&mut self, stage: S) -> MessageReceiver<S::Output> {
        let (tx, rx) = stage_channel(self.input_limit);
        self.spawn(stage.name(), move || stage.run(tx));
        rx
    }

    /// Spawns an interior stage reading from `input`; returns its output
    /// edge.
    pub fn stage<S: StageWorker>(
        &mut self,
        stage: S,
        input: MessageReceiver<S::Input>,
    ) -> MessageReceiver<S::Output> {
        let (tx, rx) = stage_channel(self.input_limit);
        self.spawn(stage.name(), move || stage.run(input, tx));
        rx
    }

    /// Spawns the consuming stage reading from `input`.
    pub fn sink<S: SinkWorker>(&mut self, stage: S, input: MessageReceiver<S::Input>) {
        self.spawn(stage.name(), move || stage.run(input));
    }

    fn spawn<F>(&mut self, name: &'static str, work: F)
    where
        F: FnOnce() -> ComputeResult<()> + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(work)
            .unwrap_or_else(|e| panic!("failed to spawn {name} worker: {e}"));
        self.workers.push((name.to_string(), handle));
    }

    /// Joins every worker; returns the root failure, if any.
    ///
    /// When one stage dies its neighbors fail secondarily with
    /// [`ComputeError::ChannelClosed`]; those are reported only when no
    /// primary cause exists.
    pub fn wait(self) -> ComputeResult<()> {
        let mut primary = None;
        let mut secondary = None;
        for (name, handle) in self.workers {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(ComputeError::WorkerPanicked { stage: name.clone() }));
            if let Err(err) = result {
                tracing::error!(stage = %name, error = %err, "pipeline stage failed");
                if matches!(err, ComputeError::ChannelClosed { .. }) {
                    secondary.get_or_insert(err);
                } else {
                    primary.get_or_insert(err);
                }
            }
        }
        match primary.or(secondary) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The shared queue of planned tasks, drained by the source stage of
/// every per-device pipeline.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    /// Creates a queue holding `tasks` in plan order.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into()),
        }
    }

    /// Pops the next task assigned to `device`, if any remain.
    pub fn pop_for_device(&self, device: usize) -> Option<Task> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let pos = tasks.iter().position(|t| t.device == device)?;
        tasks.remove(pos)
    }

    /// Number of tasks not yet claimed.
    pub fn remaining(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NumberSource {
        count: usize,
    }

    impl SourceWorker for NumberSource {
        type Output = usize;

        fn name(&self) -> &'static str {
            "numbers"
        }

        fn run(self, output: MessageSender<usize>) -> ComputeResult<()> {
            for i in 0..self.count {
                send(self.name(), &output, Message::Item(i))?;
            }
            send(self.name(), &output, Message::Poison)
        }
    }

    struct Doubler;

    impl StageWorker for Doubler {
        type Input = usize;
        type Output = usize;

        fn name(&self) -> &'static str {
            "doubler"
        }

        fn run(
            self,
            input: MessageReceiver<usize>,
            output: MessageSender<usize>,
        ) -> ComputeResult<()> {
            loop {
                match recv(self.name(), &input)? {
                    Message::Task(t) => send(self.name(), &output, Message::Task(t))?,
                    Message::Item(i) => send(self.name(), &output, Message::Item(i * 2))?,
                    Message::Poison => return send(self.name(), &output, Message::Poison),
                }
            }
        }
    }

    struct Collector {
        sum: Arc<AtomicUsize>,
        poisons: Arc<AtomicUsize>,
    }

    impl SinkWorker for Collector {
        type Input = usize;

        fn name(&self) -> &'static str {
            "collector"
        }

        fn run(self, input: MessageReceiver<usize>) -> ComputeResult<()> {
            loop {
                match recv(self.name(), &input)? {
                    Message::Task(_) => {}
                    Message::Item(i) => {
                        self.sum.fetch_add(i, Ordering::SeqCst);
                    }
                    Message::Poison => {
                        self.poisons.fetch_add(1, Ordering::SeqCst);
                        return Ok(());
                    }
                }
            }
        }
    }

    #[test]
    fn test_items_flow_end_to_end() {
        let sum = Arc::new(AtomicUsize::new(0));
        let poisons = Arc::new(AtomicUsize::new(0));

        let mut pipeline = Pipeline::new(2);
        let rx = pipeline.source(NumberSource { count: 10 });
        let rx = pipeline.stage(Doubler, rx);
        let rx = pipeline.stage(Doubler, rx);
        pipeline.sink(
            Collector {
                sum: Arc::clone(&sum),
                poisons: Arc::clone(&poisons),
            },
            rx,
        );
        pipeline.wait().unwrap();

        assert_eq!(sum.load(Ordering::SeqCst), 45 * 4);
        assert_eq!(poisons.load(Ordering::SeqCst), 1);
    }

    struct FailingStage;

    impl StageWorker for FailingStage {
        type Input = usize;
        type Output = usize;

        fn name(&self) -> &'static str {
            "failing"
        }

        fn run(
            self,
            input: MessageReceiver<usize>,
            output: MessageSender<usize>,
        ) -> ComputeResult<()> {
            loop {
                match recv(self.name(), &input)? {
                    Message::Item(i) if i == 3 => {
                        poison(&output);
                        return Err(ComputeError::kernel(self.name(), "item 3 rejected"));
                    }
                    Message::Item(i) => send(self.name(), &output, Message::Item(i))?,
                    Message::Task(t) => send(self.name(), &output, Message::Task(t))?,
                    Message::Poison => return send(self.name(), &output, Message::Poison),
                }
            }
        }
    }

    #[test]
    fn test_failure_poisons_downstream_and_propagates() {
        let sum = Arc::new(AtomicUsize::new(0));
        let poisons = Arc::new(AtomicUsize::new(0));

        let mut pipeline = Pipeline::new(1);
        let rx = pipeline.source(NumberSource { count: 100 });
        let rx = pipeline.stage(FailingStage, rx);
        pipeline.sink(
            Collector {
                sum: Arc::clone(&sum),
                poisons: Arc::clone(&poisons),
            },
            rx,
        );

        let err = pipeline.wait().unwrap_err();
        assert!(matches!(err, ComputeError::KernelFailure { .. }));
        // The sink still drained: it saw the poison pill, not a closed
        // channel.
        assert_eq!(poisons.load(Ordering::SeqCst), 1);
        assert_eq!(sum.load(Ordering::SeqCst), 0 + 1 + 2);
    }

    #[test]
    fn test_task_queue_per_device() {
        let task = |id, device| Task {
            id,
            z_begin: 0,
            z_end: 1,
            device,
            projections: 0..1,
        };
        let queue = TaskQueue::new(vec![task(0, 0), task(1, 1), task(2, 0)]);

        assert_eq!(queue.pop_for_device(0).unwrap().id, 0);
        assert_eq!(queue.pop_for_device(0).unwrap().id, 2);
        assert!(queue.pop_for_device(0).is_none());
        assert_eq!(queue.pop_for_device(1).unwrap().id, 1);
        assert_eq!(queue.remaining(), 0);
    }
}
