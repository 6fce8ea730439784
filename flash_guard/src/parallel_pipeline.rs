// THEORY:
// `ParallelPipeline` splits capture from analysis without giving up strict
// frame order. A capture side submits frames into a small bounded queue; a
// single blocking worker owns the `FlashPipeline` and analyzes them one at a
// time, in the order they were submitted, publishing one outcome per frame.
//
//   FrameFeeder --(bounded mpsc)--> analysis worker --(bounded mpsc)--> OutcomeStream
//
// There is exactly one producer handle and one consumer, so ordering is FIFO by
// construction; the sequence number on every outcome makes that checkable.
// When the queue is full, `submit` waits: backpressure reaches capture
// instead of frames piling up. Dropping the feeder drains the queue, stops the
// worker and ends the outcome stream.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::FlashConfig;
use crate::core_modules::frame::Frame;
use crate::error::{FlashError, Result};
use crate::pipeline::{FlashPipeline, PipelineStats, Report};

pub const DEFAULT_QUEUE_DEPTH: usize = 4;

pub struct TimedFrame {
    pub sequence: u64,
    pub timestamp: Duration,
    pub frame: Frame,
}

/// The analysis result for one submitted frame.
#[derive(Debug)]
pub struct FrameOutcome {
    pub sequence: u64,
    pub timestamp: Duration,
    pub report: Result<Report>,
    /// The analyzed frame, returned so the caller can reuse or inspect it.
    pub frame: Frame,
}

/// Capture-side handle. Frames are analyzed in submission order.
pub struct FrameFeeder {
    sender: mpsc::Sender<TimedFrame>,
    next_sequence: u64,
}

impl FrameFeeder {
    /// Queues a frame for analysis, waiting while the queue is full.
    /// Returns the frame's sequence number.
    pub async fn submit(&mut self, frame: Frame, timestamp: Duration) -> Result<u64> {
        let sequence = self.next_sequence;
        self.sender
            .send(TimedFrame {
                sequence,
                timestamp,
                frame,
            })
            .await
            .map_err(|_| FlashError::PipelineClosed)?;
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Blocking variant of `submit` for capture loops on plain threads.
    pub fn blocking_submit(&mut self, frame: Frame, timestamp: Duration) -> Result<u64> {
        let sequence = self.next_sequence;
        self.sender
            .blocking_send(TimedFrame {
                sequence,
                timestamp,
                frame,
            })
            .map_err(|_| FlashError::PipelineClosed)?;
        self.next_sequence += 1;
        Ok(sequence)
    }
}

/// Consumer-side handle yielding one `FrameOutcome` per submitted frame.
pub struct OutcomeStream {
    receiver: mpsc::Receiver<FrameOutcome>,
    worker: Option<JoinHandle<PipelineStats>>,
}

impl OutcomeStream {
    pub async fn next_outcome(&mut self) -> Option<FrameOutcome> {
        self.receiver.recv().await
    }

    /// Waits for the worker to finish and returns the session statistics.
    /// Call after the feeder has been dropped and the stream drained.
    pub async fn finish(mut self) -> Result<PipelineStats> {
        self.receiver.close();
        match self.worker.take() {
            Some(worker) => worker.await.map_err(|_| FlashError::PipelineClosed),
            None => Err(FlashError::PipelineClosed),
        }
    }
}

impl Stream for OutcomeStream {
    type Item = FrameOutcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

pub struct ParallelPipeline;

impl ParallelPipeline {
    /// Spawns the analysis worker on the current tokio runtime.
    pub fn spawn(config: FlashConfig, queue_depth: usize) -> Result<(FrameFeeder, OutcomeStream)> {
        let pipeline = FlashPipeline::new(config)?;
        Ok(Self::spawn_with(pipeline, queue_depth))
    }

    /// Spawns the analysis worker around an already configured pipeline.
    pub fn spawn_with(
        mut pipeline: FlashPipeline,
        queue_depth: usize,
    ) -> (FrameFeeder, OutcomeStream) {
        let depth = queue_depth.max(1);
        let (frame_sender, mut frame_receiver) = mpsc::channel::<TimedFrame>(depth);
        let (outcome_sender, outcome_receiver) = mpsc::channel::<FrameOutcome>(depth);

        let worker = tokio::task::spawn_blocking(move || {
            while let Some(task) = frame_receiver.blocking_recv() {
                let report = pipeline.push(&task.frame, task.timestamp);
                let outcome = FrameOutcome {
                    sequence: task.sequence,
                    timestamp: task.timestamp,
                    report,
                    frame: task.frame,
                };
                if outcome_sender.blocking_send(outcome).is_err() {
                    debug!("Outcome receiver dropped; stopping analysis worker");
                    break;
                }
            }
            pipeline.stats()
        });

        (
            FrameFeeder {
                sender: frame_sender,
                next_sequence: 0,
            },
            OutcomeStream {
                receiver: outcome_receiver,
                worker: Some(worker),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn frame(i: u64) -> Frame {
        let value = if i % 2 == 0 { 0 } else { 255 };
        Frame::filled(4, 4, [value, value, value]).expect("valid frame")
    }

    fn at(i: u64) -> Duration {
        Duration::from_millis(i * 100)
    }

    fn config() -> FlashConfig {
        FlashConfig {
            buffer_min_frames: 4,
            expected_fps: 10.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn outcomes_arrive_in_submission_order() {
        let (mut feeder, outcomes) = ParallelPipeline::spawn(config(), 2).expect("valid config");
        let producer = tokio::spawn(async move {
            for i in 0..40 {
                feeder.submit(frame(i), at(i)).await.expect("submit");
            }
        });

        let collected: Vec<FrameOutcome> = outcomes.collect().await;
        producer.await.expect("producer");

        let sequences: Vec<u64> = collected.iter().map(|o| o.sequence).collect();
        assert_eq!(sequences, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn verdicts_match_the_serial_pipeline() {
        let mut serial = FlashPipeline::new(config()).expect("valid config");
        let expected: Vec<Report> = (0..40)
            .map(|i| serial.push(&frame(i), at(i)).expect("push"))
            .collect();

        let (mut feeder, mut outcomes) =
            ParallelPipeline::spawn(config(), 3).expect("valid config");
        let producer = tokio::spawn(async move {
            for i in 0..40 {
                feeder.submit(frame(i), at(i)).await.expect("submit");
            }
        });

        let mut actual = Vec::new();
        while let Some(outcome) = outcomes.next_outcome().await {
            actual.push(outcome.report.expect("valid frame"));
        }
        producer.await.expect("producer");
        let stats = outcomes.finish().await.expect("worker joins");

        assert_eq!(actual, expected);
        assert_eq!(stats, serial.stats());
        assert!(stats.flashing_verdicts > 0);
    }

    #[tokio::test]
    async fn rejected_frames_are_reported_and_streaming_continues() {
        let (mut feeder, mut outcomes) =
            ParallelPipeline::spawn(config(), 2).expect("valid config");
        feeder.submit(frame(0), at(0)).await.expect("submit");
        let wrong = Frame::filled(2, 2, [0, 0, 0]).expect("valid frame");
        feeder.submit(wrong, at(1)).await.expect("submit");
        feeder.submit(frame(2), at(2)).await.expect("submit");
        drop(feeder);

        let first = outcomes.next_outcome().await.expect("outcome");
        assert!(first.report.is_ok());
        let second = outcomes.next_outcome().await.expect("outcome");
        assert!(matches!(second.report, Err(FlashError::FrameShape { .. })));
        let third = outcomes.next_outcome().await.expect("outcome");
        assert!(third.report.is_ok());
        assert!(outcomes.next_outcome().await.is_none());

        let stats = outcomes.finish().await.expect("worker joins");
        assert_eq!(stats.frames_rejected, 1);
    }

    #[tokio::test]
    async fn submitting_after_the_consumer_stops_fails() {
        let (mut feeder, outcomes) = ParallelPipeline::spawn(config(), 1).expect("valid config");
        drop(outcomes);
        let mut result = Ok(0);
        for i in 0..8 {
            result = feeder.submit(frame(i), at(i)).await;
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(FlashError::PipelineClosed)));
    }
}
