use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::ExtractError,
    extractor::{DownloadRequest, DownloadedMedia},
};

pub type DownloadOutcome = Result<DownloadedMedia, ExtractError>;

/// Reading half of a single-assignment result cell.
#[derive(Debug)]
pub struct ResultSlot {
    receiver: oneshot::Receiver<DownloadOutcome>,
}

/// Writing half of a [`ResultSlot`]. Every resolve method consumes the
/// writer, so a slot can be resolved at most once.
#[derive(Debug)]
pub struct SlotWriter {
    sender: oneshot::Sender<DownloadOutcome>,
}

impl ResultSlot {
    pub fn pending() -> (SlotWriter, ResultSlot) {
        let (sender, receiver) = oneshot::channel();
        (SlotWriter { sender }, ResultSlot { receiver })
    }

    /// Suspends until the slot is resolved. A writer dropped without
    /// resolving reads as [`ExtractError::DispatcherStopped`].
    pub async fn wait(self) -> DownloadOutcome {
        self.receiver
            .await
            .unwrap_or(Err(ExtractError::DispatcherStopped))
    }
}

impl SlotWriter {
    pub fn resolve(self, media: DownloadedMedia) {
        self.complete(Ok(media));
    }

    pub fn resolve_error(self, error: ExtractError) {
        self.complete(Err(error));
    }

    pub fn complete(self, outcome: DownloadOutcome) {
        if self.sender.send(outcome).is_err() {
            debug!("Result slot reader went away before the task finished");
        }
    }
}

#[derive(Debug)]
pub struct DownloadTask {
    pub id: Uuid,
    pub request: DownloadRequest,
    pub enqueued_at: DateTime<Utc>,
    pub slot: SlotWriter,
}

/// Producer side of the unbounded FIFO of download tasks.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<DownloadTask>,
}

/// Consumer side, owned by the dispatcher.
#[derive(Debug)]
pub struct TaskReceiver {
    receiver: mpsc::UnboundedReceiver<DownloadTask>,
}

pub fn task_queue() -> (TaskQueue, TaskReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (TaskQueue { sender }, TaskReceiver { receiver })
}

impl TaskQueue {
    /// Appends a task and returns its slot without waiting.
    pub fn enqueue(&self, request: DownloadRequest) -> ResultSlot {
        let (writer, slot) = ResultSlot::pending();
        let task = DownloadTask {
            id: Uuid::new_v4(),
            request,
            enqueued_at: Utc::now(),
            slot: writer,
        };
        let task_id = task.id;

        match self.sender.send(task) {
            Ok(()) => debug!("Task {task_id} queued"),
            // dropping the returned task drops its writer, which resolves the slot
            Err(_) => warn!("Task {task_id} rejected: dispatcher is not running"),
        }
        slot
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl TaskReceiver {
    pub async fn next(&mut self) -> Option<DownloadTask> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(url: &str) -> DownloadRequest {
        DownloadRequest {
            url: url.to_string(),
            format_selector: "best".to_string(),
            audio_only: false,
        }
    }

    fn media(id: &str) -> DownloadedMedia {
        DownloadedMedia {
            id: id.to_string(),
            title: None,
            thumbnail: None,
            file_path: PathBuf::from(format!("cache/{id}.mp4")),
            ext: "mp4".to_string(),
        }
    }

    #[tokio::test]
    async fn slot_delivers_success_and_failure() {
        let (writer, slot) = ResultSlot::pending();
        writer.resolve(media("a"));
        assert_eq!(slot.wait().await.unwrap().id, "a");

        let (writer, slot) = ResultSlot::pending();
        writer.resolve_error(ExtractError::Failed("boom".into()));
        assert_eq!(slot.wait().await, Err(ExtractError::Failed("boom".into())));
    }

    #[tokio::test]
    async fn dropped_writer_reads_as_stopped() {
        let (writer, slot) = ResultSlot::pending();
        drop(writer);
        assert_eq!(slot.wait().await, Err(ExtractError::DispatcherStopped));
    }

    #[tokio::test]
    async fn resolving_after_reader_left_is_harmless() {
        let (writer, slot) = ResultSlot::pending();
        drop(slot);
        writer.resolve(media("late"));
    }

    #[tokio::test]
    async fn tasks_come_out_in_enqueue_order_without_dedup() {
        let (queue, mut receiver) = task_queue();
        let urls = ["https://a", "https://b", "https://a", "https://c"];
        let _slots: Vec<ResultSlot> = urls.iter().map(|url| queue.enqueue(request(url))).collect();

        for url in urls {
            let task = receiver.next().await.unwrap();
            assert_eq!(task.request.url, url);
        }
    }

    #[tokio::test]
    async fn enqueue_after_receiver_dropped_resolves_immediately() {
        let (queue, receiver) = task_queue();
        drop(receiver);

        assert!(queue.is_closed());
        let slot = queue.enqueue(request("https://a"));
        assert_eq!(slot.wait().await, Err(ExtractError::DispatcherStopped));
    }
}
