use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tqdm::tqdm;
use tqdm::Tqdm;

enum ProgressUpdate {
    Step,
    Description(String),
}

/// A tqdm bar that can be advanced from worker threads.
pub struct Progress {
    total: usize,
    count: AtomicUsize,
    sender: mpsc::Sender<ProgressUpdate>,
    progress_thread: Option<thread::JoinHandle<()>>,
}

impl Progress {
    pub fn new(total: usize, description: &str) -> Self {
        let progress = Arc::new(Mutex::new(tqdm(0..total).desc(Some(description))));
        let (tx, rx) = mpsc::channel();
        let progress_clone: Arc<Mutex<Tqdm<Range<usize>>>> = Arc::clone(&progress);

        let handle = thread::spawn(move || {
            for update in rx {
                if let Ok(mut bar) = progress_clone.lock() {
                    match update {
                        ProgressUpdate::Step => {
                            let _ = bar.update(1);
                        }
                        ProgressUpdate::Description(desc) => {
                            bar.set_desc(Some(desc));
                            let _ = bar.update(0);
                        }
                    }
                }
            }
        });

        Self {
            total,
            count: AtomicUsize::new(0),
            sender: tx,
            progress_thread: Some(handle),
        }
    }

    /// Advance the bar by one step.
    pub fn inc(&self) {
        let new_count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if new_count > self.total {
            log::warn!("Progress bar received more updates than its total ({})", self.total);
            return;
        }
        let _ = self.sender.send(ProgressUpdate::Step);
    }

    pub fn update_description(&self, description: &str) {
        let _ = self
            .sender
            .send(ProgressUpdate::Description(description.to_string()));
    }

    /// Wait for pending updates to be drawn.
    pub fn finish(self) {
        drop(self.sender);
        if let Some(handle) = self.progress_thread {
            let _ = handle.join();
        }
    }
}
