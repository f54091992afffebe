use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
    Error,
}

/// How a segment got its translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    TmExact,
    Ai,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentOutcome {
    pub segment_index: usize,
    pub kind: OutcomeKind,
    pub target_text: String,
    pub score: Option<f32>,
}

/// Observable job state. Counters only reflect committed segments, so a
/// snapshot taken after a crash or cancel matches what storage holds.
#[derive(Debug, Clone, Serialize)]
pub struct PretranslationJob {
    pub document_id: String,
    pub status: JobStatus,
    pub current_segment: usize,
    pub total_segments: usize,
    pub tm_applied: usize,
    pub ai_applied: usize,
    pub total_processed: usize,
    pub progress_percentage: f32,
    pub current_message: String,
    pub results: Vec<SegmentOutcome>,
}

impl PretranslationJob {
    fn new(document_id: &str, total_segments: usize) -> Self {
        let mut job = Self {
            document_id: document_id.to_string(),
            status: JobStatus::Running,
            current_segment: 0,
            total_segments,
            tm_applied: 0,
            ai_applied: 0,
            total_processed: 0,
            progress_percentage: 0.0,
            current_message: "starting".to_string(),
            results: Vec::new(),
        };
        job.touch();
        job
    }

    fn touch(&mut self) {
        self.total_processed = self.tm_applied + self.ai_applied;
        self.progress_percentage = if self.total_segments == 0 {
            100.0
        } else {
            (self.total_processed as f32 / self.total_segments as f32) * 100.0
        };
    }
}

/// Partial counter update; absent fields keep their value. Counters are
/// absolute, not deltas.
#[derive(Debug, Default)]
pub struct JobUpdate {
    pub current_segment: Option<usize>,
    pub tm_applied: Option<usize>,
    pub ai_applied: Option<usize>,
    pub message: Option<String>,
}

/// In-process registry of pretranslation jobs, keyed by document id.
///
/// Cancellation flags live outside the job map so a cancel request lands
/// without contending on the snapshot lock the pipeline writes through.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, PretranslationJob>>,
    cancel_flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh run for the document, resetting any previous job
    /// state and cancellation flag.
    pub fn create(&self, document_id: &str, total_segments: usize) {
        self.jobs
            .write()
            .insert(document_id.to_string(), PretranslationJob::new(document_id, total_segments));
        self.cancel_flags
            .write()
            .insert(document_id.to_string(), Arc::new(AtomicBool::new(false)));
    }

    pub fn update(&self, document_id: &str, update: JobUpdate) {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(document_id) else {
            return;
        };
        if let Some(current) = update.current_segment {
            job.current_segment = current;
        }
        if let Some(tm) = update.tm_applied {
            job.tm_applied = tm;
        }
        if let Some(ai) = update.ai_applied {
            job.ai_applied = ai;
        }
        if let Some(message) = update.message {
            job.current_message = message;
        }
        job.touch();
    }

    pub fn append_result(&self, document_id: &str, outcome: SegmentOutcome) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(document_id) {
            job.results.push(outcome);
        }
    }

    /// Marks a running job as finished. A job already cancelled keeps its
    /// CANCELLED status; the pipeline reaches this after draining either way.
    pub fn complete(&self, document_id: &str) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(document_id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Completed;
                job.current_message = "completed".to_string();
            }
            job.current_segment = job.total_segments;
            job.touch();
        }
    }

    /// Requests cooperative cancellation. Returns false when no run is
    /// active for the document.
    pub fn cancel(&self, document_id: &str) -> bool {
        let flags = self.cancel_flags.read();
        let Some(flag) = flags.get(document_id) else {
            return false;
        };
        flag.store(true, Ordering::SeqCst);
        drop(flags);

        let mut jobs = self.jobs.write();
        match jobs.get_mut(document_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Cancelled;
                job.current_message = "cancellation requested".to_string();
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    pub fn is_cancelled(&self, document_id: &str) -> bool {
        self.cancel_flags
            .read()
            .get(document_id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn set_error(&self, document_id: &str, message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(document_id) {
            job.status = JobStatus::Error;
            job.current_message = message.into();
        }
    }

    pub fn get(&self, document_id: &str) -> Option<PretranslationJob> {
        self.jobs.read().get(document_id).cloned()
    }

    pub fn clear(&self, document_id: &str) {
        self.jobs.write().remove(document_id);
        self.cancel_flags.write().remove(document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_counters_and_progress() {
        let registry = JobRegistry::new();
        registry.create("doc-1", 10);

        registry.update(
            "doc-1",
            JobUpdate {
                current_segment: Some(5),
                tm_applied: Some(3),
                ai_applied: Some(2),
                message: Some("scanning".to_string()),
            },
        );
        let job = registry.get("doc-1").unwrap();
        assert_eq!(job.total_processed, 5);
        assert!((job.progress_percentage - 50.0).abs() < 0.01);
        assert_eq!(job.status, JobStatus::Running);

        registry.complete("doc-1");
        let job = registry.get("doc-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.current_segment, 10);
    }

    #[test]
    fn cancel_sets_flag_and_sticks() {
        let registry = JobRegistry::new();
        registry.create("doc-1", 4);

        assert!(!registry.is_cancelled("doc-1"));
        assert!(registry.cancel("doc-1"));
        assert!(registry.is_cancelled("doc-1"));

        // Drain still updates counters, then completion keeps CANCELLED.
        registry.update(
            "doc-1",
            JobUpdate {
                tm_applied: Some(2),
                ..JobUpdate::default()
            },
        );
        registry.complete("doc-1");
        let job = registry.get("doc-1").unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.total_processed, 2);

        assert!(!registry.cancel("doc-1"));
        assert!(!registry.cancel("missing"));
    }

    #[test]
    fn new_run_resets_previous_state() {
        let registry = JobRegistry::new();
        registry.create("doc-1", 4);
        registry.cancel("doc-1");

        registry.create("doc-1", 6);
        assert!(!registry.is_cancelled("doc-1"));
        let job = registry.get("doc-1").unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.total_segments, 6);
        assert!(job.results.is_empty());
    }

    #[test]
    fn results_accumulate() {
        let registry = JobRegistry::new();
        registry.create("doc-1", 2);
        registry.append_result(
            "doc-1",
            SegmentOutcome {
                segment_index: 0,
                kind: OutcomeKind::TmExact,
                target_text: "Hallo".to_string(),
                score: Some(100.0),
            },
        );
        registry.append_result(
            "doc-1",
            SegmentOutcome {
                segment_index: 1,
                kind: OutcomeKind::Fallback,
                target_text: "World".to_string(),
                score: None,
            },
        );
        let job = registry.get("doc-1").unwrap();
        assert_eq!(job.results.len(), 2);
        assert_eq!(job.results[0].kind, OutcomeKind::TmExact);
    }
}
