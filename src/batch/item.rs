//! Batch data model: queued items, operator decisions and run bookkeeping.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One queued media file. Identity is its position in the submitted list;
/// the same path may appear more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub path: PathBuf,
    pub index: usize,
}

impl MediaItem {
    /// Number a list of paths in submission order.
    pub fn from_paths<I, P>(paths: I) -> Vec<MediaItem>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| MediaItem { path: path.into(), index })
            .collect()
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// What the operator decided about a finished transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    SaveAndContinue,
    SaveAndStop,
    DiscardAndStop,
}

impl Decision {
    pub fn saves(self) -> bool {
        matches!(self, Decision::SaveAndContinue | Decision::SaveAndStop)
    }

    pub fn stops(self) -> bool {
        matches!(self, Decision::SaveAndStop | Decision::DiscardAndStop)
    }
}

/// Lifecycle phase of the orchestrator.
///
/// ```text
/// Idle → Running ⇄ AwaitingConfirmation → Completed → Idle
///           ↘ Cancelling ↗        (fault) → Failed → Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Running,
    AwaitingConfirmation,
    Cancelling,
    Completed,
    Failed,
}

impl BatchPhase {
    /// Whether a run owns the orchestrator in this phase.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BatchPhase::Running | BatchPhase::AwaitingConfirmation | BatchPhase::Cancelling
        )
    }
}

/// One accepted transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub index: usize,
    pub path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub text: String,
}

/// Accepted transcripts of one run, keyed by item index, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchResults(Vec<ItemResult>);

impl BatchResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. Each index is visited once per run, so this only grows.
    pub fn insert(&mut self, result: ItemResult) {
        self.0.push(result);
    }

    pub fn get(&self, index: usize) -> Option<&ItemResult> {
        self.0.iter().find(|r| r.index == index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemResult> {
        self.0.iter()
    }
}

/// The mutable unit of work, owned by the worker for one run.
#[derive(Debug)]
pub struct BatchRun {
    pub id: uuid::Uuid,
    pub items: Vec<MediaItem>,
    /// `None` until the first item is dequeued; only moves forward.
    pub current_index: Option<usize>,
    pub results: BatchResults,
}

impl BatchRun {
    pub fn new(items: Vec<MediaItem>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            items,
            current_index: None,
            results: BatchResults::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Move to `index`. Revisiting or going backwards is a fault.
    pub fn advance_to(&mut self, index: usize) -> Result<(), String> {
        match self.current_index {
            Some(current) if index <= current => Err(format!(
                "Queue order violated: item {} dequeued after item {}",
                index, current
            )),
            _ => {
                self.current_index = Some(index);
                Ok(())
            }
        }
    }

    /// Percent of the batch finished before the current item started.
    pub fn percent_before(&self, position: usize) -> u8 {
        if self.items.is_empty() {
            return 100;
        }
        ((position * 100) / self.items.len()).min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_are_numbered_in_order() {
        let items = MediaItem::from_paths(["/a/one.mp3", "/a/two.mp3", "/a/one.mp3"]);
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].index, 2);
        assert_eq!(items[2].display_name(), "one.mp3");
    }

    #[test]
    fn test_decision_flags() {
        assert!(Decision::SaveAndContinue.saves() && !Decision::SaveAndContinue.stops());
        assert!(Decision::SaveAndStop.saves() && Decision::SaveAndStop.stops());
        assert!(!Decision::DiscardAndStop.saves() && Decision::DiscardAndStop.stops());
        assert_eq!(
            serde_json::to_string(&Decision::SaveAndStop).unwrap(),
            "\"save_and_stop\""
        );
    }

    #[test]
    fn test_current_index_only_moves_forward() {
        let mut run = BatchRun::new(MediaItem::from_paths(["a", "b", "c"]));
        assert_eq!(run.current_index, None);
        run.advance_to(0).unwrap();
        run.advance_to(2).unwrap();
        assert!(run.advance_to(1).is_err());
        assert!(run.advance_to(2).is_err());
        assert_eq!(run.current_index, Some(2));
    }

    #[test]
    fn test_results_keep_duplicate_paths_apart() {
        let mut results = BatchResults::new();
        for index in 0..2 {
            results.insert(ItemResult {
                index,
                path: PathBuf::from("same.mp3"),
                output_path: None,
                text: format!("take {}", index),
            });
        }
        assert_eq!(results.len(), 2);
        assert_eq!(results.get(1).unwrap().text, "take 1");
    }

    #[test]
    fn test_percent_before() {
        let run = BatchRun::new(MediaItem::from_paths(["a", "b", "c", "d"]));
        assert_eq!(run.percent_before(0), 0);
        assert_eq!(run.percent_before(2), 50);
        assert_eq!(BatchRun::new(vec![]).percent_before(0), 100);
    }
}
