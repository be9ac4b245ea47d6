//! N×N grid over a single base image.

use std::collections::BTreeSet;

use url::Url;

use super::{Challenge, ChallengeError, require_live};
use crate::challenges::core::{
    BehaviorReport, ChallengeInstance, ChallengeKind, ChallengePayload, ChallengeSubmission,
    IssuedChallenge, VerifyVerdict,
};
use crate::modules::collectors::GridBehaviorCollector;
use crate::modules::telemetry::{Millis, PageEvents};

#[derive(Debug)]
pub struct ImageGridChallenge {
    instance: Option<ChallengeInstance>,
    selection: BTreeSet<u32>,
    collector: GridBehaviorCollector,
}

impl ImageGridChallenge {
    pub fn new(grid_size: u32, now: Millis) -> Self {
        let mut collector = GridBehaviorCollector::new(grid_size, now);
        collector.start_tracking(now);
        Self {
            instance: None,
            selection: BTreeSet::new(),
            collector,
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.collector.grid_size()
    }

    pub fn image_url(&self) -> Option<&Url> {
        match self.instance.as_ref().map(|instance| &instance.payload) {
            Some(ChallengePayload::Image { image_url, .. }) => Some(image_url),
            _ => None,
        }
    }

    pub fn question(&self) -> Option<&str> {
        match self.instance.as_ref().map(|instance| &instance.payload) {
            Some(ChallengePayload::Image { question, .. }) => Some(question),
            _ => None,
        }
    }

    /// Flip `cell_id` in the selection. `x`/`y` locate the click inside the
    /// tile, normalized to 0..1. Returns the new membership.
    pub fn toggle_cell(
        &mut self,
        cell_id: u32,
        x: f64,
        y: f64,
        timestamp: Millis,
    ) -> Result<bool, ChallengeError> {
        require_live(self.instance.as_ref())?;
        if cell_id >= self.collector.cell_count() {
            return Err(ChallengeError::UnknownTile(cell_id));
        }

        let selected = if self.selection.remove(&cell_id) {
            false
        } else {
            self.selection.insert(cell_id);
            true
        };
        self.collector.track_click(cell_id, x, y, timestamp);
        self.collector.track_selection(cell_id, selected);
        Ok(selected)
    }

    pub fn hover(&mut self, cell_id: u32, entering: bool, timestamp: Millis) {
        self.collector.track_hover(cell_id, entering, timestamp);
    }

    pub fn pointer_move(&mut self, x: f64, y: f64, width: f64, height: f64, timestamp: Millis) {
        self.collector.track_pointer_move(x, y, width, height, timestamp);
    }

    pub fn selection(&self) -> Vec<u32> {
        self.selection.iter().copied().collect()
    }

    pub fn collector(&self) -> &GridBehaviorCollector {
        &self.collector
    }

    fn discard(&mut self) -> Option<ChallengeInstance> {
        self.selection.clear();
        self.collector.clear_selection();
        self.instance.take()
    }
}

impl Challenge for ImageGridChallenge {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Image
    }

    fn instance(&self) -> Option<&ChallengeInstance> {
        self.instance.as_ref()
    }

    fn instance_mut(&mut self) -> Option<&mut ChallengeInstance> {
        self.instance.as_mut()
    }

    fn install(&mut self, issued: IssuedChallenge) {
        self.discard();
        self.instance = Some(ChallengeInstance::from_issued(issued));
    }

    fn prepare_submit(&self) -> Result<ChallengeSubmission, ChallengeError> {
        let instance = require_live(self.instance.as_ref())?;
        Ok(ChallengeSubmission::Image {
            challenge_id: instance.challenge_id.clone(),
            selections: self.selection(),
        })
    }

    fn on_verdict(&mut self, verdict: &VerifyVerdict, now: Millis) {
        self.collector.track_verify_attempt(verdict.success, now);
        if !verdict.success {
            self.discard();
        }
    }

    fn on_expire(&mut self) -> Option<ChallengeInstance> {
        self.discard()
    }

    fn refresh(&mut self) -> Option<ChallengeInstance> {
        self.collector.track_refresh();
        self.discard()
    }

    fn behavior_report(&self, now: Millis) -> BehaviorReport {
        BehaviorReport::new(
            ChallengeKind::Image,
            self.collector.to_report(),
            PageEvents::closed_at(self.collector.start_time, now),
        )
    }

    fn finish(&mut self, now: Millis) {
        self.collector.stop_tracking(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn issued(id: &str) -> IssuedChallenge {
        IssuedChallenge {
            challenge_id: id.into(),
            ttl: Duration::from_secs(45),
            payload: ChallengePayload::Image {
                image_url: Url::parse("https://cdn.example.com/grid.png").unwrap(),
                question: "Select all bikes".into(),
            },
        }
    }

    #[test]
    fn toggle_requires_live_challenge() {
        let mut challenge = ImageGridChallenge::new(3, 0);
        assert!(matches!(
            challenge.toggle_cell(0, 0.5, 0.5, 1),
            Err(ChallengeError::NoActiveChallenge)
        ));
        challenge.install(issued("i-1"));
        assert!(challenge.toggle_cell(0, 0.5, 0.5, 2).unwrap());
        assert!(matches!(
            challenge.toggle_cell(9, 0.5, 0.5, 3),
            Err(ChallengeError::UnknownTile(9))
        ));
    }

    #[test]
    fn toggling_twice_deselects_and_submission_carries_selection() {
        let mut challenge = ImageGridChallenge::new(3, 0);
        challenge.install(issued("i-1"));
        challenge.toggle_cell(2, 0.4, 0.6, 10).unwrap();
        challenge.toggle_cell(5, 0.5, 0.5, 20).unwrap();
        assert!(!challenge.toggle_cell(2, 0.5, 0.5, 30).unwrap());

        assert_eq!(
            challenge.prepare_submit().unwrap(),
            ChallengeSubmission::Image {
                challenge_id: "i-1".into(),
                selections: vec![5],
            }
        );
        let clicks = &challenge.collector().board.image_interactions[&2].clicks;
        assert_eq!(clicks.len(), 2);
    }

    #[test]
    fn failed_verdict_clears_selection_and_discards_instance() {
        let mut challenge = ImageGridChallenge::new(3, 0);
        challenge.install(issued("i-1"));
        challenge.toggle_cell(1, 0.5, 0.5, 10).unwrap();
        challenge.on_verdict(
            &VerifyVerdict {
                success: false,
                ..Default::default()
            },
            100,
        );

        assert!(challenge.selection().is_empty());
        assert!(challenge.instance().is_none());
        assert_eq!(challenge.collector().verify_attempts, 1);
        assert_eq!(challenge.collector().final_selection, vec![1]);
    }

    #[test]
    fn refresh_counts_and_discards() {
        let mut challenge = ImageGridChallenge::new(3, 0);
        challenge.install(issued("i-1"));
        let discarded = challenge.refresh().unwrap();
        assert_eq!(discarded.challenge_id, "i-1");
        assert_eq!(challenge.collector().refresh_count, 1);
        assert!(challenge.prepare_submit().is_err());
    }
}
