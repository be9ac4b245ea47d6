//! Multi-select over independently fetched images, driven by a subjective
//! question.

use super::{Challenge, ChallengeError, require_live};
use crate::challenges::core::{
    BehaviorReport, ChallengeInstance, ChallengeKind, ChallengePayload, ChallengeSubmission,
    ImageItem, IssuedChallenge, VerifyVerdict,
};
use crate::modules::collectors::AbstractBehaviorCollector;
use crate::modules::telemetry::{Millis, PageEvents};

#[derive(Debug)]
pub struct AbstractSelectChallenge {
    instance: Option<ChallengeInstance>,
    selection: Vec<u32>,
    collector: AbstractBehaviorCollector,
}

impl AbstractSelectChallenge {
    pub fn new(now: Millis) -> Self {
        let mut collector = AbstractBehaviorCollector::new(now);
        collector.start_tracking(now);
        Self {
            instance: None,
            selection: Vec::new(),
            collector,
        }
    }

    pub fn images(&self) -> &[ImageItem] {
        match self.instance.as_ref().map(|instance| &instance.payload) {
            Some(ChallengePayload::Abstract { images, .. }) => images,
            _ => &[],
        }
    }

    pub fn question(&self) -> Option<&str> {
        match self.instance.as_ref().map(|instance| &instance.payload) {
            Some(ChallengePayload::Abstract { question, .. }) => Some(question),
            _ => None,
        }
    }

    /// Flip `image_id` in the selection. Selection keeps click order.
    pub fn toggle_image(
        &mut self,
        image_id: u32,
        x: f64,
        y: f64,
        timestamp: Millis,
    ) -> Result<bool, ChallengeError> {
        require_live(self.instance.as_ref())?;
        if !self.images().iter().any(|image| image.id == image_id) {
            return Err(ChallengeError::UnknownTile(image_id));
        }

        let selected = match self.selection.iter().position(|id| *id == image_id) {
            Some(index) => {
                self.selection.remove(index);
                false
            }
            None => {
                self.selection.push(image_id);
                true
            }
        };
        self.collector.track_click(image_id, x, y, timestamp);
        self.collector.track_selection(image_id, selected);
        Ok(selected)
    }

    pub fn hover(&mut self, image_id: u32, entering: bool, timestamp: Millis) {
        self.collector.track_hover(image_id, entering, timestamp);
    }

    pub fn pointer_move(&mut self, x: f64, y: f64, width: f64, height: f64, timestamp: Millis) {
        self.collector.track_pointer_move(x, y, width, height, timestamp);
    }

    pub fn selection(&self) -> &[u32] {
        &self.selection
    }

    pub fn collector(&self) -> &AbstractBehaviorCollector {
        &self.collector
    }

    fn discard(&mut self) -> Option<ChallengeInstance> {
        self.selection.clear();
        self.collector.clear_selection();
        self.instance.take()
    }
}

impl Challenge for AbstractSelectChallenge {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Abstract
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
        Ok(ChallengeSubmission::Abstract {
            challenge_id: instance.challenge_id.clone(),
            selections: self.selection.clone(),
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
            ChallengeKind::Abstract,
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
    use url::Url;

    fn issued() -> IssuedChallenge {
        let image = |id: u32| ImageItem {
            id,
            url: Url::parse(&format!("https://cdn.example.com/{id}.png")).unwrap(),
        };
        IssuedChallenge {
            challenge_id: "a-1".into(),
            ttl: Duration::from_secs(45),
            payload: ChallengePayload::Abstract {
                images: vec![image(11), image(12), image(13)],
                question: "Which images feel warm?".into(),
            },
        }
    }

    #[test]
    fn selection_keeps_click_order_and_rejects_unknown_ids() {
        let mut challenge = AbstractSelectChallenge::new(0);
        challenge.install(issued());
        challenge.toggle_image(13, 0.5, 0.5, 10).unwrap();
        challenge.toggle_image(11, 0.5, 0.5, 20).unwrap();
        assert_eq!(challenge.selection(), &[13, 11]);
        assert!(matches!(
            challenge.toggle_image(99, 0.5, 0.5, 30),
            Err(ChallengeError::UnknownTile(99))
        ));

        challenge.toggle_image(13, 0.5, 0.5, 40).unwrap();
        assert_eq!(challenge.collector().board.deselection_order, vec![13]);
        assert_eq!(
            challenge.prepare_submit().unwrap(),
            ChallengeSubmission::Abstract {
                challenge_id: "a-1".into(),
                selections: vec![11],
            }
        );
    }

    #[test]
    fn report_is_tagged_as_abstract() {
        let mut challenge = AbstractSelectChallenge::new(0);
        challenge.install(issued());
        challenge.hover(12, true, 5);
        challenge.hover(12, false, 65);
        let report = challenge.behavior_report(100);
        assert_eq!(report.captcha_type, Some(ChallengeKind::Abstract));
        assert_eq!(
            report.behavior_data["imageInteractions"]["12"]["totalHoverTime"],
            60
        );
    }
}
