//! Free-hand drawing against a set of reference images.

use std::collections::VecDeque;

use url::Url;

use super::{Challenge, ChallengeError, require_live};
use crate::challenges::core::{
    BehaviorReport, ChallengeInstance, ChallengeKind, ChallengePayload, ChallengeSubmission,
    IssuedChallenge, VerifyVerdict,
};
use crate::config::WidgetConfig;
use crate::modules::canvas::{CanvasSnapshot, DrawingSurface, RasterCanvas};
use crate::modules::collectors::{StrokeCollector, StrokeMetrics, StrokePoint};
use crate::modules::telemetry::{Millis, PageEvents};

/// One undo step: the pixels as they were before the stroke was drawn.
#[derive(Debug, Clone)]
struct StrokeEntry {
    snapshot: CanvasSnapshot,
    metrics: StrokeMetrics,
}

#[derive(Debug)]
pub struct HandwritingChallenge {
    instance: Option<ChallengeInstance>,
    canvas: Box<dyn DrawingSurface>,
    collector: StrokeCollector,
    history: VecDeque<StrokeEntry>,
    pending_snapshot: Option<CanvasSnapshot>,
    completed_strokes: usize,
    max_history: usize,
    max_references: usize,
}

impl HandwritingChallenge {
    pub fn from_config(config: &WidgetConfig, now: Millis) -> Self {
        Self::with_surface(
            Box::new(RasterCanvas::new(config.canvas_width, config.canvas_height)),
            config,
            now,
        )
    }

    pub fn with_surface(canvas: Box<dyn DrawingSurface>, config: &WidgetConfig, now: Millis) -> Self {
        let mut collector = StrokeCollector::new(config.hesitation_speed_threshold, now);
        collector.start_tracking(now);
        Self {
            instance: None,
            canvas,
            collector,
            history: VecDeque::new(),
            pending_snapshot: None,
            completed_strokes: 0,
            max_history: config.max_undo_history.max(1),
            max_references: config.max_reference_images,
        }
    }

    /// Reference images to copy, capped at the configured limit.
    pub fn references(&self) -> &[Url] {
        match self.instance.as_ref().map(|instance| &instance.payload) {
            Some(ChallengePayload::Handwriting { samples }) => {
                &samples[..samples.len().min(self.max_references)]
            }
            _ => &[],
        }
    }

    pub fn start_stroke(&mut self, x: f64, y: f64, timestamp: Millis) -> Result<(), ChallengeError> {
        require_live(self.instance.as_ref())?;
        self.pending_snapshot = Some(self.canvas.snapshot());
        self.collector.start_stroke(StrokePoint::new(x, y, timestamp));
        Ok(())
    }

    /// Extend the open stroke and ink the new segment.
    pub fn add_point(&mut self, x: f64, y: f64, timestamp: Millis) -> Result<(), ChallengeError> {
        let Some(last) = self.collector.last_point() else {
            return Err(ChallengeError::NoStroke);
        };
        if self.collector.add_point(StrokePoint::new(x, y, timestamp)) {
            self.canvas.draw_segment((last.x, last.y), (x, y));
        }
        Ok(())
    }

    /// Close the open stroke. A single-point stroke leaves no trace in the
    /// history or on the surface.
    pub fn end_stroke(&mut self) -> Result<Option<StrokeMetrics>, ChallengeError> {
        let Some(snapshot) = self.pending_snapshot.take() else {
            return Err(ChallengeError::NoStroke);
        };
        let Some(metrics) = self.collector.end_stroke() else {
            self.canvas.restore(&snapshot)?;
            return Ok(None);
        };

        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(StrokeEntry {
            snapshot,
            metrics: metrics.clone(),
        });
        self.completed_strokes += 1;
        Ok(Some(metrics))
    }

    /// Restore the surface to before the last completed stroke. Returns
    /// `false` when there is nothing left to undo.
    pub fn undo(&mut self) -> Result<bool, ChallengeError> {
        if self.pending_snapshot.is_some() {
            return Ok(false);
        }
        let Some(entry) = self.history.pop_back() else {
            return Ok(false);
        };
        self.canvas.restore(&entry.snapshot)?;
        self.collector.track_undo();
        self.completed_strokes = self.completed_strokes.saturating_sub(1);
        log::trace!(
            "undid stroke of {:.1}px, {} strokes remain",
            entry.metrics.length,
            self.completed_strokes
        );
        Ok(true)
    }

    /// Wipe the surface and stroke history, abandoning any open stroke. The
    /// instance and its TTL stay.
    pub fn clear(&mut self) {
        self.collector.cancel_stroke();
        self.canvas.clear();
        self.history.clear();
        self.pending_snapshot = None;
        self.completed_strokes = 0;
    }

    pub fn stroke_history_len(&self) -> usize {
        self.history.len()
    }

    pub fn completed_strokes(&self) -> usize {
        self.completed_strokes
    }

    pub fn canvas_snapshot(&self) -> CanvasSnapshot {
        self.canvas.snapshot()
    }

    pub fn collector(&self) -> &StrokeCollector {
        &self.collector
    }

    fn discard(&mut self) -> Option<ChallengeInstance> {
        self.clear();
        self.instance.take()
    }
}

impl Challenge for HandwritingChallenge {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Handwriting
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
        if self.completed_strokes == 0 {
            return Err(ChallengeError::EmptyDrawing);
        }
        Ok(ChallengeSubmission::Handwriting {
            challenge_id: instance.challenge_id.clone(),
            image_base64: self.canvas.export_data_url()?,
        })
    }

    fn on_verdict(&mut self, verdict: &VerifyVerdict, _now: Millis) {
        self.collector.set_verification_result(verdict.success);
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
            ChallengeKind::Handwriting,
            self.collector.to_report(),
            PageEvents::closed_at(self.collector.start_time, now),
        )
    }

    fn finish(&mut self, now: Millis) {
        self.collector.stop_tracking(now);
    }
}
