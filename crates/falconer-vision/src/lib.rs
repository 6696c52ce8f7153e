pub mod evidence;
pub mod intercept;
pub mod pilot;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub use intercept::{InterceptAction, InterceptController};
pub use pilot::{InterceptPilot, VisionEvent};

/// One detector box, in pixels of the analysed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub conf: f32,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

/// Packed RGB8 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl Frame {
    pub fn blank(width: u32, height: u32) -> Self {
        Self { width, height, rgb: vec![0; (width * height * 3) as usize] }
    }
}

/// Object detector run once per frame. May block.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Camera or video feed. `Ok(None)` ends the stream. May block.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterceptConfig {
    /// Target class by name, resolved against `class_names`.
    pub target_class: Option<String>,
    /// Target class by id; used when the name is absent or unknown.
    pub target_class_id: Option<i32>,
    #[serde(default)]
    pub class_names: Vec<String>,
    pub conf_threshold: Option<f32>,

    pub frame_w: Option<u32>,
    pub frame_h: Option<u32>,
    pub frame_hz: Option<f32>,

    /// Centroid error (px) treated as centred.
    pub deadzone_px: Option<f32>,
    pub dwell_ms: Option<u64>,
    pub lost_ms: Option<u64>,
    /// m/s per pixel of horizontal error.
    pub lateral_gain: Option<f32>,
    /// m/s per pixel of vertical error.
    pub vertical_gain: Option<f32>,
    pub max_speed: Option<f32>,
    pub geotag_hold_ms: Option<u64>,

    /// Where evidence images and geotags.jsonl go. Nothing is written when unset.
    pub evidence_dir: Option<PathBuf>,
}

impl InterceptConfig {
    pub fn target_class(&self) -> i32 {
        self.target_class
            .as_ref()
            .and_then(|name| self.class_names.iter().position(|c| c == name))
            .map(|i| i as i32)
            .or(self.target_class_id)
            .unwrap_or(0)
    }

    /// Rejects a class name that `class_names` does not know unless
    /// `target_class_id` covers it.
    pub fn check_target_class(&self) -> Result<()> {
        let Some(name) = &self.target_class else {
            return Ok(());
        };
        if self.class_names.iter().any(|c| c == name) {
            return Ok(());
        }
        match self.target_class_id {
            Some(id) => {
                warn!("intercept.target_class {:?} not in class_names; using target_class_id {}", name, id);
                Ok(())
            }
            None => anyhow::bail!(
                "intercept.target_class {:?} not in class_names and no target_class_id set",
                name
            ),
        }
    }

    pub fn conf_threshold(&self) -> f32 {
        self.conf_threshold.unwrap_or(0.5)
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_w.unwrap_or(320), self.frame_h.unwrap_or(240))
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.frame_hz.unwrap_or(15.0).clamp(1.0, 60.0))
    }

    pub fn deadzone(&self) -> f32 {
        self.deadzone_px.unwrap_or(30.0)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms.unwrap_or(1000))
    }

    pub fn lost_timeout(&self) -> Duration {
        Duration::from_millis(self.lost_ms.unwrap_or(2000))
    }

    pub fn gains(&self) -> (f32, f32) {
        (self.lateral_gain.unwrap_or(0.005), self.vertical_gain.unwrap_or(0.002))
    }

    pub fn max_speed(&self) -> f32 {
        self.max_speed.unwrap_or(1.0)
    }

    pub fn geotag_hold(&self) -> Duration {
        Duration::from_millis(self.geotag_hold_ms.unwrap_or(1000))
    }
}

/// Most confident detection of the target class above the threshold.
pub fn best_target(dets: &[Detection], class_id: i32, min_conf: f32) -> Option<&Detection> {
    dets.iter()
        .filter(|d| d.class_id == class_id && d.conf >= min_conf)
        .max_by(|a, b| a.conf.partial_cmp(&b.conf).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: i32, conf: f32) -> Detection {
        Detection { class_id, conf, cx: 10.0, cy: 10.0, w: 5.0, h: 5.0 }
    }

    #[test]
    fn test_target_class_resolution() {
        let cfg = InterceptConfig {
            target_class: Some("car".into()),
            class_names: vec!["person".into(), "car".into()],
            ..Default::default()
        };
        assert_eq!(cfg.target_class(), 1);

        let cfg = InterceptConfig { target_class: Some("boat".into()), target_class_id: Some(7), ..Default::default() };
        assert_eq!(cfg.target_class(), 7);
        assert_eq!(InterceptConfig::default().target_class(), 0);
    }

    #[test]
    fn test_unknown_target_class_rejected() {
        let cfg = InterceptConfig {
            target_class: Some("boat".into()),
            class_names: vec!["person".into(), "car".into()],
            ..Default::default()
        };
        let err = cfg.check_target_class().unwrap_err();
        assert!(err.to_string().contains("boat"));

        let cfg = InterceptConfig { target_class_id: Some(7), ..cfg };
        assert!(cfg.check_target_class().is_ok());
        let cfg = InterceptConfig { target_class: Some("car".into()), target_class_id: None, ..cfg };
        assert!(cfg.check_target_class().is_ok());
        assert!(InterceptConfig::default().check_target_class().is_ok());
    }

    #[test]
    fn test_best_target() {
        let dets = vec![det(0, 0.6), det(1, 0.99), det(0, 0.8), det(0, 0.3)];
        assert_eq!(best_target(&dets, 0, 0.5).map(|d| d.conf), Some(0.8));
        assert!(best_target(&dets, 2, 0.5).is_none());
        assert!(best_target(&dets, 0, 0.9).is_none());
    }

    #[test]
    fn test_defaults() {
        let cfg = InterceptConfig::default();
        assert_eq!(cfg.frame_size(), (320, 240));
        assert_eq!(cfg.deadzone(), 30.0);
        assert_eq!(cfg.dwell(), Duration::from_secs(1));
        assert_eq!(cfg.gains(), (0.005, 0.002));
    }
}
