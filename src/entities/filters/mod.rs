//! Per-panel filters
//!
//! Filters run after the ROI crop and before resize, so they only ever see
//! the visible pixels. Dispatch is by id through `FilterRegistry`; the
//! compositor never branches on filter identity.
//!
//! # Built-in filters
//!
//! | Id | Params | Reference |
//! |----|--------|-----------|
//! | `difference_heatmap` | `colormap`: JET, HOT, INFERNO | required |
//! | `brightness_contrast` | `brightness`, `contrast`: -1..1 | no |
//!
//! # Adding a filter
//!
//! 1. Implement `Filter` (and a `fn create(&FilterParams)` factory)
//! 2. Register it in `FilterRegistry::with_builtins()`

pub mod brightness;
pub mod heatmap;

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entities::frame::Frame;
use crate::entities::stream::VideoId;

/// String key/value parameters as entered by the user
pub type FilterParams = BTreeMap<String, String>;

/// Filter capability: pure function of the frame and an optional reference
pub trait Filter: Send + Sync {
    /// `reference` is the reference video's frame at the same index, cropped
    /// by the same ROI. Its resolution may differ from `frame`.
    fn apply(&self, frame: &Frame, reference: Option<&Frame>) -> Frame;
}

/// Registry listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterInfo {
    pub id: String,
    pub name: String,
    pub requires_reference: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    UnknownFilter(String),
    BadParam { key: String, value: String },
    MissingReference(String),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::UnknownFilter(id) => write!(f, "Unknown filter '{}'", id),
            FilterError::BadParam { key, value } => {
                write!(f, "Invalid filter parameter {}={}", key, value)
            }
            FilterError::MissingReference(id) => {
                write!(f, "Filter '{}' requires a reference video", id)
            }
        }
    }
}

impl std::error::Error for FilterError {}

/// Filter configuration for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterAssignment {
    pub filter_id: String,
    #[serde(default)]
    pub params: FilterParams,
    #[serde(default)]
    pub reference: Option<VideoId>,
    #[serde(default)]
    pub apply_to_all_except_reference: bool,
}

impl FilterAssignment {
    pub fn new(filter_id: &str) -> Self {
        Self {
            filter_id: filter_id.to_string(),
            params: FilterParams::new(),
            reference: None,
            apply_to_all_except_reference: false,
        }
    }

    pub fn with_reference(mut self, reference: VideoId) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn apply_to_all(mut self) -> Self {
        self.apply_to_all_except_reference = true;
        self
    }
}

/// Parse a float parameter in `[min, max]`, defaulting when absent
pub fn param_f32(params: &FilterParams, key: &str, default: f32, min: f32, max: f32) -> Result<f32, FilterError> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|v| (min..=max).contains(v))
            .ok_or_else(|| FilterError::BadParam {
                key: key.to_string(),
                value: raw.clone(),
            }),
    }
}

type Factory = fn(&FilterParams) -> Result<Box<dyn Filter>, FilterError>;

struct Registration {
    info: FilterInfo,
    factory: Factory,
}

/// Filters keyed by id, listed in registration order
pub struct FilterRegistry {
    filters: IndexMap<String, Registration>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FilterRegistry {
    pub fn empty() -> Self {
        Self {
            filters: IndexMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register(
            heatmap::ID,
            "Difference Heatmap",
            true,
            heatmap::DifferenceHeatmap::create,
        );
        reg.register(
            brightness::ID,
            "Brightness/Contrast",
            false,
            brightness::BrightnessContrast::create,
        );
        reg
    }

    pub fn register(&mut self, id: &str, name: &str, requires_reference: bool, factory: Factory) {
        let info = FilterInfo {
            id: id.to_string(),
            name: name.to_string(),
            requires_reference,
        };
        self.filters.insert(id.to_string(), Registration { info, factory });
    }

    pub fn list(&self) -> Vec<FilterInfo> {
        self.filters.values().map(|r| r.info.clone()).collect()
    }

    pub fn info(&self, id: &str) -> Option<&FilterInfo> {
        self.filters.get(id).map(|r| &r.info)
    }

    /// Instantiate a filter, validating its parameters
    pub fn create(&self, id: &str, params: &FilterParams) -> Result<Box<dyn Filter>, FilterError> {
        let reg = self
            .filters
            .get(id)
            .ok_or_else(|| FilterError::UnknownFilter(id.to_string()))?;
        (reg.factory)(params)
    }

    /// Validate an assignment against the registry
    pub fn validate(&self, assignment: &FilterAssignment) -> Result<(), FilterError> {
        let info = self
            .info(&assignment.filter_id)
            .ok_or_else(|| FilterError::UnknownFilter(assignment.filter_id.clone()))?;
        if info.requires_reference && assignment.reference.is_none() {
            return Err(FilterError::MissingReference(assignment.filter_id.clone()));
        }
        self.create(&assignment.filter_id, &assignment.params).map(|_| ())
    }

    /// One-shot `apply(id, params, frame, reference?)`
    pub fn apply(
        &self,
        id: &str,
        params: &FilterParams,
        frame: &Frame,
        reference: Option<&Frame>,
    ) -> Result<Frame, FilterError> {
        Ok(self.create(id, params)?.apply(frame, reference))
    }
}
