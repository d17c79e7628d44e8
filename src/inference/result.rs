use crate::geometry::Rect;

/// One ranked classification of a detected object.
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub text: String,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f32,
    /// Class index in the model's label map.
    pub index: u32,
}

impl Label {
    pub fn new(text: impl Into<String>, confidence: f32, index: u32) -> Self {
        Self {
            text: text.into(),
            confidence,
            index,
        }
    }
}

/// Object reported by the classifier for one image.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedObject {
    /// Bounding box in the submitted image's coordinates.
    pub bounding_box: Rect,
    /// Ranked best-first. Empty when nothing passed the confidence threshold.
    pub labels: Vec<Label>,
    /// Opaque tracking id (stream mode only).
    pub tracking_id: Option<u32>,
}

impl DetectedObject {
    pub fn new(bounding_box: Rect) -> Self {
        Self {
            bounding_box,
            labels: Vec::new(),
            tracking_id: None,
        }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    pub fn with_tracking_id(mut self, id: u32) -> Self {
        self.tracking_id = Some(id);
        self
    }

    pub fn top_label(&self) -> Option<&Label> {
        self.labels.first()
    }
}

/// Result of one classification request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub objects: Vec<DetectedObject>,
}

impl DetectionResult {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self { objects }
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectedObject> {
        self.objects.iter()
    }
}
