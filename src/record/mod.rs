pub mod builder;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

/// Sort key for works with no known year.
pub const YEAR_SORT_UNKNOWN: i32 = 1000;
/// Death year for artists still alive or of unknown death.
pub const ARTIST_DEATH_UNKNOWN: i32 = 3000;

/// One persisted artwork, as written to the store.
///
/// On disk the record is a single flat JSON object; `info` holds the fields
/// derived from the dataset, `analysis` the face-analysis enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkRecord {
    #[serde(flatten)]
    pub info: ArtworkInfo,
    #[serde(flatten)]
    pub analysis: Analysis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_color: Option<String>,
}

impl ArtworkRecord {
    pub fn new(info: ArtworkInfo) -> Self {
        Self {
            info,
            analysis: Analysis::Pending,
            dominant_color: None,
        }
    }

    pub fn slug(&self) -> &str {
        &self.info.slug
    }

    /// Replace every dataset-derived field, keeping enrichment and color.
    pub fn refresh(&mut self, info: ArtworkInfo) {
        self.info = info;
    }

    pub fn is_analyzed(&self) -> bool {
        matches!(self.analysis, Analysis::Analyzed(_))
    }

    /// The fractional face box, if analysis found a face.
    pub fn face_rectangle(&self) -> Option<&FaceRect> {
        match &self.analysis {
            Analysis::Analyzed(FaceAnalysis { face: Some(face), .. }) => Some(&face.face_rectangle),
            _ => None,
        }
    }
}

/// Fields built from a dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkInfo {
    pub slug: String,
    pub artist: String,
    pub title: String,
    pub year: String,
    pub year_sort: i32,
    pub medium: String,
    pub collection: String,
    pub artist_death: i32,
    pub marcantonio: bool,
    pub nudes: bool,
    pub by_woman: bool,
    pub by_man: bool,
    pub dimension: Dimension,
    /// File name of the web-resolution image.
    pub img: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionUnit {
    Cm,
    Px,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(serialize_with = "whole_as_integer")]
    pub width: f64,
    #[serde(serialize_with = "whole_as_integer")]
    pub height: f64,
    pub unit: DimensionUnit,
}

/// Whole numbers are written as JSON integers (`1024`, not `1024.0`).
fn whole_as_integer<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Face box as fractions of the source image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Attributes of the face kept for a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAttributes {
    pub face_rectangle: FaceRect,
    pub gender: String,
    pub age: u32,
    pub ethnicity: String,
    pub emotions: BTreeMap<String, f64>,
}

/// Result of a completed face analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnalysis {
    /// Number of faces detected; zero is a valid, final answer.
    pub faces: u32,
    /// First-returned face, present when `faces > 0`.
    pub face: Option<FaceAttributes>,
}

/// Enrichment state of a record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "AnalysisFields", into = "AnalysisFields")]
pub enum Analysis {
    /// No analysis has completed yet; the merger will retry it.
    #[default]
    Pending,
    Analyzed(FaceAnalysis),
}

/// Flat on-disk shape of [`Analysis`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct AnalysisFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    faces: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    face_rectangle: Option<FaceRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ethnicity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    emotions: Option<BTreeMap<String, f64>>,
}

impl From<AnalysisFields> for Analysis {
    fn from(f: AnalysisFields) -> Self {
        let Some(faces) = f.faces else {
            return Analysis::Pending;
        };
        let face = f.face_rectangle.map(|face_rectangle| FaceAttributes {
            face_rectangle,
            gender: f.gender.unwrap_or_default(),
            age: f.age.unwrap_or_default(),
            ethnicity: f.ethnicity.unwrap_or_default(),
            emotions: f.emotions.unwrap_or_default(),
        });
        Analysis::Analyzed(FaceAnalysis { faces, face })
    }
}

impl From<Analysis> for AnalysisFields {
    fn from(a: Analysis) -> Self {
        match a {
            Analysis::Pending => AnalysisFields::default(),
            Analysis::Analyzed(FaceAnalysis { faces, face: None }) => AnalysisFields {
                faces: Some(faces),
                ..Default::default()
            },
            Analysis::Analyzed(FaceAnalysis {
                faces,
                face: Some(face),
            }) => AnalysisFields {
                faces: Some(faces),
                face_rectangle: Some(face.face_rectangle),
                gender: Some(face.gender),
                age: Some(face.age),
                ethnicity: Some(face.ethnicity),
                emotions: Some(face.emotions),
            },
        }
    }
}
