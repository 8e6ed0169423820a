//! Face++ `detect` API client.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use ureq::unversioned::multipart::Form;

use super::{DetectedFace, FaceAnalyzer, FaceDetection, FaceError, PixelRect};
use crate::config::FaceApiConfig;

/// Detect response, only the fields we keep.
#[derive(Debug, Deserialize)]
struct DetectResponse {
    face_num: u32,
    #[serde(default)]
    faces: Vec<ApiFace>,
}

#[derive(Debug, Deserialize)]
struct ApiFace {
    face_rectangle: ApiRect,
    #[serde(default)]
    attributes: Option<ApiAttributes>,
}

#[derive(Debug, Deserialize)]
struct ApiRect {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiAttributes {
    gender: Option<ApiValue<String>>,
    age: Option<ApiValue<u32>>,
    ethnicity: Option<ApiValue<String>>,
    emotion: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
struct ApiValue<T> {
    value: T,
}

impl From<ApiFace> for DetectedFace {
    fn from(f: ApiFace) -> Self {
        let attrs = f.attributes.unwrap_or_default();
        DetectedFace {
            rect: PixelRect {
                left: f.face_rectangle.left,
                top: f.face_rectangle.top,
                width: f.face_rectangle.width,
                height: f.face_rectangle.height,
            },
            gender: attrs.gender.map(|v| v.value).unwrap_or_default(),
            age: attrs.age.map(|v| v.value).unwrap_or_default(),
            ethnicity: attrs.ethnicity.map(|v| v.value).unwrap_or_default(),
            emotions: attrs.emotion.unwrap_or_default(),
        }
    }
}

/// Face++ client. Requests are sent one at a time and block.
pub struct FacePlusPlus {
    url: String,
    api_key: String,
    api_secret: String,
    attributes: String,
    agent: ureq::Agent,
}

impl FacePlusPlus {
    pub fn new(config: &FaceApiConfig) -> Result<Self, FaceError> {
        let (Some(api_key), Some(api_secret)) = (&config.api_key, &config.api_secret) else {
            return Err(FaceError::MissingCredentials);
        };
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();
        Ok(Self {
            url: config.url.clone(),
            api_key: api_key.clone(),
            api_secret: api_secret.clone(),
            attributes: config.attributes.clone(),
            agent,
        })
    }
}

impl FaceAnalyzer for FacePlusPlus {
    fn detect(&self, image: &Path) -> Result<FaceDetection, FaceError> {
        let form = Form::new()
            .text("api_key", &self.api_key)
            .text("api_secret", &self.api_secret)
            .text("return_attributes", &self.attributes)
            .file("image_file", image)?;

        log::debug!("POST {} ({})", self.url, image.display());
        let mut response = self.agent.post(&self.url).send(form)?;

        let status = response.status().as_u16();
        let payload = response.body_mut().read_to_string()?;
        check_response(status, &payload)
    }
}

/// A non-success status carries the whole (re-indented) payload; a success
/// body must be a detect result.
fn check_response(status: u16, payload: &str) -> Result<FaceDetection, FaceError> {
    if !(200..300).contains(&status) {
        return Err(FaceError::Api {
            status,
            payload: pretty_payload(payload),
        });
    }
    parse_detect(payload)
}

fn parse_detect(payload: &str) -> Result<FaceDetection, FaceError> {
    let response: DetectResponse = serde_json::from_str(payload)?;
    Ok(FaceDetection {
        face_count: response.face_num,
        faces: response.faces.into_iter().map(DetectedFace::from).collect(),
    })
}

/// Re-indent a JSON error body for the log; other bodies pass through.
fn pretty_payload(payload: &str) -> String {
    serde_json::from_str::<serde_json::Value>(payload)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detect_response() {
        let json = r#"{
            "request_id": "1470378968,c6f50ec6-49bd-4838-9923-11db04c40f8d",
            "time_used": 521,
            "image_id": "Dd2xUw9S/7yjr0oDHHSL/Q==",
            "face_num": 2,
            "faces": [
                {
                    "face_token": "ed319e807e039ae669a4d1af0922a0c8",
                    "face_rectangle": {"width": 140, "top": 89, "left": 104, "height": 141},
                    "attributes": {
                        "gender": {"value": "Female"},
                        "age": {"value": 21},
                        "ethnicity": {"value": "WHITE"},
                        "emotion": {"anger": 0.01, "happiness": 99.2, "neutral": 0.79}
                    }
                },
                {
                    "face_token": "aaa",
                    "face_rectangle": {"width": 40, "top": 9, "left": 10, "height": 41}
                }
            ]
        }"#;
        let detection = parse_detect(json).unwrap();
        assert_eq!(detection.face_count, 2);
        assert_eq!(detection.faces.len(), 2);

        let first = &detection.faces[0];
        assert_eq!(first.rect, PixelRect { left: 104.0, top: 89.0, width: 140.0, height: 141.0 });
        assert_eq!(first.gender, "Female");
        assert_eq!(first.age, 21);
        assert_eq!(first.ethnicity, "WHITE");
        assert_eq!(first.emotions["happiness"], 99.2);

        // Faces beyond the API's attribute limit come back bare
        assert_eq!(detection.faces[1].gender, "");
        assert!(detection.faces[1].emotions.is_empty());
    }

    #[test]
    fn test_parse_no_faces() {
        let detection = parse_detect(r#"{"face_num": 0, "faces": []}"#).unwrap();
        assert_eq!(detection, FaceDetection::default());
    }

    #[test]
    fn test_parse_error_body_is_malformed() {
        assert!(parse_detect(r#"{"error_message": "INVALID_IMAGE_SIZE"}"#).is_err());
    }

    #[test]
    fn test_pretty_payload() {
        assert_eq!(
            pretty_payload(r#"{"error_message":"AUTHENTICATION_ERROR"}"#),
            "{\n  \"error_message\": \"AUTHENTICATION_ERROR\"\n}"
        );
        assert_eq!(pretty_payload("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_error_status_keeps_full_payload() {
        let body = r#"{"error_message":"CONCURRENCY_LIMIT_EXCEEDED","request_id":"abc"}"#;
        match check_response(403, body) {
            Err(FaceError::Api { status, payload }) => {
                assert_eq!(status, 403);
                assert_eq!(payload, pretty_payload(body));
                assert!(payload.contains("\n  \"error_message\": \"CONCURRENCY_LIMIT_EXCEEDED\""));
                assert!(payload.contains("\"request_id\": \"abc\""));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_body_with_success_status() {
        let result = check_response(200, r#"{"error_message":"INVALID_IMAGE_SIZE"}"#);
        assert!(matches!(result, Err(FaceError::Response(_))));
    }

    #[test]
    fn test_success_status_parses_detection() {
        let detection = check_response(200, r#"{"face_num": 0, "faces": []}"#).unwrap();
        assert_eq!(detection.face_count, 0);
    }

    #[test]
    fn test_missing_credentials() {
        let config = FaceApiConfig::default();
        assert!(matches!(
            FacePlusPlus::new(&config),
            Err(FaceError::MissingCredentials)
        ));
    }
}
