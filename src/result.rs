//! Decoding of the worker's response envelope.

use crate::error::{OcrError, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Recognition succeeded; `data` holds the text regions.
pub const CODE_SUCCESS: i64 = 100;
/// The image contained no text.
pub const CODE_NO_TEXT: i64 = 101;

/// One recognized text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    /// Polygon corners as emitted by the worker, usually clockwise from top-left
    #[serde(rename = "box")]
    pub rect: Vec<[i32; 2]>,
    pub score: f32,
    pub text: String,
}

/// Outcome class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    NoText,
    /// Any other worker-defined code
    Failure(i64),
}

/// A decoded worker response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrResult {
    pub code: i64,
    pub msg: String,
    pub data: Vec<TextRegion>,
}

impl OcrResult {
    pub fn status(&self) -> Status {
        match self.code {
            CODE_SUCCESS => Status::Success,
            CODE_NO_TEXT => Status::NoText,
            code => Status::Failure(code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Text of every region, one per line, in worker order.
    pub fn text(&self) -> String {
        self.data
            .iter()
            .map(|region| region.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum EnvelopeData<'a> {
    Regions(&'a [TextRegion]),
    Message(&'a str),
}

#[derive(Serialize)]
struct Envelope<'a> {
    code: i64,
    data: EnvelopeData<'a>,
}

/// Serializes back into the worker's wire envelope.
impl Serialize for OcrResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let data = if self.is_success() {
            EnvelopeData::Regions(&self.data)
        } else {
            EnvelopeData::Message(&self.msg)
        };
        Envelope {
            code: self.code,
            data,
        }
        .serialize(serializer)
    }
}

/// Parse one raw response line from the worker.
///
/// A non-success code is not an error: the result carries the code and the
/// worker's message with no regions.
pub fn parse_result(raw: &[u8]) -> Result<OcrResult> {
    let response: Value = serde_json::from_slice(raw)
        .map_err(|e| OcrError::Malformed(format!("invalid JSON: {}", e)))?;
    let object = response
        .as_object()
        .ok_or_else(|| OcrError::Malformed("response is not a JSON object".to_string()))?;

    let code = match object.get("code") {
        None | Some(Value::Null) => {
            return Err(OcrError::Malformed("no code in response".to_string()))
        }
        Some(code) => match (code.as_i64(), code.as_f64()) {
            (Some(code), _) => code,
            // 101.0 is still 101, but 100.5 is no known code
            (None, Some(float)) if float.fract() == 0.0 => float as i64,
            (None, Some(_)) => {
                return Err(OcrError::Malformed(format!("code is not an integer: {}", code)))
            }
            (None, None) => {
                return Err(OcrError::Malformed(format!("code is not a number: {}", code)))
            }
        },
    };

    if code != CODE_SUCCESS {
        return Ok(OcrResult {
            code,
            msg: message_from(object.get("data")),
            data: Vec::new(),
        });
    }

    let records = match object.get("data") {
        None | Some(Value::Null) => {
            return Err(OcrError::Malformed("no data in response".to_string()))
        }
        Some(Value::Array(records)) => records,
        Some(_) => return Err(OcrError::Malformed("data is not an array".to_string())),
    };

    let data = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            TextRegion::deserialize(record)
                .map_err(|e| OcrError::Malformed(format!("record {}: {}", i, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(OcrResult {
        code,
        msg: "parse success".to_string(),
        data,
    })
}

fn message_from(data: Option<&Value>) -> String {
    match data {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(text: &str, score: f32) -> TextRegion {
        TextRegion {
            rect: vec![[0, 0], [10, 0], [10, 10], [0, 10]],
            score,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_success() {
        let raw = br#"{"code":100,"data":[{"box":[[0,0],[10,0],[10,10],[0,10]],"score":0.97,"text":"hello"}]}
"#;
        let result = parse_result(raw).unwrap();
        assert_eq!(result.code, CODE_SUCCESS);
        assert_eq!(result.status(), Status::Success);
        assert_eq!(result.data, vec![region("hello", 0.97)]);
        assert_eq!(result.text(), "hello");
    }

    #[test]
    fn test_success_round_trip() {
        let original = OcrResult {
            code: CODE_SUCCESS,
            msg: "parse success".to_string(),
            data: vec![region("first line", 0.91), region("second line", 0.5)],
        };
        let encoded = serde_json::to_vec(&original).unwrap();
        let parsed = parse_result(&encoded).unwrap();

        assert_eq!(parsed, original);
        assert_eq!(parsed.text(), "first line\nsecond line");
    }

    #[test]
    fn test_no_text_is_not_an_error() {
        let raw = br#"{"code":101,"data":"No text found in image. Path: \"blank.png\""}"#;
        let result = parse_result(raw).unwrap();
        assert_eq!(result.status(), Status::NoText);
        assert!(result.data.is_empty());
        assert_eq!(result.msg, "No text found in image. Path: \"blank.png\"");
    }

    #[test]
    fn test_worker_failure_keeps_code_and_message() {
        let raw = br#"{"code":200,"data":"Image path dose not exist."}"#;
        let result = parse_result(raw).unwrap();
        assert_eq!(result.status(), Status::Failure(200));
        assert_eq!(result.msg, "Image path dose not exist.");
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_failure_with_structured_data_is_stringified() {
        let raw = br#"{"code":299,"data":{"reason":"oom"}}"#;
        let result = parse_result(raw).unwrap();
        assert_eq!(result.msg, r#"{"reason":"oom"}"#);
    }

    #[test]
    fn test_float_code_is_accepted() {
        let result = parse_result(br#"{"code":101.0,"data":""}"#).unwrap();
        assert_eq!(result.code, CODE_NO_TEXT);
    }

    #[test]
    fn test_fractional_code_is_not_success() {
        match parse_result(br#"{"code":100.5,"data":[]}"#) {
            Err(OcrError::Malformed(message)) => assert!(message.contains("100.5"), "{}", message),
            other => panic!("expected malformed code, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_code_is_malformed() {
        let err = parse_result(br#"{"data":[]}"#).unwrap_err();
        assert!(matches!(err, OcrError::Malformed(_)), "{:?}", err);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(matches!(
            parse_result(b"OCR init completed.\n"),
            Err(OcrError::Malformed(_))
        ));
        assert!(matches!(parse_result(b"[1,2]"), Err(OcrError::Malformed(_))));
    }

    #[test]
    fn test_success_without_array_is_malformed() {
        assert!(matches!(
            parse_result(br#"{"code":100}"#),
            Err(OcrError::Malformed(_))
        ));
        assert!(matches!(
            parse_result(br#"{"code":100,"data":"oops"}"#),
            Err(OcrError::Malformed(_))
        ));
    }

    #[test]
    fn test_bad_record_aborts_whole_parse() {
        let raw = br#"{"code":100,"data":[
            {"box":[[0,0],[1,0],[1,1],[0,1]],"score":0.9,"text":"ok"},
            {"box":"not a polygon","score":0.9,"text":"bad"}
        ]}"#;
        match parse_result(raw) {
            Err(OcrError::Malformed(message)) => assert!(message.starts_with("record 1")),
            other => panic!("expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_success_list() {
        let result = parse_result(br#"{"code":100,"data":[]}"#).unwrap();
        assert!(result.data.is_empty());
        assert_eq!(result.text(), "");
    }

    #[test]
    fn test_failure_serializes_message_as_data() {
        let result = OcrResult {
            code: CODE_NO_TEXT,
            msg: "nothing here".to_string(),
            data: Vec::new(),
        };
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"code":101,"data":"nothing here"}"#
        );
    }
}
