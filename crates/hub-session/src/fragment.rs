use serde::{Deserialize, Serialize};

/// One element of an inference response stream.
///
/// Every response is exactly one `is_first` fragment, any number of content
/// fragments, then exactly one `is_last` fragment, all sharing `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferFragment {
    pub id: String,
    pub content: String,
    pub is_first: bool,
    pub is_last: bool,
    pub is_cancelled: bool,
    pub elapsed_ms: u64,
}

impl InferFragment {
    pub fn first(id: &str) -> Self {
        Self {
            id: id.to_string(),
            content: String::new(),
            is_first: true,
            is_last: false,
            is_cancelled: false,
            elapsed_ms: 0,
        }
    }

    pub fn content(id: &str, content: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            content: content.into(),
            is_first: false,
            is_last: false,
            is_cancelled: false,
            elapsed_ms: 0,
        }
    }

    pub fn last(id: &str, elapsed_ms: u64, cancelled: bool) -> Self {
        let seconds = elapsed_ms as f64 / 1000.0;
        let content = if cancelled {
            format!("Inference cancelled after {seconds:.0} seconds")
        } else {
            format!("Inference completed in {seconds:.0} seconds")
        };
        Self {
            id: id.to_string(),
            content,
            is_first: false,
            is_last: true,
            is_cancelled: cancelled,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(InferFragment::first("r1")).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["isFirst"], true);
        assert_eq!(json["isLast"], false);
        assert_eq!(json["elapsedMs"], 0);
    }

    #[test]
    fn last_fragment_signature() {
        let done = InferFragment::last("r1", 2_400, false);
        assert_eq!(done.content, "Inference completed in 2 seconds");
        assert!(!done.is_cancelled);

        let cancelled = InferFragment::last("r1", 12_600, true);
        assert_eq!(cancelled.content, "Inference cancelled after 13 seconds");
        assert!(cancelled.is_cancelled);
        assert_eq!(cancelled.elapsed_ms, 12_600);
    }
}
