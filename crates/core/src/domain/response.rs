use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub text: String,
    pub structured_fields: BTreeMap<String, String>,
}

impl GeneratedResponse {
    pub fn new(text: impl Into<String>, structured_fields: BTreeMap<String, String>) -> Self {
        Self { text: text.into(), structured_fields }
    }

    /// Response produced when only the primary field could be recovered.
    pub fn primary_only(text: impl Into<String>) -> Self {
        Self { text: text.into(), structured_fields: BTreeMap::new() }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.structured_fields.get(name).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageChunk {
    pub ordinal: usize,
    pub total: usize,
    pub body: String,
    pub thread_parent_id: Option<String>,
}

impl MessageChunk {
    /// Numbers `bodies` from 1 in order. Thread parents are filled in at send time.
    pub fn sequence<I, S>(bodies: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bodies = bodies.into_iter().map(Into::into).collect::<Vec<String>>();
        let total = bodies.len();
        bodies
            .into_iter()
            .enumerate()
            .map(|(index, body)| Self { ordinal: index + 1, total, body, thread_parent_id: None })
            .collect()
    }

    pub fn is_multipart(&self) -> bool {
        self.total > 1
    }

    pub fn header(&self) -> Option<String> {
        self.is_multipart().then(|| format!("[Part {}/{}]", self.ordinal, self.total))
    }

    /// Text as transmitted: the bare body for a single part, header line plus body otherwise.
    pub fn render(&self) -> String {
        match self.header() {
            Some(header) => format!("{header}\n{}", self.body),
            None => self.body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{GeneratedResponse, MessageChunk};

    #[test]
    fn sequence_numbers_parts_from_one() {
        let chunks = MessageChunk::sequence(["alpha", "beta", "gamma"]);

        let ordinals = chunks.iter().map(|chunk| chunk.ordinal).collect::<Vec<_>>();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert!(chunks.iter().all(|chunk| chunk.total == 3));
        assert!(chunks.iter().all(|chunk| chunk.thread_parent_id.is_none()));
    }

    #[test]
    fn single_part_renders_without_header() {
        let chunks = MessageChunk::sequence(["short answer"]);

        assert_eq!(chunks[0].header(), None);
        assert_eq!(chunks[0].render(), "short answer");
    }

    #[test]
    fn multipart_renders_header_on_its_own_line() {
        let chunks = MessageChunk::sequence(["first", "second"]);

        assert_eq!(chunks[0].render(), "[Part 1/2]\nfirst");
        assert_eq!(chunks[1].render(), "[Part 2/2]\nsecond");
    }

    #[test]
    fn primary_only_response_has_no_secondary_fields() {
        let response = GeneratedResponse::primary_only("pipeline is healthy");

        assert_eq!(response.text, "pipeline is healthy");
        assert!(response.structured_fields.is_empty());
        assert_eq!(response.field("key_insights"), None);
    }

    #[test]
    fn field_lookup_reads_structured_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("key_insights".to_owned(), "3 stalled deals".to_owned());
        let response = GeneratedResponse::new("answer", fields);

        assert_eq!(response.field("key_insights"), Some("3 stalled deals"));
    }
}
