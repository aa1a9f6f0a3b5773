//! Fingerprints for detecting re-delivered form submissions.

use serde::Serialize;

use hrmatch_core::{ContentHashes, StoredHashes};

use super::form_api::FormSubmission;
use super::schema::{MappedFields, Target};

/// md5 of an empty field list; never treated as a match.
const EMPTY_HASH: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Which fingerprint matched an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    Composite,
    File,
    Content,
    Metadata,
}

impl DuplicateKind {
    /// Checked in this order.
    pub const PRIORITY: [DuplicateKind; 4] = [
        DuplicateKind::Composite,
        DuplicateKind::File,
        DuplicateKind::Content,
        DuplicateKind::Metadata,
    ];

    pub fn confidence(&self) -> f32 {
        match self {
            DuplicateKind::Composite => 1.0,
            DuplicateKind::File => 0.9,
            DuplicateKind::Content => 0.7,
            DuplicateKind::Metadata => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKind::Composite => "composite",
            DuplicateKind::File => "file",
            DuplicateKind::Content => "content",
            DuplicateKind::Metadata => "metadata",
        }
    }

    fn pick<'a>(&self, hashes: &'a ContentHashes) -> Option<&'a str> {
        let hash = match self {
            DuplicateKind::Composite => Some(hashes.composite_hash.as_str()),
            DuplicateKind::File => hashes.file_hash.as_deref(),
            DuplicateKind::Content => Some(hashes.content_hash.as_str()),
            DuplicateKind::Metadata => Some(hashes.metadata_hash.as_str()),
        };
        hash.filter(|h| !h.is_empty() && *h != EMPTY_HASH)
    }
}

/// An existing record matching a new submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMatch {
    pub record_id: String,
    pub kind: DuplicateKind,
}

/// md5 hex digest of `fields` sorted and joined with `|`.
pub fn hash_fields(fields: &[String]) -> String {
    let mut sorted: Vec<&str> = fields.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{:x}", md5::compute(sorted.join("|")))
}

/// md5 hex digest of a downloaded file.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

fn target_label(target: Target) -> String {
    match target {
        Target::Candidate => "candidate".to_string(),
        Target::Submission => "submission".to_string(),
        Target::Company => "company".to_string(),
        Target::JobPosting(slot) => format!("vacancy{}", slot),
    }
}

/// `entity.attribute:value` for every mapped answer.
pub fn content_fields(mapped: &MappedFields) -> Vec<String> {
    let mut fields = Vec::new();
    for (target, attributes) in mapped {
        let label = target_label(*target);
        for (attribute, value) in attributes {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            fields.push(format!("{}.{}:{}", label, attribute, value));
        }
    }
    fields
}

/// Submission id and timestamps exactly as delivered.
pub fn metadata_fields(submission: &FormSubmission) -> Vec<String> {
    vec![
        format!("submission_id:{}", submission.submission_id),
        format!(
            "submitted_at:{}",
            submission.submission_time.as_deref().unwrap_or("")
        ),
        format!(
            "last_updated:{}",
            submission.last_updated_at.as_deref().unwrap_or("")
        ),
    ]
}

/// All four fingerprints; the composite covers content, metadata and file.
pub fn compute_hashes(
    content: &[String],
    metadata: &[String],
    file_hash: Option<String>,
) -> ContentHashes {
    let mut all: Vec<String> = content.iter().chain(metadata).cloned().collect();
    if let Some(file_hash) = &file_hash {
        all.push(format!("file_hash:{}", file_hash));
    }
    ContentHashes {
        content_hash: hash_fields(content),
        file_hash,
        metadata_hash: hash_fields(metadata),
        composite_hash: hash_fields(&all),
    }
}

/// The highest-priority match among `existing`, if any.
pub fn find_duplicate(hashes: &ContentHashes, existing: &[StoredHashes]) -> Option<DuplicateMatch> {
    for kind in DuplicateKind::PRIORITY {
        let Some(hash) = kind.pick(hashes) else {
            continue;
        };
        if let Some(record) = existing
            .iter()
            .find(|r| kind.pick(&r.hashes) == Some(hash))
        {
            return Some(DuplicateMatch {
                record_id: record.record_id.clone(),
                kind,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, hashes: ContentHashes) -> StoredHashes {
        StoredHashes {
            record_id: id.to_string(),
            hashes,
        }
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = hash_fields(&["b:2".into(), "a:1".into()]);
        let b = hash_fields(&["a:1".into(), "b:2".into()]);
        assert_eq!(a, b);
        assert_eq!(a, format!("{:x}", md5::compute("a:1|b:2")));
        assert_eq!(hash_fields(&[]), EMPTY_HASH);
    }

    #[test]
    fn test_composite_includes_file_hash() {
        let content = vec!["candidate.email:a@b.co".to_string()];
        let metadata = vec!["submission_id:1".to_string()];
        let without = compute_hashes(&content, &metadata, None);
        let with = compute_hashes(&content, &metadata, Some("f00".into()));
        assert_eq!(without.content_hash, with.content_hash);
        assert_ne!(without.composite_hash, with.composite_hash);
    }

    #[test]
    fn test_priority_prefers_composite_over_earlier_content_match() {
        let content = vec!["candidate.email:a@b.co".to_string()];
        let hashes = compute_hashes(&content, &["submission_id:1".to_string()], None);
        let content_only = compute_hashes(&content, &["submission_id:2".to_string()], None);

        let existing = vec![
            stored("content-twin", content_only),
            stored("exact", hashes.clone()),
        ];
        let found = find_duplicate(&hashes, &existing).unwrap();
        assert_eq!(found.record_id, "exact");
        assert_eq!(found.kind, DuplicateKind::Composite);
        assert_eq!(found.kind.confidence(), 1.0);
    }

    #[test]
    fn test_file_match_beats_content() {
        let hashes = compute_hashes(
            &["candidate.email:new@b.co".to_string()],
            &["submission_id:9".to_string()],
            Some("abc".into()),
        );
        let other = compute_hashes(
            &["candidate.email:old@b.co".to_string()],
            &["submission_id:3".to_string()],
            Some("abc".into()),
        );
        let found = find_duplicate(&hashes, &[stored("7", other)]).unwrap();
        assert_eq!(found.kind, DuplicateKind::File);
    }

    #[test]
    fn test_empty_content_never_matches() {
        let a = compute_hashes(&[], &["submission_id:1".to_string()], None);
        let b = compute_hashes(&[], &["submission_id:2".to_string()], None);
        assert!(find_duplicate(&a, &[stored("x", b)]).is_none());
    }

    #[test]
    fn test_metadata_match_is_lowest_priority() {
        let metadata = vec!["submission_id:1".to_string()];
        let a = compute_hashes(&["x:1".to_string()], &metadata, None);
        let b = compute_hashes(&["x:2".to_string()], &metadata, None);
        let found = find_duplicate(&a, &[stored("old", b)]).unwrap();
        assert_eq!(found.kind, DuplicateKind::Metadata);
        assert!((found.kind.confidence() - 0.3).abs() < f32::EPSILON);
    }
}
