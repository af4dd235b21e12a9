//! Tag and repository listings, and the referrers scan

use bytes::Bytes;

use crate::descriptor::{Descriptor, ManifestFields};
use crate::digest::Digest;
use crate::request::Page;

/// One page of a lexically ordered listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Entries on this page
    pub items: Vec<String>,
    /// Cursor for the next page, if the listing was cut short
    pub next: Option<String>,
}

impl Listing {
    /// Apply `last` then `n` to an already sorted sequence of names.
    pub fn paginate<I>(sorted: I, page: &Page) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut remaining = sorted
            .into_iter()
            .filter(|name| page.last.as_ref().is_none_or(|last| name > last))
            .peekable();

        let items: Vec<String> = match page.n {
            Some(n) => remaining.by_ref().take(n).collect(),
            None => remaining.by_ref().collect(),
        };

        let next = if remaining.peek().is_some() {
            items.last().cloned()
        } else {
            None
        };

        Listing { items, next }
    }
}

/// A stored manifest as seen by the referrers scan.
pub(crate) struct Candidate<'a> {
    pub digest: &'a Digest,
    pub media_type: &'a str,
    pub data: &'a Bytes,
}

/// Collect the descriptors of every candidate whose `subject` is `subject`.
///
/// Candidates that do not parse are skipped: referrer links are
/// best-effort metadata. Results are ordered by digest.
pub(crate) fn referrers<'a>(
    candidates: impl IntoIterator<Item = Candidate<'a>>,
    subject: &Digest,
    artifact_type: Option<&str>,
) -> Vec<Descriptor> {
    let mut found: Vec<Descriptor> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let fields: ManifestFields = match serde_json::from_slice(candidate.data) {
                Ok(fields) => fields,
                Err(err) => {
                    tracing::debug!(digest = %candidate.digest, "skipping unparseable manifest: {err}");
                    return None;
                }
            };

            if fields.subject.as_ref()?.digest != *subject {
                return None;
            }

            let found_type = fields.artifact_type();
            if let Some(wanted) = artifact_type {
                if found_type.as_deref() != Some(wanted) {
                    return None;
                }
            }

            Some(Descriptor {
                media_type: candidate.media_type.to_string(),
                size: candidate.data.len() as u64,
                digest: candidate.digest.clone(),
                artifact_type: found_type,
                annotations: fields.annotations,
            })
        })
        .collect();

    found.sort_by(|a, b| a.digest.cmp(&b.digest));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::OCI_MANIFEST;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_last_then_n() {
        let page = Page {
            n: Some(1),
            last: Some("b".into()),
        };
        let listing = Listing::paginate(names(&["a", "b", "c", "d"]), &page);
        assert_eq!(listing.items, names(&["c"]));
        assert_eq!(listing.next.as_deref(), Some("c"));
    }

    #[test]
    fn test_unbounded() {
        let listing = Listing::paginate(names(&["a", "b"]), &Page::default());
        assert_eq!(listing.items, names(&["a", "b"]));
        assert_eq!(listing.next, None);
    }

    #[test]
    fn test_exact_page_has_no_next() {
        let page = Page {
            n: Some(2),
            last: None,
        };
        let listing = Listing::paginate(names(&["a", "b"]), &page);
        assert_eq!(listing.items, names(&["a", "b"]));
        assert_eq!(listing.next, None);
    }

    #[test]
    fn test_zero_and_past_end() {
        let page = Page {
            n: Some(0),
            last: None,
        };
        assert!(Listing::paginate(names(&["a"]), &page).items.is_empty());

        let page = Page {
            n: None,
            last: Some("z".into()),
        };
        assert!(Listing::paginate(names(&["a", "b"]), &page).items.is_empty());
    }

    #[test]
    fn test_cursor_need_not_exist() {
        let page = Page {
            n: None,
            last: Some("bb".into()),
        };
        let listing = Listing::paginate(names(&["a", "b", "c"]), &page);
        assert_eq!(listing.items, names(&["c"]));
    }

    #[test]
    fn test_referrers_scan() {
        let subject = Digest::sha256(b"subject");
        let referrer = Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "schemaVersion": 2,
                "config": { "mediaType": "application/vnd.example.sig", "size": 2, "digest": Digest::sha256(b"{}") },
                "layers": [],
                "subject": { "mediaType": OCI_MANIFEST, "size": 7, "digest": subject },
                "annotations": { "org.example": "yes" },
            }))
            .unwrap(),
        );
        let unrelated = Bytes::from_static(br#"{"schemaVersion":2,"layers":[]}"#);
        let garbage = Bytes::from_static(b"not json");

        let referrer_digest = Digest::sha256(&referrer);
        let unrelated_digest = Digest::sha256(&unrelated);
        let garbage_digest = Digest::sha256(&garbage);
        let candidates = || {
            vec![
                Candidate {
                    digest: &referrer_digest,
                    media_type: OCI_MANIFEST,
                    data: &referrer,
                },
                Candidate {
                    digest: &unrelated_digest,
                    media_type: OCI_MANIFEST,
                    data: &unrelated,
                },
                Candidate {
                    digest: &garbage_digest,
                    media_type: "application/octet-stream",
                    data: &garbage,
                },
            ]
        };

        let found = referrers(candidates(), &subject, None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].digest, referrer_digest);
        assert_eq!(found[0].size, referrer.len() as u64);
        assert_eq!(
            found[0].artifact_type.as_deref(),
            Some("application/vnd.example.sig")
        );
        assert_eq!(found[0].annotations.as_ref().unwrap()["org.example"], "yes");

        assert_eq!(
            referrers(candidates(), &subject, Some("application/vnd.example.sig")).len(),
            1
        );
        assert!(referrers(candidates(), &subject, Some("application/other")).is_empty());
        assert!(referrers(candidates(), &Digest::sha256(b"nothing"), None).is_empty());
    }
}
