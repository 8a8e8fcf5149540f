//! 7000008: legacy segment annotations become `Segment` objects owned by their
//! paragraph.
//!
//! A marker is a plain `CmBaseAnnotation` typed with [`SEGMENT_ANNOTATION_TYPE`] whose
//! `BeginObject` points at a text paragraph. Its `Comment` becomes the segment's free
//! translation and the segment keeps the marker's guid. Paragraphs that already own
//! segments are left alone. Every marker is removed. Runs delint.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::migration::services::{alternatives, append_link, reparent, unlink_from_owner};
use crate::store::delint::delint;
use crate::store::repository::ObjectRepository;
use crate::store::surrogate::Surrogate;
use crate::types::{Guid, LinkKind};
use crate::xml::Element;

/// Guid of the annotation definition that marks legacy segment annotations.
pub const SEGMENT_ANNOTATION_TYPE: &str = "b63f0702-32f7-4abb-b005-c1d2265636ad";

#[derive(Debug)]
struct Marker {
    guid: Guid,
    begin: i64,
    translation: Option<Element>,
}

#[derive(Debug, PartialEq)]
struct PlannedSegment {
    guid: Option<Guid>,
    begin: usize,
    translation: Option<Element>,
}

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let segment_type = Guid::parse(SEGMENT_ANNOTATION_TYPE)?;
    let mut by_paragraph: BTreeMap<Guid, Vec<Marker>> = BTreeMap::new();
    let mut legacy = Vec::new();
    for annotation in repo.all_instances_sans_subclasses("CmBaseAnnotation")? {
        if annotation.link_targets("AnnotationType").first() != Some(&segment_type) {
            continue;
        }
        legacy.push(annotation.guid());
        let Some(paragraph) = annotation.link_targets("BeginObject").first().copied() else {
            continue;
        };
        by_paragraph.entry(paragraph).or_default().push(Marker {
            guid: annotation.guid(),
            begin: annotation
                .scalar("BeginOffset")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            translation: annotation.property("Comment").filter(|c| has_translation(c)).cloned(),
        });
    }

    // Markers go first so their guids are free for the segments.
    for marker in &legacy {
        unlink_from_owner(repo, *marker)?;
        repo.remove(*marker)?;
    }

    let mut created = 0usize;
    for (paragraph_guid, markers) in by_paragraph {
        let Some(paragraph) = repo.try_get(paragraph_guid) else {
            debug!(paragraph = %paragraph_guid, "segment markers point at a missing paragraph");
            continue;
        };
        if !repo.metadata().is_same_or_subclass(paragraph.class_name(), "StTxtPara") {
            continue;
        }
        if !paragraph.link_targets("Segments").is_empty() {
            warn!(paragraph = %paragraph_guid, "paragraph already segmented; markers dropped");
            continue;
        }
        let len = paragraph
            .property("Contents")
            .map(|c| c.deep_text().chars().count())
            .unwrap_or(0);
        let mut paragraph = paragraph.clone();
        paragraph.take_property("Segments");

        for (ord, planned) in plan_segments(len, markers).into_iter().enumerate() {
            let guid = planned.guid.unwrap_or_else(Guid::new_v4);
            let mut segment = Surrogate::new(guid, "Segment");
            reparent(repo.metadata(), &mut segment, &paragraph, "Segments", Some(ord))?;
            segment
                .content_mut()
                .push_child(Element::new("BeginOffset").with_attr("val", planned.begin.to_string()));
            if let Some(mut translation) = planned.translation {
                translation.rename("FreeTranslation");
                segment.content_mut().push_child(translation);
            }
            append_link(repo.metadata(), &mut paragraph, "Segments", guid, LinkKind::Owning);
            repo.add(segment)?;
            created += 1;
        }
        repo.update(paragraph)?;
    }

    info!(markers = legacy.len(), segments = created, "segment annotations converted");
    delint(repo);
    Ok(())
}

fn has_translation(comment: &Element) -> bool {
    alternatives(comment).iter().any(|(_, text)| !text.trim().is_empty())
}

/// Orders markers into segments for a paragraph of `len` characters.
fn plan_segments(len: usize, mut markers: Vec<Marker>) -> Vec<PlannedSegment> {
    let end = len as i64;
    for marker in &mut markers {
        marker.begin = marker.begin.clamp(0, end);
    }
    markers.retain(|m| m.begin < end);
    markers.sort_by_key(|m| (m.begin, m.guid));

    let mut planned: Vec<PlannedSegment> = Vec::with_capacity(markers.len() + 1);
    for marker in markers {
        let begin = marker.begin as usize;
        match planned.last_mut() {
            Some(last) if last.begin == begin => {
                if last.translation.is_none() && marker.translation.is_some() {
                    last.guid = Some(marker.guid);
                    last.translation = marker.translation;
                }
            }
            _ => planned.push(PlannedSegment {
                guid: Some(marker.guid),
                begin,
                translation: marker.translation,
            }),
        }
    }

    if len > 0 && planned.first().is_none_or(|p| p.begin > 0) {
        planned.insert(
            0,
            PlannedSegment {
                guid: None,
                begin: 0,
                translation: None,
            },
        );
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(n: u128, begin: i64, text: Option<&str>) -> Marker {
        Marker {
            guid: Guid::from(uuid::Uuid::from_u128(n)),
            begin,
            translation: text.map(|t| {
                Element::new("Comment").with_child(Element::new("AStr").with_attr("ws", "en").with_text(t))
            }),
        }
    }

    fn begins(planned: &[PlannedSegment]) -> Vec<usize> {
        planned.iter().map(|p| p.begin).collect()
    }

    #[test]
    fn test_clamps_drops_and_orders() {
        let planned = plan_segments(
            10,
            vec![marker(3, 7, None), marker(1, -4, None), marker(2, 10, None), marker(4, 25, None)],
        );
        assert_eq!(begins(&planned), vec![0, 7]);
        assert_eq!(planned[0].guid, Some(Guid::from(uuid::Uuid::from_u128(1))));
    }

    #[test]
    fn test_fills_gap_at_start() {
        let planned = plan_segments(10, vec![marker(1, 4, Some("later"))]);
        assert_eq!(begins(&planned), vec![0, 4]);
        assert_eq!(planned[0].guid, None);
        assert!(planned[0].translation.is_none());
    }

    #[test]
    fn test_duplicate_begin_prefers_translated_marker() {
        let planned = plan_segments(
            10,
            vec![marker(1, 0, None), marker(2, 0, Some("hello")), marker(3, 0, Some("other"))],
        );
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].guid, Some(Guid::from(uuid::Uuid::from_u128(2))));
        let text = planned[0].translation.as_ref().map(|t| t.deep_text());
        assert_eq!(text.as_deref(), Some("hello"));
    }

    #[test]
    fn test_empty_paragraph_gets_no_segments() {
        assert!(plan_segments(0, vec![marker(1, 0, Some("x"))]).is_empty());
    }
}
