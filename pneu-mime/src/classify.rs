use crate::part::BodyPart;

/// Ordered part-id lists derived from the body tree following the
/// RFC 8621 §4.1.4 walk: `text/plain` leaves feed `textBody`,
/// `text/html` leaves feed `htmlBody`, `multipart/alternative` picks the
/// best child per list, `multipart/related` keeps its root part and
/// demotes the other children, and an explicit attachment disposition
/// always routes to `attachments`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Classified {
    pub text_body: Vec<String>,
    pub html_body: Vec<String>,
    pub attachments: Vec<String>,
}

pub fn classify(root: &BodyPart) -> Classified {
    let mut out = Classified::default();
    walk(root, &mut out);
    out
}

fn walk(part: &BodyPart, out: &mut Classified) {
    if !part.is_multipart() {
        leaf(part, out);
        return;
    }
    match part.content_type.as_str() {
        "multipart/alternative" => {
            let text_pick = part
                .sub_parts
                .iter()
                .position(|p| subtree_has_type(p, "text/plain"));
            let html_pick = part
                .sub_parts
                .iter()
                .position(|p| subtree_has_type(p, "text/html"));
            for (i, child) in part.sub_parts.iter().enumerate() {
                if text_pick == Some(i) || html_pick == Some(i) {
                    walk(child, out);
                } else {
                    demote(child, out);
                }
            }
        }
        "multipart/related" => {
            // First child is the displayed root; siblings are resources
            // referenced from it.
            let mut children = part.sub_parts.iter();
            if let Some(first) = children.next() {
                walk(first, out);
            }
            for child in children {
                demote(child, out);
            }
        }
        _ => {
            for child in &part.sub_parts {
                walk(child, out);
            }
        }
    }
}

fn leaf(part: &BodyPart, out: &mut Classified) {
    let Some(part_id) = part.part_id.clone() else {
        return;
    };
    if part.disposition == "attachment" {
        out.attachments.push(part_id);
        return;
    }
    match part.content_type.as_str() {
        "text/plain" => out.text_body.push(part_id),
        "text/html" => out.html_body.push(part_id),
        _ => out.attachments.push(part_id),
    }
}

fn demote(part: &BodyPart, out: &mut Classified) {
    for leaf_part in part.leaves() {
        if let Some(part_id) = leaf_part.part_id.clone() {
            out.attachments.push(part_id);
        }
    }
}

fn subtree_has_type(part: &BodyPart, ctype: &str) -> bool {
    if part.is_multipart() {
        part.sub_parts.iter().any(|p| subtree_has_type(p, ctype))
    } else {
        part.content_type == ctype && part.disposition != "attachment"
    }
}

/// A leaf counts toward `hasAttachment` when it is explicitly an
/// attachment, carries a filename, or is neither text nor an inline
/// image.
pub fn has_attachment(root: &BodyPart) -> bool {
    root.leaves().iter().any(|p| {
        p.disposition == "attachment"
            || !p.name.is_empty()
            || !(p.content_type.starts_with("text/")
                || (p.content_type.starts_with("image/") && p.disposition == "inline"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_part(id: &str, ctype: &str, disposition: &str, name: &str) -> BodyPart {
        BodyPart {
            part_id: Some(id.to_string()),
            content_type: ctype.to_string(),
            disposition: disposition.to_string(),
            name: name.to_string(),
            ..BodyPart::default()
        }
    }

    fn multi(ctype: &str, children: Vec<BodyPart>) -> BodyPart {
        BodyPart {
            content_type: ctype.to_string(),
            sub_parts: children,
            ..BodyPart::default()
        }
    }

    #[test]
    fn mixed_text_plus_attachment() {
        let root = multi(
            "multipart/mixed",
            vec![
                leaf_part("1", "text/plain", "", ""),
                leaf_part("2", "application/octet-stream", "", ""),
            ],
        );
        let c = classify(&root);
        assert_eq!(c.text_body, vec!["1"]);
        assert!(c.html_body.is_empty());
        assert_eq!(c.attachments, vec!["2"]);
        assert!(has_attachment(&root));
    }

    #[test]
    fn alternative_selects_per_list() {
        let root = multi(
            "multipart/alternative",
            vec![
                leaf_part("1", "text/plain", "", ""),
                leaf_part("2", "text/html", "", ""),
            ],
        );
        let c = classify(&root);
        assert_eq!(c.text_body, vec!["1"]);
        assert_eq!(c.html_body, vec!["2"]);
        assert!(c.attachments.is_empty());
        assert!(!has_attachment(&root));
    }

    #[test]
    fn related_demotes_siblings() {
        let root = multi(
            "multipart/related",
            vec![
                leaf_part("1", "text/html", "", ""),
                leaf_part("2", "image/png", "inline", ""),
            ],
        );
        let c = classify(&root);
        assert_eq!(c.html_body, vec!["1"]);
        assert_eq!(c.attachments, vec!["2"]);
        // Inline image without filename stays out of hasAttachment.
        assert!(!has_attachment(&root));
    }

    #[test]
    fn explicit_attachment_disposition_wins() {
        let root = multi(
            "multipart/mixed",
            vec![
                leaf_part("1", "text/plain", "", ""),
                leaf_part("2", "text/plain", "attachment", "notes.txt"),
            ],
        );
        let c = classify(&root);
        assert_eq!(c.text_body, vec!["1"]);
        assert_eq!(c.attachments, vec!["2"]);
        assert!(has_attachment(&root));
    }

    #[test]
    fn nested_alternative_inside_mixed() {
        let root = multi(
            "multipart/mixed",
            vec![
                multi(
                    "multipart/alternative",
                    vec![
                        leaf_part("1", "text/plain", "", ""),
                        multi(
                            "multipart/related",
                            vec![
                                leaf_part("2", "text/html", "", ""),
                                leaf_part("3", "image/png", "inline", ""),
                            ],
                        ),
                    ],
                ),
                leaf_part("4", "application/pdf", "attachment", "doc.pdf"),
            ],
        );
        let c = classify(&root);
        assert_eq!(c.text_body, vec!["1"]);
        assert_eq!(c.html_body, vec!["2"]);
        assert_eq!(c.attachments, vec!["3", "4"]);
        assert!(has_attachment(&root));
    }

    #[test]
    fn single_text_leaf() {
        let root = leaf_part("1", "text/plain", "", "");
        let c = classify(&root);
        assert_eq!(c.text_body, vec!["1"]);
        assert!(!has_attachment(&root));
    }
}
