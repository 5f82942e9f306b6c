//! Input checks applied before a request reaches the service.

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    doc_id::DocumentId,
    document::UploadMetadata,
    error::{Error, Result},
    search::SearchQuery,
    storage,
};

pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

pub const ALLOWED_MIMETYPES: [&str; 4] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];

pub fn document_id(id: &str) -> Result<DocumentId> {
    DocumentId::parse(id.trim())
}

/// Check an upload before anything is written.
pub fn upload(meta: &UploadMetadata, bytes: &[u8]) -> Result<()> {
    if meta.employee_uuid.trim().is_empty() {
        return Err(Error::invalid("employee uuid is required"));
    }
    if meta.original_name.trim().is_empty() {
        return Err(Error::invalid("original file name is required"));
    }
    if storage::base_name(&meta.original_name).trim().is_empty() {
        return Err(Error::invalid(format!(
            "original file name {:?} names a directory, not a file",
            meta.original_name
        )));
    }
    if bytes.is_empty() {
        return Err(Error::invalid("file is empty"));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(Error::invalid(format!(
            "file is too large ({} bytes, maximum is 100MB)",
            bytes.len()
        )));
    }
    if !mimetype_allowed(&meta.mimetype) {
        return Err(Error::invalid(format!(
            "file type {:?} is not allowed; accepted types are PDF, Word and plain text",
            meta.mimetype
        )));
    }
    for (what, value) in [
        ("title", &meta.title),
        ("description", &meta.description),
        ("category", &meta.category),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(Error::invalid(format!("{what} must not be blank")));
        }
    }
    if meta.tags.iter().any(|t| t.trim().is_empty()) {
        return Err(Error::invalid("tags must not be blank"));
    }
    Ok(())
}

pub fn mimetype_allowed(mimetype: &str) -> bool {
    let essence = mimetype.split(';').next().unwrap_or_default().trim();
    ALLOWED_MIMETYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(essence))
}

/// Parse a comma-separated tag list.
pub fn tags(input: &str) -> Result<Vec<String>> {
    let tags: Vec<String> = input.split(',').map(|t| t.trim().to_string()).collect();
    if tags.iter().any(String::is_empty) {
        return Err(Error::invalid(format!("invalid tag list {input:?}")));
    }
    Ok(tags)
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
pub fn date(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::invalid(format!("invalid date {input:?}")))
}

pub fn date_range(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<()> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(Error::invalid(format!(
            "start date {} is after end date {}",
            from.date_naive(),
            to.date_naive()
        ))),
        _ => Ok(()),
    }
}

/// The simple search form needs at least one parameter.
pub fn search_query(query: &SearchQuery) -> Result<()> {
    if query.is_blank() {
        return Err(Error::invalid("at least one search parameter is required"));
    }
    date_range(query.filters.date_from, query.filters.date_to)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;
    use crate::search::Filters;

    fn meta() -> UploadMetadata {
        UploadMetadata {
            original_name: "contrato.pdf".into(),
            mimetype: "application/pdf".into(),
            employee_uuid: "11111111-1111-4111-8111-111111111111".into(),
            ..Default::default()
        }
    }

    #[test]
    fn ids() {
        assert!(document_id(" 11111111-1111-4111-8111-111111111111 ").is_ok());
        assert!(matches!(document_id("abc"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn upload_rules() {
        assert!(upload(&meta(), b"%PDF").is_ok());
        assert!(upload(&meta(), b"").is_err());

        let mut m = meta();
        m.employee_uuid = " ".into();
        assert!(upload(&m, b"x").is_err());

        let mut m = meta();
        m.mimetype = "image/png".into();
        assert!(upload(&m, b"x").is_err());

        let mut m = meta();
        m.mimetype = "text/plain; charset=utf-8".into();
        assert!(upload(&m, b"x").is_ok());

        let mut m = meta();
        m.category = Some("".into());
        assert!(upload(&m, b"x").is_err());
    }

    #[test]
    fn directory_names_are_rejected() {
        for name in ["dir/", "C:\\docs\\", "nominas/ "] {
            let mut m = meta();
            m.original_name = name.into();
            assert!(matches!(upload(&m, b"x"), Err(Error::InvalidInput(_))), "{name:?}");
        }

        let mut m = meta();
        m.original_name = "docs/contrato.pdf".into();
        assert!(upload(&m, b"x").is_ok());
    }

    #[test]
    fn oversized_upload() {
        let big = vec![0u8; MAX_UPLOAD_BYTES + 1];
        assert!(upload(&meta(), &big).is_err());
    }

    #[test]
    fn tag_lists() {
        assert_eq!(tags(" a, b ,c").unwrap(), vec!["a", "b", "c"]);
        assert!(tags("a,,b").is_err());
        assert!(tags("").is_err());
    }

    #[test]
    fn dates() {
        let d = date("2024-03-09").unwrap();
        assert_eq!((d.year(), d.month(), d.day(), d.hour()), (2024, 3, 9, 0));
        let d = date("2024-03-09T10:00:00+02:00").unwrap();
        assert_eq!(d.hour(), 8);
        assert!(date("09/03/2024").is_err());
    }

    #[test]
    fn search_requires_a_parameter_and_ordered_dates() {
        assert!(search_query(&SearchQuery::default()).is_err());
        assert!(search_query(&SearchQuery::text("contrato")).is_ok());

        let reversed = SearchQuery {
            filters: Filters {
                date_from: Some(date("2024-05-01").unwrap()),
                date_to: Some(date("2024-01-01").unwrap()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(search_query(&reversed), Err(Error::InvalidInput(_))));
    }
}
