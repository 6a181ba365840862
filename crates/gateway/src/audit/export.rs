use aegis_common::types::AuditEntry;
use aegis_common::Result;

/// Download format for an audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

pub(super) fn render(entries: &[AuditEntry], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Csv => Ok(render_csv(entries)),
    }
}

fn render_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from(
        "id,timestamp,orgId,userId,requestId,type,previousHash,hash,signature,data\n",
    );

    for entry in entries {
        let row = [
            entry.id.to_string(),
            entry.timestamp.to_rfc3339(),
            entry.org_id.to_string(),
            entry.user_id.clone().unwrap_or_default(),
            entry.request_id.to_string(),
            format!("{:?}", entry.entry_type).to_uppercase(),
            entry.previous_hash.clone(),
            entry.hash.clone(),
            entry.signature.clone(),
            entry.data.to_string(),
        ];
        let escaped: Vec<String> = row.iter().map(|field| escape_csv(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

/// Quote fields containing separators; double embedded quotes.
fn escape_csv(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::types::AuditEntryType;
    use aegis_common::{AuditEntryId, OrgId, RequestId};

    fn entry() -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::new(),
            timestamp: chrono::Utc::now(),
            org_id: OrgId::new("acme"),
            user_id: None,
            request_id: RequestId::new(),
            entry_type: AuditEntryType::Request,
            data: serde_json::json!({"model": "gpt-4", "note": "has,comma"}),
            previous_hash: "genesis".into(),
            hash: "abc".into(),
            signature: "def".into(),
        }
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let csv = render(&[entry()], ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id,timestamp"));
        assert!(lines[1].contains("REQUEST"));
    }

    #[test]
    fn test_csv_escapes_embedded_separators() {
        let csv = render(&[entry()], ExportFormat::Csv).unwrap();
        assert!(csv.contains("\"{\"\"model\"\""));
    }

    #[test]
    fn test_json_round_trips() {
        let rendered = render(&[entry()], ExportFormat::Json).unwrap();
        let parsed: Vec<AuditEntry> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].entry_type, AuditEntryType::Request);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("xml"), None);
    }
}
