// 📥 Bulk import of draft properties from CSV
//
// Columns: title,address,rent_pence,bedrooms,landlord_email[,description]

use crate::auth::Role;
use crate::db::find_user_by_email;
use crate::entities::property::{create_draft, NewProperty};
use crate::error::DomainResult;
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyRow {
    pub title: String,
    pub address: String,
    pub rent_pence: i64,
    pub bedrooms: u32,
    pub landlord_email: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,

    /// One line per skipped row
    pub problems: Vec<String>,
}

pub fn load_properties_csv(csv_path: &Path) -> Result<Vec<PropertyRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        // +2: header line and 1-based numbering
        let row: PropertyRow =
            result.with_context(|| format!("Failed to parse CSV row {}", line + 2))?;
        rows.push(row);
    }

    Ok(rows)
}

/// Insert each row as a draft property owned by the landlord named in it.
///
/// Rows whose landlord is unknown, lacks the LANDLORD role or whose fields
/// fail validation are skipped and reported; everything else is inserted.
/// A storage error aborts the whole import and nothing is kept.
pub fn import_properties(
    conn: &Connection,
    rows: Vec<PropertyRow>,
    actor: &str,
) -> DomainResult<ImportReport> {
    let mut report = ImportReport::default();
    let tx = conn.unchecked_transaction()?;

    for row in rows {
        let landlord = match find_user_by_email(&tx, &row.landlord_email)? {
            Some(user) if user.role == Some(Role::Landlord) => user,
            Some(_) => {
                report.skipped += 1;
                report
                    .problems
                    .push(format!("{}: {} is not a landlord", row.title, row.landlord_email));
                continue;
            }
            None => {
                report.skipped += 1;
                report
                    .problems
                    .push(format!("{}: unknown landlord {}", row.title, row.landlord_email));
                continue;
            }
        };

        let fields = NewProperty {
            title: row.title.clone(),
            address: row.address,
            rent_pence: row.rent_pence,
            bedrooms: row.bedrooms,
            description: row.description.unwrap_or_default(),
        };

        if let Err(e) = fields.validate() {
            report.skipped += 1;
            report.problems.push(format!("{}: {}", row.title, e));
            continue;
        }

        create_draft(&tx, &landlord.id, fields, actor)?;
        report.inserted += 1;
    }

    tx.commit()?;

    tracing::info!(inserted = report.inserted, skipped = report.skipped, "property import finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_user, tests::test_conn};
    use crate::entities::property::list_properties;
    use crate::status::PropertyStatus;
    use std::io::Write;

    #[test]
    fn test_load_and_import() {
        let conn = test_conn();
        create_user(&conn, "lena@example.com", "Lena", Some(Role::Landlord)).unwrap();
        create_user(&conn, "ari@example.com", "Ari", Some(Role::Applicant)).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "title,address,rent_pence,bedrooms,landlord_email,description").unwrap();
        writeln!(file, "Garden flat, 1 Park Rd, 120000, 2, LENA@example.com, Has a garden").unwrap();
        writeln!(file, "Studio,9 Quay St,80000,0,lena@example.com").unwrap();
        writeln!(file, "Loft,3 Mill Ln,95000,1,ari@example.com,").unwrap();
        writeln!(file, "Barn,Farm Rd,150000,4,nobody@example.com,").unwrap();
        writeln!(file, "Shed,Back Yard,0,0,lena@example.com,").unwrap();
        file.flush().unwrap();

        let rows = load_properties_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].title, "Garden flat");
        assert_eq!(rows[1].description, None);

        let report = import_properties(&conn, rows, "importer").unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.problems.len(), 3);

        let properties = list_properties(&conn).unwrap();
        assert_eq!(properties.len(), 2);
        assert!(properties.iter().all(|p| p.status == PropertyStatus::Draft));
    }

    #[test]
    fn test_storage_error_discards_earlier_rows() {
        let conn = test_conn();
        create_user(&conn, "lena@example.com", "Lena", Some(Role::Landlord)).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER refuse_barn BEFORE INSERT ON properties
             WHEN instr(NEW.document, 'Barn') > 0
             BEGIN
                SELECT RAISE(ABORT, 'disk full');
             END;",
        )
        .unwrap();

        let row = |title: &str| PropertyRow {
            title: title.to_string(),
            address: "1 Farm Rd".to_string(),
            rent_pence: 100_000,
            bedrooms: 2,
            landlord_email: "lena@example.com".to_string(),
            description: None,
        };

        let result = import_properties(&conn, vec![row("Cottage"), row("Barn"), row("Mill")], "importer");

        assert!(result.is_err());
        assert!(list_properties(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "title,address,rent_pence,bedrooms,landlord_email").unwrap();
        writeln!(file, "Flat,1 Road,lots,2,lena@example.com").unwrap();
        file.flush().unwrap();

        let err = load_properties_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }
}
