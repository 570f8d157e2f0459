//! The certificate revocation list.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::trust::RevocationEntry;

/// Current revocation list. Read on every trust evaluation.
pub fn load(conn: &Connection) -> Result<Vec<RevocationEntry>> {
    let mut stmt = conn.prepare("SELECT issuer, serial, fingerprint FROM crl ORDER BY id")?;
    let entries = stmt
        .query_map([], |r| {
            Ok(RevocationEntry::new(
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Replace the whole list.
pub fn replace(conn: &Connection, entries: &[RevocationEntry]) -> Result<usize> {
    conn.execute("DELETE FROM crl", [])?;
    for e in entries {
        conn.execute(
            "INSERT INTO crl (issuer, serial, fingerprint) VALUES (?1, ?2, ?3)",
            params![e.issuer, e.serial, e.fingerprint],
        )?;
    }
    Ok(entries.len())
}
