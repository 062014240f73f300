use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::field::FieldKey;
use crate::observation::MatchContext;
use crate::snapshot::ResolvedSnapshot;

/// Evidence-backed field values of one historical match-minute.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub match_id: String,
    pub competition_id: u32,
    pub minute: u16,
    pub score_home: u8,
    pub score_away: u8,
    pub values: BTreeMap<FieldKey, f64>,
}

impl HistoryRow {
    pub fn context(&self) -> MatchContext {
        MatchContext::new(
            self.competition_id,
            self.minute,
            self.score_home,
            self.score_away,
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    pub rows: usize,
    pub values: usize,
    pub skipped_estimates: usize,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS minute_stats (
            match_id TEXT NOT NULL,
            competition_id INTEGER NOT NULL,
            minute INTEGER NOT NULL,
            score_home INTEGER NOT NULL,
            score_away INTEGER NOT NULL,
            field TEXT NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (match_id, minute, field)
        );
        CREATE INDEX IF NOT EXISTS idx_minute_stats_competition
            ON minute_stats(competition_id, match_id, minute);
        "#,
    )
    .context("init history schema")?;
    Ok(())
}

pub fn upsert_rows(conn: &mut Connection, rows: &[HistoryRow]) -> Result<IngestSummary> {
    let tx = conn.transaction().context("begin history tx")?;
    let mut summary = IngestSummary::default();
    {
        let mut stmt = tx
            .prepare(
                r#"
                INSERT INTO minute_stats
                    (match_id, competition_id, minute, score_home, score_away, field, value)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(match_id, minute, field) DO UPDATE SET
                    competition_id = excluded.competition_id,
                    score_home = excluded.score_home,
                    score_away = excluded.score_away,
                    value = excluded.value
                "#,
            )
            .context("prepare history upsert")?;
        for row in rows {
            for (key, value) in &row.values {
                stmt.execute(params![
                    row.match_id,
                    row.competition_id,
                    row.minute,
                    row.score_home,
                    row.score_away,
                    key.name(),
                    value
                ])
                .with_context(|| format!("upsert {} minute {}", row.match_id, row.minute))?;
                summary.values += 1;
            }
            summary.rows += 1;
        }
    }
    tx.commit().context("commit history tx")?;
    Ok(summary)
}

/// Stores the observed and derived fields of a sealed snapshot. Estimates are
/// left out so fitted models never learn from their own output.
pub fn record_snapshot(
    conn: &mut Connection,
    context: &MatchContext,
    snapshot: &ResolvedSnapshot,
) -> Result<IngestSummary> {
    let mut values = BTreeMap::new();
    let mut skipped = 0usize;
    for field in &snapshot.resolved_fields {
        if field.provenance.is_evidence() {
            values.insert(field.field, field.value);
        } else {
            skipped += 1;
        }
    }
    let row = HistoryRow {
        match_id: snapshot.match_id.clone(),
        competition_id: context.competition_id,
        minute: snapshot.minute,
        score_home: context.score_home,
        score_away: context.score_away,
        values,
    };
    let mut summary = upsert_rows(conn, std::slice::from_ref(&row))?;
    summary.skipped_estimates = skipped;
    Ok(summary)
}

pub fn competition_ids(conn: &Connection) -> Result<Vec<u32>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT competition_id FROM minute_stats ORDER BY competition_id")
        .context("prepare competition query")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, u32>(0))
        .context("query competitions")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read competitions")?;
    Ok(ids)
}

pub fn load_competition_rows(conn: &Connection, competition_id: u32) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, minute, score_home, score_away, field, value
            FROM minute_stats
            WHERE competition_id = ?1
            ORDER BY match_id, minute
            "#,
        )
        .context("prepare history query")?;
    let mut rows = stmt
        .query(params![competition_id])
        .context("query history rows")?;

    let mut out: Vec<HistoryRow> = Vec::new();
    while let Some(row) = rows.next().context("read history row")? {
        let match_id: String = row.get(0)?;
        let minute: u16 = row.get(1)?;
        let score_home: u8 = row.get(2)?;
        let score_away: u8 = row.get(3)?;
        let field: String = row.get(4)?;
        let value: f64 = row.get(5)?;
        let Some(key) = FieldKey::parse(&field) else {
            continue;
        };

        let same_minute = out
            .last()
            .is_some_and(|r| r.match_id == match_id && r.minute == minute);
        if !same_minute {
            out.push(HistoryRow {
                match_id,
                competition_id,
                minute,
                score_home,
                score_away,
                values: BTreeMap::new(),
            });
        }
        if let Some(current) = out.last_mut() {
            current.values.insert(key, value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Stat;

    fn row(match_id: &str, minute: u16, shots: f64) -> HistoryRow {
        HistoryRow {
            match_id: match_id.to_string(),
            competition_id: 47,
            minute,
            score_home: 1,
            score_away: 0,
            values: BTreeMap::from([
                (FieldKey::home(Stat::TotalShots), shots),
                (FieldKey::away(Stat::TotalShots), shots / 2.0),
            ]),
        }
    }

    #[test]
    fn rows_roundtrip_grouped_by_minute() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let rows = vec![row("a", 45, 6.0), row("a", 90, 12.0), row("b", 90, 9.0)];
        let summary = upsert_rows(&mut conn, &rows).unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.values, 6);

        let back = load_competition_rows(&conn, 47).unwrap();
        assert_eq!(back, rows);
        assert_eq!(competition_ids(&conn).unwrap(), vec![47]);
        assert!(load_competition_rows(&conn, 1).unwrap().is_empty());
    }

    #[test]
    fn upsert_overwrites_same_minute() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        upsert_rows(&mut conn, &[row("a", 90, 12.0)]).unwrap();
        upsert_rows(&mut conn, &[row("a", 90, 14.0)]).unwrap();
        let back = load_competition_rows(&conn, 47).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].values[&FieldKey::home(Stat::TotalShots)], 14.0);
    }
}
