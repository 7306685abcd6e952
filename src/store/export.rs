// Signal Export - CSV and JSON renderings of the signals table

use uuid::Uuid;

use crate::core::error::StoreError;
use crate::store::SignalRow;

pub const CSV_HEADER: &str =
    "id,session_id,created_at,timestamp,signal_type,direction,price,price_after_1m,price_after_5m,outcome";

/// Render rows as CSV, header first. None fields render empty.
pub fn signals_to_csv(rows: &[SignalRow]) -> String {
    let mut out = String::with_capacity(64 + rows.len() * 96);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            row.id,
            row.session_id,
            row.created_at,
            row.timestamp,
            row.signal_type,
            row.direction,
            row.price,
            row.price_after_1m.map(|p| p.to_string()).unwrap_or_default(),
            row.price_after_5m.map(|p| p.to_string()).unwrap_or_default(),
            row.outcome,
        ));
    }
    out
}

/// Parse CSV produced by `signals_to_csv` back into rows.
pub fn signals_from_csv(csv: &str) -> Result<Vec<SignalRow>, StoreError> {
    let mut lines = csv.lines();
    match lines.next() {
        Some(header) if header == CSV_HEADER => {}
        other => {
            return Err(StoreError::MalformedRow(format!(
                "unexpected header: {:?}",
                other
            )))
        }
    }

    let mut rows = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 10 {
            return Err(StoreError::MalformedRow(format!(
                "expected 10 fields, got {}: {}",
                fields.len(),
                line
            )));
        }
        let parse_price = |s: &str| -> Result<Option<f64>, StoreError> {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<f64>()
                    .map(Some)
                    .map_err(|e| StoreError::MalformedRow(e.to_string()))
            }
        };
        rows.push(SignalRow {
            id: Uuid::parse_str(fields[0])
                .map_err(|e| StoreError::MalformedRow(e.to_string()))?,
            session_id: Uuid::parse_str(fields[1])
                .map_err(|e| StoreError::MalformedRow(e.to_string()))?,
            created_at: fields[2].to_string(),
            timestamp: fields[3]
                .parse()
                .map_err(|e: std::num::ParseIntError| StoreError::MalformedRow(e.to_string()))?,
            signal_type: fields[4].to_string(),
            direction: fields[5].to_string(),
            price: fields[6]
                .parse()
                .map_err(|e: std::num::ParseFloatError| StoreError::MalformedRow(e.to_string()))?,
            price_after_1m: parse_price(fields[7])?,
            price_after_5m: parse_price(fields[8])?,
            outcome: fields[9].to_string(),
        });
    }
    Ok(rows)
}

/// JSON export is just the serialized row list.
pub fn signals_to_json(rows: &[SignalRow]) -> String {
    serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_row(with_outcome: bool) -> SignalRow {
        SignalRow {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            created_at: "2025-01-02T03:04:05Z".to_string(),
            timestamp: 1_735_000_000_000,
            signal_type: "absorption".to_string(),
            direction: "bearish".to_string(),
            price: 20123.25,
            price_after_1m: with_outcome.then_some(20124.0),
            price_after_5m: with_outcome.then_some(20121.5),
            outcome: if with_outcome { "win" } else { "pending" }.to_string(),
        }
    }

    #[test]
    fn test_csv_round_trip_preserves_rows() {
        let rows = vec![make_row(true), make_row(false)];
        let csv = signals_to_csv(&rows);
        let parsed = signals_from_csv(&csv).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn test_csv_header_and_empty_optionals() {
        let csv = signals_to_csv(&[make_row(false)]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), CSV_HEADER);
        let row = lines.next().unwrap();
        assert!(row.ends_with(",,,pending"));
    }

    #[test]
    fn test_bad_header_rejected() {
        assert!(signals_from_csv("nope\n1,2,3").is_err());
    }

    #[test]
    fn test_truncated_row_rejected() {
        let csv = format!("{}\n1,2,3\n", CSV_HEADER);
        assert!(signals_from_csv(&csv).is_err());
    }

    #[test]
    fn test_json_export_parses_back() {
        let rows = vec![make_row(true)];
        let json = signals_to_json(&rows);
        let parsed: Vec<SignalRow> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rows);
    }
}
